//! Device binding - stable fingerprint hash from platform identifiers.
//!
//! The fingerprint folds stable device identifiers into a fixed textual
//! form `k1:v1||k2:v2||...`; missing fields are omitted, never substituted
//! with defaults. Only the SHA-256 hex of that string ever reaches the key
//! derivation; the raw string is cached at most until its first consumption.

use std::sync::Arc;

use parking_lot::Mutex;
use sysinfo::System;
use zeroize::Zeroize;

use crate::crypto::kdf::sha256_hex;

/// Supplier of raw platform identifiers. The platform layer provides the
/// real values; tests inject a fixed source.
pub trait FingerprintSource: Send + Sync {
    fn installation_id(&self) -> Option<String>;
    fn manufacturer(&self) -> Option<String>;
    fn model(&self) -> Option<String>;
    fn device_name(&self) -> Option<String>;
    fn os_version(&self) -> Option<String>;
    fn total_memory_bytes(&self) -> Option<u64>;
    fn cpu_archs(&self) -> Vec<String>;
    fn install_time_ms(&self) -> Option<i64>;
}

/// Fingerprint source backed by `sysinfo` plus compile-time arch info.
/// Fields the host OS does not expose are omitted from the fingerprint.
pub struct SystemFingerprintSource;

impl FingerprintSource for SystemFingerprintSource {
    fn installation_id(&self) -> Option<String> {
        None
    }

    fn manufacturer(&self) -> Option<String> {
        None
    }

    fn model(&self) -> Option<String> {
        System::name()
    }

    fn device_name(&self) -> Option<String> {
        System::host_name()
    }

    fn os_version(&self) -> Option<String> {
        System::os_version()
    }

    fn total_memory_bytes(&self) -> Option<u64> {
        let sys = System::new_all();
        Some(sys.total_memory())
    }

    fn cpu_archs(&self) -> Vec<String> {
        vec![std::env::consts::ARCH.to_string()]
    }

    fn install_time_ms(&self) -> Option<i64> {
        None
    }
}

/// A collected fingerprint: the raw identifier string and its SHA-256 hex.
#[derive(Clone)]
pub struct DeviceFingerprint {
    pub raw: String,
    pub hash: String,
}

/// Collects and caches the device fingerprint. The cache is cleared after
/// each consumption to keep the raw identifier string off the heap.
pub struct FingerprintProvider {
    source: Arc<dyn FingerprintSource>,
    cache: Mutex<Option<DeviceFingerprint>>,
}

impl FingerprintProvider {
    pub fn new(source: Arc<dyn FingerprintSource>) -> Self {
        Self {
            source,
            cache: Mutex::new(None),
        }
    }

    /// Build the fingerprint, reusing the cache if present.
    pub fn collect(&self) -> DeviceFingerprint {
        let mut cache = self.cache.lock();
        if let Some(ref fp) = *cache {
            return fp.clone();
        }

        let mut parts: Vec<String> = Vec::new();
        let mut push = |key: &str, value: Option<String>| {
            if let Some(v) = value {
                parts.push(format!("{key}:{v}"));
            }
        };

        push("install_id", self.source.installation_id());
        push("manufacturer", self.source.manufacturer());
        push("model", self.source.model());
        push("device", self.source.device_name());
        push("os", self.source.os_version());
        push("memory", self.source.total_memory_bytes().map(|m| m.to_string()));
        let archs = self.source.cpu_archs();
        push("cpu", if archs.is_empty() { None } else { Some(archs.join("|")) });
        push("install_time", self.source.install_time_ms().map(|t| t.to_string()));

        let raw = parts.join("||");
        let fp = DeviceFingerprint {
            hash: sha256_hex(raw.as_bytes()),
            raw,
        };
        *cache = Some(fp.clone());
        fp
    }

    /// Return the fingerprint hash and clear the cached raw string.
    pub fn consume_hash(&self) -> String {
        let hash = self.collect().hash;
        self.clear_cache();
        hash
    }

    /// Drop the cached fingerprint, wiping the raw string.
    pub fn clear_cache(&self) {
        if let Some(mut fp) = self.cache.lock().take() {
            fp.raw.zeroize();
            fp.hash.zeroize();
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Fixed-value source for deterministic tests.
    pub struct FixedFingerprintSource;

    impl FingerprintSource for FixedFingerprintSource {
        fn installation_id(&self) -> Option<String> {
            Some("install-0001".into())
        }

        fn manufacturer(&self) -> Option<String> {
            Some("LeafWorks".into())
        }

        fn model(&self) -> Option<String> {
            Some("LW-9".into())
        }

        fn device_name(&self) -> Option<String> {
            Some("test-device".into())
        }

        fn os_version(&self) -> Option<String> {
            Some("14".into())
        }

        fn total_memory_bytes(&self) -> Option<u64> {
            Some(8 * 1024 * 1024 * 1024)
        }

        fn cpu_archs(&self) -> Vec<String> {
            vec!["arm64-v8a".into(), "armeabi-v7a".into()]
        }

        fn install_time_ms(&self) -> Option<i64> {
            Some(1_700_000_000_000)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::FixedFingerprintSource;
    use super::*;

    #[test]
    fn test_fingerprint_format() {
        let provider = FingerprintProvider::new(Arc::new(FixedFingerprintSource));
        let fp = provider.collect();
        assert_eq!(
            fp.raw,
            "install_id:install-0001||manufacturer:LeafWorks||model:LW-9||\
             device:test-device||os:14||memory:8589934592||\
             cpu:arm64-v8a|armeabi-v7a||install_time:1700000000000"
        );
        assert_eq!(fp.hash.len(), 64);
    }

    #[test]
    fn test_fingerprint_stable() {
        let provider = FingerprintProvider::new(Arc::new(FixedFingerprintSource));
        let a = provider.consume_hash();
        let b = provider.consume_hash();
        assert_eq!(a, b);
    }

    #[test]
    fn test_missing_fields_omitted() {
        struct SparseSource;
        impl FingerprintSource for SparseSource {
            fn installation_id(&self) -> Option<String> {
                None
            }
            fn manufacturer(&self) -> Option<String> {
                None
            }
            fn model(&self) -> Option<String> {
                Some("LW-9".into())
            }
            fn device_name(&self) -> Option<String> {
                None
            }
            fn os_version(&self) -> Option<String> {
                None
            }
            fn total_memory_bytes(&self) -> Option<u64> {
                None
            }
            fn cpu_archs(&self) -> Vec<String> {
                Vec::new()
            }
            fn install_time_ms(&self) -> Option<i64> {
                None
            }
        }

        let provider = FingerprintProvider::new(Arc::new(SparseSource));
        assert_eq!(provider.collect().raw, "model:LW-9");
    }

    #[test]
    fn test_cache_cleared_after_consume() {
        let provider = FingerprintProvider::new(Arc::new(FixedFingerprintSource));
        provider.consume_hash();
        assert!(provider.cache.lock().is_none());
    }
}

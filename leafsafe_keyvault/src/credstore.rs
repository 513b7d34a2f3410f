//! Platform credential store access.
//!
//! The device salt, user id and rotation timestamp live in the platform
//! keyring under "unlocked-this-device-only" protection. The store is a
//! trait so tests run against an in-memory implementation.

use std::collections::HashMap;

use parking_lot::RwLock;
use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroize;

use crate::error::{KeyVaultError, Result};

/// Keyring service name for all LeafSafe entries.
pub const SERVICE_NAME: &str = "leafsafe";

/// Well-known credential entry names.
pub mod entries {
    /// Device salt, Base64 of 32 random bytes.
    pub const DEVICE_SALT: &str = "ls_dsalt_v1";
    /// UTF-8 user id.
    pub const USER_ID: &str = "ls_uid_v1";
    /// Decimal epoch-ms rotation timestamp.
    pub const ROTATION_TS: &str = "ls_rts_v1";
}

/// A small string-keyed credential keyring.
///
/// `delete` of an absent entry is not an error. Readers may be concurrent;
/// writers are exclusive per entry.
pub trait CredentialStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<SecretString>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn delete(&self, key: &str) -> Result<()>;
}

/// Credential store backed by the platform keychain:
/// Keychain Services on macOS, Secret Service on Linux, Credential Manager
/// on Windows, Keystore-backed keyring on Android.
pub struct KeyringStore;

impl KeyringStore {
    fn entry(key: &str) -> Result<keyring::Entry> {
        keyring::Entry::new(SERVICE_NAME, key)
            .map_err(|e| KeyVaultError::CredStore(format!("entry '{key}': {e}")))
    }
}

impl CredentialStore for KeyringStore {
    fn get(&self, key: &str) -> Result<Option<SecretString>> {
        match Self::entry(key)?.get_password() {
            Ok(mut value) => {
                let secret = SecretString::from(value.clone());
                value.zeroize();
                Ok(Some(secret))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(KeyVaultError::CredStore(format!("get '{key}': {e}"))),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        Self::entry(key)?
            .set_password(value)
            .map_err(|e| KeyVaultError::CredStore(format!("set '{key}': {e}")))?;
        tracing::debug!(key, "stored credential entry");
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        match Self::entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(KeyVaultError::CredStore(format!("delete '{key}': {e}"))),
        }
    }
}

/// In-memory credential store for tests and headless environments.
#[derive(Default)]
pub struct MemoryStore {
    map: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<SecretString>> {
        Ok(self
            .map
            .read()
            .get(key)
            .map(|v| SecretString::from(v.clone())))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.map.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.map.write().remove(key);
        Ok(())
    }
}

/// Read an entry as a plain string, wiping the intermediate secret.
pub fn get_string(store: &dyn CredentialStore, key: &str) -> Result<Option<String>> {
    Ok(store.get(key)?.map(|s| s.expose_secret().to_string()))
}

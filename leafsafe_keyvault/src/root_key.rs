//! Root key service - device salt lifecycle and root secret derivation.
//!
//! The root secret binds stored content to this device and this user:
//! PBKDF2-SHA512 over `sha256_hex(fingerprint) || userId` with the device
//! salt. It is derived on demand, never persisted, and owned by the
//! caller's derivation scope.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as B64, Engine as _};

use crate::credstore::{self, entries, CredentialStore};
use crate::crypto::{kdf, random_bytes, wipe};
use crate::error::{KeyVaultError, Result};
use crate::fingerprint::FingerprintProvider;
use crate::secret::SecretBuffer;

/// Device salt length in bytes.
pub const DEVICE_SALT_LEN: usize = 32;

/// PBKDF2-SHA512 iteration count for root secret derivation.
pub const PBKDF2_ITERATIONS: u32 = 310_000;

/// Root secret length in bytes.
pub const ROOT_SECRET_LEN: usize = 64;

pub struct RootKeyService {
    store: Arc<dyn CredentialStore>,
    fingerprint: FingerprintProvider,
}

impl RootKeyService {
    pub fn new(store: Arc<dyn CredentialStore>, fingerprint: FingerprintProvider) -> Self {
        Self { store, fingerprint }
    }

    /// Generate and persist the device salt on first launch. Idempotent:
    /// an existing salt is never replaced.
    pub fn init_device_salt(&self, user_id: &str) -> Result<()> {
        if self.store.get(entries::DEVICE_SALT)?.is_none() {
            let mut salt = random_bytes(DEVICE_SALT_LEN)?;
            self.store.set(entries::DEVICE_SALT, &B64.encode(&salt))?;
            wipe::wipe(&mut salt);
            tracing::info!("device salt generated");
        }
        self.store.set(entries::USER_ID, user_id)?;
        Ok(())
    }

    /// Derive the 64-byte root secret. An explicit `user_id` wins over the
    /// stored one. The fingerprint cache is cleared as part of derivation.
    pub fn derive_root_secret(&self, user_id: Option<&str>) -> Result<SecretBuffer> {
        let salt = self.load_salt()?;

        let user = match user_id {
            Some(u) => u.to_string(),
            None => credstore::get_string(self.store.as_ref(), entries::USER_ID)?
                .ok_or(KeyVaultError::UserIdMissing)?,
        };

        let mut password = self.fingerprint.consume_hash().into_bytes();
        password.extend_from_slice(user.as_bytes());

        let root = kdf::pbkdf2_sha512(&password, salt.expose(), PBKDF2_ITERATIONS, ROOT_SECRET_LEN);
        wipe::wipe(&mut password);
        Ok(root)
    }

    /// The kill switch. Deletes the salt, user id and rotation timestamp;
    /// all three deletions are attempted regardless of individual failures.
    /// Afterwards the root secret - and everything below it - is
    /// unrecoverable by design.
    pub fn destroy_device_salt(&self) -> Result<()> {
        let mut first_err = None;
        for key in [entries::DEVICE_SALT, entries::USER_ID, entries::ROTATION_TS] {
            if let Err(e) = self.store.delete(key) {
                tracing::warn!(key, error = %e, "credential delete failed during destroy");
                first_err.get_or_insert(e);
            }
        }
        tracing::warn!("device salt destroyed - stored content is now undecryptable");
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn load_salt(&self) -> Result<SecretBuffer> {
        let encoded = credstore::get_string(self.store.as_ref(), entries::DEVICE_SALT)?
            .ok_or(KeyVaultError::SaltMissing)?;
        let decoded = B64.decode(encoded.as_bytes())?;
        if decoded.len() != DEVICE_SALT_LEN {
            return Err(KeyVaultError::InvalidKeyLength {
                expected: DEVICE_SALT_LEN,
                actual: decoded.len(),
            });
        }
        Ok(SecretBuffer::from_vec(decoded))
    }
}

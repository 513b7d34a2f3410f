//! Wrapped-key envelopes and versioned rotation.
//!
//! A chapter root key is stored wrapped: AES-GCM under a wrapping key
//! derived from the root secret, the chapter id and the envelope version.
//! Rotation unwraps at version N and rewraps at N + 1; fragment files are
//! never rewritten.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::credstore::{self, entries, CredentialStore};
use crate::crypto::{aead, kdf, KEY_LEN};
use crate::error::{KeyVaultError, Result};
use crate::secret::SecretBuffer;

/// Rotation is due after seven days.
pub const ROTATION_INTERVAL_MS: i64 = 7 * 24 * 60 * 60 * 1000;

const WRAP_INFO: &[u8] = b"chapter-key-wrap";

/// Versioned AES-GCM envelope around a chapter root key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WrappedChapterKey {
    pub wrapped_b64: String,
    pub rotation_timestamp_ms: i64,
    pub version: u32,
}

pub struct KeyRotationService {
    store: Arc<dyn CredentialStore>,
}

impl KeyRotationService {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }

    /// True when no rotation timestamp is recorded or the last one is at
    /// least seven days old.
    pub fn is_rotation_due(&self) -> Result<bool> {
        match credstore::get_string(self.store.as_ref(), entries::ROTATION_TS)? {
            Some(raw) => match raw.parse::<i64>() {
                Ok(ts) => Ok(Utc::now().timestamp_millis() - ts >= ROTATION_INTERVAL_MS),
                Err(_) => Ok(true),
            },
            None => Ok(true),
        }
    }

    /// Persist "now" as the last rotation time.
    pub fn record_rotation_timestamp(&self) -> Result<()> {
        self.store.set(
            entries::ROTATION_TS,
            &Utc::now().timestamp_millis().to_string(),
        )
    }

    /// Wrap `chapter_root` under the version-bound wrapping key.
    pub fn wrap_chapter_key(
        &self,
        chapter_root: &[u8],
        root: &SecretBuffer,
        chapter_id: &str,
        version: u32,
    ) -> Result<WrappedChapterKey> {
        let wrapping_key = derive_wrapping_key(root, chapter_id, version)?;
        let blob = aead::aes_gcm_encrypt(wrapping_key.expose(), chapter_root, None)?;
        drop(wrapping_key);

        Ok(WrappedChapterKey {
            wrapped_b64: B64.encode(blob),
            rotation_timestamp_ms: Utc::now().timestamp_millis(),
            version,
        })
    }

    /// Open an envelope with the wrapping key for its recorded version.
    /// A tag mismatch is reported as `UnwrapFail` - corruption or version
    /// skew, decided by the caller's policy.
    pub fn unwrap_chapter_key(
        &self,
        wrapped: &WrappedChapterKey,
        root: &SecretBuffer,
        chapter_id: &str,
    ) -> Result<SecretBuffer> {
        let wrapping_key = derive_wrapping_key(root, chapter_id, wrapped.version)?;
        let blob = B64.decode(wrapped.wrapped_b64.as_bytes())?;
        let chapter_root = aead::aes_gcm_decrypt(wrapping_key.expose(), &blob, None)
            .map_err(|e| match e {
                KeyVaultError::AuthFail => KeyVaultError::UnwrapFail,
                other => other,
            })?;
        if chapter_root.len() != KEY_LEN {
            return Err(KeyVaultError::UnwrapFail);
        }
        Ok(chapter_root)
    }

    /// Re-wrap an envelope at the next version. The intermediate chapter
    /// root is wiped when it leaves scope.
    pub fn rotate(
        &self,
        wrapped: &WrappedChapterKey,
        root: &SecretBuffer,
        chapter_id: &str,
    ) -> Result<WrappedChapterKey> {
        let chapter_root = self.unwrap_chapter_key(wrapped, root, chapter_id)?;
        let rewrapped =
            self.wrap_chapter_key(chapter_root.expose(), root, chapter_id, wrapped.version + 1)?;
        tracing::info!(
            chapter = chapter_id,
            version = rewrapped.version,
            "chapter key rotated"
        );
        Ok(rewrapped)
    }
}

fn derive_wrapping_key(root: &SecretBuffer, chapter_id: &str, version: u32) -> Result<SecretBuffer> {
    let salt = format!("wrap:{chapter_id}:{version}");
    kdf::hkdf_sha256(root.expose(), Some(salt.as_bytes()), WRAP_INFO, KEY_LEN)
}

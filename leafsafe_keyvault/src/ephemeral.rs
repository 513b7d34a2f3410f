//! Ephemeral render keys from runtime entropy.
//!
//! A render key lives for exactly one render call: it is derived from the
//! chapter root plus a snapshot of runtime entropy, drives the display
//! mutation, and is wiped by the caller afterwards. The 16-byte memory salt
//! is owned here and regenerated on every foreground transition.

use parking_lot::Mutex;

use crate::crypto::{kdf, random_bytes, wipe, KEY_LEN};
use crate::error::Result;
use crate::secret::SecretBuffer;

pub const MEMORY_SALT_LEN: usize = 16;

const EPHEMERAL_INFO: &[u8] = b"runtime-ephemeral";

/// Snapshot of the runtime entropy feeding one render key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeEntropy {
    pub boot_time_ms: i64,
    pub frame_counter: u32,
    /// Scroll velocity in micro-pixels per millisecond.
    pub scroll_velocity_upx_ms: i64,
    pub chunk_index: i64,
}

pub struct EphemeralKeyService {
    memory_salt: Mutex<SecretBuffer>,
}

impl EphemeralKeyService {
    pub fn new() -> Result<Self> {
        Ok(Self {
            memory_salt: Mutex::new(SecretBuffer::from_vec(random_bytes(MEMORY_SALT_LEN)?)),
        })
    }

    /// Replace the memory salt. The old salt is wiped in place before the
    /// new bytes become observable.
    pub fn regenerate_memory_salt(&self) -> Result<()> {
        let fresh = random_bytes(MEMORY_SALT_LEN)?;
        let mut salt = self.memory_salt.lock();
        salt.wipe();
        salt.expose_mut().copy_from_slice(&fresh);
        Ok(())
    }

    /// Zero the memory salt without replacement (background transition).
    pub fn wipe_memory_salt(&self) {
        self.memory_salt.lock().wipe();
    }

    /// Derive a 32-byte render key:
    /// HKDF(ikm = chapterRoot, salt = serialize(entropy) || memorySalt).
    pub fn derive_ephemeral_key(
        &self,
        chapter_root: &[u8],
        entropy: &RuntimeEntropy,
    ) -> Result<SecretBuffer> {
        let mut blob = [0u8; 32 + MEMORY_SALT_LEN];
        blob[0..8].copy_from_slice(&entropy.boot_time_ms.to_le_bytes());
        blob[8..16].copy_from_slice(&(entropy.frame_counter as i64).to_le_bytes());
        blob[16..24].copy_from_slice(
            &entropy
                .scroll_velocity_upx_ms
                .saturating_mul(1000)
                .to_le_bytes(),
        );
        blob[24..32].copy_from_slice(&entropy.chunk_index.to_le_bytes());
        {
            let salt = self.memory_salt.lock();
            blob[32..].copy_from_slice(salt.expose());
        }

        let key = kdf::hkdf_sha256(chapter_root, Some(&blob), EPHEMERAL_INFO, KEY_LEN);
        wipe::wipe(&mut blob);
        key
    }
}

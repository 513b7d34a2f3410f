//! Canary tagging - key-derived sentinels inside fragment plaintext.
//!
//! The canary catches substitution even when the AEAD succeeds: it is
//! derived from the chapter root and the fragment index, so plaintext moved
//! between slots fails the sentinel check. Layout appended to each
//! fragment: `canary(16) || pad(16)`, where the pad is derivable from the
//! canary and is not checked.

use crate::crypto::{ct_eq, kdf, wipe};
use crate::error::Result;
use crate::secret::SecretBuffer;

pub const CANARY_LEN: usize = 16;
pub const CANARY_OVERHEAD: usize = CANARY_LEN * 2;

const CANARY_INFO: &[u8] = b"canary-derive";

/// Derive the 16-byte canary for one fragment slot.
pub fn derive_canary(chapter_root: &[u8], fragment_index: u32) -> Result<SecretBuffer> {
    let salt = format!("canary:{fragment_index}");
    kdf::hkdf_sha256(chapter_root, Some(salt.as_bytes()), CANARY_INFO, CANARY_LEN)
}

fn pad_byte(canary: &[u8], i: usize) -> u8 {
    canary[i % CANARY_LEN] ^ ((i as u8 + 1).wrapping_mul(0x5A))
}

/// Append `canary || pad` to `data`.
pub fn embed(data: &[u8], canary: &[u8]) -> Vec<u8> {
    debug_assert_eq!(canary.len(), CANARY_LEN);
    let mut out = Vec::with_capacity(data.len() + CANARY_OVERHEAD);
    out.extend_from_slice(data);
    out.extend_from_slice(canary);
    for i in 0..CANARY_LEN {
        out.push(pad_byte(canary, i));
    }
    out
}

/// Constant-time check of the canary region of an embedded blob.
pub fn verify(blob: &[u8], expected: &[u8]) -> bool {
    if blob.len() < CANARY_OVERHEAD {
        return false;
    }
    let start = blob.len() - CANARY_OVERHEAD;
    ct_eq(&blob[start..start + CANARY_LEN], expected)
}

/// Strip the 32-byte canary overhead, wiping the overhead-bearing buffer.
pub fn strip(mut blob: Vec<u8>) -> Vec<u8> {
    let cut = blob.len().saturating_sub(CANARY_OVERHEAD);
    let data = blob[..cut].to_vec();
    wipe::wipe(&mut blob);
    data
}

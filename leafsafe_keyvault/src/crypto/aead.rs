//! AES-256-GCM, HMAC-SHA256 and the CSPRNG.
//!
//! Ciphertext wire format is always `IV(12) || CT || tag(16)`. The AEAD tag
//! failure path returns `AuthFail` without key material in the error, and
//! any partially produced plaintext is wiped before the error is signalled.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use super::wipe;
use crate::error::{KeyVaultError, Result};
use crate::secret::SecretBuffer;

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;
pub const HMAC_LEN: usize = 32;

/// Upper bound accepted by [`random_bytes`].
pub const MAX_RANDOM_BYTES: usize = 4096;

type HmacSha256 = Hmac<Sha256>;

/// Generate `n` bytes from the OS CSPRNG, `1 <= n <= 4096`.
pub fn random_bytes(n: usize) -> Result<Vec<u8>> {
    if n == 0 || n > MAX_RANDOM_BYTES {
        return Err(KeyVaultError::InvalidInput(format!(
            "random_bytes length out of range: {n}"
        )));
    }
    let mut out = vec![0u8; n];
    getrandom::getrandom(&mut out)
        .map_err(|e| KeyVaultError::EncryptionFailed(format!("csprng failure: {e}")))?;
    Ok(out)
}

fn cipher_for(key: &[u8]) -> Result<Aes256Gcm> {
    if key.len() != KEY_LEN {
        return Err(KeyVaultError::InvalidKeyLength {
            expected: KEY_LEN,
            actual: key.len(),
        });
    }
    Aes256Gcm::new_from_slice(key).map_err(|e| KeyVaultError::EncryptionFailed(e.to_string()))
}

/// Encrypt with AES-256-GCM under a fresh random 96-bit IV.
///
/// Returns `IV || CT || tag`. Callers must never reuse the output IV with
/// the same key for other data; a fresh IV is drawn on every call.
pub fn aes_gcm_encrypt(key: &[u8], plaintext: &[u8], aad: Option<&[u8]>) -> Result<Vec<u8>> {
    let cipher = cipher_for(key)?;

    let mut iv = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut iv);
    let nonce = Nonce::from_slice(&iv);

    let payload = Payload {
        msg: plaintext,
        aad: aad.unwrap_or(&[]),
    };
    let ciphertext = cipher
        .encrypt(nonce, payload)
        .map_err(|e| KeyVaultError::EncryptionFailed(e.to_string()))?;

    let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    blob.extend_from_slice(&iv);
    blob.extend_from_slice(&ciphertext);
    Ok(blob)
}

/// Decrypt an `IV || CT || tag` blob. Tag mismatch returns `AuthFail`.
pub fn aes_gcm_decrypt(key: &[u8], blob: &[u8], aad: Option<&[u8]>) -> Result<SecretBuffer> {
    if blob.len() < NONCE_LEN + TAG_LEN {
        return Err(KeyVaultError::AuthFail);
    }
    let cipher = cipher_for(key)?;
    let nonce = Nonce::from_slice(&blob[..NONCE_LEN]);

    let payload = Payload {
        msg: &blob[NONCE_LEN..],
        aad: aad.unwrap_or(&[]),
    };
    match cipher.decrypt(nonce, payload) {
        Ok(plaintext) => Ok(SecretBuffer::from_vec(plaintext)),
        Err(_) => Err(KeyVaultError::AuthFail),
    }
}

/// HMAC-SHA256 over `data`.
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; HMAC_LEN] {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    let digest: [u8; HMAC_LEN] = mac.finalize().into_bytes().into();
    digest
}

/// Constant-time HMAC verification.
pub fn hmac_verify(key: &[u8], data: &[u8], expected: &[u8]) -> bool {
    let mut computed = hmac_sha256(key, data);
    let matches = ct_eq(&computed, expected);
    wipe::wipe(&mut computed);
    matches
}

/// Constant-time equality of two byte slices. Unequal lengths compare false
/// without early exit over the shared prefix.
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

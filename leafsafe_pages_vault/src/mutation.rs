//! Display mutation - reversible XOR stream over render output.
//!
//! Decrypted page bytes are XOR'd with a keystream derived from the
//! ephemeral render key before they are handed to the UI, so the buffer is
//! not a valid image until the widget reverses it at draw time. The
//! keystream is AES-256-CTR under a zero nonce; apply and reverse are the
//! same operation.

use aes::cipher::{KeyIvInit, StreamCipher};
use aes::Aes256;
use ctr::Ctr128BE;

use crate::error::{VaultError, VaultResult};

type Aes256Ctr = Ctr128BE<Aes256>;

const ZERO_IV: [u8; 16] = [0u8; 16];

/// XOR `buf` in place with the keystream for `key`.
pub fn apply(buf: &mut [u8], key: &[u8]) -> VaultResult<()> {
    let mut cipher = Aes256Ctr::new_from_slices(key, &ZERO_IV).map_err(|_| {
        VaultError::ProgramPreconditionViolated(format!(
            "mutation key must be 32 bytes, got {}",
            key.len()
        ))
    })?;
    cipher.apply_keystream(buf);
    Ok(())
}

/// Strict inverse of [`apply`].
pub fn reverse(buf: &mut [u8], key: &[u8]) -> VaultResult<()> {
    apply(buf, key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_reverse_is_identity() {
        let key = [0x21u8; 32];
        let original: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let mut buf = original.clone();

        apply(&mut buf, &key).unwrap();
        assert_ne!(buf, original);
        reverse(&mut buf, &key).unwrap();
        assert_eq!(buf, original);
    }

    #[test]
    fn test_keys_produce_distinct_streams() {
        let mut a = vec![0u8; 64];
        let mut b = vec![0u8; 64];
        apply(&mut a, &[0x01u8; 32]).unwrap();
        apply(&mut b, &[0x02u8; 32]).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_mutated_bytes_differ_everywhere_nontrivially() {
        let key = [0x21u8; 32];
        let mut buf = vec![0xAAu8; 4096];
        apply(&mut buf, &key).unwrap();
        // A keystream XOR should leave essentially no byte untouched.
        let unchanged = buf.iter().filter(|&&b| b == 0xAA).count();
        assert!(unchanged < 64);
    }

    #[test]
    fn test_bad_key_length_rejected() {
        let mut buf = vec![0u8; 16];
        assert!(apply(&mut buf, &[0u8; 16]).is_err());
    }

    #[test]
    fn test_empty_buffer_ok() {
        let mut buf: Vec<u8> = Vec::new();
        apply(&mut buf, &[0x21u8; 32]).unwrap();
    }
}

//! Key derivation primitives: PBKDF2-SHA512 and HKDF-SHA256.

use hkdf::Hkdf;
use pbkdf2::pbkdf2_hmac;
use sha2::{Digest, Sha256, Sha512};

use crate::error::{KeyVaultError, Result};
use crate::secret::SecretBuffer;

/// Derive `dk_len` bytes from `password` with PBKDF2-HMAC-SHA512.
pub fn pbkdf2_sha512(password: &[u8], salt: &[u8], iterations: u32, dk_len: usize) -> SecretBuffer {
    let mut out = SecretBuffer::new(dk_len);
    pbkdf2_hmac::<Sha512>(password, salt, iterations, out.expose_mut());
    out
}

/// HKDF-SHA256 Extract-then-Expand.
///
/// `out_len` is bounded by the HKDF limit of 255 * 32 bytes; anything larger
/// is a caller bug and surfaces as `KeyDerivationFailed`.
pub fn hkdf_sha256(ikm: &[u8], salt: Option<&[u8]>, info: &[u8], out_len: usize) -> Result<SecretBuffer> {
    let hk = Hkdf::<Sha256>::new(salt, ikm);
    let mut okm = SecretBuffer::new(out_len);
    hk.expand(info, okm.expose_mut())
        .map_err(|e| KeyVaultError::KeyDerivationFailed(e.to_string()))?;
    Ok(okm)
}

/// Lowercase hex SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pbkdf2_deterministic() {
        let a = pbkdf2_sha512(b"password", b"salt-salt-salt-salt", 1000, 64);
        let b = pbkdf2_sha512(b"password", b"salt-salt-salt-salt", 1000, 64);
        assert_eq!(a.expose(), b.expose());
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_pbkdf2_salt_sensitivity() {
        let a = pbkdf2_sha512(b"password", b"salt-a", 1000, 64);
        let b = pbkdf2_sha512(b"password", b"salt-b", 1000, 64);
        assert_ne!(a.expose(), b.expose());
    }

    #[test]
    fn test_hkdf_info_separation() {
        let ikm = [0x42u8; 32];
        let a = hkdf_sha256(&ikm, None, b"purpose-a", 32).unwrap();
        let b = hkdf_sha256(&ikm, None, b"purpose-b", 32).unwrap();
        assert_ne!(a.expose(), b.expose());
    }

    #[test]
    fn test_hkdf_salt_separation() {
        let ikm = [0x42u8; 32];
        let a = hkdf_sha256(&ikm, Some(b"salt-a"), b"purpose", 32).unwrap();
        let b = hkdf_sha256(&ikm, Some(b"salt-b"), b"purpose", 32).unwrap();
        assert_ne!(a.expose(), b.expose());
    }

    #[test]
    fn test_hkdf_rejects_oversized_output() {
        let ikm = [0x42u8; 32];
        assert!(hkdf_sha256(&ikm, None, b"too-long", 255 * 32 + 1).is_err());
    }

    #[test]
    fn test_sha256_hex_known_vector() {
        // SHA-256("abc")
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}

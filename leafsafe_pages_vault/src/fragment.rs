//! Fragment engine - split, encrypt, verify, decrypt.
//!
//! Images are stored as 50-200 KB fragments, each independently
//! encrypt-then-MAC'd:
//!
//! ```text
//! plaintext  = data || canary(16) || pad(16)
//! ciphertext = IV(12) || AES-256-GCM(plaintext, aad = "imageId:index") || tag(16)
//! hmac       = HMAC-SHA256(hmac_key, ciphertext)
//! ```
//!
//! Decryption is fail-fast in this order: HMAC, AAD consistency, GCM tag,
//! canary. Nothing after a failing step runs, and any plaintext produced by
//! a failing step is wiped before the error returns.

use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use leafsafe_keyvault::canary;
use leafsafe_keyvault::crypto::{aead, wipe};
use leafsafe_keyvault::{ChapterKeyBundle, KeyVaultError};
use rand::Rng;

use crate::error::{VaultError, VaultResult};
use crate::manifest::FragmentRecord;

/// Fragment size bounds in bytes. Sizes are drawn uniformly from
/// `[MIN, MAX)`; the tail fragment takes whatever remains.
pub const FRAGMENT_MIN_SIZE: usize = 50 * 1024;
pub const FRAGMENT_MAX_SIZE: usize = 200 * 1024;

/// A transient slice of the source image, alive only during ingest.
pub struct RawFragment {
    pub index: u32,
    pub bytes: Vec<u8>,
}

impl Drop for RawFragment {
    fn drop(&mut self) {
        wipe::wipe(&mut self.bytes);
    }
}

/// An encrypted fragment in flight between the engine and storage.
pub struct EncryptedFragment {
    pub index: u32,
    /// `IV || CT || tag`, the exact bytes stored (Base64) on disk.
    pub encrypted_data: Vec<u8>,
    pub aad_b64: String,
    pub hmac_hex: String,
    pub original_size: usize,
}

/// The UTF-8 AAD binding a fragment to its image and slot.
pub fn fragment_aad(image_id: &str, index: u32) -> String {
    format!("{image_id}:{index}")
}

/// Split `data` into contiguous, non-overlapping fragments covering the
/// whole input. Zero-length input yields zero fragments; input below the
/// minimum yields a single fragment.
pub fn split(data: &[u8]) -> Vec<RawFragment> {
    let mut fragments = Vec::new();
    let mut rng = rand::thread_rng();
    let mut offset = 0usize;
    let mut index = 0u32;

    while offset < data.len() {
        let remaining = data.len() - offset;
        let size = if remaining <= FRAGMENT_MIN_SIZE {
            remaining
        } else {
            rng.gen_range(FRAGMENT_MIN_SIZE..FRAGMENT_MAX_SIZE).min(remaining)
        };
        fragments.push(RawFragment {
            index,
            bytes: data[offset..offset + size].to_vec(),
        });
        offset += size;
        index += 1;
    }

    fragments
}

/// Encrypt one fragment: canary embed -> AES-GCM -> HMAC.
pub fn encrypt_fragment(
    bundle: &ChapterKeyBundle,
    image_id: &str,
    fragment: &RawFragment,
) -> VaultResult<EncryptedFragment> {
    let sentinel = canary::derive_canary(bundle.chapter_root(), fragment.index)?;
    let mut plaintext = canary::embed(&fragment.bytes, sentinel.expose());

    let aad = fragment_aad(image_id, fragment.index);
    let encrypted_data =
        aead::aes_gcm_encrypt(bundle.chapter_root(), &plaintext, Some(aad.as_bytes()))?;
    wipe::wipe(&mut plaintext);

    let hmac = aead::hmac_sha256(bundle.hmac_key(), &encrypted_data);

    Ok(EncryptedFragment {
        index: fragment.index,
        aad_b64: B64.encode(aad.as_bytes()),
        hmac_hex: hex::encode(hmac),
        original_size: fragment.bytes.len(),
        encrypted_data,
    })
}

/// Step 1: recompute the HMAC over the stored blob and compare in constant
/// time against the manifest value.
pub fn verify_hmac(
    bundle: &ChapterKeyBundle,
    record: &FragmentRecord,
    encrypted_data: &[u8],
) -> VaultResult<()> {
    let expected = hex::decode(&record.hmac_hex)
        .map_err(|_| VaultError::ManifestCorrupted("malformed hmac hex".into()))?;
    if !aead::hmac_verify(bundle.hmac_key(), encrypted_data, &expected) {
        return Err(VaultError::IntegrityFail);
    }
    Ok(())
}

/// Step 2: the manifest AAD must equal the recomputed `imageId:index`.
/// Checked before any AES call.
pub fn verify_aad(image_id: &str, record: &FragmentRecord) -> VaultResult<String> {
    let aad = fragment_aad(image_id, record.index);
    if record.aad_b64 != B64.encode(aad.as_bytes()) {
        return Err(VaultError::SubstitutionFail);
    }
    Ok(aad)
}

/// Step 3: AES-GCM decrypt under the recomputed AAD. Returns the
/// canary-bearing plaintext.
pub fn decrypt_authenticated(
    bundle: &ChapterKeyBundle,
    aad: &str,
    encrypted_data: &[u8],
) -> VaultResult<Vec<u8>> {
    let plaintext =
        aead::aes_gcm_decrypt(bundle.chapter_root(), encrypted_data, Some(aad.as_bytes()))
            .map_err(|e| match e {
                KeyVaultError::AuthFail => VaultError::AuthFail,
                other => VaultError::from(other),
            })?;
    // Move out of the SecretBuffer wrapper; the caller owns the wipe from
    // here (the registry or an error path).
    Ok(plaintext.expose().to_vec())
}

/// Steps 4-5: verify the canary for the slot and strip the overhead.
/// A mismatch wipes the plaintext before returning `CanaryFail`.
pub fn check_and_strip_canary(
    bundle: &ChapterKeyBundle,
    index: u32,
    mut plaintext: Vec<u8>,
) -> VaultResult<Vec<u8>> {
    let expected = canary::derive_canary(bundle.chapter_root(), index)?;
    if !canary::verify(&plaintext, expected.expose()) {
        wipe::wipe(&mut plaintext);
        return Err(VaultError::CanaryFail);
    }
    Ok(canary::strip(plaintext))
}

/// Full fail-fast pipeline for one fragment.
pub fn decrypt_fragment(
    bundle: &ChapterKeyBundle,
    image_id: &str,
    record: &FragmentRecord,
    encrypted_data: &[u8],
) -> VaultResult<Vec<u8>> {
    verify_hmac(bundle, record, encrypted_data)?;
    let aad = verify_aad(image_id, record)?;
    let plaintext = decrypt_authenticated(bundle, &aad, encrypted_data)?;
    check_and_strip_canary(bundle, record.index, plaintext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use leafsafe_keyvault::{derive_bundle, SecretBuffer};

    fn bundle() -> ChapterKeyBundle {
        let root = SecretBuffer::from_slice(&[0x42u8; 64]);
        derive_bundle(&root, "ch42").unwrap()
    }

    fn record_for(frag: &EncryptedFragment) -> FragmentRecord {
        FragmentRecord {
            index: frag.index,
            filename: format!("{}.dat", frag.index),
            aad_b64: frag.aad_b64.clone(),
            hmac_hex: frag.hmac_hex.clone(),
            original_size: frag.original_size,
            encrypted_size: frag.encrypted_data.len(),
        }
    }

    #[test]
    fn test_split_empty_input() {
        assert!(split(&[]).is_empty());
    }

    #[test]
    fn test_split_small_input_single_fragment() {
        let fragments = split(&[0xAAu8; 1000]);
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].bytes.len(), 1000);
    }

    #[test]
    fn test_split_covers_input_contiguously() {
        let data: Vec<u8> = (0..500_000u32).map(|i| i as u8).collect();
        let fragments = split(&data);
        assert!(fragments.len() >= 3);

        let mut reassembled = Vec::new();
        for (i, frag) in fragments.iter().enumerate() {
            assert_eq!(frag.index as usize, i);
            if i + 1 < fragments.len() {
                assert!(frag.bytes.len() >= FRAGMENT_MIN_SIZE);
                assert!(frag.bytes.len() < FRAGMENT_MAX_SIZE);
            }
            reassembled.extend_from_slice(&frag.bytes);
        }
        assert_eq!(reassembled, data);
    }

    #[test]
    fn test_fragment_roundtrip() {
        let bundle = bundle();
        let raw = RawFragment {
            index: 0,
            bytes: vec![0xAB; 60_000],
        };
        let enc = encrypt_fragment(&bundle, "img-1", &raw).unwrap();
        let record = record_for(&enc);

        let plain = decrypt_fragment(&bundle, "img-1", &record, &enc.encrypted_data).unwrap();
        assert_eq!(plain, raw.bytes);
    }

    #[test]
    fn test_bit_flip_anywhere_fails_closed() {
        let bundle = bundle();
        let raw = RawFragment {
            index: 0,
            bytes: vec![0x5A; 2048],
        };
        let enc = encrypt_fragment(&bundle, "img-1", &raw).unwrap();
        let record = record_for(&enc);

        // Sample positions across IV, ciphertext body and tag.
        let len = enc.encrypted_data.len();
        for offset in [0, 5, 12, len / 2, len - 17, len - 1] {
            let mut tampered = enc.encrypted_data.clone();
            tampered[offset] ^= 0x01;
            let err = decrypt_fragment(&bundle, "img-1", &record, &tampered).unwrap_err();
            assert!(
                matches!(err, VaultError::IntegrityFail | VaultError::AuthFail),
                "offset {offset} gave {err:?}"
            );
        }
    }

    #[test]
    fn test_aad_swap_detected_before_aes() {
        let bundle = bundle();
        let raw0 = RawFragment {
            index: 0,
            bytes: vec![0x01; 1024],
        };
        let raw1 = RawFragment {
            index: 1,
            bytes: vec![0x02; 1024],
        };
        let enc0 = encrypt_fragment(&bundle, "img-1", &raw0).unwrap();
        let enc1 = encrypt_fragment(&bundle, "img-1", &raw1).unwrap();

        // Swap the stored AAD strings between the two records.
        let mut record0 = record_for(&enc0);
        record0.aad_b64 = enc1.aad_b64.clone();

        let err = verify_aad("img-1", &record0).unwrap_err();
        assert!(matches!(err, VaultError::SubstitutionFail));
    }

    #[test]
    fn test_wrong_chapter_key_is_auth_fail() {
        let bundle = bundle();
        let other = {
            let root = SecretBuffer::from_slice(&[0x43u8; 64]);
            derive_bundle(&root, "ch42").unwrap()
        };
        let raw = RawFragment {
            index: 0,
            bytes: vec![0xAB; 1024],
        };
        let enc = encrypt_fragment(&bundle, "img-1", &raw).unwrap();
        let mut record = record_for(&enc);

        // Pretend the foreign manifest matches so the HMAC gate passes.
        record.hmac_hex = hex::encode(aead::hmac_sha256(other.hmac_key(), &enc.encrypted_data));
        let err = decrypt_fragment(&other, "img-1", &record, &enc.encrypted_data).unwrap_err();
        assert!(matches!(err, VaultError::AuthFail));
    }

    #[test]
    fn test_canary_check_catches_slot_move() {
        let bundle = bundle();
        // Encrypt a fragment at slot 3, then present it as slot 3 with a
        // manifest claiming slot 3 but ask the canary gate about slot 4.
        let raw = RawFragment {
            index: 3,
            bytes: vec![0xCD; 512],
        };
        let enc = encrypt_fragment(&bundle, "img-1", &raw).unwrap();
        let aad = fragment_aad("img-1", 3);
        let plaintext = decrypt_authenticated(&bundle, &aad, &enc.encrypted_data).unwrap();

        let err = check_and_strip_canary(&bundle, 4, plaintext).unwrap_err();
        assert!(matches!(err, VaultError::CanaryFail));
    }
}

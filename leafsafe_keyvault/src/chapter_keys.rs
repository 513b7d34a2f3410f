//! Per-chapter key bundle derivation.
//!
//! Each chapter gets a root key derived from the device-bound root secret,
//! plus three domain-separated subkeys. The subkeys use a 32-byte zero salt
//! and distinct info labels; separation comes from the labels.

use crate::crypto::{kdf, WipeFields, KEY_LEN};
use crate::error::Result;
use crate::secret::SecretBuffer;

/// HKDF info labels for the chapter hierarchy.
pub mod labels {
    pub const CHAPTER_ROOT: &[u8] = b"chapter-root";
    pub const HMAC: &[u8] = b"hmac-key";
    pub const METADATA: &[u8] = b"metadata-key";
    pub const FRAGMENT_MAP: &[u8] = b"fragment-map";
}

const ZERO_SALT: [u8; KEY_LEN] = [0u8; KEY_LEN];

/// The four 32-byte chapter subkeys. Owned by the active reading session;
/// every key is wiped when the bundle drops.
pub struct ChapterKeyBundle {
    chapter_root: SecretBuffer,
    hmac: SecretBuffer,
    metadata: SecretBuffer,
    fragment_map: SecretBuffer,
}

impl ChapterKeyBundle {
    /// Fragment encryption key.
    pub fn chapter_root(&self) -> &[u8] {
        self.chapter_root.expose()
    }

    /// Fragment HMAC key.
    pub fn hmac_key(&self) -> &[u8] {
        self.hmac.expose()
    }

    /// Chapter metadata encryption key.
    pub fn metadata_key(&self) -> &[u8] {
        self.metadata.expose()
    }

    /// Fragment manifest encryption key.
    pub fn fragment_map_key(&self) -> &[u8] {
        self.fragment_map.expose()
    }

    /// Wipe all four subkeys and release the bundle.
    pub fn wipe(mut self) {
        self.wipe_fields();
    }
}

impl WipeFields for ChapterKeyBundle {
    fn wipe_fields(&mut self) {
        self.chapter_root.wipe();
        self.hmac.wipe();
        self.metadata.wipe();
        self.fragment_map.wipe();
    }
}

/// Derive the chapter root key: HKDF(root, salt = chapterId, "chapter-root").
pub fn derive_chapter_root(root: &SecretBuffer, chapter_id: &str) -> Result<SecretBuffer> {
    kdf::hkdf_sha256(
        root.expose(),
        Some(chapter_id.as_bytes()),
        labels::CHAPTER_ROOT,
        KEY_LEN,
    )
}

/// Derive the full bundle for a chapter.
pub fn derive_bundle(root: &SecretBuffer, chapter_id: &str) -> Result<ChapterKeyBundle> {
    let chapter_root = derive_chapter_root(root, chapter_id)?;
    let hmac = kdf::hkdf_sha256(chapter_root.expose(), Some(&ZERO_SALT), labels::HMAC, KEY_LEN)?;
    let metadata = kdf::hkdf_sha256(
        chapter_root.expose(),
        Some(&ZERO_SALT),
        labels::METADATA,
        KEY_LEN,
    )?;
    let fragment_map = kdf::hkdf_sha256(
        chapter_root.expose(),
        Some(&ZERO_SALT),
        labels::FRAGMENT_MAP,
        KEY_LEN,
    )?;

    Ok(ChapterKeyBundle {
        chapter_root,
        hmac,
        metadata,
        fragment_map,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> SecretBuffer {
        SecretBuffer::from_slice(&[0x42u8; 64])
    }

    #[test]
    fn test_bundle_keys_differ() {
        let bundle = derive_bundle(&root(), "ch42").unwrap();
        assert_ne!(bundle.chapter_root(), bundle.hmac_key());
        assert_ne!(bundle.hmac_key(), bundle.metadata_key());
        assert_ne!(bundle.metadata_key(), bundle.fragment_map_key());
    }

    #[test]
    fn test_bundle_deterministic() {
        let a = derive_bundle(&root(), "ch42").unwrap();
        let b = derive_bundle(&root(), "ch42").unwrap();
        assert_eq!(a.chapter_root(), b.chapter_root());
        assert_eq!(a.fragment_map_key(), b.fragment_map_key());
    }

    #[test]
    fn test_chapters_separated() {
        let a = derive_bundle(&root(), "ch42").unwrap();
        let b = derive_bundle(&root(), "ch43").unwrap();
        assert_ne!(a.chapter_root(), b.chapter_root());
        assert_ne!(a.hmac_key(), b.hmac_key());
    }

    #[test]
    fn test_wipe_fields() {
        let mut bundle = derive_bundle(&root(), "ch42").unwrap();
        bundle.wipe_fields();
        assert!(bundle.chapter_root().iter().all(|&b| b == 0));
        assert!(bundle.hmac_key().iter().all(|&b| b == 0));
    }
}

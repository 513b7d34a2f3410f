//! Storage coordinator - hashed on-disk layout for fragments and metadata.
//!
//! Layout under the documents base:
//!
//! ```text
//! .ls_v/.nomedia
//! .ls_v/<sha256("dir:"+chapterId)>/.nomedia
//! .ls_v/<sha256("dir:"+chapterId)>/<sha256(chapterId+":"+idx+":"+salt)>.dat
//! .ls_m/<sha256("meta:"+imageId)>        AES-GCM manifest
//! .ls_m/<sha256("wk:"+chapterId)>        JSON WrappedChapterKey
//! .ls_m/<sha256("cm:"+chapterId)>        AES-GCM chapter metadata
//! ```
//!
//! Every ciphertext file stores the Base64 text of `IV || CT || tag`. All
//! writes are atomic (temp file + rename); deletes overwrite with zeros
//! before unlinking.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use leafsafe_keyvault::crypto::{aead, kdf};
use leafsafe_keyvault::{ChapterKeyBundle, WrappedChapterKey};

use crate::error::{VaultError, VaultResult};
use crate::manifest::{ChapterMetadata, FragmentManifest};

pub const VAULT_DIR: &str = ".ls_v";
pub const META_DIR: &str = ".ls_m";
pub const NOMEDIA: &str = ".nomedia";

pub struct StorageCoordinator {
    base: PathBuf,
}

impl StorageCoordinator {
    pub fn new<P: AsRef<Path>>(base: P) -> Self {
        Self {
            base: base.as_ref().to_path_buf(),
        }
    }

    /// Create the vault and metadata roots with their `.nomedia` markers.
    /// Idempotent.
    pub fn init_roots(&self) -> VaultResult<()> {
        for root in [self.vault_root(), self.meta_root()] {
            fs::create_dir_all(&root)?;
            let marker = root.join(NOMEDIA);
            if !marker.exists() {
                File::create(&marker)?;
            }
        }
        Ok(())
    }

    fn vault_root(&self) -> PathBuf {
        self.base.join(VAULT_DIR)
    }

    fn meta_root(&self) -> PathBuf {
        self.base.join(META_DIR)
    }

    /// Hashed per-chapter directory.
    pub fn chapter_dir(&self, chapter_id: &str) -> PathBuf {
        self.vault_root()
            .join(kdf::sha256_hex(format!("dir:{chapter_id}").as_bytes()))
    }

    /// Hashed fragment filename; `salt` is the ingestion-scoped hex string.
    pub fn fragment_filename(chapter_id: &str, index: u32, salt: &str) -> String {
        format!(
            "{}.dat",
            kdf::sha256_hex(format!("{chapter_id}:{index}:{salt}").as_bytes())
        )
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        self.meta_root().join(kdf::sha256_hex(key.as_bytes()))
    }

    // ── fragments ─────────────────────────────────────────────────────

    pub fn write_fragment(
        &self,
        chapter_id: &str,
        filename: &str,
        blob: &[u8],
    ) -> VaultResult<()> {
        let dir = self.chapter_dir(chapter_id);
        fs::create_dir_all(&dir)?;
        let marker = dir.join(NOMEDIA);
        if !marker.exists() {
            File::create(&marker)?;
        }
        self.write_atomic(&dir.join(filename), B64.encode(blob).as_bytes())
    }

    pub fn read_fragment(&self, chapter_id: &str, filename: &str) -> VaultResult<Vec<u8>> {
        let path = self.chapter_dir(chapter_id).join(filename);
        if !path.exists() {
            return Err(VaultError::FragmentMissing(filename.to_string()));
        }
        let text = fs::read(&path)?;
        Ok(B64.decode(&text)?)
    }

    /// Names of the `.dat` files currently stored for a chapter.
    pub fn list_fragment_files(&self, chapter_id: &str) -> VaultResult<Vec<String>> {
        let dir = self.chapter_dir(chapter_id);
        let mut files = Vec::new();
        if dir.exists() {
            for entry in fs::read_dir(&dir)? {
                let entry = entry?;
                if let Some(name) = entry.file_name().to_str() {
                    if name.ends_with(".dat") {
                        files.push(name.to_string());
                    }
                }
            }
        }
        files.sort();
        Ok(files)
    }

    // ── manifests & metadata ──────────────────────────────────────────

    pub fn write_manifest(
        &self,
        bundle: &ChapterKeyBundle,
        manifest: &FragmentManifest,
    ) -> VaultResult<()> {
        manifest.validate()?;
        let plaintext = serde_json::to_vec(manifest)?;
        let blob = aead::aes_gcm_encrypt(bundle.fragment_map_key(), &plaintext, None)?;
        self.write_atomic(
            &self.meta_path(&format!("meta:{}", manifest.image_id)),
            B64.encode(blob).as_bytes(),
        )
    }

    pub fn read_manifest(
        &self,
        bundle: &ChapterKeyBundle,
        image_id: &str,
    ) -> VaultResult<FragmentManifest> {
        let path = self.meta_path(&format!("meta:{image_id}"));
        if !path.exists() {
            return Err(VaultError::ManifestCorrupted(format!(
                "manifest missing for image {image_id}"
            )));
        }
        let blob = B64.decode(&fs::read(&path)?)?;
        let plaintext = aead::aes_gcm_decrypt(bundle.fragment_map_key(), &blob, None)?;
        let manifest: FragmentManifest = serde_json::from_slice(plaintext.expose())?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn write_chapter_metadata(
        &self,
        bundle: &ChapterKeyBundle,
        metadata: &ChapterMetadata,
    ) -> VaultResult<()> {
        metadata.validate()?;
        let plaintext = serde_json::to_vec(metadata)?;
        let blob = aead::aes_gcm_encrypt(bundle.metadata_key(), &plaintext, None)?;
        self.write_atomic(
            &self.meta_path(&format!("cm:{}", metadata.chapter_id)),
            B64.encode(blob).as_bytes(),
        )
    }

    pub fn read_chapter_metadata(
        &self,
        bundle: &ChapterKeyBundle,
        chapter_id: &str,
    ) -> VaultResult<Option<ChapterMetadata>> {
        let path = self.meta_path(&format!("cm:{chapter_id}"));
        if !path.exists() {
            return Ok(None);
        }
        let blob = B64.decode(&fs::read(&path)?)?;
        let plaintext = aead::aes_gcm_decrypt(bundle.metadata_key(), &blob, None)?;
        let metadata: ChapterMetadata = serde_json::from_slice(plaintext.expose())?;
        metadata.validate()?;
        Ok(Some(metadata))
    }

    /// The wrapped-key envelope is stored as plain JSON; its `wrapped_b64`
    /// field is already ciphertext.
    pub fn write_wrapped_key(
        &self,
        chapter_id: &str,
        wrapped: &WrappedChapterKey,
    ) -> VaultResult<()> {
        let json = serde_json::to_vec(wrapped)?;
        self.write_atomic(&self.meta_path(&format!("wk:{chapter_id}")), &json)
    }

    pub fn read_wrapped_key(&self, chapter_id: &str) -> VaultResult<Option<WrappedChapterKey>> {
        let path = self.meta_path(&format!("wk:{chapter_id}"));
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(&fs::read(&path)?)?))
    }

    // ── deletion ──────────────────────────────────────────────────────

    /// Securely delete a chapter: fragments, manifests, metadata, envelope.
    pub fn delete_chapter(&self, chapter_id: &str, image_ids: &[String]) -> VaultResult<()> {
        let dir = self.chapter_dir(chapter_id);
        if dir.exists() {
            for entry in fs::read_dir(&dir)? {
                secure_delete(&entry?.path())?;
            }
            fs::remove_dir(&dir)?;
        }
        for image_id in image_ids {
            secure_delete(&self.meta_path(&format!("meta:{image_id}")))?;
        }
        secure_delete(&self.meta_path(&format!("cm:{chapter_id}")))?;
        secure_delete(&self.meta_path(&format!("wk:{chapter_id}")))?;
        Ok(())
    }

    /// Atomic write: temp file, fsync, rename.
    fn write_atomic(&self, path: &Path, data: &[u8]) -> VaultResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let temp = path.with_extension("tmp");
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp)?;
        file.write_all(data)?;
        file.sync_all()?;
        fs::rename(&temp, path)?;
        Ok(())
    }
}

/// Overwrite a file with zeros, then unlink it. Missing files are ignored.
fn secure_delete(path: &Path) -> VaultResult<()> {
    if !path.exists() {
        return Ok(());
    }
    if let Ok(metadata) = fs::metadata(path) {
        let size = metadata.len() as usize;
        if size > 0 {
            if let Ok(mut file) = OpenOptions::new().write(true).open(path) {
                let zeros = vec![0u8; size.min(1024 * 1024)];
                let mut remaining = size;
                while remaining > 0 {
                    let chunk = remaining.min(zeros.len());
                    let _ = file.write_all(&zeros[..chunk]);
                    remaining -= chunk;
                }
                let _ = file.sync_all();
            }
        }
    }
    fs::remove_file(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::FragmentRecord;
    use leafsafe_keyvault::{derive_bundle, SecretBuffer};
    use tempfile::tempdir;

    fn bundle() -> ChapterKeyBundle {
        let root = SecretBuffer::from_slice(&[0x42u8; 64]);
        derive_bundle(&root, "ch42").unwrap()
    }

    #[test]
    fn test_init_roots_idempotent() {
        let dir = tempdir().unwrap();
        let storage = StorageCoordinator::new(dir.path());
        storage.init_roots().unwrap();
        storage.init_roots().unwrap();
        assert!(dir.path().join(VAULT_DIR).join(NOMEDIA).exists());
        assert!(dir.path().join(META_DIR).join(NOMEDIA).exists());
    }

    #[test]
    fn test_fragment_roundtrip_and_nomedia() {
        let dir = tempdir().unwrap();
        let storage = StorageCoordinator::new(dir.path());
        storage.init_roots().unwrap();

        let filename = StorageCoordinator::fragment_filename("ch42", 0, "abcd");
        storage.write_fragment("ch42", &filename, b"ciphertext blob").unwrap();

        assert!(storage.chapter_dir("ch42").join(NOMEDIA).exists());
        assert_eq!(
            storage.read_fragment("ch42", &filename).unwrap(),
            b"ciphertext blob"
        );
        assert_eq!(storage.list_fragment_files("ch42").unwrap(), vec![filename]);
    }

    #[test]
    fn test_fragment_file_is_base64_text() {
        let dir = tempdir().unwrap();
        let storage = StorageCoordinator::new(dir.path());
        storage.init_roots().unwrap();

        let filename = StorageCoordinator::fragment_filename("ch42", 0, "abcd");
        storage.write_fragment("ch42", &filename, &[0u8, 255, 7]).unwrap();

        let on_disk = fs::read(storage.chapter_dir("ch42").join(&filename)).unwrap();
        assert_eq!(on_disk, B64.encode([0u8, 255, 7]).as_bytes());
    }

    #[test]
    fn test_manifest_encrypted_at_rest() {
        let dir = tempdir().unwrap();
        let storage = StorageCoordinator::new(dir.path());
        storage.init_roots().unwrap();
        let bundle = bundle();

        let manifest = FragmentManifest {
            image_id: "img-1".into(),
            chapter_id: "ch42".into(),
            total_fragments: 1,
            total_size: 100,
            fragments: vec![FragmentRecord {
                index: 0,
                filename: "f.dat".into(),
                aad_b64: B64.encode(b"img-1:0"),
                hmac_hex: "ab".repeat(32),
                original_size: 100,
                encrypted_size: 160,
            }],
        };
        storage.write_manifest(&bundle, &manifest).unwrap();

        let path = storage.meta_path("meta:img-1");
        let raw = fs::read(&path).unwrap();
        assert!(!raw.windows(5).any(|w| w == b"img-1"));

        let loaded = storage.read_manifest(&bundle, "img-1").unwrap();
        assert_eq!(loaded.fragments.len(), 1);
        assert_eq!(loaded.chapter_id, "ch42");
    }

    #[test]
    fn test_manifest_wrong_key_auth_fails() {
        let dir = tempdir().unwrap();
        let storage = StorageCoordinator::new(dir.path());
        storage.init_roots().unwrap();
        let bundle = bundle();

        let manifest = FragmentManifest {
            image_id: "img-1".into(),
            chapter_id: "ch42".into(),
            total_fragments: 0,
            total_size: 0,
            fragments: vec![],
        };
        storage.write_manifest(&bundle, &manifest).unwrap();

        let other = {
            let root = SecretBuffer::from_slice(&[0x43u8; 64]);
            derive_bundle(&root, "ch42").unwrap()
        };
        assert!(matches!(
            storage.read_manifest(&other, "img-1").unwrap_err(),
            VaultError::AuthFail
        ));
    }

    #[test]
    fn test_wrapped_key_roundtrip() {
        let dir = tempdir().unwrap();
        let storage = StorageCoordinator::new(dir.path());
        storage.init_roots().unwrap();

        let wrapped = WrappedChapterKey {
            wrapped_b64: "AAAA".into(),
            rotation_timestamp_ms: 123,
            version: 1,
        };
        storage.write_wrapped_key("ch42", &wrapped).unwrap();
        let loaded = storage.read_wrapped_key("ch42").unwrap().unwrap();
        assert_eq!(loaded.version, 1);
        assert_eq!(loaded.wrapped_b64, "AAAA");
        assert!(storage.read_wrapped_key("other").unwrap().is_none());
    }

    #[test]
    fn test_delete_chapter_removes_everything() {
        let dir = tempdir().unwrap();
        let storage = StorageCoordinator::new(dir.path());
        storage.init_roots().unwrap();
        let bundle = bundle();

        let filename = StorageCoordinator::fragment_filename("ch42", 0, "abcd");
        storage.write_fragment("ch42", &filename, b"blob").unwrap();
        let metadata = ChapterMetadata {
            chapter_id: "ch42".into(),
            title: "t".into(),
            image_ids: vec![],
            page_count: 0,
            total_size: 0,
            created_at_ms: 0,
        };
        storage.write_chapter_metadata(&bundle, &metadata).unwrap();

        storage.delete_chapter("ch42", &[]).unwrap();
        assert!(!storage.chapter_dir("ch42").exists());
        assert!(storage.read_chapter_metadata(&bundle, "ch42").unwrap().is_none());
    }
}

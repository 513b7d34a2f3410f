//! Persisted records: fragment manifests, chapter metadata, page buffers.
//!
//! Everything crossing a component boundary is a tagged record with
//! explicit validation; nothing downstream trusts a manifest field it has
//! not checked.

use serde::{Deserialize, Serialize};

use crate::error::{VaultError, VaultResult};

/// One fragment of one image, as recorded in the manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FragmentRecord {
    pub index: u32,
    /// Hashed `.dat` filename inside the chapter directory.
    pub filename: String,
    /// Base64 of the UTF-8 AAD `imageId:index`.
    pub aad_b64: String,
    /// Hex HMAC-SHA256 over the stored ciphertext blob.
    pub hmac_hex: String,
    pub original_size: usize,
    pub encrypted_size: usize,
}

/// Per-image fragment manifest. Persisted AES-GCM-encrypted under the
/// chapter's fragment-map key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FragmentManifest {
    pub image_id: String,
    pub chapter_id: String,
    pub total_fragments: u32,
    pub total_size: usize,
    pub fragments: Vec<FragmentRecord>,
}

impl FragmentManifest {
    /// Boundary validation: counts consistent, indices dense and ordered,
    /// digests well-formed.
    pub fn validate(&self) -> VaultResult<()> {
        if self.fragments.len() != self.total_fragments as usize {
            return Err(VaultError::ManifestCorrupted(format!(
                "fragment count mismatch: {} records, {} declared",
                self.fragments.len(),
                self.total_fragments
            )));
        }
        let mut size = 0usize;
        for (i, record) in self.fragments.iter().enumerate() {
            if record.index as usize != i {
                return Err(VaultError::ManifestCorrupted(format!(
                    "fragment index {} at position {i}",
                    record.index
                )));
            }
            if record.hmac_hex.len() != 64 || hex::decode(&record.hmac_hex).is_err() {
                return Err(VaultError::ManifestCorrupted(format!(
                    "malformed hmac for fragment {i}"
                )));
            }
            if record.filename.is_empty() {
                return Err(VaultError::ManifestCorrupted(format!(
                    "empty filename for fragment {i}"
                )));
            }
            size += record.original_size;
        }
        if size != self.total_size {
            return Err(VaultError::ManifestCorrupted(format!(
                "total size mismatch: {size} summed, {} declared",
                self.total_size
            )));
        }
        Ok(())
    }
}

/// Chapter-level metadata. Persisted AES-GCM-encrypted under the chapter's
/// metadata key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChapterMetadata {
    pub chapter_id: String,
    pub title: String,
    /// Image ids in page order; `image_ids[page]` is the page's image.
    pub image_ids: Vec<String>,
    pub page_count: u32,
    pub total_size: u64,
    pub created_at_ms: i64,
}

impl ChapterMetadata {
    pub fn validate(&self) -> VaultResult<()> {
        if self.image_ids.len() != self.page_count as usize {
            return Err(VaultError::ManifestCorrupted(format!(
                "page count mismatch: {} ids, {} declared",
                self.image_ids.len(),
                self.page_count
            )));
        }
        Ok(())
    }
}

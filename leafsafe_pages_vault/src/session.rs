//! Reader session - page loads, releases and scroll signals for one chapter.
//!
//! All chapter operations are serialized through the vault's ops lock;
//! expensive crypto runs on the blocking pool behind a suspending boundary.
//! The session loads the current page plus one ahead; pages two or more
//! behind the read position are released. Mutated page buffers live in the
//! shared registry under its two-buffer cap.

use std::sync::Arc;

use leafsafe_keyvault::{ChapterKeyBundle, EphemeralKeyService, SecretBuffer};
use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;

use crate::decryptor::{self, PageDecryptJob, ProgramBuilder};
use crate::error::{VaultError, VaultResult};
use crate::lifecycle::{LifecycleManager, RuntimeEntropyState};
use crate::manifest::ChapterMetadata;
use crate::mutation;
use crate::orchestrator::SecurityOrchestrator;
use crate::registry::{LiveBufferRegistry, SharedBuffer};
use crate::storage::StorageCoordinator;

/// A loaded page: the registry-owned mutated buffer plus the ephemeral key
/// that reverses the display mutation. The key is wiped when the handle
/// drops, ending the render.
#[derive(Debug)]
pub struct PageHandle {
    pub page_index: usize,
    bytes: SharedBuffer,
    ephemeral_key: SecretBuffer,
}

impl PageHandle {
    /// Copy of the mutated bytes as currently held by the registry.
    pub fn mutated_bytes(&self) -> Vec<u8> {
        self.bytes.lock().clone()
    }

    /// Reverse the display mutation into a fresh plaintext copy. This is
    /// what the image widget does at draw time.
    pub fn unmask(&self) -> VaultResult<Vec<u8>> {
        let mut plain = self.bytes.lock().clone();
        mutation::reverse(&mut plain, self.ephemeral_key.expose())?;
        Ok(plain)
    }

    /// True when the underlying registry buffer has been wiped.
    pub fn is_wiped(&self) -> bool {
        self.bytes.lock().iter().all(|&b| b == 0)
    }
}

pub(crate) struct SessionInner {
    pub chapter_id: String,
    pub bundle: Arc<ChapterKeyBundle>,
    pub storage: Arc<StorageCoordinator>,
    pub registry: Arc<LiveBufferRegistry>,
    pub ephemeral: Arc<EphemeralKeyService>,
    pub entropy: Arc<RuntimeEntropyState>,
    pub lifecycle: Arc<LifecycleManager>,
    pub orchestrator: Arc<SecurityOrchestrator>,
    pub ops_lock: Arc<AsyncMutex<()>>,
    pub metadata: Mutex<Option<ChapterMetadata>>,
    pub read_ahead: bool,
}

pub struct ReaderSession {
    inner: Arc<SessionInner>,
}

impl ReaderSession {
    pub(crate) fn new(inner: SessionInner) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn chapter_id(&self) -> &str {
        &self.inner.chapter_id
    }

    /// Report scroll velocity in pixels per millisecond. Feeds runtime
    /// entropy for subsequent renders.
    pub fn set_scroll_velocity(&self, px_per_ms: f64) {
        self.inner.entropy.set_scroll_velocity(px_per_ms);
    }

    pub async fn page_count(&self) -> VaultResult<usize> {
        Ok(Self::chapter_metadata(&self.inner).await?.page_count as usize)
    }

    /// Decrypt, mutate and track one page. Also releases pages two or more
    /// behind and prefetches the next page in the background.
    pub async fn load_page(&self, page_index: usize) -> VaultResult<PageHandle> {
        self.inner.orchestrator.periodic_check()?;
        if !self.inner.lifecycle.is_active() {
            return Err(VaultError::LifecycleInactive);
        }

        let handle = {
            let _guard = self.inner.ops_lock.lock().await;
            let metadata = Self::chapter_metadata(&self.inner).await?;
            let pages = metadata.image_ids.len();
            if page_index >= pages {
                return Err(VaultError::PageOutOfRange {
                    page: page_index,
                    pages,
                });
            }

            let (mutated, key) = Self::decrypt_page(&self.inner, &metadata, page_index).await?;
            let bytes = self.inner.registry.insert(page_index, mutated);

            if page_index >= 2 {
                self.inner.registry.release_at_or_below(page_index - 2);
            }

            PageHandle {
                page_index,
                bytes,
                ephemeral_key: key,
            }
        };

        if self.inner.read_ahead {
            Self::spawn_prefetch(Arc::clone(&self.inner), page_index + 1);
        }
        Ok(handle)
    }

    /// Wipe and drop one page's buffer.
    pub async fn release_page(&self, page_index: usize) {
        let _guard = self.inner.ops_lock.lock().await;
        self.inner.registry.release(page_index);
    }

    async fn chapter_metadata(inner: &Arc<SessionInner>) -> VaultResult<ChapterMetadata> {
        if let Some(meta) = inner.metadata.lock().clone() {
            return Ok(meta);
        }
        let bundle = Arc::clone(&inner.bundle);
        let storage = Arc::clone(&inner.storage);
        let chapter_id = inner.chapter_id.clone();
        let meta = tokio::task::spawn_blocking(move || {
            storage.read_chapter_metadata(&bundle, &chapter_id)
        })
        .await
        .map_err(|e| VaultError::TaskFailed(e.to_string()))??
        .ok_or_else(|| VaultError::ChapterNotFound(inner.chapter_id.clone()))?;

        *inner.metadata.lock() = Some(meta.clone());
        Ok(meta)
    }

    async fn decrypt_page(
        inner: &Arc<SessionInner>,
        metadata: &ChapterMetadata,
        page_index: usize,
    ) -> VaultResult<(Vec<u8>, SecretBuffer)> {
        let image_id = metadata.image_ids[page_index].clone();
        let bundle = Arc::clone(&inner.bundle);
        let storage = Arc::clone(&inner.storage);
        let ephemeral = Arc::clone(&inner.ephemeral);
        let chapter_id = inner.chapter_id.clone();
        let entropy = inner.entropy.snapshot(page_index as i64);

        tokio::task::spawn_blocking(move || {
            let manifest = storage.read_manifest(&bundle, &image_id)?;
            let mut blobs = Vec::with_capacity(manifest.fragments.len());
            for record in &manifest.fragments {
                blobs.push(storage.read_fragment(&chapter_id, &record.filename)?);
            }

            let program = ProgramBuilder::randomized();
            let job = PageDecryptJob {
                bundle: &bundle,
                image_id: &image_id,
                records: &manifest.fragments,
                blobs: &blobs,
                ephemeral: &ephemeral,
                entropy,
            };
            decryptor::execute(&program, &job)
        })
        .await
        .map_err(|e| VaultError::TaskFailed(e.to_string()))?
    }

    /// Best-effort read-ahead of the next page. Failures are logged and
    /// swallowed; the foreground read path reports its own errors.
    fn spawn_prefetch(inner: Arc<SessionInner>, page_index: usize) {
        tokio::spawn(async move {
            if inner.registry.contains(page_index) || !inner.lifecycle.is_active() {
                return;
            }
            let _guard = inner.ops_lock.lock().await;
            let metadata = match Self::chapter_metadata(&inner).await {
                Ok(meta) => meta,
                Err(_) => return,
            };
            if page_index >= metadata.image_ids.len() || inner.registry.contains(page_index) {
                return;
            }
            match Self::decrypt_page(&inner, &metadata, page_index).await {
                Ok((mutated, _key)) => {
                    inner.registry.insert(page_index, mutated);
                    tracing::debug!(page = page_index, "prefetched");
                }
                Err(e) => tracing::debug!(page = page_index, error = %e, "prefetch failed"),
            }
        });
    }
}

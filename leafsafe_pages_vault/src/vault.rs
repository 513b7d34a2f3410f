//! PageVault - the API surface consumed by the UI layer.
//!
//! One context object owns every service (no process-wide singletons): the
//! storage coordinator, credential store, key services, runtime entropy,
//! the live-buffer registry, the lifecycle manager and the security
//! orchestrator. `bootstrap` wires them in the fixed order: orchestrator
//! boot gate, device salt init, storage roots, runtime entropy, lifecycle.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use leafsafe_keyvault::crypto::{random_bytes, wipe};
use leafsafe_keyvault::{
    derive_bundle, CredentialStore, EphemeralKeyService, FingerprintProvider, FingerprintSource,
    KeyRotationService, KeyringStore, RootKeyService, SystemFingerprintSource,
};
use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

use crate::error::{VaultError, VaultResult};
use crate::fragment;
use crate::lifecycle::{LifecycleCallback, LifecycleManager, RuntimeEntropyState};
use crate::manifest::{ChapterMetadata, FragmentManifest, FragmentRecord};
use crate::orchestrator::{AbortSink, SecurityOrchestrator, ViolationSink};
use crate::registry::LiveBufferRegistry;
use crate::session::{ReaderSession, SessionInner};
use crate::storage::StorageCoordinator;

/// Vault configuration
#[derive(Debug, Clone)]
pub struct VaultConfig {
    /// Documents base directory holding `.ls_v` and `.ls_m`.
    pub base_dir: PathBuf,
    /// Prefetch the next page after each load.
    pub read_ahead: bool,
}

impl VaultConfig {
    pub fn new<P: Into<PathBuf>>(base_dir: P) -> Self {
        Self {
            base_dir: base_dir.into(),
            read_ahead: true,
        }
    }
}

pub struct PageVault {
    config: VaultConfig,
    storage: Arc<StorageCoordinator>,
    root_service: Arc<RootKeyService>,
    rotation: Arc<KeyRotationService>,
    ephemeral: Arc<EphemeralKeyService>,
    entropy: Arc<RuntimeEntropyState>,
    registry: Arc<LiveBufferRegistry>,
    lifecycle: Arc<LifecycleManager>,
    orchestrator: Arc<SecurityOrchestrator>,
    ops_lock: Arc<AsyncMutex<()>>,
}

impl PageVault {
    /// Bootstrap against the platform keychain and real device identifiers.
    pub async fn bootstrap(config: VaultConfig, user_id: &str) -> VaultResult<Self> {
        Self::bootstrap_with(
            config,
            user_id,
            Arc::new(KeyringStore),
            Arc::new(SystemFingerprintSource),
            Box::new(AbortSink),
        )
        .await
    }

    /// Bootstrap with injected collaborators (tests, headless hosts).
    pub async fn bootstrap_with(
        config: VaultConfig,
        user_id: &str,
        store: Arc<dyn CredentialStore>,
        fingerprint_source: Arc<dyn FingerprintSource>,
        sink: Box<dyn ViolationSink>,
    ) -> VaultResult<Self> {
        let storage = Arc::new(StorageCoordinator::new(&config.base_dir));
        let root_service = Arc::new(RootKeyService::new(
            Arc::clone(&store),
            FingerprintProvider::new(fingerprint_source),
        ));
        let rotation = Arc::new(KeyRotationService::new(Arc::clone(&store)));
        let ephemeral = Arc::new(EphemeralKeyService::new()?);
        let entropy = Arc::new(RuntimeEntropyState::new());
        let registry = Arc::new(LiveBufferRegistry::new());
        let orchestrator = Arc::new(SecurityOrchestrator::new(
            Arc::clone(&root_service),
            Arc::clone(&ephemeral),
            Arc::clone(&entropy),
            Arc::clone(&registry),
            sink,
        ));

        // 1. Boot gate.
        orchestrator.boot_gate().await?;

        // 2. Device salt init (idempotent).
        {
            let root_service = Arc::clone(&root_service);
            let user_id = user_id.to_string();
            tokio::task::spawn_blocking(move || root_service.init_device_salt(&user_id))
                .await
                .map_err(|e| VaultError::TaskFailed(e.to_string()))??;
        }

        // 3. Storage roots and nomedia markers.
        storage.init_roots()?;

        // 4. Runtime entropy.
        entropy.reset();

        // 5. Lifecycle hooks.
        let lifecycle = Arc::new(LifecycleManager::new(
            Arc::clone(&registry),
            Arc::clone(&ephemeral),
            Arc::clone(&entropy),
        ));

        tracing::info!(base = %config.base_dir.display(), "vault bootstrapped");
        Ok(Self {
            config,
            storage,
            root_service,
            rotation,
            ephemeral,
            entropy,
            registry,
            lifecycle,
            orchestrator,
            ops_lock: Arc::new(AsyncMutex::new(())),
        })
    }

    // ── ingest ────────────────────────────────────────────────────────

    /// Encrypt and store a chapter of page images. Raw bytes are wiped as
    /// each image is fragmented; nothing unencrypted persists.
    pub async fn ingest_chapter(
        &self,
        chapter_id: &str,
        title: &str,
        raw_images: Vec<Vec<u8>>,
    ) -> VaultResult<ChapterMetadata> {
        self.orchestrator.periodic_check()?;
        if !self.lifecycle.is_active() {
            return Err(VaultError::LifecycleInactive);
        }
        let _guard = self.ops_lock.lock().await;

        let storage = Arc::clone(&self.storage);
        let root_service = Arc::clone(&self.root_service);
        let rotation = Arc::clone(&self.rotation);
        let chapter_id = chapter_id.to_string();
        let title = title.to_string();

        tokio::task::spawn_blocking(move || {
            let root = root_service.derive_root_secret(None)?;
            let bundle = derive_bundle(&root, &chapter_id)?;
            let ingest_salt = hex::encode(random_bytes(16)?);

            let mut image_ids = Vec::with_capacity(raw_images.len());
            let mut total_size = 0u64;

            for mut image in raw_images {
                let image_id = Uuid::new_v4().to_string();
                total_size += image.len() as u64;

                let fragments = fragment::split(&image);
                wipe::wipe(&mut image);

                let mut records = Vec::with_capacity(fragments.len());
                let mut manifest_size = 0usize;
                for raw in &fragments {
                    let encrypted = fragment::encrypt_fragment(&bundle, &image_id, raw)?;
                    let filename =
                        StorageCoordinator::fragment_filename(&chapter_id, raw.index, &ingest_salt);
                    storage.write_fragment(&chapter_id, &filename, &encrypted.encrypted_data)?;
                    manifest_size += encrypted.original_size;
                    records.push(FragmentRecord {
                        index: encrypted.index,
                        filename,
                        aad_b64: encrypted.aad_b64,
                        hmac_hex: encrypted.hmac_hex,
                        original_size: encrypted.original_size,
                        encrypted_size: encrypted.encrypted_data.len(),
                    });
                }

                let manifest = FragmentManifest {
                    image_id: image_id.clone(),
                    chapter_id: chapter_id.clone(),
                    total_fragments: records.len() as u32,
                    total_size: manifest_size,
                    fragments: records,
                };
                storage.write_manifest(&bundle, &manifest)?;
                image_ids.push(image_id);
            }

            let metadata = ChapterMetadata {
                chapter_id: chapter_id.clone(),
                title,
                page_count: image_ids.len() as u32,
                image_ids,
                total_size,
                created_at_ms: Utc::now().timestamp_millis(),
            };
            storage.write_chapter_metadata(&bundle, &metadata)?;

            let wrapped = rotation.wrap_chapter_key(bundle.chapter_root(), &root, &chapter_id, 1)?;
            storage.write_wrapped_key(&chapter_id, &wrapped)?;
            rotation.record_rotation_timestamp()?;

            tracing::info!(
                chapter = %chapter_id,
                pages = metadata.page_count,
                "chapter ingested"
            );
            Ok(metadata)
        })
        .await
        .map_err(|e| VaultError::TaskFailed(e.to_string()))?
    }

    // ── read ──────────────────────────────────────────────────────────

    /// Decrypted chapter metadata, or `None` for an unknown chapter.
    pub async fn get_chapter_metadata(
        &self,
        chapter_id: &str,
    ) -> VaultResult<Option<ChapterMetadata>> {
        self.orchestrator.periodic_check()?;
        let _guard = self.ops_lock.lock().await;

        let storage = Arc::clone(&self.storage);
        let root_service = Arc::clone(&self.root_service);
        let chapter_id = chapter_id.to_string();
        tokio::task::spawn_blocking(move || {
            let root = root_service.derive_root_secret(None)?;
            let bundle = derive_bundle(&root, &chapter_id)?;
            storage.read_chapter_metadata(&bundle, &chapter_id)
        })
        .await
        .map_err(|e| VaultError::TaskFailed(e.to_string()))?
    }

    /// Open a reading session for a chapter. The session owns the chapter
    /// key bundle for its lifetime.
    pub async fn open_chapter(&self, chapter_id: &str) -> VaultResult<ReaderSession> {
        self.orchestrator.periodic_check()?;
        if !self.lifecycle.is_active() {
            return Err(VaultError::LifecycleInactive);
        }

        let root_service = Arc::clone(&self.root_service);
        let id = chapter_id.to_string();
        let bundle = tokio::task::spawn_blocking(move || {
            let root = root_service.derive_root_secret(None)?;
            derive_bundle(&root, &id)
        })
        .await
        .map_err(|e| VaultError::TaskFailed(e.to_string()))??;

        Ok(ReaderSession::new(SessionInner {
            chapter_id: chapter_id.to_string(),
            bundle: Arc::new(bundle),
            storage: Arc::clone(&self.storage),
            registry: Arc::clone(&self.registry),
            ephemeral: Arc::clone(&self.ephemeral),
            entropy: Arc::clone(&self.entropy),
            lifecycle: Arc::clone(&self.lifecycle),
            orchestrator: Arc::clone(&self.orchestrator),
            ops_lock: Arc::clone(&self.ops_lock),
            metadata: Mutex::new(None),
            read_ahead: self.config.read_ahead,
        }))
    }

    // ── rotation ──────────────────────────────────────────────────────

    /// Rotate the chapter's wrapped key if the seven-day interval elapsed.
    /// Returns the new envelope version when a rotation happened.
    pub async fn rotate_key_if_due(&self, chapter_id: &str) -> VaultResult<Option<u32>> {
        if !self.rotation.is_rotation_due()? {
            return Ok(None);
        }
        Ok(Some(self.rotate_chapter_key(chapter_id).await?))
    }

    /// Unconditional envelope rotation. Fragment files are untouched;
    /// rotation and reads exclude each other on the ops lock.
    pub async fn rotate_chapter_key(&self, chapter_id: &str) -> VaultResult<u32> {
        self.orchestrator.periodic_check()?;
        let _guard = self.ops_lock.lock().await;

        let storage = Arc::clone(&self.storage);
        let root_service = Arc::clone(&self.root_service);
        let rotation = Arc::clone(&self.rotation);
        let chapter_id = chapter_id.to_string();
        tokio::task::spawn_blocking(move || {
            let wrapped = storage
                .read_wrapped_key(&chapter_id)?
                .ok_or_else(|| VaultError::ChapterNotFound(chapter_id.clone()))?;
            let root = root_service.derive_root_secret(None)?;
            let rewrapped = rotation.rotate(&wrapped, &root, &chapter_id)?;
            storage.write_wrapped_key(&chapter_id, &rewrapped)?;
            rotation.record_rotation_timestamp()?;
            Ok(rewrapped.version)
        })
        .await
        .map_err(|e| VaultError::TaskFailed(e.to_string()))?
    }

    // ── lifecycle ─────────────────────────────────────────────────────

    pub fn on_background(&self) {
        self.lifecycle.on_background();
    }

    pub fn on_active(&self) -> VaultResult<()> {
        self.lifecycle.on_active()
    }

    pub fn register_background_callback(&self, callback: LifecycleCallback) {
        self.lifecycle.register_background_callback(callback);
    }

    /// The kill switch: destroy the device salt and companion entries.
    pub async fn destroy_device_salt(&self) -> VaultResult<()> {
        let root_service = Arc::clone(&self.root_service);
        tokio::task::spawn_blocking(move || root_service.destroy_device_salt())
            .await
            .map_err(|e| VaultError::TaskFailed(e.to_string()))??;
        Ok(())
    }

    // ── introspection ─────────────────────────────────────────────────

    pub fn registry(&self) -> &Arc<LiveBufferRegistry> {
        &self.registry
    }

    pub fn storage(&self) -> &Arc<StorageCoordinator> {
        &self.storage
    }

    pub fn orchestrator(&self) -> &Arc<SecurityOrchestrator> {
        &self.orchestrator
    }
}

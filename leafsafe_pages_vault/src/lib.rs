//! # LeafSafe Pages Vault
//!
//! On-device encrypted vault for paginated image content.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                   LEAFSAFE PAGES VAULT                   │
//! │  ┌─────────────┐  ┌──────────────┐  ┌────────────────┐   │
//! │  │  INGEST     │  │ READ SESSION │  │ KEY ROTATION   │   │
//! │  │  split+enc  │  │ virtual      │  │ wrapped-key    │   │
//! │  │  +HMAC      │  │ decryptor    │  │ envelopes      │   │
//! │  └──────┬──────┘  └──────┬───────┘  └───────┬────────┘   │
//! │         │                │                  │            │
//! │  ┌──────┴────────────────┴──────────────────┴─────────┐  │
//! │  │              LEAFSAFE_KEYVAULT INTEGRATION         │  │
//! │  │     root secret → chapter bundle → ephemeral key   │  │
//! │  └────────────────────────────────────────────────────┘  │
//! │                                                          │
//! │  ┌─────────────┐  ┌──────────────┐  ┌────────────────┐   │
//! │  │ LIVE BUFFER │  │  INTEGRITY   │  │  LIFECYCLE     │   │
//! │  │ REGISTRY ≤2 │  │  GUARD       │  │  WIPE          │   │
//! │  └─────────────┘  └──────────────┘  └────────────────┘   │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Security Model
//!
//! - Raw page bytes never persist unencrypted
//! - Fragments (50-200 KB) individually AES-256-GCM encrypted, then HMAC'd
//! - Key-derived canary inside every fragment plaintext
//! - At most two decrypted render buffers live at any instant
//! - Render output XOR-mutated under a per-render ephemeral key
//! - Background transition wipes all plaintext; violations destroy the
//!   device salt and abort

pub mod decryptor;
pub mod error;
pub mod fragment;
pub mod guard;
pub mod lifecycle;
pub mod manifest;
pub mod mutation;
pub mod orchestrator;
pub mod registry;
pub mod session;
pub mod storage;
pub mod vault;

pub use error::{VaultError, VaultResult};
pub use lifecycle::{LifecycleManager, LifecycleState, RuntimeEntropyState};
pub use manifest::{ChapterMetadata, FragmentManifest, FragmentRecord};
pub use orchestrator::{AbortSink, SecurityOrchestrator, ViolationSink};
pub use registry::{LiveBufferRegistry, MAX_DECRYPTED_FRAGMENTS};
pub use session::{PageHandle, ReaderSession};
pub use storage::StorageCoordinator;
pub use vault::{PageVault, VaultConfig};

/// LeafSafe Pages Vault version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

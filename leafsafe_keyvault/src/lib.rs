//! # LeafSafe KeyVault
//!
//! Key hierarchy and crypto core for the LeafSafe pages vault.
//!
//! ## Layers
//!
//! - Device salt (credential store, unlocked-this-device-only) + device
//!   fingerprint + user id -> **root secret** (PBKDF2-SHA512, on demand,
//!   never persisted)
//! - Root secret + chapter id -> **chapter key bundle** (chapter root plus
//!   hmac / metadata / fragment-map subkeys, HKDF-SHA256)
//! - Chapter root + runtime entropy -> **ephemeral render key** (one render
//!   call, wiped after use)
//!
//! Chapter roots are stored only inside versioned AES-GCM envelopes
//! ([`rotation::WrappedChapterKey`]); destroying the device salt is the
//! intentional kill switch that makes every envelope and fragment
//! permanently undecryptable.

pub mod canary;
pub mod chapter_keys;
pub mod credstore;
pub mod crypto;
pub mod ephemeral;
pub mod error;
pub mod fingerprint;
pub mod root_key;
pub mod rotation;
pub mod secret;

pub use chapter_keys::{derive_bundle, derive_chapter_root, ChapterKeyBundle};
pub use credstore::{CredentialStore, KeyringStore, MemoryStore};
pub use ephemeral::{EphemeralKeyService, RuntimeEntropy};
pub use error::{KeyVaultError, Result};
pub use fingerprint::{DeviceFingerprint, FingerprintProvider, FingerprintSource, SystemFingerprintSource};
pub use root_key::RootKeyService;
pub use rotation::{KeyRotationService, WrappedChapterKey};
pub use secret::SecretBuffer;

/// LeafSafe KeyVault version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

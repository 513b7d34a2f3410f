//! Error types for the LeafSafe pages vault.

use leafsafe_keyvault::KeyVaultError;
use thiserror::Error;

pub type VaultResult<T> = Result<T, VaultError>;

/// Vault error kinds
#[derive(Debug, Error)]
pub enum VaultError {
    // ── fragment pipeline ─────────────────────────────────────────────
    #[error("fragment HMAC mismatch - file corrupted or tampered")]
    IntegrityFail,

    #[error("AES-GCM authentication failed")]
    AuthFail,

    #[error("fragment AAD mismatch - record substituted")]
    SubstitutionFail,

    #[error("canary mismatch - plaintext substituted inside authenticated envelope")]
    CanaryFail,

    // ── decryption program ────────────────────────────────────────────
    #[error("decryption program ended before display mutation")]
    ProgramIncomplete,

    #[error("decryption program precondition violated: {0}")]
    ProgramPreconditionViolated(String),

    // ── environment ───────────────────────────────────────────────────
    #[error("environment unsafe: {0}")]
    EnvironmentUnsafe(String),

    #[error("lifecycle is not active - reads are disabled in background")]
    LifecycleInactive,

    // ── storage / metadata ────────────────────────────────────────────
    #[error("chapter not found: {0}")]
    ChapterNotFound(String),

    #[error("page {page} out of range ({pages} pages)")]
    PageOutOfRange { page: usize, pages: usize },

    #[error("manifest corrupted: {0}")]
    ManifestCorrupted(String),

    #[error("fragment file missing: {0}")]
    FragmentMissing(String),

    // ── wrapped ───────────────────────────────────────────────────────
    #[error("key layer error: {0}")]
    KeyVault(KeyVaultError),

    #[error("background task failed: {0}")]
    TaskFailed(String),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<KeyVaultError> for VaultError {
    fn from(e: KeyVaultError) -> Self {
        match e {
            // Tag mismatches surface as the vault-level AuthFail so callers
            // see one failure kind regardless of which layer decrypted.
            KeyVaultError::AuthFail => VaultError::AuthFail,
            other => VaultError::KeyVault(other),
        }
    }
}

impl VaultError {
    /// Errors that indicate tampering or an active adversary.
    pub fn is_security_critical(&self) -> bool {
        matches!(
            self,
            Self::IntegrityFail
                | Self::AuthFail
                | Self::SubstitutionFail
                | Self::CanaryFail
                | Self::EnvironmentUnsafe(_)
        )
    }
}

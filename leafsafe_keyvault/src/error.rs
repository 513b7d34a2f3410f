//! Error types for the LeafSafe key layer.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, KeyVaultError>;

/// Key-layer error kinds
#[derive(Debug, Error)]
pub enum KeyVaultError {
    #[error("authentication failed - ciphertext tag mismatch")]
    AuthFail,

    #[error("wrapped chapter key could not be opened - corruption or version skew")]
    UnwrapFail,

    #[error("device salt missing from credential store")]
    SaltMissing,

    #[error("user id missing from credential store")]
    UserIdMissing,

    #[error("key derivation failed: {0}")]
    KeyDerivationFailed(String),

    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("invalid request: {0}")]
    InvalidInput(String),

    #[error("credential store error: {0}")]
    CredStore(String),

    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("invalid envelope JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl KeyVaultError {
    /// Errors that indicate tampering or key mismatch rather than misuse.
    pub fn is_security_critical(&self) -> bool {
        matches!(self, Self::AuthFail | Self::UnwrapFail)
    }
}

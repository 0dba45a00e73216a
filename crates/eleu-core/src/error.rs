use thiserror::Error;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Wrong key, tampering, truncation and bad encoding all map here.
    #[error("Decryption failed (wrong key or corrupted ciphertext)")]
    Decryption,

    #[error("Decrypted payload is not valid JSON: {0}")]
    MalformedPayload(String),

    #[error("Invalid import format: {0}")]
    InvalidImportFormat(String),

    #[error("No vault found - create or import one first")]
    NoVault,

    #[error("A vault already exists")]
    VaultExists,

    #[error("Vault is locked - unlock with passphrase first")]
    Locked,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Encryption failed")]
    Encryption,

    #[error("Storage error for key {key}: {reason}")]
    Storage { key: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, VaultError>;

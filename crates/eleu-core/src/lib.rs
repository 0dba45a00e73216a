//! eleu-core: client-side encrypted password vault with snapshot backups.
//!
//! Nothing leaves this crate in plaintext. The vault contents are encrypted
//! with AES-256-GCM under a key derived from the user's passphrase, and only
//! the resulting ciphertext is ever written to storage or exported.
//!
//! # Module layout
//! - `crypto`        AES-256-GCM service over a non-extractable key
//! - `blob`          split `{iv, ct}` ciphertext form and import parsing
//! - `kdf`           Argon2id passphrase derivation and vault metadata
//! - `storage`       typed key-value store (file and in-memory backends)
//! - `vault_cipher`  the single current-vault-state slot
//! - `snapshots`     named backups, guarded restore, export and import
//! - `session`       lock/unlock lifecycle with idle auto-lock
//! - `entries`       plaintext entries, upsert and filtering
//! - `csv_import`    browser password CSV import
//! - `settings`      `settings.json` plus environment overrides
//! - `paths`         platform data directory
//! - `ids`           prefixed time-ordered ids
//! - `error`         unified error type

pub mod blob;
pub mod crypto;
pub mod csv_import;
pub mod entries;
pub mod error;
pub mod ids;
pub mod kdf;
pub mod paths;
pub mod session;
pub mod settings;
pub mod snapshots;
pub mod storage;
pub mod vault_cipher;

pub use blob::CipherBlob;
pub use crypto::{KeySource, VaultCrypto, VaultKey};
pub use entries::{Entry, EntryFilter, VaultContents};
pub use error::{Result, VaultError};
pub use session::{LockState, Session};
pub use settings::Settings;
pub use snapshots::{ExportFile, PendingRestore, Snapshot, SnapshotStore};
pub use storage::{FileStore, KeyValueStore, MemoryStore};
pub use vault_cipher::VaultCipherStorage;

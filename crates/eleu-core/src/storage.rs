//! Typed key-value storage for vault documents.
//!
//! A [`KeyValueStore`] maps string keys to whole JSON documents. Values are
//! always read and written wholesale; there are no partial updates. Typed
//! access goes through [`StorageKey`], which binds each well-known key to the
//! schema it holds, and values that fail to parse are rejected at the boundary.

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::blob::CipherBlob;
use crate::error::{Result, VaultError};
use crate::kdf::VaultMeta;
use crate::snapshots::Snapshot;

// ── Raw store ───────────────────────────────────────────────────────────────

pub trait KeyValueStore: Send + Sync {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>>;
    /// Replace the value for `key`. Readers see either the old or the new
    /// value, never a mix.
    fn write(&self, key: &str, value: &[u8]) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

// ── Schema ──────────────────────────────────────────────────────────────────

pub trait StorageKey {
    type Value: Serialize + DeserializeOwned;
    const NAME: &'static str;
}

/// `eleu.meta`: salt and KDF parameters.
pub struct MetaKey;
/// `eleu.vault`: the current encrypted vault state.
pub struct VaultCipherKey;
/// `eleu.snapshots`: every snapshot, as one array.
pub struct SnapshotsKey;

impl StorageKey for MetaKey {
    type Value = VaultMeta;
    const NAME: &'static str = "eleu.meta";
}

impl StorageKey for VaultCipherKey {
    type Value = CipherBlob;
    const NAME: &'static str = "eleu.vault";
}

impl StorageKey for SnapshotsKey {
    type Value = Vec<Snapshot>;
    const NAME: &'static str = "eleu.snapshots";
}

pub trait TypedStore {
    fn load<K: StorageKey>(&self) -> Result<Option<K::Value>>;
    fn save<K: StorageKey>(&self, value: &K::Value) -> Result<()>;
    fn delete<K: StorageKey>(&self) -> Result<()>;
}

impl<S: KeyValueStore + ?Sized> TypedStore for S {
    fn load<K: StorageKey>(&self) -> Result<Option<K::Value>> {
        match self.read(K::NAME)? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| VaultError::Storage {
                    key: K::NAME.into(),
                    reason: format!("schema mismatch: {e}"),
                }),
            None => Ok(None),
        }
    }

    fn save<K: StorageKey>(&self, value: &K::Value) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.write(K::NAME, &bytes)
    }

    fn delete<K: StorageKey>(&self) -> Result<()> {
        self.remove(K::NAME)
    }
}

// ── In-memory store ─────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.values.read().get(key).cloned())
    }

    fn write(&self, key: &str, value: &[u8]) -> Result<()> {
        self.values.write().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.values.write().remove(key);
        Ok(())
    }
}

/// Memory store whose reads or writes can be switched to fail.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct FlakyStore {
    inner: MemoryStore,
    pub(crate) fail_reads: std::sync::atomic::AtomicBool,
    pub(crate) fail_writes: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
impl FlakyStore {
    fn check(&self, flag: &std::sync::atomic::AtomicBool, key: &str) -> Result<()> {
        if flag.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(VaultError::Storage {
                key: key.into(),
                reason: "injected failure".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
impl KeyValueStore for FlakyStore {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.check(&self.fail_reads, key)?;
        self.inner.read(key)
    }

    fn write(&self, key: &str, value: &[u8]) -> Result<()> {
        self.check(&self.fail_writes, key)?;
        self.inner.write(key, value)
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.check(&self.fail_writes, key)?;
        self.inner.remove(key)
    }
}

// ── File store ──────────────────────────────────────────────────────────────

/// One `<key>.json` file per key under `root`. Writes go through a staging
/// file that is fsynced and renamed over the target.
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    staging_root: PathBuf,
}

impl FileStore {
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let staging_root = root.join("staging");
        fs::create_dir_all(&staging_root)?;
        restrict_dir_permissions(&root);
        cleanup_staging_dir(&staging_root);
        Ok(Self { root, staging_root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && !key.starts_with('.')
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));
        if !valid {
            return Err(VaultError::Storage {
                key: key.into(),
                reason: "invalid key name".into(),
            });
        }
        Ok(self.root.join(format!("{key}.json")))
    }
}

impl KeyValueStore for FileStore {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, key: &str, value: &[u8]) -> Result<()> {
        let dest = self.path_for(key)?;
        let staging_path = self.staging_root.join(format!("{}.staging", Uuid::new_v4()));
        {
            let mut file = File::create(&staging_path)?;
            file.write_all(value)?;
            file.sync_all()?;
        }
        fs::rename(&staging_path, &dest)?;
        fsync_dir(&self.root)?;
        debug!(key, bytes = value.len(), "stored document");
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn restrict_dir_permissions(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(0o700)) {
            warn!("cannot restrict permissions on {}: {}", path.display(), e);
        }
    }
}

/// Remove any leftover `.staging` files from an interrupted write.
fn cleanup_staging_dir(staging_root: &Path) {
    if let Ok(entries) = fs::read_dir(staging_root) {
        for entry in entries.flatten() {
            if entry.file_name().to_string_lossy().ends_with(".staging") {
                warn!(path = %entry.path().display(), "removing orphaned staging file");
                let _ = fs::remove_file(entry.path());
            }
        }
    }
}

fn fsync_dir(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        let dir = OpenOptions::new().read(true).open(path)?;
        dir.sync_all()?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kdf::{KdfParams, VaultMeta};
    use tempfile::tempdir;

    #[test]
    fn file_store_roundtrip_and_remove() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        assert!(store.read("eleu.vault").unwrap().is_none());

        store.write("eleu.vault", b"{\"iv\":\"a\",\"ct\":\"b\"}").unwrap();
        store.write("eleu.vault", b"{\"iv\":\"c\",\"ct\":\"d\"}").unwrap();
        let blob = store.load::<VaultCipherKey>().unwrap().unwrap();
        assert_eq!(blob.iv, "c");

        store.delete::<VaultCipherKey>().unwrap();
        store.delete::<VaultCipherKey>().unwrap();
        assert!(store.load::<VaultCipherKey>().unwrap().is_none());
    }

    #[test]
    fn file_store_rejects_path_like_keys() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        for key in ["../escape", "a/b", "", ".hidden"] {
            assert!(matches!(
                store.write(key, b"{}"),
                Err(VaultError::Storage { .. })
            ));
        }
    }

    #[test]
    fn orphaned_staging_files_are_removed_on_open() {
        let dir = tempdir().unwrap();
        let staging = dir.path().join("staging");
        fs::create_dir_all(&staging).unwrap();
        let orphan = staging.join("dead.staging");
        fs::write(&orphan, b"partial").unwrap();
        FileStore::open(dir.path()).unwrap();
        assert!(!orphan.exists());
    }

    #[test]
    fn schema_mismatch_is_a_storage_error() {
        let store = MemoryStore::new();
        store.write(MetaKey::NAME, br#"{"salt": 3}"#).unwrap();
        assert!(matches!(
            store.load::<MetaKey>(),
            Err(VaultError::Storage { .. })
        ));

        let meta = VaultMeta::new(KdfParams::default());
        store.save::<MetaKey>(&meta).unwrap();
        assert_eq!(store.load::<MetaKey>().unwrap(), Some(meta));
    }

    #[cfg(unix)]
    #[test]
    fn file_store_root_is_private() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempdir().unwrap();
        let root = dir.path().join("store");
        FileStore::open(&root).unwrap();
        let mode = fs::metadata(&root).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }
}

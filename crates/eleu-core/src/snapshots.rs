//! Named, timestamped backups of the encrypted vault state.
//!
//! Snapshots only ever hold ciphertext. Creating one copies the current
//! [`CipherBlob`]; restoring one overwrites it after an explicit confirmation
//! step. The collection lives under `eleu.snapshots` as a single JSON array.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::blob::CipherBlob;
use crate::error::{Result, VaultError};
use crate::ids::{now_millis, uid};
use crate::settings::Settings;
use crate::storage::{KeyValueStore, SnapshotsKey, TypedStore};
use crate::vault_cipher::VaultCipherStorage;

pub const DEFAULT_SNAPSHOT_NAME: &str = "Snapshot";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub id: String,
    pub name: String,
    /// Milliseconds since the Unix epoch.
    pub created_at: i64,
    pub payload: CipherBlob,
}

impl Snapshot {
    pub fn new(name: &str, payload: CipherBlob) -> Self {
        let name = name.trim();
        Self {
            id: uid("snap"),
            name: if name.is_empty() {
                DEFAULT_SNAPSHOT_NAME.to_string()
            } else {
                name.to_string()
            },
            created_at: now_millis(),
            payload,
        }
    }
}

/// A downloadable export: file name plus JSON body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportFile {
    pub file_name: String,
    pub contents: String,
}

pub fn export_file_name(namespace: &str, date: NaiveDate) -> String {
    format!("{namespace}-encrypted-{}.json", date.format("%Y-%m-%d"))
}

pub struct SnapshotStore {
    store: Arc<dyn KeyValueStore>,
    cipher: VaultCipherStorage,
    namespace: String,
    max_snapshots: Option<usize>,
}

impl SnapshotStore {
    pub fn new(cipher: VaultCipherStorage, settings: &Settings) -> Self {
        Self {
            store: Arc::clone(cipher.store()),
            cipher,
            namespace: settings.namespace.clone(),
            max_snapshots: settings.max_snapshots.filter(|&max| max > 0),
        }
    }

    fn read(&self) -> Result<Vec<Snapshot>> {
        Ok(self.store.load::<SnapshotsKey>()?.unwrap_or_default())
    }

    fn write(&self, list: Vec<Snapshot>) -> Result<()> {
        self.store.save::<SnapshotsKey>(&list)
    }

    /// All snapshots, newest first.
    pub fn list(&self) -> Result<Vec<Snapshot>> {
        let mut list = self.read()?;
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(list)
    }

    pub fn get(&self, id: &str) -> Result<Option<Snapshot>> {
        Ok(self.read()?.into_iter().find(|s| s.id == id))
    }

    pub fn add(&self, snapshot: Snapshot) -> Result<()> {
        let mut list = self.read()?;
        let (id, name) = (snapshot.id.clone(), snapshot.name.clone());
        list.insert(0, snapshot);
        let mut dropped = 0;
        if let Some(max) = self.max_snapshots {
            if list.len() > max {
                list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
                dropped = list.len() - max;
                list.truncate(max);
            }
        }
        self.write(list)?;
        info!(%id, %name, "snapshot added");
        if dropped > 0 {
            info!(dropped, "pruned oldest snapshots");
        }
        Ok(())
    }

    /// Copy the current vault cipher into a new snapshot.
    pub fn create(&self, name: &str) -> Result<Snapshot> {
        let payload = self.cipher.get()?.ok_or(VaultError::NoVault)?;
        let snapshot = Snapshot::new(name, payload);
        self.add(snapshot.clone())?;
        Ok(snapshot)
    }

    /// Remove by id. Unknown ids are ignored.
    pub fn delete(&self, id: &str) -> Result<()> {
        let mut list = self.read()?;
        let before = list.len();
        list.retain(|s| s.id != id);
        if list.len() != before {
            self.write(list)?;
            info!(id, "snapshot deleted");
        }
        Ok(())
    }

    /// First step of a restore. Nothing changes until [`PendingRestore::confirm`].
    /// Fails with `NoVault` when there is no current vault state to replace.
    pub fn request_restore(&self, snapshot: &Snapshot) -> Result<PendingRestore<'_>> {
        if self.cipher.get()?.is_none() {
            return Err(VaultError::NoVault);
        }
        Ok(PendingRestore {
            store: self,
            snapshot: snapshot.clone(),
        })
    }

    /// Restore `snapshot` if `confirm` approves it. Returns whether the vault
    /// state was replaced.
    pub fn restore<F>(&self, snapshot: &Snapshot, confirm: F) -> Result<bool>
    where
        F: FnOnce(&Snapshot) -> bool,
    {
        let pending = self.request_restore(snapshot)?;
        if !confirm(pending.snapshot()) {
            info!(id = %snapshot.id, "snapshot restore declined");
            return Ok(false);
        }
        pending.confirm()?;
        Ok(true)
    }

    pub fn restore_by_id<F>(&self, id: &str, confirm: F) -> Result<bool>
    where
        F: FnOnce(&Snapshot) -> bool,
    {
        let snapshot = self
            .get(id)?
            .ok_or_else(|| VaultError::NotFound(format!("snapshot {id}")))?;
        self.restore(&snapshot, confirm)
    }

    pub fn export_to_file(&self, blob: &CipherBlob) -> Result<ExportFile> {
        Ok(ExportFile {
            file_name: export_file_name(&self.namespace, Utc::now().date_naive()),
            contents: blob.to_json()?,
        })
    }

    pub fn export_current(&self) -> Result<ExportFile> {
        let blob = self.cipher.get()?.ok_or(VaultError::NoVault)?;
        self.export_to_file(&blob)
    }

    /// Validate an exported file and make it the current vault state. On any
    /// validation failure the current state is left untouched.
    pub fn import_from_file(&self, contents: &str) -> Result<CipherBlob> {
        let blob = CipherBlob::parse_import(contents).map_err(|e| {
            warn!(error = %e, "rejected encrypted import");
            e
        })?;
        self.cipher.set(&blob)?;
        info!("encrypted backup imported as current vault state");
        Ok(blob)
    }
}

/// A restore waiting for confirmation. Dropping it leaves the vault unchanged.
#[must_use = "a pending restore does nothing until confirmed"]
pub struct PendingRestore<'a> {
    store: &'a SnapshotStore,
    snapshot: Snapshot,
}

impl PendingRestore<'_> {
    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// Overwrite the current vault state with the snapshot payload. Any
    /// unlocked session must unlock again afterwards.
    pub fn confirm(self) -> Result<()> {
        if self.store.cipher.get()?.is_none() {
            return Err(VaultError::NoVault);
        }
        self.store.cipher.set(&self.snapshot.payload)?;
        info!(id = %self.snapshot.id, "snapshot restored");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FlakyStore, MemoryStore};
    use std::sync::atomic::Ordering;

    fn blob(tag: u8) -> CipherBlob {
        CipherBlob::from_parts(&[tag; 12], &[tag; 24])
    }

    fn setup(settings: &Settings) -> (VaultCipherStorage, SnapshotStore) {
        let cipher = VaultCipherStorage::new(Arc::new(MemoryStore::new()));
        let snaps = SnapshotStore::new(cipher.clone(), settings);
        (cipher, snaps)
    }

    fn snapshot_at(name: &str, created_at: i64, payload: CipherBlob) -> Snapshot {
        let mut s = Snapshot::new(name, payload);
        s.created_at = created_at;
        s
    }

    #[test]
    fn list_is_newest_first() {
        let (_, snaps) = setup(&Settings::default());
        snaps.add(snapshot_at("t2", 2_000, blob(2))).unwrap();
        snaps.add(snapshot_at("t1", 1_000, blob(1))).unwrap();
        snaps.add(snapshot_at("t3", 3_000, blob(3))).unwrap();
        let names: Vec<_> = snaps.list().unwrap().into_iter().map(|s| s.name).collect();
        assert_eq!(names, ["t3", "t2", "t1"]);
    }

    #[test]
    fn empty_name_defaults() {
        let s = Snapshot::new("   ", blob(1));
        assert_eq!(s.name, DEFAULT_SNAPSHOT_NAME);
        assert!(s.id.starts_with("snap_"));
    }

    #[test]
    fn create_requires_current_vault() {
        let (cipher, snaps) = setup(&Settings::default());
        assert!(matches!(snaps.create("x"), Err(VaultError::NoVault)));
        cipher.set(&blob(9)).unwrap();
        let created = snaps.create("before-reset").unwrap();
        assert_eq!(created.payload, blob(9));
        assert_eq!(snaps.list().unwrap(), vec![created]);
    }

    #[test]
    fn delete_is_idempotent() {
        let (_, snaps) = setup(&Settings::default());
        let s = Snapshot::new("a", blob(1));
        snaps.add(s.clone()).unwrap();
        snaps.delete("missing").unwrap();
        assert_eq!(snaps.list().unwrap().len(), 1);
        snaps.delete(&s.id).unwrap();
        snaps.delete(&s.id).unwrap();
        assert!(snaps.list().unwrap().is_empty());
    }

    #[test]
    fn restore_needs_confirmation() {
        let (cipher, snaps) = setup(&Settings::default());
        cipher.set(&blob(1)).unwrap();
        let s = Snapshot::new("old", blob(2));
        snaps.add(s.clone()).unwrap();

        assert!(!snaps.restore(&s, |_| false).unwrap());
        assert_eq!(cipher.get().unwrap(), Some(blob(1)));

        let pending = snaps.request_restore(&s).unwrap();
        drop(pending);
        assert_eq!(cipher.get().unwrap(), Some(blob(1)));

        assert!(snaps.restore_by_id(&s.id, |_| true).unwrap());
        assert_eq!(cipher.get().unwrap(), Some(s.payload));
    }

    #[test]
    fn restore_unknown_id_is_not_found() {
        let (_, snaps) = setup(&Settings::default());
        assert!(matches!(
            snaps.restore_by_id("nope", |_| true),
            Err(VaultError::NotFound(_))
        ));
    }

    #[test]
    fn cap_drops_oldest() {
        let settings = Settings {
            max_snapshots: Some(2),
            ..Settings::default()
        };
        let (_, snaps) = setup(&settings);
        snaps.add(snapshot_at("t1", 1_000, blob(1))).unwrap();
        snaps.add(snapshot_at("t2", 2_000, blob(2))).unwrap();
        snaps.add(snapshot_at("t3", 3_000, blob(3))).unwrap();
        let names: Vec<_> = snaps.list().unwrap().into_iter().map(|s| s.name).collect();
        assert_eq!(names, ["t3", "t2"]);
    }

    #[test]
    fn restore_requires_current_vault_state() {
        let (cipher, snaps) = setup(&Settings::default());
        let s = Snapshot::new("orphan", blob(2));
        snaps.add(s.clone()).unwrap();

        assert!(matches!(
            snaps.restore(&s, |_| true),
            Err(VaultError::NoVault)
        ));
        assert!(matches!(snaps.request_restore(&s), Err(VaultError::NoVault)));
        assert_eq!(cipher.get().unwrap(), None);

        // A pending restore whose target slot vanishes before confirming.
        cipher.set(&blob(1)).unwrap();
        let pending = snaps.request_restore(&s).unwrap();
        cipher.clear_all().unwrap();
        assert!(matches!(pending.confirm(), Err(VaultError::NoVault)));
        assert_eq!(cipher.get().unwrap(), None);
    }

    #[test]
    fn zero_cap_keeps_everything() {
        let settings = Settings {
            max_snapshots: Some(0),
            ..Settings::default()
        };
        let (cipher, snaps) = setup(&settings);
        cipher.set(&blob(1)).unwrap();
        let a = snaps.create("a").unwrap();
        let b = snaps.create("b").unwrap();
        let ids: Vec<_> = snaps.list().unwrap().into_iter().map(|s| s.id).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&a.id) && ids.contains(&b.id));
    }

    #[test]
    fn failed_write_does_not_add_snapshot() {
        let store = Arc::new(FlakyStore::default());
        let cipher = VaultCipherStorage::new(store.clone());
        let snaps = SnapshotStore::new(cipher.clone(), &Settings::default());
        cipher.set(&blob(1)).unwrap();

        store.fail_writes.store(true, Ordering::SeqCst);
        assert!(matches!(snaps.create("lost"), Err(VaultError::Storage { .. })));
        store.fail_writes.store(false, Ordering::SeqCst);
        assert!(snaps.list().unwrap().is_empty());
    }

    #[test]
    fn import_validates_before_touching_state() {
        let (cipher, snaps) = setup(&Settings::default());
        cipher.set(&blob(1)).unwrap();

        let res = snaps.import_from_file(r#"{"foo": "bar"}"#);
        assert!(matches!(res, Err(VaultError::InvalidImportFormat(_))));
        assert_eq!(cipher.get().unwrap(), Some(blob(1)));

        snaps.import_from_file(r#"{"iv": "AAA", "ct": "BBB"}"#).unwrap();
        assert_eq!(
            cipher.get().unwrap(),
            Some(CipherBlob {
                iv: "AAA".into(),
                ct: "BBB".into()
            })
        );
    }

    #[test]
    fn export_names_and_contents() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(
            export_file_name("ELEUTHIA", date),
            "ELEUTHIA-encrypted-2024-03-09.json"
        );

        let (cipher, snaps) = setup(&Settings::default());
        assert!(matches!(snaps.export_current(), Err(VaultError::NoVault)));
        cipher.set(&blob(4)).unwrap();
        let file = snaps.export_current().unwrap();
        assert!(file.file_name.starts_with("ELEUTHIA-encrypted-"));
        assert!(file.file_name.ends_with(".json"));
        assert_eq!(CipherBlob::parse_import(&file.contents).unwrap(), blob(4));
    }
}

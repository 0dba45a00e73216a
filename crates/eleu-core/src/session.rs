//! Vault session: the lock/unlock lifecycle.
//!
//! `Locked -> unlock(passphrase) -> Unlocked -> lock() | idle timeout -> Locked`
//!
//! While unlocked the session holds the derived key and the decrypted
//! contents in memory. Both are dropped (and zeroized) on lock. Every access
//! also checks that the stored vault cipher is still the one this session
//! decrypted or last wrote; if a restore or import replaced it, the session
//! locks and the caller has to unlock again.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::blob::CipherBlob;
use crate::crypto::VaultCrypto;
use crate::entries::{Entry, VaultContents};
use crate::error::{Result, VaultError};
use crate::ids::now_millis;
use crate::kdf::{KdfParams, VaultMeta};
use crate::settings::Settings;
use crate::vault_cipher::VaultCipherStorage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Locked,
    Unlocked,
}

struct Unlocked {
    crypto: VaultCrypto,
    contents: VaultContents,
    /// The cipher this session last read or wrote.
    blob: CipherBlob,
    last_activity: Instant,
}

/// Thread-safe session handle. Clone to share.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Mutex<Option<Unlocked>>>,
    cipher: VaultCipherStorage,
    auto_lock: Option<Duration>,
    kdf: KdfParams,
}

impl Session {
    pub fn new(cipher: VaultCipherStorage, settings: &Settings) -> Self {
        Self {
            inner: Arc::new(Mutex::new(None)),
            cipher,
            auto_lock: (settings.auto_lock_secs > 0)
                .then(|| Duration::from_secs(settings.auto_lock_secs)),
            kdf: settings.kdf,
        }
    }

    /// Create a new, empty vault protected by `passphrase` and unlock it.
    pub fn create(&self, passphrase: &str) -> Result<()> {
        if self.cipher.has_vault()? {
            return Err(VaultError::VaultExists);
        }
        let meta = VaultMeta::new(self.kdf);
        let crypto = VaultCrypto::new(meta.derive_key(passphrase)?);
        let contents = VaultContents::empty();
        let blob = crypto.encrypt_payload(&contents)?;
        self.cipher.set_meta(&meta)?;
        self.cipher.set(&blob)?;
        info!("vault created");
        *self.inner.lock() = Some(Unlocked {
            crypto,
            contents,
            blob,
            last_activity: Instant::now(),
        });
        Ok(())
    }

    pub fn unlock(&self, passphrase: &str) -> Result<()> {
        let meta = self.cipher.meta()?.ok_or(VaultError::NoVault)?;
        let blob = self.cipher.get()?.ok_or(VaultError::NoVault)?;
        let crypto = VaultCrypto::new(meta.derive_key(passphrase)?);
        let contents: VaultContents = crypto.decrypt_payload(&blob).map_err(|e| {
            warn!("unlock failed");
            e
        })?;
        info!(entries = contents.entries.len(), "vault unlocked");
        *self.inner.lock() = Some(Unlocked {
            crypto,
            contents,
            blob,
            last_activity: Instant::now(),
        });
        Ok(())
    }

    pub fn lock(&self) {
        if self.inner.lock().take().is_some() {
            info!("vault locked");
        }
    }

    pub fn state(&self) -> LockState {
        let mut guard = self.inner.lock();
        match self.check(&mut guard) {
            Ok(_) => LockState::Unlocked,
            Err(_) => LockState::Locked,
        }
    }

    pub fn is_locked(&self) -> bool {
        self.state() == LockState::Locked
    }

    /// Reset the idle timer.
    pub fn touch(&self) {
        let mut guard = self.inner.lock();
        if let Ok(unlocked) = self.check(&mut guard) {
            unlocked.last_activity = Instant::now();
        }
    }

    /// Time left before auto-lock. `None` when locked or auto-lock is off.
    pub fn time_until_lock(&self) -> Option<Duration> {
        let mut guard = self.inner.lock();
        let limit = self.auto_lock?;
        let unlocked = self.check(&mut guard).ok()?;
        Some(limit.saturating_sub(unlocked.last_activity.elapsed()))
    }

    /// Run `f` against the decrypted contents.
    pub fn with_contents<R>(&self, f: impl FnOnce(&VaultContents) -> R) -> Result<R> {
        let mut guard = self.inner.lock();
        let unlocked = self.check(&mut guard)?;
        unlocked.last_activity = Instant::now();
        Ok(f(&unlocked.contents))
    }

    pub fn contents(&self) -> Result<VaultContents> {
        self.with_contents(VaultContents::clone)
    }

    /// Add or replace an entry and persist the vault.
    pub fn save_entry(&self, mut entry: Entry) -> Result<()> {
        entry.updated_at = now_millis();
        self.update(|contents| contents.upsert(entry))
    }

    /// Prepend imported entries and persist. Returns how many were added.
    pub fn import_entries(&self, entries: Vec<Entry>) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }
        let count = entries.len();
        self.update(|contents| {
            contents.import(entries);
        })?;
        info!(count, "entries imported");
        Ok(count)
    }

    /// Apply `change` to a copy of the contents, encrypt it with a fresh IV
    /// and replace the stored cipher. The in-memory state only moves forward
    /// once the write succeeded.
    fn update(&self, change: impl FnOnce(&mut VaultContents)) -> Result<()> {
        let mut guard = self.inner.lock();
        let unlocked = self.check(&mut guard)?;
        let mut next = unlocked.contents.clone();
        change(&mut next);
        let blob = unlocked.crypto.encrypt_payload(&next)?;
        self.cipher.set(&blob)?;
        unlocked.contents = next;
        unlocked.blob = blob;
        unlocked.last_activity = Instant::now();
        Ok(())
    }

    /// Enforce auto-lock and stale-cipher invalidation, returning the unlocked
    /// state if it is still valid. Any failure, including a storage error
    /// while reading the current cipher, drops the unlocked state.
    fn check<'g>(&self, guard: &'g mut Option<Unlocked>) -> Result<&'g mut Unlocked> {
        let verdict = match guard.as_ref() {
            None => return Err(VaultError::Locked),
            Some(unlocked) => self.still_valid(unlocked),
        };
        match verdict {
            Ok(true) => guard.as_mut().ok_or(VaultError::Locked),
            Ok(false) => {
                *guard = None;
                Err(VaultError::Locked)
            }
            Err(e) => {
                warn!(error = %e, "cannot verify vault state; locking");
                *guard = None;
                Err(e)
            }
        }
    }

    fn still_valid(&self, unlocked: &Unlocked) -> Result<bool> {
        if self
            .auto_lock
            .is_some_and(|limit| unlocked.last_activity.elapsed() > limit)
        {
            info!("auto-lock after inactivity");
            return Ok(false);
        }
        if self.cipher.get()?.as_ref() != Some(&unlocked.blob) {
            warn!("stored vault changed underneath the session; locking");
            return Ok(false);
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kdf::test_params;
    use crate::storage::{FlakyStore, MemoryStore};
    use std::sync::atomic::Ordering;

    fn settings() -> Settings {
        Settings {
            kdf: test_params(),
            ..Settings::default()
        }
    }

    fn session_with(settings: &Settings) -> (VaultCipherStorage, Session) {
        let cipher = VaultCipherStorage::new(Arc::new(MemoryStore::new()));
        let session = Session::new(cipher.clone(), settings);
        (cipher, session)
    }

    #[test]
    fn create_then_unlock_roundtrip() {
        let (cipher, session) = session_with(&settings());
        session.create("correct horse").unwrap();
        assert_eq!(session.state(), LockState::Unlocked);

        let mut e = Entry::new("mail");
        e.password = Some("pw".into());
        session.save_entry(e).unwrap();
        session.lock();
        assert!(session.is_locked());
        assert!(matches!(session.contents(), Err(VaultError::Locked)));

        let other = Session::new(cipher, &settings());
        other.unlock("correct horse").unwrap();
        let contents = other.contents().unwrap();
        assert_eq!(contents.entries.len(), 1);
        assert_eq!(contents.entries[0].title, "mail");
    }

    #[test]
    fn wrong_passphrase_is_decryption_error() {
        let (_, session) = session_with(&settings());
        session.create("right").unwrap();
        session.lock();
        assert!(matches!(session.unlock("wrong"), Err(VaultError::Decryption)));
        assert!(session.is_locked());
    }

    #[test]
    fn unlock_without_vault() {
        let (_, session) = session_with(&settings());
        assert!(matches!(session.unlock("pw"), Err(VaultError::NoVault)));
    }

    #[test]
    fn create_refuses_to_overwrite() {
        let (_, session) = session_with(&settings());
        session.create("pw").unwrap();
        assert!(matches!(session.create("pw"), Err(VaultError::VaultExists)));
    }

    #[test]
    fn every_save_uses_a_fresh_iv() {
        let (cipher, session) = session_with(&settings());
        session.create("pw").unwrap();
        let first = cipher.get().unwrap().unwrap();
        session.save_entry(Entry::new("a")).unwrap();
        let second = cipher.get().unwrap().unwrap();
        assert_ne!(first.iv, second.iv);
    }

    #[test]
    fn replaced_cipher_locks_session() {
        let (cipher, session) = session_with(&settings());
        session.create("pw").unwrap();
        cipher
            .set(&CipherBlob {
                iv: "AAA".into(),
                ct: "BBB".into(),
            })
            .unwrap();
        assert!(matches!(
            session.save_entry(Entry::new("x")),
            Err(VaultError::Locked)
        ));
        assert!(session.is_locked());
    }

    #[test]
    fn storage_failure_drops_unlocked_state() {
        let store = Arc::new(FlakyStore::default());
        let cipher = VaultCipherStorage::new(store.clone());
        let session = Session::new(cipher, &settings());
        session.create("pw").unwrap();

        store.fail_reads.store(true, Ordering::SeqCst);
        assert_eq!(session.state(), LockState::Locked);
        store.fail_reads.store(false, Ordering::SeqCst);

        assert!(session.is_locked());
        assert!(session.inner.lock().is_none());
        assert!(matches!(session.contents(), Err(VaultError::Locked)));
    }

    #[test]
    fn idle_timeout_locks() {
        let mut s = settings();
        s.auto_lock_secs = 1;
        let (_, session) = session_with(&s);
        session.create("pw").unwrap();
        assert!(session.time_until_lock().is_some());
        {
            let mut guard = session.inner.lock();
            guard.as_mut().unwrap().last_activity = Instant::now() - Duration::from_secs(5);
        }
        assert!(matches!(session.contents(), Err(VaultError::Locked)));
        assert!(session.time_until_lock().is_none());
    }

    #[test]
    fn auto_lock_disabled() {
        let mut s = settings();
        s.auto_lock_secs = 0;
        let (_, session) = session_with(&s);
        session.create("pw").unwrap();
        assert!(session.time_until_lock().is_none());
        assert!(!session.is_locked());
    }

    #[test]
    fn import_entries_prepends() {
        let (_, session) = session_with(&settings());
        session.create("pw").unwrap();
        session.save_entry(Entry::new("old")).unwrap();
        let n = session
            .import_entries(vec![Entry::new("new1"), Entry::new("new2")])
            .unwrap();
        assert_eq!(n, 2);
        let titles = session
            .with_contents(|c| c.entries.iter().map(|e| e.title.clone()).collect::<Vec<_>>())
            .unwrap();
        assert_eq!(titles, ["new1", "new2", "old"]);
    }
}

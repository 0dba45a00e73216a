use std::sync::Arc;

use crate::blob::CipherBlob;
use crate::error::Result;
use crate::kdf::VaultMeta;
use crate::storage::{KeyValueStore, MetaKey, TypedStore, VaultCipherKey};

/// Single-slot holder of the current encrypted vault state and its unlock
/// metadata. The slot is only ever replaced as a whole.
#[derive(Clone)]
pub struct VaultCipherStorage {
    store: Arc<dyn KeyValueStore>,
}

impl VaultCipherStorage {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    pub fn get(&self) -> Result<Option<CipherBlob>> {
        self.store.load::<VaultCipherKey>()
    }

    pub fn set(&self, blob: &CipherBlob) -> Result<()> {
        self.store.save::<VaultCipherKey>(blob)
    }

    pub fn meta(&self) -> Result<Option<VaultMeta>> {
        self.store.load::<MetaKey>()
    }

    pub fn set_meta(&self, meta: &VaultMeta) -> Result<()> {
        self.store.save::<MetaKey>(meta)
    }

    /// A vault is usable only when both the meta and the cipher are present.
    pub fn has_vault(&self) -> Result<bool> {
        Ok(self.meta()?.is_some() && self.get()?.is_some())
    }

    pub fn clear_all(&self) -> Result<()> {
        self.store.delete::<MetaKey>()?;
        self.store.delete::<VaultCipherKey>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kdf::{KdfParams, VaultMeta};
    use crate::storage::MemoryStore;

    #[test]
    fn slot_is_replaced_wholesale() {
        let slot = VaultCipherStorage::new(Arc::new(MemoryStore::new()));
        assert!(slot.get().unwrap().is_none());
        assert!(!slot.has_vault().unwrap());

        let first = CipherBlob::from_parts(&[1; 12], &[1; 20]);
        let second = CipherBlob::from_parts(&[2; 12], &[2; 20]);
        slot.set(&first).unwrap();
        slot.set(&second).unwrap();
        assert_eq!(slot.get().unwrap(), Some(second));

        assert!(!slot.has_vault().unwrap());
        slot.set_meta(&VaultMeta::new(KdfParams::default())).unwrap();
        assert!(slot.has_vault().unwrap());

        slot.clear_all().unwrap();
        assert!(slot.get().unwrap().is_none());
        assert!(slot.meta().unwrap().is_none());
    }
}

use crate::{Store, StoreError, StoreResult, Transaction};
use parking_lot::{Mutex, RwLock};
use std::{collections::BTreeMap, sync::Arc};

type Entries = BTreeMap<Vec<u8>, Vec<u8>>;

/// In-memory store. Clones share the same underlying data.
#[derive(Clone, Default)]
pub struct MemStore {
    committed: Arc<RwLock<Entries>>,
    writer: Arc<Mutex<()>>,
}

impl std::fmt::Debug for MemStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemStore")
            .field("entries", &self.committed.read().len())
            .finish()
    }
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed keys.
    pub fn len(&self) -> usize {
        self.committed.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.committed.read().is_empty()
    }
}

/// Uncommitted working set layered over a committed snapshot.
/// `None` in the overlay marks a removal.
struct OverlayTxn<'a> {
    base: &'a Entries,
    overlay: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl<'a> OverlayTxn<'a> {
    fn new(base: &'a Entries) -> Self {
        Self {
            base,
            overlay: BTreeMap::new(),
        }
    }
}

impl Transaction for OverlayTxn<'_> {
    fn read(&mut self, key: &[u8]) -> StoreResult<Vec<u8>> {
        match self.overlay.get(key) {
            Some(Some(value)) => Ok(value.clone()),
            Some(None) => Err(StoreError::not_found(key)),
            None => self
                .base
                .get(key)
                .cloned()
                .ok_or_else(|| StoreError::not_found(key)),
        }
    }

    fn write(&mut self, key: &[u8], value: &[u8]) -> StoreResult<()> {
        self.overlay.insert(key.to_vec(), Some(value.to_vec()));
        Ok(())
    }

    fn remove(&mut self, key: &[u8]) -> StoreResult<()> {
        self.overlay.insert(key.to_vec(), None);
        Ok(())
    }
}

impl Store for MemStore {
    fn write_transaction<T, E, F>(&self, body: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn Transaction) -> Result<T, E>,
        E: From<StoreError>,
    {
        let _writer = self.writer.lock();
        let (out, overlay) = {
            let snapshot = self.committed.read();
            let mut txn = OverlayTxn::new(&snapshot);
            let out = body(&mut txn)?;
            (out, txn.overlay)
        };
        // Holding the writer lock means nothing committed since the snapshot.
        let mut committed = self.committed.write();
        for (key, value) in overlay {
            match value {
                Some(value) => {
                    committed.insert(key, value);
                }
                None => {
                    committed.remove(&key);
                }
            }
        }
        Ok(out)
    }

    fn read_transaction<T, E, F>(&self, body: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn Transaction) -> Result<T, E>,
        E: From<StoreError>,
    {
        let snapshot = self.committed.read();
        let mut txn = OverlayTxn::new(&snapshot);
        body(&mut txn)
    }
}

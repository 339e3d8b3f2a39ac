// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory persistence for documents and pending relations.
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use stroom_core::{DocumentState, RecordKey, RelationKey, Revision};

use crate::documents::{DocumentStore, StoreError};
use crate::relations::RelationStore;

/// An in-memory store for document state and the pending-relations index.
#[derive(Debug, Default)]
pub struct InnerMemoryStore {
    documents: HashMap<RecordKey, DocumentState>,
    pending: HashMap<RecordKey, BTreeSet<RelationKey>>,
}

/// An in-memory store implementing [`DocumentStore`](crate::DocumentStore) and
/// [`RelationStore`](crate::RelationStore).
///
/// `MemoryStore` supports usage in asynchronous and multi-threaded contexts by wrapping an
/// `InnerMemoryStore` with an `RwLock` and `Arc`; clones share the same state. Put operations
/// hold the write lock for the read-compare-write, which makes the per-key revision check atomic.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<InnerMemoryStore>>,
}

impl MemoryStore {
    /// Create a new in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Obtain a read-lock on the store.
    fn read_store(&self) -> RwLockReadGuard<'_, InnerMemoryStore> {
        self.inner
            .read()
            .expect("acquire shared read access on store")
    }

    /// Obtain a write-lock on the store.
    fn write_store(&self) -> RwLockWriteGuard<'_, InnerMemoryStore> {
        self.inner
            .write()
            .expect("acquire exclusive write access on store")
    }
}

impl DocumentStore for MemoryStore {
    async fn get(&self, key: &RecordKey) -> Result<Option<DocumentState>, StoreError> {
        Ok(self.read_store().documents.get(key).cloned())
    }

    async fn put(
        &mut self,
        key: &RecordKey,
        state: DocumentState,
        expected: Option<Revision>,
    ) -> Result<(), StoreError> {
        let mut store = self.write_store();
        let actual = store.documents.get(key).map(DocumentState::revision);
        if actual != expected {
            return Err(StoreError::StaleWrite { expected, actual });
        }
        store.documents.insert(key.clone(), state);
        Ok(())
    }

    async fn is_live(&self, key: &RecordKey) -> Result<bool, StoreError> {
        Ok(self
            .read_store()
            .documents
            .get(key)
            .is_some_and(DocumentState::is_live))
    }
}

impl RelationStore for MemoryStore {
    async fn add_pending(
        &mut self,
        target: &RecordKey,
        relation: RelationKey,
    ) -> Result<bool, StoreError> {
        let mut store = self.write_store();
        let inserted = store
            .pending
            .entry(target.clone())
            .or_default()
            .insert(relation);
        Ok(inserted)
    }

    async fn take_pending(&mut self, target: &RecordKey) -> Result<Vec<RelationKey>, StoreError> {
        let mut store = self.write_store();
        let relations = store
            .pending
            .remove(target)
            .map(|pending| pending.into_iter().collect())
            .unwrap_or_default();
        Ok(relations)
    }

    async fn has_pending(&self, target: &RecordKey) -> Result<bool, StoreError> {
        Ok(self.read_store().pending.contains_key(target))
    }
}

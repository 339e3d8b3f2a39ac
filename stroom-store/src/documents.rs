// SPDX-License-Identifier: MIT OR Apache-2.0

//! Trait definition for keyed document persistence with optimistic concurrency.
use stroom_core::{DocumentState, RecordKey, Revision};
use thiserror::Error;

/// Interface for storing and querying the current state of records.
///
/// Two variants of the trait are provided: one which is thread-safe (implementing `Send`) and one
/// which is purely intended for single-threaded execution contexts.
#[trait_variant::make(DocumentStore: Send)]
pub trait LocalDocumentStore: Clone {
    /// Get the stored state for a key.
    ///
    /// Returns `None` when no document was ever created for the key. A deleted record returns its
    /// tombstone, not `None`.
    async fn get(&self, key: &RecordKey) -> Result<Option<DocumentState>, StoreError>;

    /// Put a new state for a key, conditional on the revision the caller last read.
    ///
    /// `expected` is `None` when the caller observed no state for the key, or the revision of the
    /// state it read. The write is accepted only when that still matches the store; otherwise it
    /// fails with [`StoreError::StaleWrite`] and the caller must re-read and retry.
    async fn put(
        &mut self,
        key: &RecordKey,
        state: DocumentState,
        expected: Option<Revision>,
    ) -> Result<(), StoreError>;

    /// Query whether a live (non-tombstoned) document exists for the key.
    async fn is_live(&self, key: &RecordKey) -> Result<bool, StoreError>;
}

/// Errors which can occur on store access.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum StoreError {
    /// The revision the caller read no longer matches the store. Transient; the caller re-reads
    /// and retries with a bounded attempt count.
    #[error("stale write: expected revision {expected:?}, store holds {actual:?}")]
    StaleWrite {
        expected: Option<Revision>,
        actual: Option<Revision>,
    },

    /// Critical backend failure. This is usually a reason to stop processing.
    #[error("critical storage failure: {0}")]
    Backend(String),
}

// SPDX-License-Identifier: MIT OR Apache-2.0

//! Trait definition for the pending-relations index.
use stroom_core::{RecordKey, RelationKey};

use crate::documents::StoreError;

/// Interface for tracking relations whose target record has not arrived yet.
///
/// Entries are indexed by the missing endpoint's key. When that record arrives the index is
/// drained for its key and every referencing record is re-published. Two variants of the trait
/// are provided: one which is thread-safe (implementing `Send`) and one for single-threaded
/// execution contexts.
#[trait_variant::make(RelationStore: Send)]
pub trait LocalRelationStore: Clone {
    /// Register a relation waiting for `target` to arrive.
    ///
    /// Returns `true` when the entry was new, `false` when the same relation was already pending.
    async fn add_pending(
        &mut self,
        target: &RecordKey,
        relation: RelationKey,
    ) -> Result<bool, StoreError>;

    /// Remove and return all relations waiting for `target`.
    async fn take_pending(&mut self, target: &RecordKey) -> Result<Vec<RelationKey>, StoreError>;

    /// Query whether any relation is waiting for `target`.
    async fn has_pending(&self, target: &RecordKey) -> Result<bool, StoreError>;
}

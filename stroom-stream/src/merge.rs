// SPDX-License-Identifier: MIT OR Apache-2.0

//! The per-key merge state machine.
use serde_json::Value;
use serde_json::map::Entry;
use stroom_core::schema::{DatasetSchema, TableSchema};
use stroom_core::{ChangeEvent, Document, DocumentState, Fields, OperationType, RecordKey};
use stroom_store::{DocumentStore, StoreError};
use thiserror::Error;
use tracing::{debug, warn};

/// Applies a change event against the document store and produces the new canonical state.
///
/// Every (stored state, operation) pair has a defined outcome:
///
/// - absent + ADD creates the document at revision 1, seeded from the table schema.
/// - live + ADD is a duplicate: logged and dropped, since ADD carries full initial state
///   only once.
/// - live + MODIFY deep-merges the partial payload and increments the revision.
/// - absent/tombstone + MODIFY fails with [`MergeError::UnknownRecord`]; it indicates an
///   ordering or data-loss problem upstream and must not create or resurrect a record.
/// - live + DELETE replaces the document with a tombstone at the next revision.
/// - tombstone + DELETE is an idempotent no-op.
/// - tombstone + ADD recreates the record, its revision continuing past the tombstone's.
///
/// If the conditional store write is rejected because another worker advanced the key in the
/// meantime, [`MergeOutcome::Retry`] asks the caller to re-read and re-apply.
pub async fn apply_event<S>(
    store: &mut S,
    dataset: &DatasetSchema,
    table: &TableSchema,
    event: &ChangeEvent,
) -> Result<MergeOutcome, MergeError>
where
    S: DocumentStore,
{
    let current = store.get(&event.key).await.map_err(MergeError::Store)?;
    let expected = current.as_ref().map(DocumentState::revision);

    let next = match (&current, event.operation) {
        (None, OperationType::Add) | (Some(DocumentState::Tombstone { .. }), OperationType::Add) => {
            let mut fields = table.empty_fields();
            deep_merge(&mut fields, prepare_payload(dataset, table, event));
            let revision = expected.map_or(1, |revision| revision + 1);
            DocumentState::Live(Document::new(event.key.clone(), revision, fields))
        }
        (Some(DocumentState::Live(_)), OperationType::Add) => {
            warn!(key = %event.key, "duplicate ADD, dropping event");
            return Ok(MergeOutcome::Dropped(DropReason::DuplicateAdd));
        }
        (Some(DocumentState::Live(document)), OperationType::Modify) => {
            let mut fields = document.fields.clone();
            deep_merge(&mut fields, prepare_payload(dataset, table, event));
            DocumentState::Live(Document::new(event.key.clone(), document.revision + 1, fields))
        }
        (None, OperationType::Modify)
        | (Some(DocumentState::Tombstone { .. }), OperationType::Modify)
        | (None, OperationType::Delete) => {
            return Err(MergeError::UnknownRecord(event.key.clone()));
        }
        (Some(DocumentState::Live(document)), OperationType::Delete) => DocumentState::Tombstone {
            revision: document.revision + 1,
        },
        (Some(DocumentState::Tombstone { .. }), OperationType::Delete) => {
            debug!(key = %event.key, "duplicate DELETE, nothing to do");
            return Ok(MergeOutcome::Dropped(DropReason::DuplicateDelete));
        }
    };

    match store.put(&event.key, next.clone(), expected).await {
        Ok(()) => Ok(match next {
            DocumentState::Live(document) => MergeOutcome::Applied(document),
            DocumentState::Tombstone { revision } => MergeOutcome::Deleted {
                key: event.key.clone(),
                revision,
            },
        }),
        Err(StoreError::StaleWrite { .. }) => Ok(MergeOutcome::Retry),
        Err(err) => Err(MergeError::Store(err)),
    }
}

/// Deep-merges a partial payload into a field mapping.
///
/// Scalar fields overwrite, nested mappings merge recursively, list fields replace wholesale.
/// Within one payload and across payloads the last writer per field wins; this is policy for
/// racing non-ordered deliveries, not derived from schema semantics.
pub fn deep_merge(target: &mut Fields, updates: Fields) {
    for (name, value) in updates {
        match target.entry(name) {
            Entry::Occupied(mut slot) => match (slot.get_mut(), value) {
                (Value::Object(existing), Value::Object(update)) => deep_merge(existing, update),
                (slot_value, value) => *slot_value = value,
            },
            Entry::Vacant(slot) => {
                slot.insert(value);
            }
        }
    }
}

/// Rewrites geometry values in the payload to carry the dataset's SRID.
///
/// WKT values become `SRID=<srid>;<wkt>`; values already prefixed, and null values, are left
/// untouched.
fn prepare_payload(dataset: &DatasetSchema, table: &TableSchema, event: &ChangeEvent) -> Fields {
    let mut payload = event.payload.clone();
    if let Some(srid) = dataset.srid() {
        for field in table.geometry_fields() {
            if let Some(Value::String(wkt)) = payload.get(&field.name) {
                if !wkt.is_empty() && !wkt.starts_with("SRID=") {
                    let prefixed = format!("SRID={srid};{wkt}");
                    payload.insert(field.name.clone(), Value::String(prefixed));
                }
            }
        }
    }
    payload
}

/// Result of applying one event: the new state, a drop, or a request to retry.
#[derive(Clone, Debug, PartialEq)]
pub enum MergeOutcome {
    /// A live document was created or updated; publish its full snapshot.
    Applied(Document),

    /// The record was tombstoned; publish a key-only delete event.
    Deleted { key: RecordKey, revision: u64 },

    /// The event was absorbed without effect; publish nothing.
    Dropped(DropReason),

    /// Another writer advanced the key between read and write; re-read and re-apply.
    Retry,
}

/// Expected conditions absorbed by the merge engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropReason {
    DuplicateAdd,
    DuplicateDelete,
}

/// Errors surfaced by the merge engine.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum MergeError {
    /// MODIFY or DELETE arrived for a key that was never created, or MODIFY for a deleted one.
    #[error("no live record for {0}")]
    UnknownRecord(RecordKey),

    /// Critical storage failure.
    #[error(transparent)]
    Store(StoreError),
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;
    use stroom_core::{ChangeEvent, DocumentState, OperationType, RecordKey};
    use stroom_store::{DocumentStore, MemoryStore};

    use crate::test_utils::{ContendedStore, buurten_add, buurten_key, fields, gebieden};

    use super::{DropReason, MergeError, MergeOutcome, apply_event, deep_merge};

    fn event(operation: OperationType, key: RecordKey, payload: serde_json::Value) -> ChangeEvent {
        ChangeEvent {
            operation,
            key,
            payload: payload.as_object().cloned().unwrap_or_default(),
        }
    }

    async fn apply(store: &mut MemoryStore, event: &ChangeEvent) -> Result<MergeOutcome, MergeError> {
        let dataset = gebieden();
        let table = dataset.table(&event.key.table).unwrap();
        apply_event(store, &dataset, table, event).await
    }

    #[tokio::test]
    async fn add_creates_revision_one() {
        let mut store = MemoryStore::new();
        let outcome = apply(&mut store, &buurten_add("X1", "Noord")).await.unwrap();

        let document = assert_matches!(outcome, MergeOutcome::Applied(document) => document);
        assert_eq!(document.revision, 1);
        assert_eq!(document.fields["naam"], json!("Noord"));
        // Schema fields the payload never mentioned are seeded empty.
        assert_eq!(document.fields["ligt_in_wijk"], json!(""));
    }

    #[tokio::test]
    async fn duplicate_add_is_dropped() {
        let mut store = MemoryStore::new();
        apply(&mut store, &buurten_add("X1", "Noord")).await.unwrap();

        let outcome = apply(&mut store, &buurten_add("X1", "Zuid")).await.unwrap();
        assert_eq!(outcome, MergeOutcome::Dropped(DropReason::DuplicateAdd));

        // The stored document is unaffected by the dropped event.
        let state = store.get(&buurten_key("X1")).await.unwrap().unwrap();
        assert_eq!(state.as_live().unwrap().fields["naam"], json!("Noord"));
    }

    #[tokio::test]
    async fn modify_merges_and_increments() {
        let mut store = MemoryStore::new();
        apply(&mut store, &buurten_add("X1", "Noord")).await.unwrap();

        let modify = event(
            OperationType::Modify,
            buurten_key("X1"),
            json!({"naam": "Noord-Oost"}),
        );
        let outcome = apply(&mut store, &modify).await.unwrap();

        let document = assert_matches!(outcome, MergeOutcome::Applied(document) => document);
        assert_eq!(document.revision, 2);
        assert_eq!(document.fields["naam"], json!("Noord-Oost"));
    }

    #[tokio::test]
    async fn modify_unknown_record_fails() {
        let mut store = MemoryStore::new();
        let modify = event(
            OperationType::Modify,
            buurten_key("X1"),
            json!({"naam": "Noord"}),
        );
        let result = apply(&mut store, &modify).await;
        assert_eq!(result, Err(MergeError::UnknownRecord(buurten_key("X1"))));

        // No document may be created by a failed MODIFY.
        assert_eq!(store.get(&buurten_key("X1")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn modify_after_delete_fails() {
        let mut store = MemoryStore::new();
        apply(&mut store, &buurten_add("X1", "Noord")).await.unwrap();
        let delete = event(OperationType::Delete, buurten_key("X1"), json!({}));
        apply(&mut store, &delete).await.unwrap();

        let modify = event(
            OperationType::Modify,
            buurten_key("X1"),
            json!({"naam": "Zuid"}),
        );
        let result = apply(&mut store, &modify).await;
        assert_eq!(result, Err(MergeError::UnknownRecord(buurten_key("X1"))));

        // The tombstone is retained, not replaced.
        let state = store.get(&buurten_key("X1")).await.unwrap().unwrap();
        assert_eq!(state, DocumentState::Tombstone { revision: 2 });
    }

    #[tokio::test]
    async fn delete_tombstones_and_is_idempotent() {
        let mut store = MemoryStore::new();
        apply(&mut store, &buurten_add("X1", "Noord")).await.unwrap();

        let delete = event(OperationType::Delete, buurten_key("X1"), json!({}));
        let outcome = apply(&mut store, &delete).await.unwrap();
        assert_eq!(
            outcome,
            MergeOutcome::Deleted {
                key: buurten_key("X1"),
                revision: 2
            }
        );

        // A second DELETE publishes nothing.
        let outcome = apply(&mut store, &delete).await.unwrap();
        assert_eq!(outcome, MergeOutcome::Dropped(DropReason::DuplicateDelete));
    }

    #[tokio::test]
    async fn delete_before_add_fails() {
        let mut store = MemoryStore::new();
        let delete = event(OperationType::Delete, buurten_key("X1"), json!({}));
        let result = apply(&mut store, &delete).await;
        assert_eq!(result, Err(MergeError::UnknownRecord(buurten_key("X1"))));
    }

    #[tokio::test]
    async fn add_after_delete_recreates_past_tombstone() {
        let mut store = MemoryStore::new();
        apply(&mut store, &buurten_add("X1", "Noord")).await.unwrap();
        let delete = event(OperationType::Delete, buurten_key("X1"), json!({}));
        apply(&mut store, &delete).await.unwrap();

        let outcome = apply(&mut store, &buurten_add("X1", "Nieuw-Noord")).await.unwrap();
        let document = assert_matches!(outcome, MergeOutcome::Applied(document) => document);
        assert_eq!(document.fields["naam"], json!("Nieuw-Noord"));
        // Revision continues past the tombstone; it never decreases.
        assert_eq!(document.revision, 3);
    }

    #[tokio::test]
    async fn modify_fold_matches_arrival_order() {
        let mut store = MemoryStore::new();
        apply(&mut store, &buurten_add("X1", "Noord")).await.unwrap();

        let payloads = [
            json!({"naam": "A"}),
            json!({"naam": "B", "ligt_in_wijk": "W1"}),
            json!({"naam": "C"}),
        ];
        for payload in &payloads {
            let modify = event(OperationType::Modify, buurten_key("X1"), payload.clone());
            apply(&mut store, &modify).await.unwrap();
        }

        let state = store.get(&buurten_key("X1")).await.unwrap().unwrap();
        let document = state.as_live().unwrap();
        // The result equals the fold of all payloads in arrival order, and the revision
        // equals 1 plus the number of applied MODIFYs.
        assert_eq!(document.fields["naam"], json!("C"));
        assert_eq!(document.fields["ligt_in_wijk"], json!("W1"));
        assert_eq!(document.revision, 4);
    }

    #[tokio::test]
    async fn stale_write_requests_retry() {
        let mut store = ContendedStore::default();
        let dataset = gebieden();
        let table = dataset.table("buurten").unwrap();
        let add = buurten_add("X1", "Noord");

        // The write loses the race once; the engine asks the caller to re-read and retry.
        store.contend(1);
        let outcome = apply_event(&mut store, &dataset, table, &add).await.unwrap();
        assert_eq!(outcome, MergeOutcome::Retry);

        // Nothing was written by the losing attempt, and the retry goes through.
        let outcome = apply_event(&mut store, &dataset, table, &add).await.unwrap();
        assert_matches!(outcome, MergeOutcome::Applied(document) if document.revision == 1);
    }

    #[tokio::test]
    async fn geometry_values_get_srid_prefix() {
        let mut store = MemoryStore::new();
        let add = event(
            OperationType::Add,
            RecordKey::new("gebieden", "bouwblokken", "03630012096976", Some(1)),
            json!({"identificatie": "03630012096976", "volgnummer": 1, "code": "AA02",
                   "geometrie": "POLYGON ((119836.994 489477.607))"}),
        );
        let outcome = apply(&mut store, &add).await.unwrap();

        let document = assert_matches!(outcome, MergeOutcome::Applied(document) => document);
        assert_eq!(
            document.fields["geometrie"],
            json!("SRID=28992;POLYGON ((119836.994 489477.607))")
        );

        // An already prefixed value is left alone.
        let modify = event(
            OperationType::Modify,
            RecordKey::new("gebieden", "bouwblokken", "03630012096976", Some(1)),
            json!({"geometrie": "SRID=4326;POINT (4.9 52.4)"}),
        );
        let outcome = apply(&mut store, &modify).await.unwrap();
        let document = assert_matches!(outcome, MergeOutcome::Applied(document) => document);
        assert_eq!(document.fields["geometrie"], json!("SRID=4326;POINT (4.9 52.4)"));
    }

    #[test]
    fn deep_merge_semantics() {
        let mut target = fields(json!({
            "naam": "Noord",
            "adres": {"straat": "Damrak", "nummer": 1},
            "codes": [1, 2, 3]
        }));
        let updates = fields(json!({
            "adres": {"nummer": 7},
            "codes": [9],
            "naam": "Zuid"
        }));
        deep_merge(&mut target, updates);

        // Scalars overwrite.
        assert_eq!(target["naam"], json!("Zuid"));
        // Nested mappings merge recursively.
        assert_eq!(target["adres"], json!({"straat": "Damrak", "nummer": 7}));
        // Lists replace wholesale.
        assert_eq!(target["codes"], json!([9]));
    }

    #[test]
    fn deep_merge_scalar_replaces_mapping() {
        let mut target = fields(json!({"adres": {"straat": "Damrak"}}));
        deep_merge(&mut target, fields(json!({"adres": null})));
        assert_eq!(target["adres"], json!(null));
    }
}

// SPDX-License-Identifier: MIT OR Apache-2.0

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::json;
use stroom_core::schema::DatasetSchema;
use stroom_core::{
    ChangeEvent, DocumentState, Fields, OperationType, RecordKey, RelationKey, Revision, SchemaSet,
};
use stroom_store::{DocumentStore, MemoryStore, RelationStore, StoreError};

pub fn gebieden() -> DatasetSchema {
    serde_json::from_value(json!({
        "id": "gebieden",
        "crs": "EPSG:28992",
        "tables": [
            {
                "id": "buurten",
                "identifier": ["identificatie"],
                "fields": [
                    {"name": "identificatie", "type": "string"},
                    {"name": "naam", "type": "string"},
                    {"name": "ligt_in_wijk", "type": "string",
                     "relation": "gebieden:wijken"}
                ]
            },
            {
                "id": "wijken",
                "identifier": ["identificatie"],
                "fields": [
                    {"name": "identificatie", "type": "string"},
                    {"name": "naam", "type": "string"}
                ]
            },
            {
                "id": "bouwblokken",
                "identifier": ["identificatie", "volgnummer"],
                "fields": [
                    {"name": "identificatie", "type": "string"},
                    {"name": "volgnummer", "type": "integer"},
                    {"name": "code", "type": "string"},
                    {"name": "begin_geldigheid", "type": "string"},
                    {"name": "eind_geldigheid", "type": "string"},
                    {"name": "geometrie", "type": "geometry"},
                    {"name": "ligt_in_buurt", "type": "string",
                     "relation": "gebieden:buurten"}
                ]
            }
        ]
    }))
    .unwrap()
}

pub fn schemas() -> Arc<SchemaSet> {
    Arc::new(SchemaSet::new([gebieden()]))
}

pub fn fields(value: serde_json::Value) -> Fields {
    value.as_object().cloned().expect("JSON object fixture")
}

pub fn buurten_key(identificatie: &str) -> RecordKey {
    RecordKey::new("gebieden", "buurten", identificatie, None)
}

pub fn wijken_key(identificatie: &str) -> RecordKey {
    RecordKey::new("gebieden", "wijken", identificatie, None)
}

pub fn buurten_add(identificatie: &str, naam: &str) -> ChangeEvent {
    ChangeEvent {
        operation: OperationType::Add,
        key: buurten_key(identificatie),
        payload: fields(json!({"identificatie": identificatie, "naam": naam})),
    }
}

pub fn wijken_add(identificatie: &str, naam: &str) -> ChangeEvent {
    ChangeEvent {
        operation: OperationType::Add,
        key: wijken_key(identificatie),
        payload: fields(json!({"identificatie": identificatie, "naam": naam})),
    }
}

fn raw(header: serde_json::Value, body: serde_json::Value) -> stroom_core::RawMessage {
    (
        serde_json::to_vec(&header).expect("encode header fixture"),
        serde_json::to_vec(&body).expect("encode body fixture"),
    )
}

pub fn raw_add(identificatie: &str, naam: &str) -> stroom_core::RawMessage {
    raw(
        json!({"event_type": "ADD", "catalog": "gebieden", "collection": "buurten"}),
        json!({"entity": {"identificatie": identificatie, "naam": naam}}),
    )
}

pub fn raw_modify(identificatie: &str, payload: serde_json::Value) -> stroom_core::RawMessage {
    let modifications: Vec<serde_json::Value> = payload
        .as_object()
        .expect("JSON object fixture")
        .iter()
        .map(|(key, new_value)| json!({"key": key, "new_value": new_value}))
        .collect();
    raw(
        json!({"event_type": "MODIFY", "catalog": "gebieden", "collection": "buurten",
               "identificatie": identificatie}),
        json!({"modifications": modifications}),
    )
}

pub fn raw_delete(identificatie: &str) -> stroom_core::RawMessage {
    raw(
        json!({"event_type": "DELETE", "catalog": "gebieden", "collection": "buurten",
               "identificatie": identificatie}),
        json!({}),
    )
}

/// A document store whose next `contend(n)` writes lose the race: they fail with a stale-write
/// error while the underlying state stays untouched, as if another worker had advanced the key.
#[derive(Clone, Debug, Default)]
pub struct ContendedStore {
    pub inner: MemoryStore,
    losses: Arc<AtomicUsize>,
}

impl ContendedStore {
    pub fn contend(&self, losses: usize) {
        self.losses.store(losses, Ordering::SeqCst);
    }
}

impl DocumentStore for ContendedStore {
    async fn get(&self, key: &RecordKey) -> Result<Option<DocumentState>, StoreError> {
        self.inner.get(key).await
    }

    async fn put(
        &mut self,
        key: &RecordKey,
        state: DocumentState,
        expected: Option<Revision>,
    ) -> Result<(), StoreError> {
        let remaining = self.losses.load(Ordering::SeqCst);
        if remaining > 0 {
            self.losses.store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::StaleWrite {
                expected,
                actual: expected.map(|revision| revision + 1),
            });
        }
        self.inner.put(key, state, expected).await
    }

    async fn is_live(&self, key: &RecordKey) -> Result<bool, StoreError> {
        self.inner.is_live(key).await
    }
}

impl RelationStore for ContendedStore {
    async fn add_pending(
        &mut self,
        target: &RecordKey,
        relation: RelationKey,
    ) -> Result<bool, StoreError> {
        self.inner.add_pending(target, relation).await
    }

    async fn take_pending(&mut self, target: &RecordKey) -> Result<Vec<RelationKey>, StoreError> {
        self.inner.take_pending(target).await
    }

    async fn has_pending(&self, target: &RecordKey) -> Result<bool, StoreError> {
        self.inner.has_pending(target).await
    }
}

// SPDX-License-Identifier: MIT OR Apache-2.0

//! Inbound and outbound change events.
//!
//! An inbound transport message carries a header naming the operation, dataset and table, and a
//! body with the payload: a full entity for ADD, a list of field modifications for MODIFY,
//! nothing for DELETE. [`decode_event`] turns the raw message into a [`ChangeEvent`] with a
//! derived [`RecordKey`] and a flat payload mapping.
//!
//! Outbound events mirror the inbound shape but always carry a full document snapshot (or, for
//! DELETE, only the key) so downstream consumers never have to merge partials themselves.
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::Fields;
use crate::key::{KeyError, RecordKey};
use crate::schema::SchemaProvider;
use crate::wire::{DecodeError, EncodeError, RawMessage, decode_json, encode_json};

/// Operation named by a change event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperationType {
    Add,
    Modify,
    Delete,
}

/// Header of an inbound transport message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventHeader {
    pub event_type: OperationType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<u64>,

    /// Dataset id, possibly in the source system's abbreviated form.
    pub catalog: String,

    /// Table id, possibly in the source system's abbreviated form.
    pub collection: String,

    /// Authoritative for MODIFY and DELETE; optional for ADD where the identity can be read from
    /// the entity payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identificatie: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volgnummer: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
}

/// One field change inside a MODIFY body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Modification {
    pub key: String,
    pub new_value: Value,

    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub old_value: Value,
}

#[derive(Debug, Deserialize)]
struct EventBody {
    #[serde(default)]
    entity: Option<Fields>,

    #[serde(default)]
    modifications: Option<Vec<Modification>>,
}

/// A decoded inbound change event.
#[derive(Clone, Debug, PartialEq)]
pub struct ChangeEvent {
    pub operation: OperationType,
    pub key: RecordKey,

    /// Flat field mapping: the full entity for ADD, the folded modifications for MODIFY, empty
    /// for DELETE.
    pub payload: Fields,
}

/// Parses an inbound raw message into a [`ChangeEvent`].
///
/// The schema provider is consulted for ADD events whose header does not carry the identity: the
/// table schema names the identifier fields to read from the entity payload.
pub fn decode_event<P: SchemaProvider>(
    schemas: &P,
    raw: &RawMessage,
) -> Result<ChangeEvent, DecodeError> {
    let (header_bytes, body_bytes) = raw;
    let header: EventHeader = decode_json(header_bytes)?;
    let body: EventBody = decode_json(body_bytes)?;

    let dataset = canonical_dataset_id(&header.catalog);
    let table = canonical_table_id(&header.collection);

    match header.event_type {
        OperationType::Add => {
            let entity = body.entity.ok_or(DecodeError::MissingEntity)?;
            let (identificatie, volgnummer) = match header.identificatie {
                Some(identificatie) => (identificatie, header.volgnummer),
                None => {
                    let table_schema = schemas
                        .dataset(dataset)
                        .and_then(|dataset_schema| dataset_schema.table(table))
                        .ok_or_else(|| DecodeError::UnknownSchema {
                            dataset: dataset.to_owned(),
                            table: table.to_owned(),
                        })?;
                    table_schema.identity_from_entity(&entity)?
                }
            };
            Ok(ChangeEvent {
                operation: OperationType::Add,
                key: RecordKey::new(dataset, table, identificatie, volgnummer),
                payload: entity,
            })
        }
        OperationType::Modify => {
            let modifications = body
                .modifications
                .ok_or(DecodeError::MissingModifications)?;
            let key = header_key(dataset, table, &header)?;
            Ok(ChangeEvent {
                operation: OperationType::Modify,
                key,
                payload: fold_modifications(modifications),
            })
        }
        OperationType::Delete => {
            let key = header_key(dataset, table, &header)?;
            Ok(ChangeEvent {
                operation: OperationType::Delete,
                key,
                payload: Fields::new(),
            })
        }
    }
}

/// Folds a modification list into a flat partial field mapping, last writer per field winning.
pub fn fold_modifications(modifications: Vec<Modification>) -> Fields {
    let mut payload = Fields::new();
    for modification in modifications {
        payload.insert(modification.key, modification.new_value);
    }
    payload
}

fn header_key(dataset: &str, table: &str, header: &EventHeader) -> Result<RecordKey, DecodeError> {
    let identificatie = header
        .identificatie
        .clone()
        .ok_or_else(|| KeyError::MissingIdentity("identificatie".to_owned()))?;
    Ok(RecordKey::new(
        dataset,
        table,
        identificatie,
        header.volgnummer,
    ))
}

/// Translates a source system's abbreviated dataset id to its canonical form.
pub fn canonical_dataset_id(id: &str) -> &str {
    match id {
        "gbd" => "gebieden",
        other => other,
    }
}

/// Translates a source system's abbreviated table id to its canonical form.
pub fn canonical_table_id(id: &str) -> &str {
    match id {
        "bbk" => "bouwblokken",
        "brt" => "buurten",
        "sdl" => "stadsdelen",
        "wijk" => "wijken",
        other => other,
    }
}

/// Header of an outbound transport message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutboundHeader {
    pub event_type: OperationType,
    pub catalog: String,
    pub collection: String,
    pub identificatie: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volgnummer: Option<u64>,

    pub revision: u64,
}

/// A derived change event, republished for downstream consumers.
#[derive(Clone, Debug, PartialEq)]
pub struct OutboundEvent {
    pub header: OutboundHeader,

    /// Full document snapshot; absent for DELETE events which carry only the key.
    pub entity: Option<Fields>,
}

impl OutboundEvent {
    /// A full-snapshot event for an applied ADD or MODIFY, or a re-publication.
    pub fn snapshot(
        operation: OperationType,
        key: &RecordKey,
        revision: u64,
        entity: Fields,
    ) -> Self {
        Self {
            header: OutboundHeader {
                event_type: operation,
                catalog: key.dataset.clone(),
                collection: key.table.clone(),
                identificatie: key.identificatie.clone(),
                volgnummer: key.volgnummer,
                revision,
            },
            entity: Some(entity),
        }
    }

    /// A key-only marker for an applied DELETE.
    pub fn delete(key: &RecordKey, revision: u64) -> Self {
        Self {
            header: OutboundHeader {
                event_type: OperationType::Delete,
                catalog: key.dataset.clone(),
                collection: key.table.clone(),
                identificatie: key.identificatie.clone(),
                volgnummer: key.volgnummer,
                revision,
            },
            entity: None,
        }
    }

    pub fn key(&self) -> RecordKey {
        RecordKey::new(
            self.header.catalog.clone(),
            self.header.collection.clone(),
            self.header.identificatie.clone(),
            self.header.volgnummer,
        )
    }

    /// Canonical record key string; outbound messages are keyed by it so downstream partitions
    /// see all events of one record in order.
    pub fn partition_key(&self) -> String {
        self.key().to_string()
    }

    /// Serializes the event into header and body bytes.
    pub fn to_raw(&self) -> Result<RawMessage, EncodeError> {
        let header_bytes = encode_json(&self.header)?;
        let body_bytes = match &self.entity {
            Some(entity) => encode_json(&serde_json::json!({ "entity": entity }))?,
            None => encode_json(&serde_json::json!({}))?,
        };
        Ok((header_bytes, body_bytes))
    }
}

// SPDX-License-Identifier: MIT OR Apache-2.0

#![cfg_attr(doctest, doc=include_str!("../README.md"))]

//! Core data types for the stroom materialization pipeline.
//!
//! Change events (ADD / MODIFY / DELETE) describe records of structured datasets. Every record is
//! addressed by a [`RecordKey`] derived from the event's dataset, table and identity fields; its
//! current state is held as a [`Document`], a JSON field mapping with a monotonically increasing
//! revision. Links between records across datasets are addressed by a [`RelationKey`].
//!
//! This crate contains the key model, the document model, the inbound and outbound event types
//! with their JSON wire codec, and the dataset schema model used to validate payload shape before
//! events are applied.
pub mod document;
pub mod event;
pub mod key;
pub mod schema;
pub mod wire;

pub use document::{Document, DocumentState, Fields, Revision};
pub use event::{
    ChangeEvent, EventHeader, Modification, OperationType, OutboundEvent, OutboundHeader,
    decode_event,
};
pub use key::{KeyError, RecordKey, RelationKey};
pub use schema::{
    DatasetSchema, FieldSchema, FieldType, RelationTarget, SchemaProvider, SchemaSet,
    SchemaViolation, TableSchema,
};
pub use wire::{DecodeError, EncodeError, RawMessage};

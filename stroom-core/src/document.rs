// SPDX-License-Identifier: MIT OR Apache-2.0

//! Materialized record state.
use serde::{Deserialize, Serialize};

use crate::key::RecordKey;

/// Monotonically increasing per-key counter, used for optimistic concurrency and to detect
/// out-of-order writes.
pub type Revision = u64;

/// Dynamic field mapping of a record.
///
/// Payloads carry arbitrary JSON-like values, so fields are kept as a tagged value union rather
/// than a fixed record type. Shape is validated against the table schema at the boundary.
pub type Fields = serde_json::Map<String, serde_json::Value>;

/// The canonical representation of a record's current state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub key: RecordKey,
    pub revision: Revision,
    pub fields: Fields,
}

impl Document {
    pub fn new(key: RecordKey, revision: Revision, fields: Fields) -> Self {
        Self {
            key,
            revision,
            fields,
        }
    }
}

/// Stored state of a record key.
///
/// Deletion retains a tombstone rather than erasing the entry, so a late MODIFY after a DELETE is
/// detected and rejected instead of silently resurrecting the record. Absence is expressed by the
/// store returning no state at all.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum DocumentState {
    Live(Document),
    Tombstone { revision: Revision },
}

impl DocumentState {
    pub fn revision(&self) -> Revision {
        match self {
            DocumentState::Live(document) => document.revision,
            DocumentState::Tombstone { revision } => *revision,
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, DocumentState::Live(_))
    }

    pub fn as_live(&self) -> Option<&Document> {
        match self {
            DocumentState::Live(document) => Some(document),
            DocumentState::Tombstone { .. } => None,
        }
    }
}

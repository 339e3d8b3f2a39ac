// SPDX-License-Identifier: MIT OR Apache-2.0

//! Identity of records and of relations between records.
//!
//! Keys are derived deterministically from event fields: two events carrying the same identity
//! fields derive equal keys. The canonical string form
//! `dataset.table.identificatie[.volgnummer]` is used as the store lookup identity and as the
//! partition key for outbound messages.
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Composite identity of one record's document.
///
/// `volgnummer` is only present for temporal tables, where several sequenced versions of a record
/// share one `identificatie`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    pub dataset: String,
    pub table: String,
    pub identificatie: String,
    pub volgnummer: Option<u64>,
}

impl RecordKey {
    pub fn new(
        dataset: impl Into<String>,
        table: impl Into<String>,
        identificatie: impl Into<String>,
        volgnummer: Option<u64>,
    ) -> Self {
        Self {
            dataset: dataset.into(),
            table: table.into(),
            identificatie: identificatie.into(),
            volgnummer,
        }
    }

    /// Derives a key from a JSON identity value as found in event payloads.
    ///
    /// Accepts strings and integer numbers; everything else is rejected as malformed.
    pub fn from_value(
        dataset: &str,
        table: &str,
        field: &str,
        value: &Value,
        volgnummer: Option<u64>,
    ) -> Result<Self, KeyError> {
        let identificatie = identity_string(field, value)?;
        Ok(Self::new(dataset, table, identificatie, volgnummer))
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.dataset, self.table, self.identificatie)?;
        if let Some(volgnummer) = self.volgnummer {
            write!(f, ".{volgnummer}")?;
        }
        Ok(())
    }
}

/// Composite identity of a directed link between two records.
///
/// The left side is the referencing record, the right side the referenced one.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RelationKey {
    pub left: RecordKey,
    pub right: RecordKey,
}

impl RelationKey {
    pub fn new(left: RecordKey, right: RecordKey) -> Self {
        Self { left, right }
    }
}

impl fmt::Display for RelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.left, self.right)
    }
}

/// Reads an identity value from a payload field, converting integers to their decimal string.
pub(crate) fn identity_string(field: &str, value: &Value) -> Result<String, KeyError> {
    match value {
        Value::String(value) if !value.is_empty() => Ok(value.clone()),
        Value::Number(value) if value.is_u64() || value.is_i64() => Ok(value.to_string()),
        Value::Null => Err(KeyError::MissingIdentity(field.to_owned())),
        _ => Err(KeyError::InvalidIdentity(field.to_owned())),
    }
}

/// Required identity fields were absent or of the wrong shape.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum KeyError {
    /// An identity field named by the table schema was not present in the event.
    #[error("missing identity field \"{0}\"")]
    MissingIdentity(String),

    /// An identity field was present but not a non-empty string or integer.
    #[error("identity field \"{0}\" has an invalid shape")]
    InvalidIdentity(String),

    /// A `volgnummer` value was present but not a non-negative integer.
    #[error("volgnummer field \"{0}\" is not a non-negative integer")]
    InvalidVolgnummer(String),
}

// SPDX-License-Identifier: MIT OR Apache-2.0

//! JSON wire codec for inbound and outbound messages.
//!
//! Messages on the transport consist of a header and a body, both JSON-encoded. The pair of raw
//! byte buffers is passed around as [`RawMessage`] until the decoder turns it into a typed change
//! event.
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::key::KeyError;

/// Header and body bytes of a transport message, before decoding.
pub type RawMessage = (Vec<u8>, Vec<u8>);

/// Serializes a value into JSON bytes.
pub fn encode_json<T: Serialize>(value: &T) -> Result<Vec<u8>, EncodeError> {
    let bytes = serde_json::to_vec(value).map_err(|err| EncodeError::Value(err.to_string()))?;
    Ok(bytes)
}

/// Deserializes a value from JSON bytes.
pub fn decode_json<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> Result<T, DecodeError> {
    let value = serde_json::from_slice(bytes).map_err(|err| DecodeError::Json(err.to_string()))?;
    Ok(value)
}

/// Reads recorded event files in the line-oriented `source_id|{header}|{body}` format.
///
/// Primarily used to feed fixtures into tests; blank lines are skipped.
pub fn read_event_lines(contents: &str) -> Result<Vec<(String, RawMessage)>, DecodeError> {
    let mut messages = Vec::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut parts = line.splitn(3, '|');
        let (Some(source_id), Some(header), Some(body)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(DecodeError::MalformedLine);
        };
        messages.push((
            source_id.to_owned(),
            (header.as_bytes().to_vec(), body.as_bytes().to_vec()),
        ));
    }
    Ok(messages)
}

/// An error occurred during JSON serialization.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// A value could not be serialized.
    #[error("an error occurred while serializing value: {0}")]
    Value(String),
}

/// An inbound message could not be parsed.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum DecodeError {
    /// Header or body bytes are not valid JSON or do not match the expected shape.
    #[error("an error occurred while parsing JSON: {0}")]
    Json(String),

    /// The event named an operation other than ADD, MODIFY or DELETE.
    #[error("unknown operation \"{0}\"")]
    UnknownOperation(String),

    /// An ADD event arrived without an entity section.
    #[error("ADD event carries no entity")]
    MissingEntity,

    /// A MODIFY event arrived without a modifications section.
    #[error("MODIFY event carries no modifications")]
    MissingModifications,

    /// The event's identity fields were absent or ill-shaped.
    #[error(transparent)]
    Key(#[from] KeyError),

    /// Identity derivation needed the table schema but none is known for the event's
    /// dataset and table.
    #[error("no schema known for {dataset}.{table}")]
    UnknownSchema { dataset: String, table: String },

    /// A recorded event line did not have the `source_id|header|body` shape.
    #[error("event line is not of the form source_id|header|body")]
    MalformedLine,
}

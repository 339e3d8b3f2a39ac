// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration for a stroom node.
//!
//! Only the options below affect the node; the core merge semantics take no further runtime
//! configuration.
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Default consumer group identity.
pub const DEFAULT_CONSUMER_GROUP: &str = "stroom";

/// Default number of worker tasks processing disjoint key ranges.
pub const DEFAULT_WORKERS: usize = 4;

/// Where to start consuming when the group has no committed offset yet.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OffsetPolicy {
    /// Start from the beginning of the topic.
    #[default]
    Earliest,

    /// Start from newly arriving messages only.
    Latest,
}

/// Configuration parameters for the node.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Address of the transport endpoint (broker) to connect to.
    pub endpoint: String,

    /// Topics to subscribe to.
    pub topics: Vec<String>,

    /// Consumer group identity under which offsets are committed.
    pub consumer_group: String,

    /// Initial offset policy when no committed offset exists.
    pub initial_offset: OffsetPolicy,

    /// File or directory the dataset schemas are loaded from.
    pub schema_source: PathBuf,

    /// Number of worker tasks. Events are routed to workers by record key, so events of one
    /// record are always processed in arrival order.
    pub workers: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: "localhost:9092".to_owned(),
            topics: vec![],
            consumer_group: DEFAULT_CONSUMER_GROUP.to_owned(),
            initial_offset: OffsetPolicy::default(),
            schema_source: PathBuf::from("schemas"),
            workers: DEFAULT_WORKERS,
        }
    }
}

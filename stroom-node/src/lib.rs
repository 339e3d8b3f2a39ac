// SPDX-License-Identifier: MIT OR Apache-2.0

#![cfg_attr(doctest, doc=include_str!("../README.md"))]

//! Wiring for a stroom node: configuration, the seam towards the publish/subscribe transport,
//! and the worker fan-out which keeps per-key processing ordered while distinct keys proceed
//! concurrently.
pub mod config;
pub mod node;
pub mod transport;

pub use config::{Config, OffsetPolicy};
pub use node::{Node, load_schemas};
pub use transport::{
    Consumer, ConsumerMessage, LocalConsumer, LocalPublisher, MemoryConsumer, MemoryPublisher,
    Publisher, TransportError,
};

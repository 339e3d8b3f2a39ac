// SPDX-License-Identifier: MIT OR Apache-2.0

#![cfg_attr(doctest, doc=include_str!("../README.md"))]

//! Stream-based methods to decode, merge, resolve and republish dataset change events.
//!
//! The heart of this crate is the merge engine: a total state machine per record key which turns
//! ADD / MODIFY / DELETE events into new document states against the store, with optimistic
//! concurrency handled through bounded retries. Around it sit the relation resolver, which makes
//! cross-dataset references eventually consistent regardless of arrival order, and the
//! [`Processor`], which sequences decode → validate → merge → resolve and assembles the outbound
//! events for one inbound event.
//!
//! With the stream-based design these steps stack on top of any `Stream` of raw transport
//! messages, mirroring how a consumer loop hands messages onwards.
pub mod merge;
pub mod processor;
pub mod resolver;
mod stream;
#[cfg(test)]
mod test_utils;

pub use merge::{DropReason, MergeError, MergeOutcome, apply_event, deep_merge};
pub use processor::{ProcessError, Processor};
pub use resolver::{RelationResolver, annotate_relations, relation_value_key};
pub use stream::*;

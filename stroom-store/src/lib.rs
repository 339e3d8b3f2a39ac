// SPDX-License-Identifier: MIT OR Apache-2.0

#![cfg_attr(doctest, doc=include_str!("../README.md"))]

//! Persistence interfaces and implementations for materialized documents and pending relations.
//!
//! The document store is the only persistent state of the pipeline. Its contract is small: atomic
//! per-key get and put, where every put names the revision the caller read before computing the
//! write. A mismatch fails with [`StoreError::StaleWrite`] and the caller re-reads and retries;
//! this optimistic check is the sole concurrency guard for two workers racing on the same key.
//!
//! The relation store is a secondary index of unresolved references, keyed by the *missing*
//! endpoint's record key so that the arrival of that record can drain everything waiting on it.
//!
//! Both traits come in a thread-safe (`Send`) and a local variant, and are implemented for
//! concrete backends; an in-memory [`MemoryStore`] is provided.
pub mod documents;
pub mod memory;
pub mod relations;

pub use documents::{DocumentStore, LocalDocumentStore, StoreError};
pub use memory::MemoryStore;
pub use relations::{LocalRelationStore, RelationStore};

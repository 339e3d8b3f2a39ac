// SPDX-License-Identifier: MIT OR Apache-2.0

//! The per-event pipeline: decode → validate → merge → resolve → assemble outbound events.
use std::sync::Arc;

use stroom_core::schema::SchemaProvider;
use stroom_core::{
    ChangeEvent, DecodeError, OperationType, OutboundEvent, RawMessage, RecordKey, SchemaSet,
    SchemaViolation, decode_event,
};
use stroom_store::{DocumentStore, RelationStore, StoreError};
use thiserror::Error;
use tracing::{debug, warn};

use crate::merge::{MergeError, MergeOutcome, apply_event};
use crate::resolver::{RelationResolver, annotate_relations};

/// Number of merge attempts before a stale write becomes fatal for the event.
///
/// A stale write means another worker advanced the same key between our read and write; with
/// per-key routing in place that is rare, so a handful of re-reads is enough to converge.
pub const DEFAULT_WRITE_ATTEMPTS: usize = 3;

/// Sequences the full pipeline for one inbound event and assembles the outbound events:
/// the snapshot or delete marker of the event itself, plus one re-publication per referencing
/// record whose relation to this record just became resolvable.
///
/// Clones share the same underlying store handles, so one processor can be handed to each
/// worker.
#[derive(Clone, Debug)]
pub struct Processor<S> {
    store: S,
    schemas: Arc<SchemaSet>,
    write_attempts: usize,
}

impl<S> Processor<S>
where
    S: DocumentStore + RelationStore,
{
    pub fn new(store: S, schemas: Arc<SchemaSet>) -> Self {
        Self {
            store,
            schemas,
            write_attempts: DEFAULT_WRITE_ATTEMPTS,
        }
    }

    /// Overrides the bounded attempt count for optimistic-concurrency retries.
    pub fn with_write_attempts(mut self, write_attempts: usize) -> Self {
        self.write_attempts = write_attempts.max(1);
        self
    }

    /// Decodes and processes one raw transport message.
    pub async fn process_raw(
        &mut self,
        raw: &RawMessage,
    ) -> Result<Vec<OutboundEvent>, ProcessError> {
        let event = decode_event(self.schemas.as_ref(), raw)?;
        self.process(event).await
    }

    /// Processes one decoded change event.
    ///
    /// Exactly one outbound event is produced per successfully applied inbound event; dropped
    /// duplicates produce none; relation resolution appends further re-publications. Errors are
    /// per-event and leave the store unchanged for this key.
    pub async fn process(&mut self, event: ChangeEvent) -> Result<Vec<OutboundEvent>, ProcessError> {
        let (dataset, table) = self.schemas.table(&event.key.dataset, &event.key.table)?;
        table.validate(&event.payload)?;

        let mut attempts = 0;
        let outcome = loop {
            attempts += 1;
            match apply_event(&mut self.store, dataset, table, &event).await? {
                MergeOutcome::Retry if attempts < self.write_attempts => {
                    debug!(key = %event.key, attempts, "stale write, re-reading");
                    continue;
                }
                MergeOutcome::Retry => {
                    return Err(ProcessError::WriteConflict {
                        key: event.key.clone(),
                        attempts,
                    });
                }
                outcome => break outcome,
            }
        };

        match outcome {
            MergeOutcome::Applied(document) => {
                let mut resolver = RelationResolver::new(self.store.clone());
                resolver.register(table, &document).await?;
                let referrers = resolver.arrived(&document.key).await?;

                let entity = annotate_relations(&self.store, table, &document).await?;
                let mut outbound = vec![OutboundEvent::snapshot(
                    event.operation,
                    &document.key,
                    document.revision,
                    entity,
                )];
                for referrer in referrers {
                    if let Some(event) = self.republish(&referrer).await? {
                        outbound.push(event);
                    }
                }
                Ok(outbound)
            }
            MergeOutcome::Deleted { key, revision } => {
                Ok(vec![OutboundEvent::delete(&key, revision)])
            }
            MergeOutcome::Dropped(_) => Ok(Vec::new()),
            MergeOutcome::Retry => unreachable!("retries are resolved in the merge loop"),
        }
    }

    /// Builds the re-publication snapshot for a record whose relation just resolved.
    ///
    /// The record's own fields did not change, but its published snapshot does: the resolved
    /// relation now carries the target's revision. Republished as MODIFY at the record's
    /// current revision.
    async fn republish(&self, key: &RecordKey) -> Result<Option<OutboundEvent>, ProcessError> {
        let Ok((_, table)) = self.schemas.table(&key.dataset, &key.table) else {
            warn!(%key, "no schema for referencing record, skipping re-publication");
            return Ok(None);
        };
        let Some(state) = self.store.get(key).await? else {
            return Ok(None);
        };
        let Some(document) = state.as_live() else {
            // The referrer was deleted in the meantime; nothing to republish.
            return Ok(None);
        };

        let entity = annotate_relations(&self.store, table, document).await?;
        Ok(Some(OutboundEvent::snapshot(
            OperationType::Modify,
            key,
            document.revision,
            entity,
        )))
    }
}

/// Per-event failures surfaced by the pipeline.
///
/// None of these halt processing for other keys: the coordinator reports the error, skips the
/// event and moves on.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ProcessError {
    /// The message could not be decoded, including malformed identity fields.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// The payload failed structural validation and the event was not applied.
    #[error(transparent)]
    Schema(#[from] SchemaViolation),

    /// MODIFY or DELETE arrived before the record's ADD; indicates an upstream ordering or
    /// data-loss problem.
    #[error("no live record for {0}")]
    UnknownRecord(RecordKey),

    /// Optimistic-concurrency retries were exhausted for this event.
    #[error("gave up on {key} after {attempts} stale-write attempts")]
    WriteConflict { key: RecordKey, attempts: usize },

    /// Critical storage failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<MergeError> for ProcessError {
    fn from(err: MergeError) -> Self {
        match err {
            MergeError::UnknownRecord(key) => ProcessError::UnknownRecord(key),
            MergeError::Store(err) => ProcessError::Store(err),
        }
    }
}

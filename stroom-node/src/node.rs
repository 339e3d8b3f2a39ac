// SPDX-License-Identifier: MIT OR Apache-2.0

//! Worker fan-out around the processing pipeline.
//!
//! One router task owns the consumer: it decodes incoming messages and routes them to a fixed
//! set of worker tasks by record key, so all events of one record land on the same worker and
//! are processed in arrival order. Workers run the pipeline, publish the outbound events and
//! report the finished offset back to the router, which commits it. Offsets are therefore only
//! committed once the publish (or the explicit drop) of their event has completed; commits may
//! interleave across keys, which the at-least-once transport tolerates.
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use anyhow::Context as _;
use stroom_core::{ChangeEvent, RecordKey, SchemaSet, decode_event};
use stroom_store::{DocumentStore, RelationStore};
use stroom_stream::Processor;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::transport::{Consumer, ConsumerMessage, Publisher};

/// Capacity of each worker's input queue.
const WORKER_QUEUE_LEN: usize = 64;

/// Loads the dataset schemas named by the configuration.
pub fn load_schemas(config: &Config) -> anyhow::Result<Arc<SchemaSet>> {
    let schemas = SchemaSet::from_path(&config.schema_source).with_context(|| {
        format!(
            "loading schemas from {}",
            config.schema_source.display()
        )
    })?;
    Ok(Arc::new(schemas))
}

/// A running node: router and worker tasks around one consumer and one publisher.
#[derive(Debug)]
pub struct Node {
    shutdown: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl Node {
    /// Spawns the router and worker tasks.
    ///
    /// The consumer is expected to be subscribed to the configured topics already; topic
    /// subscription and group management live in the transport collaborator.
    pub fn spawn<S, C, P>(
        config: &Config,
        schemas: Arc<SchemaSet>,
        store: S,
        consumer: C,
        publisher: P,
    ) -> Node
    where
        S: DocumentStore + RelationStore + Send + Sync + 'static,
        C: Consumer + Send + 'static,
        P: Publisher + Send + Sync + 'static,
    {
        let shutdown = CancellationToken::new();
        let workers = config.workers.max(1);
        info!(
            endpoint = %config.endpoint,
            topics = ?config.topics,
            consumer_group = %config.consumer_group,
            initial_offset = ?config.initial_offset,
            workers,
            "starting node"
        );

        // The commit channel must be able to hold every offset that can be in flight at once
        // (queued plus being processed per worker); otherwise workers could block on reporting
        // offsets while the router blocks on a full worker queue.
        let (commit_tx, commit_rx) = mpsc::channel((WORKER_QUEUE_LEN + 1) * workers);

        let mut worker_txs = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers + 1);
        for index in 0..workers {
            let (tx, rx) = mpsc::channel(WORKER_QUEUE_LEN);
            worker_txs.push(tx);
            let processor = Processor::new(store.clone(), schemas.clone());
            handles.push(tokio::spawn(worker_loop(
                index,
                rx,
                processor,
                publisher.clone(),
                commit_tx.clone(),
            )));
        }
        drop(commit_tx);

        handles.push(tokio::spawn(router_loop(
            shutdown.clone(),
            schemas,
            consumer,
            worker_txs,
            commit_rx,
        )));

        Node { shutdown, handles }
    }

    /// Stops all tasks and waits for them to finish.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

async fn router_loop<C>(
    shutdown: CancellationToken,
    schemas: Arc<SchemaSet>,
    mut consumer: C,
    worker_txs: Vec<mpsc::Sender<(ChangeEvent, u64)>>,
    mut commit_rx: mpsc::Receiver<u64>,
) where
    C: Consumer,
{
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            Some(offset) = commit_rx.recv() => {
                if let Err(err) = consumer.commit(offset).await {
                    warn!(%err, offset, "commit failed");
                }
            }
            res = consumer.next_message() => match res {
                Ok(Some(ConsumerMessage { offset, message })) => {
                    match decode_event(schemas.as_ref(), &message) {
                        Ok(event) => {
                            let index = route(&event.key, worker_txs.len());
                            debug!(key = %event.key, offset, worker = index, "routing event");
                            if worker_txs[index].send((event, offset)).await.is_err() {
                                break;
                            }
                        }
                        Err(err) => {
                            // Malformed messages are surfaced and skipped, not retried; the
                            // offset still advances.
                            error!(%err, offset, "dropping undecodable message");
                            if let Err(err) = consumer.commit(offset).await {
                                warn!(%err, offset, "commit failed");
                            }
                        }
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    error!(%err, "transport failure, stopping router");
                    break;
                }
            }
        }
    }

    // Let the workers drain their queues, then commit whatever they still finish.
    drop(worker_txs);
    while let Some(offset) = commit_rx.recv().await {
        if let Err(err) = consumer.commit(offset).await {
            warn!(%err, offset, "commit failed");
        }
    }
}

async fn worker_loop<S, P>(
    index: usize,
    mut events: mpsc::Receiver<(ChangeEvent, u64)>,
    mut processor: Processor<S>,
    mut publisher: P,
    commit_tx: mpsc::Sender<u64>,
) where
    S: DocumentStore + RelationStore,
    P: Publisher,
{
    while let Some((event, offset)) = events.recv().await {
        match processor.process(event).await {
            Ok(outbound) => {
                for event in outbound {
                    if let Err(err) = publisher.publish(event).await {
                        error!(worker = index, %err, "publish failed");
                    }
                }
            }
            Err(err) => {
                // Per-event failure: reported and skipped without halting the pipeline for
                // other keys. The offset still advances, per at-least-once policy.
                error!(worker = index, %err, offset, "unprocessable event");
            }
        }
        if commit_tx.send(offset).await.is_err() {
            break;
        }
    }
}

/// Routes a record key to a worker index; equal keys always route to the same worker.
fn route(key: &RecordKey, workers: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % workers as u64) as usize
}

// SPDX-License-Identifier: MIT OR Apache-2.0

//! The seam towards the publish/subscribe transport.
//!
//! The transport itself (broker protocol, partition assignment, consumer-group rebalancing) is a
//! collaborator outside this system; these traits describe exactly what the node needs from it.
//! In-memory implementations back the tests and any embedded use.
use std::sync::{Arc, RwLock};

use stroom_core::{OutboundEvent, RawMessage};
use thiserror::Error;
use tokio::sync::mpsc;

/// One message as handed over by the transport, stamped with its offset.
#[derive(Clone, Debug)]
pub struct ConsumerMessage {
    pub offset: u64,
    pub message: RawMessage,
}

/// Interface for consuming raw messages from the subscribed topics.
///
/// Two variants of the trait are provided: one which is thread-safe (implementing `Send`) and one
/// which is purely intended for single-threaded execution contexts.
#[trait_variant::make(Consumer: Send)]
pub trait LocalConsumer {
    /// The next message, or `None` once the subscription has ended.
    async fn next_message(&mut self) -> Result<Option<ConsumerMessage>, TransportError>;

    /// Marks an offset as processed.
    ///
    /// Only called after the outbound publish (or explicit drop) for that message completed, so
    /// the group never moves past unprocessed events.
    async fn commit(&mut self, offset: u64) -> Result<(), TransportError>;
}

/// Interface for publishing outbound events.
///
/// Messages are keyed by the record key's canonical string so downstream consumers receive all
/// events of one record on one partition, in order.
#[trait_variant::make(Publisher: Send)]
pub trait LocalPublisher: Clone {
    async fn publish(&mut self, event: OutboundEvent) -> Result<(), TransportError>;
}

/// Errors at the transport boundary.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport connection failure: {0}")]
    Connection(String),

    #[error(transparent)]
    Encode(#[from] stroom_core::EncodeError),
}

/// A consumer fed from an in-process channel.
#[derive(Debug)]
pub struct MemoryConsumer {
    messages: mpsc::Receiver<ConsumerMessage>,
    committed: Arc<RwLock<Vec<u64>>>,
}

impl MemoryConsumer {
    /// Returns the consumer and the sender side to feed it with.
    pub fn new(capacity: usize) -> (mpsc::Sender<ConsumerMessage>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        let consumer = Self {
            messages: rx,
            committed: Default::default(),
        };
        (tx, consumer)
    }

    /// Offsets committed so far, in commit order.
    pub fn committed(&self) -> Arc<RwLock<Vec<u64>>> {
        self.committed.clone()
    }
}

impl Consumer for MemoryConsumer {
    async fn next_message(&mut self) -> Result<Option<ConsumerMessage>, TransportError> {
        Ok(self.messages.recv().await)
    }

    async fn commit(&mut self, offset: u64) -> Result<(), TransportError> {
        self.committed
            .write()
            .expect("acquire exclusive write access on commit log")
            .push(offset);
        Ok(())
    }
}

/// A publisher collecting events in memory, keyed like a real transport message.
#[derive(Clone, Debug, Default)]
pub struct MemoryPublisher {
    events: Arc<RwLock<Vec<(String, OutboundEvent)>>>,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything published so far as (partition key, event) pairs.
    pub fn events(&self) -> Vec<(String, OutboundEvent)> {
        self.events
            .read()
            .expect("acquire shared read access on published events")
            .clone()
    }
}

impl Publisher for MemoryPublisher {
    async fn publish(&mut self, event: OutboundEvent) -> Result<(), TransportError> {
        // Serialization must succeed for every event we emit; surface encode failures the same
        // way a broker client would.
        event.to_raw()?;
        self.events
            .write()
            .expect("acquire exclusive write access on published events")
            .push((event.partition_key(), event));
        Ok(())
    }
}

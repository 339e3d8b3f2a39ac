// SPDX-License-Identifier: MIT OR Apache-2.0

use std::future::Future;
use std::pin::Pin;

use futures_util::stream::{Fuse, FusedStream};
use futures_util::task::{Context, Poll};
use futures_util::{Stream, StreamExt, ready};
use pin_utils::pin_mut;
use stroom_core::{ChangeEvent, OutboundEvent};
use stroom_store::{DocumentStore, RelationStore};

use crate::processor::{ProcessError, Processor};

/// An extension trait for `Stream`s that provides a convenient
/// [`materialize`](MaterializeExt::materialize) method.
pub trait MaterializeExt<S>: Stream<Item = ChangeEvent> {
    /// Runs every change event through the processing pipeline against the given processor.
    ///
    /// Each inbound event yields the list of outbound events it produced: the record's own
    /// snapshot or delete marker, plus any re-publications triggered by relation resolution.
    /// Dropped duplicates yield an empty list; per-event failures are surfaced as errors without
    /// terminating the stream.
    fn materialize(self, processor: Processor<S>) -> Materialize<Self, S>
    where
        S: DocumentStore + RelationStore,
        Self: Sized,
    {
        Materialize::new(self, processor)
    }
}

impl<T: ?Sized, S> MaterializeExt<S> for T where T: Stream<Item = ChangeEvent> {}

/// Stream for the [`materialize`](MaterializeExt::materialize) method.
#[derive(Debug)]
#[pin_project::pin_project]
#[must_use = "streams do nothing unless polled"]
pub struct Materialize<St, S>
where
    St: Stream<Item = ChangeEvent>,
    S: DocumentStore + RelationStore,
{
    #[pin]
    stream: Fuse<St>,
    processor: Processor<S>,
}

impl<St, S> Materialize<St, S>
where
    St: Stream<Item = ChangeEvent>,
    S: DocumentStore + RelationStore,
{
    pub(super) fn new(stream: St, processor: Processor<S>) -> Materialize<St, S> {
        Materialize {
            stream: stream.fuse(),
            processor,
        }
    }
}

impl<St, S> Stream for Materialize<St, S>
where
    St: Stream<Item = ChangeEvent>,
    S: DocumentStore + RelationStore,
{
    type Item = Result<Vec<OutboundEvent>, ProcessError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut processor = self.processor.clone();
        let mut this = self.project();

        let res = ready!(this.stream.as_mut().poll_next(cx));
        let Some(event) = res else {
            return Poll::Ready(None);
        };

        let process_fut = processor.process(event);
        pin_mut!(process_fut);
        let result = ready!(process_fut.poll(cx));
        Poll::Ready(Some(result))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.stream.size_hint()
    }
}

impl<St, S> FusedStream for Materialize<St, S>
where
    St: Stream<Item = ChangeEvent> + FusedStream,
    S: DocumentStore + RelationStore,
{
    fn is_terminated(&self) -> bool {
        self.stream.is_terminated()
    }
}

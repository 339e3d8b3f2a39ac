// SPDX-License-Identifier: MIT OR Apache-2.0

use std::pin::Pin;
use std::sync::Arc;

use futures_util::stream::{Fuse, FusedStream};
use futures_util::task::{Context, Poll};
use futures_util::{Stream, StreamExt, ready};
use stroom_core::schema::SchemaProvider;
use stroom_core::{ChangeEvent, DecodeError, RawMessage, decode_event};

/// An extension trait for `Stream`s that provides a convenient [`decode`](DecodeExt::decode)
/// method.
pub trait DecodeExt<P>: Stream<Item = RawMessage> {
    /// Decode raw transport messages into change events.
    ///
    /// The schema provider is consulted for ADD events whose identity must be derived from the
    /// entity payload.
    fn decode(self, schemas: Arc<P>) -> Decode<Self, P>
    where
        P: SchemaProvider,
        Self: Sized,
    {
        Decode::new(self, schemas)
    }
}

impl<T: ?Sized, P> DecodeExt<P> for T where T: Stream<Item = RawMessage> {}

/// Stream for the [`decode`](DecodeExt::decode) method.
#[derive(Debug)]
#[pin_project::pin_project]
#[must_use = "streams do nothing unless polled"]
pub struct Decode<St, P>
where
    St: Stream<Item = RawMessage>,
    P: SchemaProvider,
{
    #[pin]
    stream: Fuse<St>,
    schemas: Arc<P>,
}

impl<St, P> Decode<St, P>
where
    St: Stream<Item = RawMessage>,
    P: SchemaProvider,
{
    pub(super) fn new(stream: St, schemas: Arc<P>) -> Decode<St, P> {
        Decode {
            stream: stream.fuse(),
            schemas,
        }
    }
}

impl<St, P> Stream for Decode<St, P>
where
    St: Stream<Item = RawMessage>,
    P: SchemaProvider,
{
    type Item = Result<ChangeEvent, DecodeError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        let res = ready!(this.stream.as_mut().poll_next(cx));
        Poll::Ready(res.map(|raw| decode_event(this.schemas.as_ref(), &raw)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.stream.size_hint()
    }
}

impl<St, P> FusedStream for Decode<St, P>
where
    St: Stream<Item = RawMessage> + FusedStream,
    P: SchemaProvider,
{
    fn is_terminated(&self) -> bool {
        self.stream.is_terminated()
    }
}

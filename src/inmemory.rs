//! In-process duplex transport built on `tokio::sync::mpsc`.
//!
//! This is the "any transport" collaborator made concrete: a bounded
//! in-process channel pair satisfying the `Stream`/`Sink` contract an
//! exchange needs, suitable for unit and integration tests and for
//! single-process multi-site demos. It is analogous in spirit to the
//! in-memory event store the rest of this crate's machinery is built from,
//! but at the transport layer rather than the storage layer.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::{Sink, Stream};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{PollSendError, PollSender};

/// One side of an in-process duplex channel: a [`Sink`] for outbound
/// messages of type `Out`, and a [`Stream`] of inbound messages of type
/// `In`.
pub struct Endpoint<Out, In> {
    outbound: PollSender<Out>,
    inbound: ReceiverStream<In>,
}

/// Creates a pair of [`Endpoint`]s wired to each other: messages sent on
/// one side's outbound arrive on the other side's inbound, and vice versa.
///
/// `capacity` bounds each direction independently; a full channel makes the
/// corresponding `Sink::poll_ready` pend, which is how this transport
/// expresses backpressure to an exchange's `tokio::select!` loop.
#[must_use]
pub fn duplex<A, B>(capacity: usize) -> (Endpoint<A, B>, Endpoint<B, A>)
where
    A: Send + 'static,
    B: Send + 'static,
{
    let (tx_a_to_b, rx_a_to_b) = mpsc::channel(capacity);
    let (tx_b_to_a, rx_b_to_a) = mpsc::channel(capacity);

    (
        Endpoint {
            outbound: PollSender::new(tx_a_to_b),
            inbound: ReceiverStream::new(rx_b_to_a),
        },
        Endpoint {
            outbound: PollSender::new(tx_b_to_a),
            inbound: ReceiverStream::new(rx_a_to_b),
        },
    )
}

impl<Out, In> Stream for Endpoint<Out, In> {
    type Item = In;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().inbound).poll_next(cx)
    }
}

impl<Out, In> Sink<Out> for Endpoint<Out, In>
where
    Out: Send + 'static,
{
    type Error = PollSendError<Out>;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.get_mut().outbound).poll_ready(cx)
    }

    fn start_send(self: Pin<&mut Self>, item: Out) -> Result<(), Self::Error> {
        Pin::new(&mut self.get_mut().outbound).start_send(item)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.get_mut().outbound).poll_flush(cx)
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.get_mut().outbound).poll_close(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{SinkExt, StreamExt};

    #[tokio::test]
    async fn messages_flow_in_both_directions() {
        let (mut a, mut b) = duplex::<&'static str, &'static str>(4);

        a.send("hello from a").await.unwrap();
        assert_eq!(b.next().await, Some("hello from a"));

        b.send("hello from b").await.unwrap();
        assert_eq!(a.next().await, Some("hello from b"));
    }

    #[tokio::test]
    async fn dropping_one_side_closes_the_others_inbound_stream() {
        let (a, mut b) = duplex::<u8, u8>(4);
        drop(a);
        assert_eq!(b.next().await, None);
    }
}

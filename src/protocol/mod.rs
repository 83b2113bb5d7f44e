//! The two coupled finite-state machines that define the wire exchange
//! between a pair of sites.
//!
//! [`incoming`] serves events to a peer; [`outgoing`] consumes events from
//! a peer. Both are driven by [`crate::runtime::ExchangeRuntime`], which
//! repeatedly calls `step` and interprets the returned [`Effect`].

pub mod incoming;
pub mod message;
pub mod outgoing;

pub use message::{IncomingMessage, OutgoingMessage};

use crate::error::ProtocolViolation;
use futures::Sink;
use futures::SinkExt;

/// Sends `message` if present, otherwise never resolves.
///
/// `tokio::select!` evaluates every branch's expression up front, even one
/// disabled by an `if` precondition, to construct the future it polls; a
/// branch that only has something to send sometimes therefore cannot build
/// its message by unwrapping an `Option` inline, as that would panic on the
/// disabled iterations. Routing the conditional through this function
/// instead turns "nothing to send this tick" into a future that simply
/// never completes, so the branch is a no-op rather than a panic.
pub(crate) async fn send_or_pending<Tx, M>(outbound: &mut Tx, message: Option<M>) -> Result<(), Tx::Error>
where
    Tx: Sink<M> + Unpin,
{
    match message {
        Some(message) => outbound.send(message).await,
        None => futures::future::pending().await,
    }
}

/// The outcome of a single FSM step.
///
/// States are tagged enum variants, and effects are this small closed sum
/// rather than a trait object.
#[derive(Debug)]
pub enum Effect<S> {
    /// Move to a new state and keep running.
    Move(S),

    /// A fatal, protocol-level error occurred; the exchange fails.
    MoveToError(ProtocolViolation),

    /// The exchange is done; close the channels and stop.
    Terminate,
}

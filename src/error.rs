//! The error taxonomy shared by the protocol FSMs and the exchange runtime.
//!
//! Mirrors the way the event-sourcing crate this core is built from
//! composes its own fallible surfaces (`GetError`, `SaveError`): a
//! `thiserror`-derived enum per boundary, wrapping the caller's transport
//! error type as a variant rather than boxing everything into `anyhow`.
//!
//! Channel closure is deliberately *not* a variant here: it is normal
//! termination (`Effect::Terminate` or the outgoing FSM's `Cancelling`
//! state), never an error.

/// A message was received that is illegal in the FSM's current state.
///
/// This is the only failure mode intrinsic to the protocol itself; every
/// other error a running exchange can observe originates from the
/// transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolViolation {
    /// The incoming FSM received any message while in its initial `New`
    /// state, which only ever sends.
    #[error("unexpected message received while advertising sites")]
    UnexpectedDuringAdvertising,

    /// The outgoing FSM received an `Event` before it ever saw `Ready`.
    #[error("received an event before the peer signalled readiness")]
    EventBeforeReady,

    /// The outgoing FSM received a second `Ready` message.
    #[error("received a duplicate readiness signal")]
    UnexpectedReady,
}

/// The error surfaced at the boundary of a running exchange.
///
/// Generic over `T`, the transport's own error type, so a
/// [`ExchangeError::Transport`] variant can carry it without this crate
/// needing to know anything about the transport beyond `std::error::Error`.
#[derive(Debug, thiserror::Error)]
pub enum ExchangeError<T>
where
    T: std::error::Error + 'static,
{
    /// A message was received that is illegal in the FSM's current state.
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolViolation),

    /// The transport failed while sending or receiving a message.
    ///
    /// Raised by the transport, escapes the exchange unchanged; the
    /// `sync` driver (see `crate::sync`) catches this and retries after a
    /// configurable delay.
    #[error("transport failure: {0}")]
    Transport(#[source] T),
}

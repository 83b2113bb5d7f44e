//! Binds the protocol FSMs to concrete channels and a shared log.
//!
//! [`ExchangeRuntime`] owns nothing a [`crate::site::Site`] doesn't already
//! have a handle to: it is a thin driver, cheaply cloned per exchange, built
//! from a [`crate::log::EventLog`] and the `tokio::sync::broadcast` sender
//! the site uses to announce insertions — mirroring how the event-sourcing
//! crate this core is built from drives its in-memory event store's
//! subscription stream off a single `broadcast` channel (see `inmemory.rs`
//! in that crate).

use std::pin::Pin;

use futures::{Sink, Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::config::OutgoingConfig;
use crate::error::ExchangeError;
use crate::identifier::{EventIdentifier, SiteIdentifier};
use crate::log::EventLog;
use crate::protocol::incoming::IncomingState;
use crate::protocol::outgoing::OutgoingState;
use crate::protocol::{Effect, IncomingMessage, OutgoingMessage};

/// Drives one side of one exchange to completion against a shared log.
///
/// Cheap to clone: it holds only the [`EventLog`] handle (itself an
/// `Arc`-backed clone) and the insertion broadcaster.
#[derive(Clone)]
pub struct ExchangeRuntime<T> {
    log: EventLog<T>,
    insertions: broadcast::Sender<EventIdentifier>,
}

impl<T> ExchangeRuntime<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Builds a runtime over the given log, publishing insertions on the
    /// given broadcaster.
    #[must_use]
    pub fn new(log: EventLog<T>, insertions: broadcast::Sender<EventIdentifier>) -> Self {
        Self { log, insertions }
    }

    fn insertion_stream(&self) -> Pin<Box<dyn Stream<Item = EventIdentifier> + Send>> {
        Box::pin(BroadcastStream::new(self.insertions.subscribe()).filter_map(|event| async move { event.ok() }))
    }

    /// Runs the [incoming FSM](crate::protocol::incoming) to completion,
    /// serving `known_sites` and anything later observed in the log to the
    /// peer reachable through `inbound`/`outbound`.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
    pub async fn run_incoming<Rx, Tx>(
        &self,
        known_sites: Vec<SiteIdentifier>,
        mut inbound: Rx,
        mut outbound: Tx,
    ) -> Result<(), ExchangeError<Tx::Error>>
    where
        Rx: Stream<Item = OutgoingMessage> + Unpin + Send,
        Tx: Sink<IncomingMessage<T>> + Unpin + Send,
        Tx::Error: std::error::Error + 'static,
    {
        let mut insertions = self.insertion_stream();
        let mut state = IncomingState::new(known_sites);

        loop {
            let snapshot = self.log.snapshot();
            match state.step(&snapshot, &mut inbound, &mut outbound, &mut insertions).await? {
                Effect::Move(next) => {
                    #[cfg(feature = "tracing")]
                    tracing::trace!(?next, "incoming FSM advanced");
                    state = next;
                }
                Effect::MoveToError(violation) => return Err(violation.into()),
                Effect::Terminate => return Ok(()),
            }
        }
    }

    /// Runs the [outgoing FSM](crate::protocol::outgoing) to completion,
    /// requesting and recording events from the peer reachable through
    /// `inbound`/`outbound` into the shared log.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
    pub async fn run_outgoing<Rx, Tx>(
        &self,
        config: OutgoingConfig,
        mut inbound: Rx,
        mut outbound: Tx,
    ) -> Result<(), ExchangeError<Tx::Error>>
    where
        Rx: Stream<Item = IncomingMessage<T>> + Unpin + Send,
        Tx: Sink<OutgoingMessage> + Unpin + Send,
        Tx::Error: std::error::Error + 'static,
    {
        let mut state = OutgoingState::new();
        let log = self.log.clone();
        let insertions = self.insertions.clone();

        let set_fn = move |seqno, site, body| {
            let novel = log.insert(seqno, site, body);
            if novel {
                let _ = insertions.send(EventIdentifier::new(seqno, site));
            }
            novel
        };

        loop {
            let snapshot = self.log.snapshot();
            match state.step(&snapshot, &config, &mut inbound, &mut outbound, set_fn.clone()).await? {
                Effect::Move(next) => {
                    #[cfg(feature = "tracing")]
                    tracing::trace!(?next, "outgoing FSM advanced");
                    state = next;
                }
                Effect::MoveToError(violation) => return Err(violation.into()),
                Effect::Terminate => return Ok(()),
            }
        }
    }
}

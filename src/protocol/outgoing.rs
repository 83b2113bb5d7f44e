//! The outgoing FSM: runs on the side consuming data from a peer. Its
//! input is the peer's [`IncomingMessage`] stream; its output is the local
//! [`OutgoingMessage`] stream.

use futures::{Sink, SinkExt, Stream, StreamExt};

use crate::config::OutgoingConfig;
use crate::error::{ExchangeError, ProtocolViolation};
use crate::identifier::{SequenceNumber, SiteIdentifier};
use crate::log::{ImmutableEventLog, LogSnapshot};
use crate::protocol::{send_or_pending, Effect, IncomingMessage, OutgoingMessage};

/// A function that records a received event into the local log, returning
/// whether the write was novel. Bound to the signature of
/// [`crate::log::EventLog::insert`]; the runtime supplies the closure so
/// this module never needs to know about locks or insertion notifications.
pub trait SetFn<T>: FnMut(SequenceNumber, SiteIdentifier, T) -> bool {}

impl<T, F> SetFn<T> for F where F: FnMut(SequenceNumber, SiteIdentifier, T) -> bool {}

/// States of the outgoing FSM.
#[derive(Debug, Clone)]
pub enum OutgoingState {
    /// Initial state: collecting the peer's [`IncomingMessage::Advertisement`]s
    /// until it signals [`IncomingMessage::Ready`].
    Advertising {
        /// Sites advertised by the peer so far.
        available: Vec<SiteIdentifier>,
    },

    /// Requesting and receiving events for the sites the peer advertised.
    ///
    /// A site re-advertised before its request goes out (the peer raced an
    /// insert between two snapshots) is not queued twice: at most one
    /// outstanding request per site is ever generated.
    Listening {
        /// Advertised sites not yet requested.
        pending_requests: Vec<SiteIdentifier>,
        /// Sites already requested.
        requested: Vec<SiteIdentifier>,
    },

    /// Shutting down: send [`OutgoingMessage::Done`], then terminate.
    Cancelling,
}

impl OutgoingState {
    /// Creates the initial [`OutgoingState::Advertising`] state.
    #[must_use]
    pub fn new() -> Self {
        OutgoingState::Advertising { available: Vec::new() }
    }

    /// Performs exactly one non-deterministic selection among the offers
    /// this state makes, returning the single [`Effect`] that fired.
    ///
    /// `set_fn` is called for every [`IncomingMessage::Event`] received
    /// while [`OutgoingState::Listening`]; it is expected to be the
    /// runtime's log-insertion primitive.
    pub async fn step<T, Rx, Tx, F>(
        self,
        log: &LogSnapshot<T>,
        config: &OutgoingConfig,
        inbound: &mut Rx,
        outbound: &mut Tx,
        mut set_fn: F,
    ) -> Result<Effect<Self>, ExchangeError<Tx::Error>>
    where
        T: Clone + Send + Sync,
        Rx: Stream<Item = IncomingMessage<T>> + Unpin + Send,
        Tx: Sink<OutgoingMessage> + Unpin + Send,
        Tx::Error: std::error::Error + 'static,
        F: SetFn<T>,
    {
        match self {
            OutgoingState::Advertising { mut available } => {
                let received = inbound.next().await;

                match received {
                    None => Ok(Effect::Move(OutgoingState::Cancelling)),
                    Some(IncomingMessage::Advertisement { site }) => {
                        // A racing insert between the peer's two log
                        // snapshots can advertise the same site twice before
                        // `Ready`; dedup here so `pending_requests` is seeded
                        // with at most one entry per site, the same guarantee
                        // `Listening` already gives advertisements arriving
                        // after `Ready`.
                        if !available.contains(&site) {
                            available.push(site);
                        }
                        Ok(Effect::Move(OutgoingState::Advertising { available }))
                    }
                    Some(IncomingMessage::Ready) => Ok(Effect::Move(OutgoingState::Listening {
                        pending_requests: available,
                        requested: Vec::new(),
                    })),
                    Some(IncomingMessage::Done) => Ok(Effect::Move(OutgoingState::Cancelling)),
                    Some(IncomingMessage::Event { .. }) => {
                        Ok(Effect::MoveToError(ProtocolViolation::EventBeforeReady))
                    }
                }
            }

            OutgoingState::Listening {
                mut pending_requests,
                mut requested,
            } => {
                let next_to_request = pending_requests.last().copied();
                let request = next_to_request.map(|site| OutgoingMessage::Request {
                    site,
                    next_for_site: log.expected(site),
                    next_for_all: log.expected_overall(),
                    count: config.request_credit,
                });

                tokio::select! {
                    biased;

                    received = inbound.next() => match received {
                        None => Ok(Effect::Move(OutgoingState::Cancelling)),
                        Some(IncomingMessage::Advertisement { site }) => {
                            if !pending_requests.contains(&site) && !requested.contains(&site) {
                                pending_requests.push(site);
                            }
                            Ok(Effect::Move(OutgoingState::Listening { pending_requests, requested }))
                        }
                        Some(IncomingMessage::Event { seqno, site, body }) => {
                            set_fn(seqno, site, body);
                            Ok(Effect::Move(OutgoingState::Listening { pending_requests, requested }))
                        }
                        Some(IncomingMessage::Ready) => {
                            Ok(Effect::MoveToError(ProtocolViolation::UnexpectedReady))
                        }
                        Some(IncomingMessage::Done) => Ok(Effect::Move(OutgoingState::Cancelling)),
                    },

                    result = send_or_pending(outbound, request) => {
                        result.map_err(ExchangeError::Transport)?;
                        let site = next_to_request.expect("message only built when a site remained");
                        pending_requests.pop();
                        requested.push(site);
                        Ok(Effect::Move(OutgoingState::Listening { pending_requests, requested }))
                    }
                }
            }

            OutgoingState::Cancelling => {
                outbound.send(OutgoingMessage::Done).await.map_err(ExchangeError::Transport)?;
                Ok(Effect::Terminate)
            }
        }
    }
}

impl Default for OutgoingState {
    fn default() -> Self {
        Self::new()
    }
}

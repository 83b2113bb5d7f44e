//! The incoming FSM: runs on the side holding data to offer. Its input is
//! the peer's [`OutgoingMessage`] stream; its output is the local
//! [`IncomingMessage`] stream.

use std::collections::{BTreeMap, BTreeSet};

use futures::{Sink, SinkExt, Stream, StreamExt};

use crate::error::{ExchangeError, ProtocolViolation};
use crate::identifier::{EventIdentifier, SequenceNumber, SiteIdentifier};
use crate::log::{ImmutableEventLog, LogSnapshot};
use crate::protocol::{send_or_pending, Effect, IncomingMessage, OutgoingMessage};

/// States of the incoming FSM.
#[derive(Debug, Clone)]
pub enum IncomingState {
    /// Initial state: advertising the sites known at construction time,
    /// one [`IncomingMessage::Advertisement`] per step, before sending
    /// [`IncomingMessage::Ready`] and moving to [`IncomingState::Sending`].
    New {
        /// Sites already advertised.
        already_sent: Vec<SiteIdentifier>,
        /// Sites still waiting to be advertised, popped from the back.
        remaining_to_send: Vec<SiteIdentifier>,
    },

    /// Credit-driven serving: events are sent for advertised sites that
    /// have outstanding credit, as the log permits.
    Sending {
        /// Sites that have been advertised to the peer.
        advertised: BTreeSet<SiteIdentifier>,
        /// The next sequence number to send for each site, once credit
        /// allows it.
        next_seqno_per_site: BTreeMap<SiteIdentifier, SequenceNumber>,
        /// Outstanding send credit per site, granted by the peer's
        /// [`OutgoingMessage::Request`] messages.
        credits_per_site: BTreeMap<SiteIdentifier, u32>,
    },
}

impl IncomingState {
    /// Creates the initial [`IncomingState::New`] state, parameterized by
    /// a snapshot of the site's currently known sites.
    #[must_use]
    pub fn new(known_sites: Vec<SiteIdentifier>) -> Self {
        IncomingState::New {
            already_sent: Vec::new(),
            remaining_to_send: known_sites,
        }
    }

    /// Performs exactly one non-deterministic selection among the offers
    /// this state makes, returning the single [`Effect`] that fired.
    ///
    /// `inbound` delivers the peer's [`OutgoingMessage`]s; `outbound` is
    /// where this state sends [`IncomingMessage`]s; `insertions` delivers a
    /// notification every time a new event is recorded locally (only
    /// consulted by [`IncomingState::Sending`], to re-evaluate what may now
    /// be sent). Received messages win the select, so cancellation
    /// (`inbound` closing) is observed promptly even under steady send
    /// pressure.
    pub async fn step<T, Rx, Tx, Ins>(
        self,
        log: &LogSnapshot<T>,
        inbound: &mut Rx,
        outbound: &mut Tx,
        insertions: &mut Ins,
    ) -> Result<Effect<Self>, ExchangeError<Tx::Error>>
    where
        T: Clone + Send + Sync,
        Rx: Stream<Item = OutgoingMessage> + Unpin + Send,
        Tx: Sink<IncomingMessage<T>> + Unpin + Send,
        Tx::Error: std::error::Error + 'static,
        Ins: Stream<Item = EventIdentifier> + Unpin + Send,
    {
        match self {
            IncomingState::New {
                mut already_sent,
                mut remaining_to_send,
            } => {
                let next_to_advertise = remaining_to_send.last().copied();
                let message = match next_to_advertise {
                    Some(site) => IncomingMessage::Advertisement { site },
                    None => IncomingMessage::Ready,
                };

                // Exactly one message is ever offered here (an advertisement
                // or `Ready`), so there's a single send branch below rather
                // than one per candidate: two branches both reborrowing
                // `&mut *outbound` would have `select!` building both send
                // futures before polling either, `if` preconditions or not.
                tokio::select! {
                    biased;

                    received = inbound.next() => Ok(match received {
                        None => Effect::Terminate,
                        Some(_unexpected) => {
                            Effect::MoveToError(ProtocolViolation::UnexpectedDuringAdvertising)
                        }
                    }),

                    result = outbound.send(message) => {
                        result.map_err(ExchangeError::Transport)?;
                        match next_to_advertise {
                            Some(site) => {
                                remaining_to_send.pop();
                                already_sent.push(site);
                                Ok(Effect::Move(IncomingState::New { already_sent, remaining_to_send }))
                            }
                            None => Ok(Effect::Move(IncomingState::Sending {
                                advertised: already_sent.into_iter().collect(),
                                next_seqno_per_site: BTreeMap::new(),
                                credits_per_site: BTreeMap::new(),
                            })),
                        }
                    }
                }
            }

            IncomingState::Sending {
                mut advertised,
                mut next_seqno_per_site,
                mut credits_per_site,
            } => {
                let next_event = find_next_sendable_event(log, &advertised, &next_seqno_per_site, &credits_per_site);
                let next_to_advertise = log.sites().into_iter().find(|site| !advertised.contains(site));

                // At most one of these becomes this tick's outbound message:
                // an event takes priority over advertising a new site. See
                // the `New` state above for why the two candidates are
                // folded into one `Option` and one send branch rather than
                // offered as separate `select!` branches.
                let to_send = next_event
                    .as_ref()
                    .map(|(site, id, body)| IncomingMessage::Event {
                        seqno: id.seqno,
                        site: *site,
                        body: body.clone(),
                    })
                    .or_else(|| next_to_advertise.map(|site| IncomingMessage::Advertisement { site }));

                tokio::select! {
                    biased;

                    received = inbound.next() => Ok(match received {
                        None => Effect::Terminate,
                        Some(OutgoingMessage::Acknowledge { site, next_seqno }) => {
                            next_seqno_per_site.insert(site, next_seqno);
                            credits_per_site.insert(site, 0);
                            Effect::Move(IncomingState::Sending { advertised, next_seqno_per_site, credits_per_site })
                        }
                        Some(OutgoingMessage::Request { site, count, .. }) => {
                            let entry = credits_per_site.entry(site).or_insert(0);
                            *entry = entry.saturating_add(count);
                            Effect::Move(IncomingState::Sending { advertised, next_seqno_per_site, credits_per_site })
                        }
                        Some(OutgoingMessage::Done) => {
                            Effect::Move(IncomingState::Sending { advertised, next_seqno_per_site, credits_per_site })
                        }
                    }),

                    Some(_inserted) = insertions.next() => {
                        Ok(Effect::Move(IncomingState::Sending { advertised, next_seqno_per_site, credits_per_site }))
                    }

                    result = send_or_pending(outbound, to_send) => {
                        result.map_err(ExchangeError::Transport)?;
                        if let Some((site, id, _)) = next_event {
                            *credits_per_site.get_mut(&site).expect("credit present by construction") -= 1;
                            next_seqno_per_site.insert(site, id.seqno.inc());
                        } else if let Some(site) = next_to_advertise {
                            advertised.insert(site);
                        }
                        Ok(Effect::Move(IncomingState::Sending { advertised, next_seqno_per_site, credits_per_site }))
                    }
                }
            }
        }
    }
}

/// Finds the first sendable event: picks the first
/// qualifying site in ascending [`SiteIdentifier`] order (iterating the
/// `BTreeMap` of credits), then the oldest event still owed to it. This
/// makes the pick deterministic across runs for a given log and credit
/// state.
fn find_next_sendable_event<T>(
    log: &LogSnapshot<T>,
    advertised: &BTreeSet<SiteIdentifier>,
    next_seqno_per_site: &BTreeMap<SiteIdentifier, SequenceNumber>,
    credits_per_site: &BTreeMap<SiteIdentifier, u32>,
) -> Option<(SiteIdentifier, EventIdentifier, T)>
where
    T: Clone,
{
    for (&site, &credit) in credits_per_site {
        if credit == 0 || !advertised.contains(&site) {
            continue;
        }

        let from = next_seqno_per_site.get(&site).copied().unwrap_or(SequenceNumber::ZERO);
        if let Some(event) = log.events(site, from).into_iter().next() {
            return Some((site, event.id, event.body));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use futures::stream::{SplitSink, SplitStream};
    use futures::{SinkExt, StreamExt};

    use super::*;
    use crate::inmemory::{self, Endpoint};
    use crate::log::EventLog;

    type FsmSide = Endpoint<IncomingMessage<String>, OutgoingMessage>;
    type TestSide = Endpoint<OutgoingMessage, IncomingMessage<String>>;

    fn harness() -> (SplitStream<FsmSide>, SplitSink<FsmSide, IncomingMessage<String>>, TestSide) {
        let (fsm_side, test_side): (FsmSide, TestSide) = inmemory::duplex(8);
        let (outbound, inbound) = fsm_side.split();
        (inbound, outbound, test_side)
    }

    fn empty_insertions() -> impl Stream<Item = EventIdentifier> + Unpin + Send {
        futures::stream::pending()
    }

    #[tokio::test]
    async fn advertises_known_sites_then_signals_ready() {
        let (mut inbound, mut outbound, mut test_side) = harness();
        let log: EventLog<String> = EventLog::new();
        let snapshot = log.snapshot();
        let mut insertions = empty_insertions();

        let state = IncomingState::new(vec![SiteIdentifier::new(7)]);
        let state = match state.step(&snapshot, &mut inbound, &mut outbound, &mut insertions).await.unwrap() {
            Effect::Move(next) => next,
            other => panic!("expected Move, got {other:?}"),
        };
        assert_eq!(test_side.next().await, Some(IncomingMessage::Advertisement { site: SiteIdentifier::new(7) }));

        match state.step(&snapshot, &mut inbound, &mut outbound, &mut insertions).await.unwrap() {
            Effect::Move(IncomingState::Sending { advertised, .. }) => {
                assert!(advertised.contains(&SiteIdentifier::new(7)));
            }
            other => panic!("expected Move(Sending), got {other:?}"),
        }
        assert_eq!(test_side.next().await, Some(IncomingMessage::Ready));
    }

    #[tokio::test]
    async fn sends_event_only_once_credit_is_granted() {
        let (mut inbound, mut outbound, mut test_side) = harness();
        let log: EventLog<String> = EventLog::new();
        log.set(SequenceNumber::ZERO, SiteIdentifier::new(1), "a".to_string());
        let snapshot = log.snapshot();
        let mut insertions = empty_insertions();

        let state = IncomingState::Sending {
            advertised: [SiteIdentifier::new(1)].into_iter().collect(),
            next_seqno_per_site: BTreeMap::new(),
            credits_per_site: BTreeMap::new(),
        };

        test_side
            .send(OutgoingMessage::Request {
                site: SiteIdentifier::new(1),
                next_for_site: SequenceNumber::ZERO,
                next_for_all: SequenceNumber::ZERO,
                count: 1,
            })
            .await
            .unwrap();

        let state = match state.step(&snapshot, &mut inbound, &mut outbound, &mut insertions).await.unwrap() {
            Effect::Move(next) => next,
            other => panic!("expected Move, got {other:?}"),
        };

        match state.step(&snapshot, &mut inbound, &mut outbound, &mut insertions).await.unwrap() {
            Effect::Move(_) => {}
            other => panic!("expected Move, got {other:?}"),
        }

        assert_eq!(
            test_side.next().await,
            Some(IncomingMessage::Event {
                seqno: SequenceNumber::ZERO,
                site: SiteIdentifier::new(1),
                body: "a".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn acknowledge_resets_credit_to_zero() {
        let (mut inbound, mut outbound, mut test_side) = harness();
        let log: EventLog<String> = EventLog::new();
        log.set(SequenceNumber::ZERO, SiteIdentifier::new(1), "a".to_string());
        let snapshot = log.snapshot();
        let mut insertions = empty_insertions();

        let mut credits_per_site = BTreeMap::new();
        credits_per_site.insert(SiteIdentifier::new(1), 5);
        let state = IncomingState::Sending {
            advertised: [SiteIdentifier::new(1)].into_iter().collect(),
            next_seqno_per_site: BTreeMap::new(),
            credits_per_site,
        };

        test_side
            .send(OutgoingMessage::Acknowledge { site: SiteIdentifier::new(1), next_seqno: SequenceNumber::ZERO })
            .await
            .unwrap();

        match state.step(&snapshot, &mut inbound, &mut outbound, &mut insertions).await.unwrap() {
            Effect::Move(IncomingState::Sending { credits_per_site, .. }) => {
                assert_eq!(credits_per_site.get(&SiteIdentifier::new(1)), Some(&0));
            }
            other => panic!("expected Move(Sending), got {other:?}"),
        }
    }

    #[tokio::test]
    async fn closed_inbound_terminates_new_state_immediately() {
        let (mut inbound, mut outbound, test_side) = harness();
        drop(test_side);
        let log: EventLog<String> = EventLog::new();
        let snapshot = log.snapshot();
        let mut insertions = empty_insertions();

        // `received` is listed first under `biased`, so a closed inbound
        // wins the select on the very first step even though there is a
        // site still waiting to be advertised.
        let state = IncomingState::new(vec![SiteIdentifier::new(1)]);
        let effect = state.step(&snapshot, &mut inbound, &mut outbound, &mut insertions).await.unwrap();
        assert!(matches!(effect, Effect::Terminate));
    }
}

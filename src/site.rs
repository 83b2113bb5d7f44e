//! A replica: one sequence-number space, one log, one insertion signal.

use futures::{Sink, Stream, StreamExt};
use tokio::sync::broadcast;

use crate::config::OutgoingConfig;
use crate::error::ExchangeError;
use crate::identifier::{EventIdentifier, SiteIdentifier};
use crate::log::{EventLog, EventValue, ImmutableEventLog};
use crate::projection::OneWayProjection;
use crate::protocol::{IncomingMessage, OutgoingMessage};
use crate::runtime::ExchangeRuntime;

/// The default capacity of a site's insertion broadcast channel.
///
/// Slow subscribers that fall behind by more than this many insertions see
/// a lagged notification (`tokio_stream::wrappers::errors::BroadcastStreamRecvError`)
/// rather than unbounded memory growth; [`crate::runtime::ExchangeRuntime`]
/// treats a lagged notification the same as any other (it only ever uses
/// the signal to decide "re-evaluate what can be sent now", never to count
/// exact insertions), so a lag never causes a missed send opportunity.
const DEFAULT_INSERTION_CAPACITY: usize = 1024;

/// A replica participating in replication.
///
/// Cloning a [`Site`] yields a handle to the same underlying log and
/// insertion broadcaster (both are themselves cheaply-cloned `Arc`-backed
/// handles), the same way [`EventLog::clone`] does.
#[derive(Clone)]
pub struct Site<T> {
    identifier: SiteIdentifier,
    log: EventLog<T>,
    insertions: broadcast::Sender<EventIdentifier>,
}

impl<T> Site<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Creates a new, empty site with the given identifier.
    #[must_use]
    pub fn new(identifier: SiteIdentifier) -> Self {
        let (insertions, _) = broadcast::channel(DEFAULT_INSERTION_CAPACITY);
        Self {
            identifier,
            log: EventLog::new(),
            insertions,
        }
    }

    /// This site's identifier.
    #[must_use]
    pub fn identifier(&self) -> SiteIdentifier {
        self.identifier
    }

    /// A handle to this site's log.
    #[must_use]
    pub fn log(&self) -> &EventLog<T> {
        &self.log
    }

    fn runtime(&self) -> ExchangeRuntime<T> {
        ExchangeRuntime::new(self.log.clone(), self.insertions.clone())
    }

    /// Runs the [incoming](crate::protocol::incoming) side of an exchange
    /// to completion: serves this site's log to whatever peer is reachable
    /// through `io`.
    ///
    /// `io` carries both directions of the duplex: it is split into its
    /// sink and stream halves via [`futures::StreamExt::split`] (the same
    /// way a framed websocket or duplex byte stream is typically handed to
    /// a protocol driver), so a single transport value — such as an
    /// [`crate::inmemory::Endpoint`] — is all a caller needs to provide.
    pub async fn incoming<IO>(&self, io: IO) -> Result<(), ExchangeError<IO::Error>>
    where
        IO: Stream<Item = OutgoingMessage> + Sink<IncomingMessage<T>> + Send + 'static,
        IO::Error: std::error::Error + 'static,
    {
        let known_sites = self.log.sites();
        let (outbound, inbound) = io.split();
        self.runtime().run_incoming(known_sites, inbound, outbound).await
    }

    /// Runs the [outgoing](crate::protocol::outgoing) side of an exchange
    /// to completion: requests and records events from whatever peer is
    /// reachable through `io`. See [`Site::incoming`] for the shape `io`
    /// must take.
    pub async fn outgoing<IO>(&self, config: OutgoingConfig, io: IO) -> Result<(), ExchangeError<IO::Error>>
    where
        IO: Stream<Item = IncomingMessage<T>> + Sink<OutgoingMessage> + Send + 'static,
        IO::Error: std::error::Error + 'static,
    {
        let (outbound, inbound) = io.split();
        self.runtime().run_outgoing(config, inbound, outbound).await
    }

    /// Atomically appends zero or more locally-produced events.
    ///
    /// `block` receives the model folded from the log via `projection` as
    /// it stood before this call, and a `yield` callback; every body passed
    /// to `yield` is appended under this site's identifier with
    /// consecutive sequence numbers. The whole operation — the fold, the
    /// appends, and the insertion notifications — is atomic with respect to
    /// concurrent exchange-runtime mutations of the same log.
    ///
    /// Returns the folded model (as seen before this call's appends) and
    /// the identifiers newly assigned.
    pub fn event<M>(
        &self,
        initial: M,
        mut projection: impl OneWayProjection<M, T>,
        block: impl FnOnce(&M, &mut dyn FnMut(T)),
    ) -> (M, Vec<EventIdentifier>) {
        let (model, ids) = self
            .log
            .transact(self.identifier, initial, |model, event| projection.project(model, event), block);

        for &id in &ids {
            let _ = self.insertions.send(id);
        }

        (model, ids)
    }

    /// Returns every event this site holds, for a peer-free, read-only view
    /// of the current model.
    #[must_use]
    pub fn events(&self) -> Vec<EventValue<T>> {
        self.log.foldl(Vec::new(), |mut acc, event| {
            acc.push(event.clone());
            acc
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::SequenceNumber;

    #[test]
    fn event_appends_with_consecutive_seqnos() {
        let site: Site<String> = Site::new(SiteIdentifier::new(1));

        let (_, ids) = site.event(0usize, |count, _event: &EventValue<String>| count + 1, |_model, yield_body| {
            yield_body("a".to_string());
            yield_body("b".to_string());
        });

        assert_eq!(ids.len(), 2);
        assert_eq!(ids[0].seqno, SequenceNumber::ZERO);
        assert_eq!(ids[1].seqno, SequenceNumber::new(1));
        assert_eq!(site.log.expected(SiteIdentifier::new(1)), SequenceNumber::new(2));
    }

    #[test]
    fn event_reflects_prior_state_in_the_model() {
        let site: Site<String> = Site::new(SiteIdentifier::new(1));
        site.event((), |_, _: &EventValue<String>| (), |_model, yield_body| {
            yield_body("first".to_string());
        });

        let (count, _) = site.event(0usize, |count, _event: &EventValue<String>| count + 1, |count, _| {
            assert_eq!(*count, 1);
        });

        assert_eq!(count, 1);
    }
}

//! The exchange-pairing primitive: couples sites together over in-process
//! transports and keeps them paired, retrying on transport failure.

use std::error::Error as StdError;
use std::fmt;

use tokio::sync::watch;

use crate::config::{OutgoingConfig, SyncConfig};
use crate::error::ExchangeError;
use crate::inmemory;
use crate::protocol::{IncomingMessage, OutgoingMessage};
use crate::site::Site;

/// The channel capacity used for every in-process duplex [`sync`] creates.
const CHANNEL_CAPACITY: usize = 64;

/// An error from one leg of a paired exchange.
///
/// Type-erased because the two directions of a pairing necessarily carry
/// different transport error types (one leg's sink sends
/// [`OutgoingMessage`], the other's sends [`IncomingMessage`]), so they
/// cannot share an `ExchangeError<E>` instantiation.
#[derive(Debug)]
pub struct SyncError {
    source: Box<dyn StdError + Send + Sync>,
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "exchange failed: {}", self.source)
    }
}

impl StdError for SyncError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.source.as_ref())
    }
}

impl<T> From<ExchangeError<T>> for SyncError
where
    T: StdError + Send + Sync + 'static,
{
    fn from(error: ExchangeError<T>) -> Self {
        Self { source: Box::new(error) }
    }
}

/// Repeatedly couples `a.outgoing ↔ b.incoming` and `b.outgoing ↔
/// a.incoming` for every adjacent pair in `sites`, over in-process
/// channels. Suspends until every coupling has run to completion — either
/// because the exchanges ran out of work and closed normally, or because
/// `stop` was signalled.
///
/// On transport failure, the failing direction is retried after
/// `config.retry_delay` with a fresh channel pair, unless `stop` is
/// signalled in the meantime.
pub async fn sync<T>(sites: &[Site<T>], config: SyncConfig, stop: watch::Receiver<bool>) -> Vec<Result<(), SyncError>>
where
    T: Clone + Send + Sync + 'static,
{
    let legs = sites.windows(2).flat_map(|pair| {
        let (a, b) = (pair[0].clone(), pair[1].clone());
        [
            pair_direction(a.clone(), b.clone(), config, stop.clone()),
            pair_direction(b, a, config, stop.clone()),
        ]
    });

    futures::future::join_all(legs).await
}

/// Runs `downstream.outgoing() ↔ upstream.incoming()` to quiescence,
/// retrying with a fresh channel pair on failure.
///
/// Returns `Ok(())` once both legs terminate normally. A failure is
/// retried after `config.retry_delay` unless `stop` fires first, in which
/// case the failure that triggered the wait is returned.
async fn pair_direction<T>(
    downstream: Site<T>,
    upstream: Site<T>,
    config: SyncConfig,
    mut stop: watch::Receiver<bool>,
) -> Result<(), SyncError>
where
    T: Clone + Send + Sync + 'static,
{
    loop {
        if *stop.borrow() {
            return Ok(());
        }

        let (outgoing_end, incoming_end) = inmemory::duplex::<OutgoingMessage, IncomingMessage<T>>(CHANNEL_CAPACITY);

        let outgoing_fut = downstream.outgoing(OutgoingConfig::default(), outgoing_end);
        let incoming_fut = upstream.incoming(incoming_end);

        let (outgoing_result, incoming_result) = tokio::join!(outgoing_fut, incoming_fut);

        let failure = outgoing_result
            .err()
            .map(SyncError::from)
            .or_else(|| incoming_result.err().map(SyncError::from));

        let Some(failure) = failure else {
            return Ok(());
        };

        if *stop.borrow() {
            return Err(failure);
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(error = %failure, delay = ?config.retry_delay, "exchange failed, retrying");

        tokio::select! {
            biased;
            _ = stop.changed() => {
                if *stop.borrow() {
                    return Err(failure);
                }
            }
            _ = tokio::time::sleep(config.retry_delay) => {}
        }
    }
}

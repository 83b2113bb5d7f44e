//! Small runtime-tunable knobs for the exchange FSMs and the `sync` driver.
//!
//! There is no environment- or file-driven configuration layer: the core
//! is a library, so these are plain structs constructed in-process, not
//! parsed from anywhere.

use std::time::Duration;

/// Tunables for the outgoing FSM (`crate::protocol::outgoing`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutgoingConfig {
    /// The `count` granted per [`Request`](crate::protocol::OutgoingMessage::Request)
    /// message. Defaults to [`u32::MAX`] (effectively unbounded); lower it
    /// to bound how many events a single advertised site may push before
    /// the peer must ask again, which gives other advertised sites sharing
    /// the same exchange a chance to be served in between.
    pub request_credit: u32,
}

impl Default for OutgoingConfig {
    fn default() -> Self {
        Self {
            request_credit: u32::MAX,
        }
    }
}

/// Tunables for the [`crate::sync::sync`] driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    /// How long `sync` waits before retrying a pair of exchanges that
    /// failed. Defaults to 1 second.
    pub retry_delay: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_secs(1),
        }
    }
}

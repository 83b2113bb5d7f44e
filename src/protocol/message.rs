//! The two directional wire alphabets exchanged between paired sites.
//!
//! Both derive `Debug`/`Clone`/`PartialEq` unconditionally and
//! `Serialize`/`Deserialize` behind the `serde` feature (matching the
//! optional `serde` feature of the event-sourcing crate this core is built
//! from): this crate never frames or serializes a message itself, that is
//! the transport's job.

use crate::identifier::{SequenceNumber, SiteIdentifier};

/// Messages sent by the [incoming FSM](crate::protocol::incoming) — the
/// side holding data to offer — to its peer.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum IncomingMessage<T> {
    /// "I hold events for this site."
    Advertisement {
        /// The site the sender holds events for.
        site: SiteIdentifier,
    },

    /// "I have advertised all currently known sites; you may now request."
    Ready,

    /// An event payload.
    Event {
        /// The sequence number of the event, local to `site`.
        seqno: SequenceNumber,
        /// The site that produced the event.
        site: SiteIdentifier,
        /// The opaque event payload.
        body: T,
    },

    /// Terminal: no more messages will be sent on this exchange.
    ///
    /// This is the V1 dialect message; a minimal dialect may simply close
    /// the channel instead, which this crate's runtime treats identically
    /// (see `crate::runtime`).
    Done,
}

/// Messages sent by the [outgoing FSM](crate::protocol::outgoing) — the
/// side consuming data — to its peer.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OutgoingMessage {
    /// "I have events up to but not including `next_seqno` for `site`; do
    /// not resend below that."
    Acknowledge {
        /// The site being acknowledged.
        site: SiteIdentifier,
        /// The next sequence number the sender still needs for `site`.
        next_seqno: SequenceNumber,
    },

    /// "Send me up to `count` events for `site`, starting at
    /// `next_for_site`; my overall expected sequence number is
    /// `next_for_all`."
    Request {
        /// The site being requested.
        site: SiteIdentifier,
        /// The first sequence number the sender still needs for `site`.
        next_for_site: SequenceNumber,
        /// The sender's overall expected sequence number, across all
        /// sites, at the time of the request.
        next_for_all: SequenceNumber,
        /// How many events the sender is willing to receive for `site`
        /// before having to ask again.
        count: u32,
    },

    /// Terminal: no more messages will be sent on this exchange.
    Done,
}

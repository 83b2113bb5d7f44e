//! Identifiers used to give every event a deterministic, causally-consistent
//! position in the replicated log.
//!
//! [`SiteIdentifier`] names a replica; [`SequenceNumber`] is the replica-local
//! clock; [`EventIdentifier`] combines the two into the key every event is
//! addressed by, and whose lexicographic order ([`Ord`]) is the global total
//! order used by [`crate::log::ImmutableEventLog::foldl`].

use std::fmt;

/// An opaque, globally unique identifier for a site (a replica).
///
/// Two [`SiteIdentifier`]s are only ever compared for equality, never for
/// order: there is no meaningful "smaller" or "larger" site, only "the same"
/// or "different". It is still [`Ord`] so it can serve as the tie-breaker
/// component of [`EventIdentifier`]'s lexicographic order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SiteIdentifier(pub u32);

impl SiteIdentifier {
    /// Creates a new [`SiteIdentifier`] from a raw 32-bit value.
    #[inline]
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw 32-bit value backing this identifier.
    #[inline]
    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Display for SiteIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "site:{}", self.0)
    }
}

impl From<u32> for SiteIdentifier {
    #[inline]
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// An unsigned counter, local to a single site, used to order events
/// produced by that site.
///
/// [`SequenceNumber::ZERO`] is the initial value handed out to the first
/// event a site ever produces. [`SequenceNumber::inc`] advances the counter,
/// saturating at [`u32::MAX`] rather than wrapping: a site that has produced
/// [`u32::MAX`] events stops being able to produce new ones rather than
/// silently reusing a sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SequenceNumber(u32);

impl SequenceNumber {
    /// The initial sequence number, handed out before any event exists.
    pub const ZERO: Self = Self(0);

    /// Creates a [`SequenceNumber`] from a raw value.
    #[inline]
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Returns the raw value backing this sequence number.
    #[inline]
    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }

    /// Returns the next [`SequenceNumber`] after this one.
    ///
    /// Saturates at [`u32::MAX`]: it never wraps back below its input.
    #[inline]
    #[must_use]
    pub const fn inc(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for SequenceNumber {
    #[inline]
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// The identity of a single event: the [`SequenceNumber`] it was assigned by
/// its originating [`SiteIdentifier`], paired with that site.
///
/// [`EventIdentifier`] derives [`Ord`] lexicographically on
/// `(seqno, site)`, which is what gives the replicated log a single
/// deterministic global order compatible with each site's local causal
/// order: events from the same site are ordered by their sequence number,
/// and concurrent events from different sites (same sequence number) are
/// broken by site identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EventIdentifier {
    /// The sequence number assigned by `site`.
    pub seqno: SequenceNumber,
    /// The site that produced the event.
    pub site: SiteIdentifier,
}

impl EventIdentifier {
    /// Creates a new [`EventIdentifier`].
    #[inline]
    #[must_use]
    pub const fn new(seqno: SequenceNumber, site: SiteIdentifier) -> Self {
        Self { seqno, site }
    }
}

impl fmt::Display for EventIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.seqno, self.site)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_number_increments() {
        assert_eq!(SequenceNumber::ZERO.inc(), SequenceNumber::new(1));
        assert_eq!(SequenceNumber::new(41).inc(), SequenceNumber::new(42));
    }

    #[test]
    fn sequence_number_saturates_at_max() {
        let max = SequenceNumber::new(u32::MAX);
        assert_eq!(max.inc(), max);
    }

    #[test]
    fn event_identifier_orders_by_seqno_then_site() {
        let a = EventIdentifier::new(SequenceNumber::new(0), SiteIdentifier::new(5));
        let b = EventIdentifier::new(SequenceNumber::new(0), SiteIdentifier::new(9));
        let c = EventIdentifier::new(SequenceNumber::new(1), SiteIdentifier::new(0));

        assert!(a < b);
        assert!(b < c);
        assert!(a < c);
    }
}

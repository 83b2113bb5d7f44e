//! Support for [`OneWayProjection`], a deterministic read model built by
//! left-folding the event log.
//!
//! Folding an in-memory [`crate::log::ImmutableEventLog`] never performs
//! I/O, so projection stays synchronous: no `async_trait` needed here.

use crate::log::EventValue;

/// A pure, deterministic left-fold from a model `M` and an event `E` to the
/// next model value.
///
/// Two sites that apply the same `OneWayProjection` to logs containing the
/// same events (in the same [`EventIdentifier`](crate::identifier::EventIdentifier)
/// order) always reach the same model. Implementations must not perform
/// side effects: the same `(model, event)` pair must always produce the
/// same next model.
pub trait OneWayProjection<M, E> {
    /// Folds `event` into `model`, producing the next model value.
    fn project(&mut self, model: M, event: &EventValue<E>) -> M;
}

impl<M, E, F> OneWayProjection<M, E> for F
where
    F: FnMut(M, &EventValue<E>) -> M,
{
    fn project(&mut self, model: M, event: &EventValue<E>) -> M {
        self(model, event)
    }
}

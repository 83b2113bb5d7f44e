//! The site-partitioned, ordered event log.
//!
//! The log is the only mutable state a [`crate::site::Site`] owns. It is
//! specified as two traits — [`ImmutableEventLog`] for reads and
//! [`PersistentEventLog`] for the single mutation it supports — so that an
//! alternative storage backend only needs to satisfy the contract, not this
//! crate's particular in-memory representation.
//!
//! [`EventLog`] is the reference implementation: a `HashMap` of per-site
//! `BTreeMap`s guarded by a [`parking_lot::Mutex`], in the style of the
//! in-memory event store this crate's FSM and runtime machinery is built
//! from (which guards its own event stream state behind a single lock
//! rather than a persistent map — see DESIGN.md).

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::identifier::{EventIdentifier, SequenceNumber, SiteIdentifier};

/// A single event: its identity, plus an opaque, application-defined body.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EventValue<T> {
    /// The identity of the event.
    pub id: EventIdentifier,
    /// The opaque payload carried by the event.
    pub body: T,
}

impl<T> EventValue<T> {
    /// Creates a new [`EventValue`].
    #[inline]
    pub const fn new(id: EventIdentifier, body: T) -> Self {
        Self { id, body }
    }
}

/// Read-only contract of the event log.
///
/// Every method here is total: there is no failure mode for reading
/// a log, only absence (`None`, empty collections).
pub trait ImmutableEventLog<T>
where
    T: Clone,
{
    /// Returns the set of sites for which at least one event is recorded.
    fn sites(&self) -> Vec<SiteIdentifier>;

    /// Returns the next sequence number expected for `site`: one past the
    /// highest recorded sequence number for that site, or
    /// [`SequenceNumber::ZERO`] if none is recorded.
    fn expected(&self, site: SiteIdentifier) -> SequenceNumber;

    /// Returns the next sequence number expected overall: the maximum of
    /// [`ImmutableEventLog::expected`] across every known site, or
    /// [`SequenceNumber::ZERO`] if the log is empty.
    fn expected_overall(&self) -> SequenceNumber;

    /// Looks up the exact event recorded for `(seqno, site)`, if any.
    fn get(&self, seqno: SequenceNumber, site: SiteIdentifier) -> Option<T>;

    /// Returns every event recorded for `site` with a sequence number
    /// greater than or equal to `from`, in ascending order.
    fn events(&self, site: SiteIdentifier, from: SequenceNumber) -> Vec<EventValue<T>>;

    /// Left-folds `f` over every event in the log, in ascending
    /// [`EventIdentifier`] order (i.e. the deterministic global causal
    /// order described in the crate documentation).
    fn foldl<M>(&self, initial: M, f: impl FnMut(M, &EventValue<T>) -> M) -> M;
}

/// Extends [`ImmutableEventLog`] with the single mutation the log supports:
/// recording a new event.
pub trait PersistentEventLog<T>: ImmutableEventLog<T>
where
    T: Clone,
{
    /// Records `body` under `(seqno, site)`.
    ///
    /// If the key is already present, this is a no-op: the log is
    /// monotonic, and the first write for a given `(seqno, site)` is always
    /// authoritative (see DESIGN.md for the rationale).
    ///
    /// Returns a handle to the (conceptually new) version of the log. For
    /// [`EventLog`], which shares its backing storage behind an `Arc`, this
    /// is simply a cheap clone of the same handle; callers should not rely
    /// on the returned value being distinguishable from `self`.
    fn set(&self, seqno: SequenceNumber, site: SiteIdentifier, body: T) -> Self;
}

#[derive(Debug)]
struct LogState<T> {
    streams: HashMap<SiteIdentifier, BTreeMap<SequenceNumber, Arc<T>>>,
}

impl<T> Default for LogState<T> {
    fn default() -> Self {
        Self {
            streams: HashMap::new(),
        }
    }
}

/// The reference [`PersistentEventLog`] implementation: an in-memory,
/// site-partitioned ordered map shared behind an `Arc<Mutex<_>>`.
///
/// Cloning an [`EventLog`] is cheap and yields a handle to the *same*
/// underlying storage — it is not a structurally-shared persistent data
/// structure. [`EventLog::snapshot`] is the operation that produces an
/// independent, point-in-time view ([`LogSnapshot`]) suitable for holding
/// across an `await` point without re-acquiring the lock.
#[derive(Debug, Clone)]
pub struct EventLog<T> {
    inner: Arc<Mutex<LogState<T>>>,
}

impl<T> Default for EventLog<T> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(LogState::default())),
        }
    }
}

impl<T> EventLog<T> {
    /// Creates a new, empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes an immutable, independent snapshot of the log's current
    /// contents under the lock.
    ///
    /// This is the operation the exchange runtime uses before making any
    /// decision that might suspend (sending, receiving, waiting on
    /// insertion notifications): the snapshot can be read freely without
    /// holding the log mutex across a suspension point.
    #[must_use]
    pub fn snapshot(&self) -> LogSnapshot<T> {
        let guard = self.inner.lock();
        LogSnapshot {
            streams: guard.streams.clone(),
        }
    }

    /// Records `body` under `(seqno, site)`, returning whether the write was
    /// novel (`true`) or the key was already present (`false`, no-op).
    ///
    /// This is the primitive the exchange runtime's `set_fn` is built on
    /// (see `crate::runtime`): the runtime only publishes an insertion
    /// notification when this returns `true`.
    pub fn insert(&self, seqno: SequenceNumber, site: SiteIdentifier, body: T) -> bool {
        let mut guard = self.inner.lock();
        let stream = guard.streams.entry(site).or_default();
        if stream.contains_key(&seqno) {
            return false;
        }
        stream.insert(seqno, Arc::new(body));
        true
    }

    /// Atomically folds the log into a model via `project`, then lets
    /// `block` append zero or more new event bodies for `site` against that
    /// model, under a single lock acquisition.
    ///
    /// `block` receives the freshly folded model and a `yield` callback;
    /// every body passed to `yield` is appended with consecutive sequence
    /// numbers starting at [`ImmutableEventLog::expected_overall`] (the
    /// Lamport-clock value), not the per-site expected: a site that folds
    /// remote events before producing a local one must assign that local
    /// event a seqno past everything it has already observed, or it would
    /// fold as if it causally preceded events it was produced after.
    /// Returns the model and the identifiers assigned to the newly appended
    /// events, in the order they were yielded.
    pub fn transact<M>(
        &self,
        site: SiteIdentifier,
        initial: M,
        mut project: impl FnMut(M, &EventValue<T>) -> M,
        block: impl FnOnce(&M, &mut dyn FnMut(T)),
    ) -> (M, Vec<EventIdentifier>)
    where
        T: Clone,
    {
        let mut guard = self.inner.lock();

        let snapshot = LogSnapshot {
            streams: guard.streams.clone(),
        };
        let model = snapshot.foldl(initial, &mut project);
        let mut next = snapshot.expected_overall();

        let mut yielded = Vec::new();
        block(&model, &mut |body| yielded.push(body));

        let stream = guard.streams.entry(site).or_default();
        let mut ids = Vec::with_capacity(yielded.len());
        for body in yielded {
            stream.insert(next, Arc::new(body));
            ids.push(EventIdentifier::new(next, site));
            next = next.inc();
        }

        (model, ids)
    }
}

impl<T> ImmutableEventLog<T> for EventLog<T>
where
    T: Clone,
{
    fn sites(&self) -> Vec<SiteIdentifier> {
        self.inner.lock().streams.keys().copied().collect()
    }

    fn expected(&self, site: SiteIdentifier) -> SequenceNumber {
        self.inner
            .lock()
            .streams
            .get(&site)
            .and_then(|stream| stream.keys().next_back())
            .map_or(SequenceNumber::ZERO, |seqno| seqno.inc())
    }

    fn expected_overall(&self) -> SequenceNumber {
        let guard = self.inner.lock();
        guard
            .streams
            .values()
            .map(|stream| {
                stream
                    .keys()
                    .next_back()
                    .map_or(SequenceNumber::ZERO, |seqno| seqno.inc())
            })
            .max()
            .unwrap_or(SequenceNumber::ZERO)
    }

    fn get(&self, seqno: SequenceNumber, site: SiteIdentifier) -> Option<T> {
        self.inner
            .lock()
            .streams
            .get(&site)
            .and_then(|stream| stream.get(&seqno))
            .map(|body| (**body).clone())
    }

    fn events(&self, site: SiteIdentifier, from: SequenceNumber) -> Vec<EventValue<T>> {
        self.inner
            .lock()
            .streams
            .get(&site)
            .into_iter()
            .flat_map(|stream| stream.range(from..))
            .map(|(seqno, body)| EventValue::new(EventIdentifier::new(*seqno, site), (**body).clone()))
            .collect()
    }

    fn foldl<M>(&self, initial: M, f: impl FnMut(M, &EventValue<T>) -> M) -> M {
        self.snapshot().foldl(initial, f)
    }
}

impl<T> PersistentEventLog<T> for EventLog<T>
where
    T: Clone,
{
    fn set(&self, seqno: SequenceNumber, site: SiteIdentifier, body: T) -> Self {
        self.insert(seqno, site, body);
        self.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MergeCursor {
    id: EventIdentifier,
}

impl PartialOrd for MergeCursor {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MergeCursor {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.id.cmp(&other.id)
    }
}

/// An immutable, point-in-time view of an [`EventLog`]'s contents.
///
/// Produced by [`EventLog::snapshot`]. Unlike [`EventLog`] itself, reading
/// from a [`LogSnapshot`] never touches a lock: it is plain, owned data
/// (events are still cheaply shared via `Arc`).
#[derive(Debug, Clone)]
pub struct LogSnapshot<T> {
    streams: HashMap<SiteIdentifier, BTreeMap<SequenceNumber, Arc<T>>>,
}

impl<T> Default for LogSnapshot<T> {
    fn default() -> Self {
        Self {
            streams: HashMap::new(),
        }
    }
}

impl<T> ImmutableEventLog<T> for LogSnapshot<T>
where
    T: Clone,
{
    fn sites(&self) -> Vec<SiteIdentifier> {
        self.streams.keys().copied().collect()
    }

    fn expected(&self, site: SiteIdentifier) -> SequenceNumber {
        self.streams
            .get(&site)
            .and_then(|stream| stream.keys().next_back())
            .map_or(SequenceNumber::ZERO, |seqno| seqno.inc())
    }

    fn expected_overall(&self) -> SequenceNumber {
        self.streams
            .keys()
            .map(|site| self.expected(*site))
            .max()
            .unwrap_or(SequenceNumber::ZERO)
    }

    fn get(&self, seqno: SequenceNumber, site: SiteIdentifier) -> Option<T> {
        self.streams
            .get(&site)
            .and_then(|stream| stream.get(&seqno))
            .map(|body| (**body).clone())
    }

    fn events(&self, site: SiteIdentifier, from: SequenceNumber) -> Vec<EventValue<T>> {
        self.streams
            .get(&site)
            .into_iter()
            .flat_map(|stream| stream.range(from..))
            .map(|(seqno, body)| EventValue::new(EventIdentifier::new(*seqno, site), (**body).clone()))
            .collect()
    }

    /// Merges the per-site streams using a binary heap of site cursors, so
    /// that the merge is `O(n log k)` in the number of events `n` and sites
    /// `k`, rather than collecting and sorting every event.
    fn foldl<M>(&self, initial: M, mut f: impl FnMut(M, &EventValue<T>) -> M) -> M {
        let mut heads: BinaryHeap<Reverse<MergeCursor>> = BinaryHeap::new();

        for (site, stream) in &self.streams {
            if let Some((seqno, _)) = stream.iter().next() {
                heads.push(Reverse(MergeCursor {
                    id: EventIdentifier::new(*seqno, *site),
                }));
            }
        }

        let mut acc = initial;

        while let Some(Reverse(MergeCursor { id })) = heads.pop() {
            let stream = self.streams.get(&id.site).expect("site present by construction");
            let body = stream.get(&id.seqno).expect("seqno present by construction");

            acc = f(acc, &EventValue::new(id, (**body).clone()));

            if let Some((next_seqno, _)) = stream.range(id.seqno.inc()..).next() {
                heads.push(Reverse(MergeCursor {
                    id: EventIdentifier::new(*next_seqno, id.site),
                }));
            }
        }

        acc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site(id: u32) -> SiteIdentifier {
        SiteIdentifier::new(id)
    }

    fn seq(n: u32) -> SequenceNumber {
        SequenceNumber::new(n)
    }

    #[test]
    fn expected_is_zero_for_empty_log() {
        let log: EventLog<String> = EventLog::new();
        assert_eq!(log.expected(site(1)), SequenceNumber::ZERO);
        assert_eq!(log.expected_overall(), SequenceNumber::ZERO);
    }

    #[test]
    fn read_after_write() {
        let log = EventLog::new();
        log.set(seq(0), site(1), "hello".to_string());
        assert_eq!(log.get(seq(0), site(1)), Some("hello".to_string()));
    }

    #[test]
    fn expected_is_strictly_greater_than_recorded() {
        let log = EventLog::new();
        log.set(seq(3), site(1), "x".to_string());
        assert_eq!(log.expected(site(1)), seq(4));
    }

    #[test]
    fn idempotent_insert_keeps_first_write() {
        let log = EventLog::new();
        log.set(seq(0), site(1), "first".to_string());
        log.set(seq(0), site(1), "second".to_string());
        assert_eq!(log.get(seq(0), site(1)), Some("first".to_string()));
    }

    #[test]
    fn foldl_orders_by_seqno_then_site() {
        let log = EventLog::new();
        log.set(seq(1), site(1), "a1".to_string());
        log.set(seq(0), site(2), "b0".to_string());
        log.set(seq(0), site(1), "a0".to_string());

        let order = log.foldl(Vec::new(), |mut acc, event| {
            acc.push(event.body.clone());
            acc
        });

        assert_eq!(order, vec!["a0".to_string(), "b0".to_string(), "a1".to_string()]);
    }

    #[test]
    fn events_from_respects_gaps() {
        let log = EventLog::new();
        log.set(seq(0), site(1), "a".to_string());
        log.set(seq(5), site(1), "f".to_string());

        let values = log.events(site(1), seq(1));
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].id.seqno, seq(5));
    }

    #[test]
    fn transact_appends_consecutive_seqnos_against_a_stable_model() {
        let log = EventLog::new();
        log.set(seq(0), site(1), "a".to_string());

        let (model, ids) = log.transact(
            site(2),
            Vec::new(),
            |mut acc, event| {
                acc.push(event.body.clone());
                acc
            },
            |model, yield_body| {
                assert_eq!(model, &vec!["a".to_string()]);
                yield_body("b0".to_string());
                yield_body("b1".to_string());
            },
        );

        assert_eq!(model, vec!["a".to_string()]);
        assert_eq!(ids, vec![EventIdentifier::new(seq(1), site(2)), EventIdentifier::new(seq(2), site(2))]);
        assert_eq!(log.get(seq(2), site(2)), Some("b1".to_string()));
    }

    #[test]
    fn transact_assigns_seqnos_past_everything_already_folded_not_just_the_local_site() {
        // Site 2 has folded remote events from site 1 (seqnos 0,1,2) but has
        // never produced a local event itself. Its next local event must be
        // assigned a seqno past the overall Lamport clock (3), not seqno 0
        // (the per-site expected), or it would fold as causally preceding
        // events it was produced after observing.
        let log = EventLog::new();
        log.set(seq(0), site(1), "r0".to_string());
        log.set(seq(1), site(1), "r1".to_string());
        log.set(seq(2), site(1), "r2".to_string());

        let (_, ids) = log.transact(
            site(2),
            (),
            |acc, _event| acc,
            |_model, yield_body| yield_body("local".to_string()),
        );

        assert_eq!(ids, vec![EventIdentifier::new(seq(3), site(2))]);

        let order = log.foldl(Vec::new(), |mut acc, event| {
            acc.push(event.body.clone());
            acc
        });
        assert_eq!(order, vec!["r0".to_string(), "r1".to_string(), "r2".to_string(), "local".to_string()]);
    }

    #[test]
    fn snapshot_is_independent_of_later_writes() {
        let log = EventLog::new();
        log.set(seq(0), site(1), "a".to_string());

        let snap = log.snapshot();
        log.set(seq(1), site(1), "b".to_string());

        assert_eq!(snap.expected(site(1)), seq(1));
        assert_eq!(log.expected(site(1)), seq(2));
    }
}

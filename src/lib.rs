//! A bidirectional, causally-ordered event log replication protocol core.
//!
//! A [`site`] owns a partitioned, ordered [`log`] of events and two coupled
//! finite-state machines (the [`protocol`]) that replicate it against a
//! peer: [`protocol::incoming`] serves events out, [`protocol::outgoing`]
//! pulls events in. An [`ExchangeRuntime`](runtime::ExchangeRuntime) drives
//! either side of an exchange to completion over any transport
//! implementing [`futures::Sink`]/[`futures::Stream`]; [`sync`] is the
//! convenience pairing primitive for keeping a set of sites continuously
//! replicated over the bundled [`inmemory`] transport.
//!
//! ## Ordering
//!
//! Every event is identified by an [`identifier::EventIdentifier`]: a
//! site-local [`identifier::SequenceNumber`] paired with the
//! [`identifier::SiteIdentifier`] that produced it. [`EventIdentifier`]'s
//! lexicographic order is the single deterministic total order every
//! [`projection::OneWayProjection`] folds over, regardless of which site
//! computes it or in what order events physically arrived.
//!
//! ## Feature flags
//!
//! - `serde`: derives `Serialize`/`Deserialize` for wire messages and
//!   identifiers.
//! - `tracing`: instruments the exchange runtime and the `sync` retry loop.
//! - `full`: both of the above.

pub mod config;
pub mod error;
pub mod identifier;
pub mod inmemory;
pub mod log;
pub mod projection;
pub mod protocol;
pub mod runtime;
pub mod site;
pub mod sync;

pub use config::{OutgoingConfig, SyncConfig};
pub use error::{ExchangeError, ProtocolViolation};
pub use identifier::{EventIdentifier, SequenceNumber, SiteIdentifier};
pub use log::{EventLog, EventValue, ImmutableEventLog, LogSnapshot, PersistentEventLog};
pub use projection::OneWayProjection;
pub use runtime::ExchangeRuntime;
pub use site::Site;
pub use sync::{sync, SyncError};

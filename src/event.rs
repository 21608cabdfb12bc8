//! Event types through the store lifecycle: uncommitted, serialized,
//! committed, and the typed in-memory domain event.
//!
//! An event moves through exactly one lifecycle: an [`UncommittedEvent`]
//! produced by command handling is enriched and serialized into a
//! [`SerializedEvent`], the persistence backend turns it into a durable
//! [`CommittedEvent`] (assigning the aggregate sequence number and global
//! position), and load paths rebuild an ephemeral [`DomainEvent`] from it
//! after the upgrade step.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregate::{AggregateId, AggregateRoot};
use crate::metadata::Metadata;

/// Contract every domain event payload implements.
///
/// Payloads are adjacently tagged serde enums
/// (`#[serde(tag = "type", content = "data")]`): the tag becomes the
/// committed record's `event_type` and the content its payload. The
/// schema version is declared per event type so stored records can be
/// upgraded forward on read.
pub trait AggregateEvent:
    Clone + std::fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Stable name of this event's type (e.g. the enum variant name).
    /// Once stored, the name must never change.
    fn event_type(&self) -> &'static str;

    /// Schema version this payload shape corresponds to. Starts at 1.
    fn version(&self) -> u32 {
        1
    }
}

/// Caller-supplied token identifying the command/request that produced an
/// append batch.
///
/// Always attached as metadata under [`keys::SOURCE_ID`](crate::metadata::keys::SOURCE_ID)
/// so a backend capable of idempotent replay detection can use it. The
/// store itself never deduplicates on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(String);

impl SourceId {
    /// Wrap a source id token. Emptiness is validated by the store at
    /// append time, not here.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Generate a random v4 source id, for callers without a natural
    /// request token.
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// The raw token.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the token is empty (and therefore invalid to store with).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for SourceId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque cursor ordering committed events across all aggregates.
///
/// Only meaningful for whole-store scans via
/// [`EventStore::load_all_events`](crate::event_store::EventStore::load_all_events);
/// per-aggregate concurrency uses the aggregate sequence number instead.
/// A scan starts from [`GlobalPosition::START`] and resumes from the
/// `next` cursor of each returned page.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct GlobalPosition(u64);

impl GlobalPosition {
    /// The position before the first event in the store.
    pub const START: GlobalPosition = GlobalPosition(0);
}

impl From<u64> for GlobalPosition {
    fn from(value: u64) -> Self {
        GlobalPosition(value)
    }
}

impl From<GlobalPosition> for u64 {
    fn from(value: GlobalPosition) -> Self {
        value.0
    }
}

/// A domain event produced by command handling, not yet assigned a
/// sequence number or global position. Consumed exactly once by
/// [`EventStore::store`](crate::event_store::EventStore::store).
#[derive(Debug, Clone)]
pub struct UncommittedEvent<E> {
    /// The domain event payload.
    pub payload: E,
    /// Caller-supplied metadata for this event.
    pub metadata: Metadata,
}

impl<E> UncommittedEvent<E> {
    /// Wrap a payload with no caller metadata.
    pub fn new(payload: E) -> Self {
        Self {
            payload,
            metadata: Metadata::new(),
        }
    }

    /// Attach caller metadata.
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

impl<E> From<E> for UncommittedEvent<E> {
    fn from(payload: E) -> Self {
        Self::new(payload)
    }
}

/// An enriched, serialized event record ready to hand to the persistence
/// backend. The backend assigns the sequence number and global position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializedEvent {
    /// Store-generated v4 event id.
    pub event_id: Uuid,
    /// Event type tag extracted from the adjacently tagged payload.
    pub event_type: String,
    /// Schema version of the payload shape.
    pub version: u32,
    /// JSON payload (the `data` portion of the tagged enum).
    pub payload: serde_json::Value,
    /// Fully unioned metadata, including batch id and source id.
    pub metadata: Metadata,
}

/// The durable event record as returned by the persistence backend.
/// Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommittedEvent {
    /// Store-generated event id.
    pub event_id: Uuid,
    /// Aggregate type name the event belongs to.
    pub aggregate_type: String,
    /// Aggregate instance identifier.
    pub instance_id: String,
    /// 1-based, gapless position within the aggregate's history.
    pub sequence: u64,
    /// Position in the store-wide ordering.
    pub global_position: GlobalPosition,
    /// Event type tag.
    pub event_type: String,
    /// Schema version the payload was written (or upgraded) at.
    pub version: u32,
    /// JSON payload.
    pub payload: serde_json::Value,
    /// Metadata as written, including batch id and source id.
    pub metadata: Metadata,
    /// Backend-assigned timestamp, Unix epoch milliseconds.
    pub recorded_at: u64,
}

/// The deserialized, upgraded in-memory projection of a committed record,
/// strongly typed to its aggregate. Rebuilt on every load.
#[derive(Debug, Clone)]
pub struct DomainEvent<A: AggregateRoot> {
    /// Identity of the aggregate the event belongs to.
    pub id: A::Id,
    /// 1-based position within the aggregate's history.
    pub sequence: u64,
    /// Position in the store-wide ordering.
    pub global_position: GlobalPosition,
    /// The typed payload, always at the latest known schema version.
    pub payload: A::Event,
    /// Metadata as committed.
    pub metadata: Metadata,
}

impl<A: AggregateRoot> DomainEvent<A> {
    /// The aggregate instance identifier as a string.
    pub fn instance_id(&self) -> &str {
        self.id.as_str()
    }
}

/// One page of a whole-store scan: upgraded committed events plus the
/// cursor to resume the scan from.
#[derive(Debug, Clone)]
pub struct AllEventsPage {
    /// Events in global order, payloads upgraded to their latest version.
    pub events: Vec<CommittedEvent>,
    /// Cursor to pass to the next `load_all_events` call.
    pub next: GlobalPosition,
}

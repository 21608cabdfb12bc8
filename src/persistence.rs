//! The persistence backend contract the event store orchestrates.
//!
//! Backends own durability, atomic batch commits, sequence number
//! assignment, and the store-wide global ordering. The crate ships
//! [`InMemoryPersistence`](crate::memory::InMemoryPersistence) as a
//! reference implementation; production deployments plug in their own.

use std::fmt;
use std::io;

use async_trait::async_trait;
use thiserror::Error;

use crate::aggregate::{AggregateId, AggregateRoot};
use crate::event::{CommittedEvent, GlobalPosition, SerializedEvent};

/// Names one event stream: an aggregate type plus an instance id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamKey {
    /// Aggregate type namespace.
    pub aggregate_type: String,
    /// Instance identifier within the namespace.
    pub instance_id: String,
}

impl StreamKey {
    /// Build a key from raw parts.
    pub fn new(aggregate_type: impl Into<String>, instance_id: impl Into<String>) -> Self {
        Self {
            aggregate_type: aggregate_type.into(),
            instance_id: instance_id.into(),
        }
    }

    /// Build the key for a typed aggregate identity.
    pub fn for_aggregate<A: AggregateRoot>(id: &A::Id) -> Self {
        Self::new(A::AGGREGATE_TYPE, id.as_str())
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.aggregate_type, self.instance_id)
    }
}

/// Errors surfaced by a persistence backend.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Another writer committed to the stream since the expected sequence
    /// was observed. The batch was not written.
    #[error("optimistic concurrency conflict: expected next sequence {expected}, stream is at {actual}")]
    Conflict {
        /// Sequence number the writer expected to claim next.
        expected: u64,
        /// Sequence number the stream would actually assign next.
        actual: u64,
    },

    /// The backend's storage failed.
    #[error("persistence I/O failure: {0}")]
    Io(#[from] io::Error),

    /// The backend read a record it could not make sense of.
    #[error("corrupt event record: {0}")]
    Corrupt(String),
}

/// Durable storage of committed events.
///
/// # Contract
///
/// - `commit` is atomic per call: either every event in the batch becomes
///   durable or none does, and no reader ever observes a partial batch.
/// - Sequence numbers within a stream are 1-based and gapless; the global
///   ordering across streams is total and append-monotonic.
/// - Committed records are immutable.
#[async_trait]
pub trait EventPersistence: Send + Sync + 'static {
    /// Atomically append a batch to one stream.
    ///
    /// `expected_sequence` is the last sequence number the writer has
    /// observed for the stream (0 for a new stream). The backend assigns
    /// `expected_sequence + 1 ..` to the batch, or fails with
    /// [`PersistenceError::Conflict`] if the stream has moved on.
    ///
    /// Returns the committed records in batch order.
    async fn commit(
        &self,
        stream: &StreamKey,
        expected_sequence: u64,
        events: Vec<SerializedEvent>,
    ) -> Result<Vec<CommittedEvent>, PersistenceError>;

    /// Load a contiguous range of one stream.
    ///
    /// `from` is the inclusive first sequence number; `to`, when given,
    /// is the inclusive last. Out-of-range bounds yield fewer (possibly
    /// zero) events rather than an error.
    async fn load_range(
        &self,
        stream: &StreamKey,
        from: u64,
        to: Option<u64>,
    ) -> Result<Vec<CommittedEvent>, PersistenceError>;

    /// Load one page of the store-wide log, strictly after `from`.
    ///
    /// Returns at most `page_size` events in global order plus the cursor
    /// for the next page. An empty page returns `from` unchanged.
    async fn load_all_page(
        &self,
        from: GlobalPosition,
        page_size: usize,
    ) -> Result<(Vec<CommittedEvent>, GlobalPosition), PersistenceError>;

    /// Remove a stream and all of its events. Deleting a stream that does
    /// not exist is a no-op.
    async fn delete_stream(&self, stream: &StreamKey) -> Result<(), PersistenceError>;

    /// Whether this backend detects and absorbs replayed append batches
    /// (keyed on the `source_id` metadata). The store itself never
    /// deduplicates; callers that need replay safety should check this
    /// flag.
    fn supports_idempotent_replay(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::test_fixtures::Order;
    use crate::aggregate::Id;

    #[test]
    fn stream_key_for_aggregate_uses_type_namespace() {
        let id: Id<Order> = Id::new("o-9");
        let key = StreamKey::for_aggregate::<Order>(&id);
        assert_eq!(key.aggregate_type, "order");
        assert_eq!(key.instance_id, "o-9");
        assert_eq!(key.to_string(), "order/o-9");
    }

    #[test]
    fn conflict_error_reports_both_sequences() {
        let err = PersistenceError::Conflict { expected: 4, actual: 7 };
        let msg = err.to_string();
        assert!(msg.contains('4'));
        assert!(msg.contains('7'));
    }
}

//! The error taxonomy surfaced by store and loader operations.

use thiserror::Error;

use crate::persistence::PersistenceError;
use crate::serializer::CodecError;
use crate::snapshot::SnapshotError;
use crate::upgrade::UpgradeError;

/// Errors returned by [`EventStore`](crate::event_store::EventStore) and
/// [`AggregateLoader`](crate::loader::AggregateLoader) operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A required argument was missing or empty. Raised before any
    /// backend call.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// A load range was malformed. Raised before any backend call.
    #[error("invalid range: {0}")]
    Range(String),

    /// Another writer advanced the stream between read and append. The
    /// batch was not written; reload and retry.
    #[error(
        "concurrency conflict on {aggregate_type}/{instance_id}: \
         expected next sequence {expected}, stream is at {actual}"
    )]
    Conflict {
        /// Aggregate type of the contested stream.
        aggregate_type: &'static str,
        /// Instance id of the contested stream.
        instance_id: String,
        /// Sequence the writer expected to claim next.
        expected: u64,
        /// Sequence the stream would actually assign next.
        actual: u64,
    },

    /// An event could not be (de)serialized. Fatal to the operation.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// A stored payload could not be upgraded to its latest schema
    /// version. Fatal to the load.
    #[error(transparent)]
    Upgrade(#[from] UpgradeError),

    /// The persistence backend failed.
    #[error("backend failure: {0}")]
    Backend(#[source] PersistenceError),

    /// The snapshot store failed.
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

impl StoreError {
    /// Whether this error is an optimistic concurrency conflict, the one
    /// case a caller is expected to handle by reloading and retrying.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

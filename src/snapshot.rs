//! Snapshot persistence for aggregate state.
//!
//! A snapshot is an optimization only: it records the folded state at a
//! known sequence number so hydration can resume from `sequence + 1`
//! instead of replaying the full history. A missing or unreadable
//! snapshot is always a cache miss, never an error.

use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

use crate::aggregate::{AggregateId, AggregateRoot};

/// A point-in-time capture of an aggregate's state.
///
/// `sequence` is the sequence number of the last event folded into
/// `state`; catch-up resumes from `sequence + 1`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(serialize = "A: Serialize", deserialize = "A: DeserializeOwned"))]
pub struct Snapshot<A> {
    /// The aggregate state at the time of the snapshot.
    pub state: A,
    /// Sequence number of the last event applied to `state`.
    pub sequence: u64,
}

/// Errors surfaced by a snapshot store.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// The store's underlying storage failed.
    #[error("snapshot I/O failure: {0}")]
    Io(#[from] io::Error),

    /// Snapshot state could not be (de)serialized.
    #[error("snapshot codec failure: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Persistence for aggregate snapshots.
///
/// # Contract
///
/// - A snapshot that cannot be read back (missing, corrupt, stale shape)
///   is reported as `Ok(None)`, not an error; the loader then replays
///   the full history. Errors are reserved for storage failures.
/// - `save` replaces any previous snapshot for the same aggregate.
#[async_trait]
pub trait SnapshotStore: Send + Sync + 'static {
    /// Load the most recent snapshot for an aggregate, if one exists and
    /// is readable.
    async fn load_latest<A: AggregateRoot>(
        &self,
        id: &A::Id,
    ) -> Result<Option<Snapshot<A>>, SnapshotError>;

    /// Persist a snapshot, replacing any previous one for the aggregate.
    async fn save<A: AggregateRoot>(
        &self,
        id: &A::Id,
        snapshot: &Snapshot<A>,
    ) -> Result<(), SnapshotError>;
}

/// File-based snapshot store.
///
/// Snapshots live at
/// `<base_dir>/snapshots/<aggregate_type>/<instance_id>/snapshot.json`.
/// Writes go through a temp-rename so readers never observe a
/// partially written file.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    base_dir: PathBuf,
}

impl FileSnapshotStore {
    /// Create a store rooted at `base_dir`. Directories are created on
    /// first save.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn snapshot_dir(&self, aggregate_type: &str, instance_id: &str) -> PathBuf {
        self.base_dir
            .join("snapshots")
            .join(aggregate_type)
            .join(instance_id)
    }

    fn snapshot_path(&self, aggregate_type: &str, instance_id: &str) -> PathBuf {
        self.snapshot_dir(aggregate_type, instance_id)
            .join("snapshot.json")
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn load_latest<A: AggregateRoot>(
        &self,
        id: &A::Id,
    ) -> Result<Option<Snapshot<A>>, SnapshotError> {
        let path = self.snapshot_path(A::AGGREGATE_TYPE, id.as_str());
        let bytes = match std::fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(SnapshotError::Io(e)),
        };

        match serde_json::from_slice::<Snapshot<A>>(&bytes) {
            Ok(snap) => Ok(Some(snap)),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to deserialize snapshot; treating as cache miss"
                );
                Ok(None)
            }
        }
    }

    async fn save<A: AggregateRoot>(
        &self,
        id: &A::Id,
        snapshot: &Snapshot<A>,
    ) -> Result<(), SnapshotError> {
        let dir = self.snapshot_dir(A::AGGREGATE_TYPE, id.as_str());
        std::fs::create_dir_all(&dir)?;

        let path = dir.join("snapshot.json");
        let tmp_path = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(snapshot)?;
        std::fs::write(&tmp_path, &json)?;
        std::fs::rename(&tmp_path, &path)?;
        Ok(())
    }
}

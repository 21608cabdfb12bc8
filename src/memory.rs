//! In-memory reference backends for tests and local development.
//!
//! [`InMemoryPersistence`] implements the full
//! [`EventPersistence`](crate::persistence::EventPersistence) contract
//! with per-call operation counters so tests can assert exactly which
//! backend calls an operation performed. [`InMemorySnapshots`] does the
//! same for [`SnapshotStore`](crate::snapshot::SnapshotStore).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::aggregate::{AggregateId, AggregateRoot};
use crate::event::{CommittedEvent, GlobalPosition, SerializedEvent};
use crate::persistence::{EventPersistence, PersistenceError, StreamKey};
use crate::snapshot::{Snapshot, SnapshotError, SnapshotStore};

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Counts of backend calls made against an [`InMemoryPersistence`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackendCalls {
    /// Number of `commit` calls (including ones that conflicted).
    pub commits: u64,
    /// Number of `load_range` calls.
    pub loads: u64,
    /// Number of `load_all_page` calls.
    pub pages: u64,
    /// Number of `delete_stream` calls.
    pub deletes: u64,
}

#[derive(Default)]
struct Counters {
    commits: AtomicU64,
    loads: AtomicU64,
    pages: AtomicU64,
    deletes: AtomicU64,
}

#[derive(Default)]
struct LogState {
    streams: HashMap<StreamKey, Vec<CommittedEvent>>,
    log: Vec<CommittedEvent>,
    next_position: u64,
}

/// An in-memory event log. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct InMemoryPersistence {
    state: Arc<RwLock<LogState>>,
    counters: Arc<Counters>,
}

impl InMemoryPersistence {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the operation counters.
    pub fn calls(&self) -> BackendCalls {
        BackendCalls {
            commits: self.counters.commits.load(Ordering::Relaxed),
            loads: self.counters.loads.load(Ordering::Relaxed),
            pages: self.counters.pages.load(Ordering::Relaxed),
            deletes: self.counters.deletes.load(Ordering::Relaxed),
        }
    }

    /// Total number of events across all streams.
    pub async fn total_events(&self) -> usize {
        self.state.read().await.log.len()
    }
}

impl std::fmt::Debug for InMemoryPersistence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryPersistence")
            .field("calls", &self.calls())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl EventPersistence for InMemoryPersistence {
    async fn commit(
        &self,
        stream: &StreamKey,
        expected_sequence: u64,
        events: Vec<SerializedEvent>,
    ) -> Result<Vec<CommittedEvent>, PersistenceError> {
        self.counters.commits.fetch_add(1, Ordering::Relaxed);

        let mut state = self.state.write().await;
        let current = state
            .streams
            .get(stream)
            .map(|s| s.len() as u64)
            .unwrap_or(0);
        if expected_sequence != current {
            return Err(PersistenceError::Conflict {
                expected: expected_sequence + 1,
                actual: current + 1,
            });
        }

        let recorded_at = now_millis();
        let mut committed = Vec::with_capacity(events.len());
        for (offset, event) in events.into_iter().enumerate() {
            state.next_position += 1;
            committed.push(CommittedEvent {
                event_id: event.event_id,
                aggregate_type: stream.aggregate_type.clone(),
                instance_id: stream.instance_id.clone(),
                sequence: expected_sequence + 1 + offset as u64,
                global_position: GlobalPosition::from(state.next_position),
                event_type: event.event_type,
                version: event.version,
                payload: event.payload,
                metadata: event.metadata,
                recorded_at,
            });
        }

        state.log.extend(committed.iter().cloned());
        state
            .streams
            .entry(stream.clone())
            .or_default()
            .extend(committed.iter().cloned());

        Ok(committed)
    }

    async fn load_range(
        &self,
        stream: &StreamKey,
        from: u64,
        to: Option<u64>,
    ) -> Result<Vec<CommittedEvent>, PersistenceError> {
        self.counters.loads.fetch_add(1, Ordering::Relaxed);

        let state = self.state.read().await;
        let Some(events) = state.streams.get(stream) else {
            return Ok(Vec::new());
        };
        Ok(events
            .iter()
            .filter(|e| e.sequence >= from && to.map_or(true, |t| e.sequence <= t))
            .cloned()
            .collect())
    }

    async fn load_all_page(
        &self,
        from: GlobalPosition,
        page_size: usize,
    ) -> Result<(Vec<CommittedEvent>, GlobalPosition), PersistenceError> {
        self.counters.pages.fetch_add(1, Ordering::Relaxed);

        let state = self.state.read().await;
        let page: Vec<CommittedEvent> = state
            .log
            .iter()
            .filter(|e| e.global_position > from)
            .take(page_size)
            .cloned()
            .collect();
        let next = page.last().map(|e| e.global_position).unwrap_or(from);
        Ok((page, next))
    }

    async fn delete_stream(&self, stream: &StreamKey) -> Result<(), PersistenceError> {
        self.counters.deletes.fetch_add(1, Ordering::Relaxed);

        let mut state = self.state.write().await;
        if state.streams.remove(stream).is_some() {
            // Global positions keep their gaps; the cursor is opaque.
            state.log.retain(|e| {
                !(e.aggregate_type == stream.aggregate_type
                    && e.instance_id == stream.instance_id)
            });
        }
        Ok(())
    }
}

/// An in-memory snapshot store. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct InMemorySnapshots {
    entries: Arc<RwLock<HashMap<(String, String), (u64, serde_json::Value)>>>,
    saves: Arc<AtomicU64>,
    loads: Arc<AtomicU64>,
}

impl InMemorySnapshots {
    /// Create an empty snapshot store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `save` calls so far.
    pub fn saves(&self) -> u64 {
        self.saves.load(Ordering::Relaxed)
    }

    /// Number of `load_latest` calls so far.
    pub fn loads(&self) -> u64 {
        self.loads.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for InMemorySnapshots {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemorySnapshots")
            .field("saves", &self.saves())
            .field("loads", &self.loads())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshots {
    async fn load_latest<A: AggregateRoot>(
        &self,
        id: &A::Id,
    ) -> Result<Option<Snapshot<A>>, SnapshotError> {
        self.loads.fetch_add(1, Ordering::Relaxed);

        let entries = self.entries.read().await;
        let key = (A::AGGREGATE_TYPE.to_string(), id.as_str().to_string());
        match entries.get(&key) {
            Some((sequence, state)) => {
                let state: A = serde_json::from_value(state.clone())?;
                Ok(Some(Snapshot {
                    state,
                    sequence: *sequence,
                }))
            }
            None => Ok(None),
        }
    }

    async fn save<A: AggregateRoot>(
        &self,
        id: &A::Id,
        snapshot: &Snapshot<A>,
    ) -> Result<(), SnapshotError> {
        self.saves.fetch_add(1, Ordering::Relaxed);

        let state = serde_json::to_value(&snapshot.state)?;
        let mut entries = self.entries.write().await;
        entries.insert(
            (A::AGGREGATE_TYPE.to_string(), id.as_str().to_string()),
            (snapshot.sequence, state),
        );
        Ok(())
    }
}

/// Helper for tests: build a serialized event record directly.
#[cfg(test)]
pub(crate) fn serialized(event_type: &str, payload: serde_json::Value) -> SerializedEvent {
    SerializedEvent {
        event_id: uuid::Uuid::new_v4(),
        event_type: event_type.to_string(),
        version: 1,
        payload,
        metadata: crate::metadata::Metadata::new(),
    }
}

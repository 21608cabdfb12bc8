//! Rehydrating aggregates from snapshots and event history.

use std::ops::Deref;
use std::sync::Arc;

use crate::aggregate::{AggregateFactory, AggregateRoot, DefaultFactory};
use crate::error::StoreError;
use crate::event::DomainEvent;
use crate::event_store::EventStore;
use crate::persistence::EventPersistence;
use crate::serializer::{EventSerializer, JsonEventSerializer};
use crate::snapshot::{Snapshot, SnapshotStore};

/// An aggregate together with the sequence number of the last event
/// folded into it.
///
/// The wrapper is what command handlers work with: read state through
/// `Deref`, hand [`sequence`](HydratedAggregate::sequence) to
/// [`EventStore::store`] as the expected sequence, and fold the returned
/// events back in with [`apply_committed`](HydratedAggregate::apply_committed).
#[derive(Debug, Clone)]
pub struct HydratedAggregate<A: AggregateRoot> {
    id: A::Id,
    sequence: u64,
    state: A,
}

impl<A: AggregateRoot> HydratedAggregate<A> {
    /// Wrap a freshly created aggregate at sequence 0.
    pub fn new(id: A::Id, state: A) -> Self {
        Self {
            id,
            sequence: 0,
            state,
        }
    }

    /// The aggregate's identity.
    pub fn id(&self) -> &A::Id {
        &self.id
    }

    /// Sequence number of the last event applied; 0 for a new aggregate.
    /// This is the expected sequence for the next append.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// The current state.
    pub fn state(&self) -> &A {
        &self.state
    }

    /// Unwrap into the bare state.
    pub fn into_state(self) -> A {
        self.state
    }

    /// Capture the current state as a snapshot.
    pub fn snapshot(&self) -> Snapshot<A> {
        Snapshot {
            state: self.state.clone(),
            sequence: self.sequence,
        }
    }

    /// Fold freshly committed events into the state, advancing the
    /// sequence. Events must be this aggregate's and contiguous with its
    /// history.
    pub fn apply_committed(&mut self, events: &[DomainEvent<A>]) {
        for event in events {
            self.state = std::mem::take(&mut self.state).apply(&event.payload);
            self.sequence = event.sequence;
        }
    }
}

impl<A: AggregateRoot> Deref for HydratedAggregate<A> {
    type Target = A;

    fn deref(&self) -> &Self::Target {
        &self.state
    }
}

/// Loads aggregates by replaying their history, starting from the latest
/// readable snapshot when one exists.
///
/// `Clone` is cheap; the store and snapshot store are shared.
pub struct AggregateLoader<P, SS, S = JsonEventSerializer, F = DefaultFactory> {
    events: EventStore<P, S>,
    snapshots: Arc<SS>,
    factory: F,
}

impl<P, SS, S, F: Clone> Clone for AggregateLoader<P, SS, S, F> {
    fn clone(&self) -> Self {
        Self {
            events: self.events.clone(),
            snapshots: Arc::clone(&self.snapshots),
            factory: self.factory.clone(),
        }
    }
}

impl<P, SS, S, F> std::fmt::Debug for AggregateLoader<P, SS, S, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregateLoader").finish_non_exhaustive()
    }
}

impl<P, SS> AggregateLoader<P, SS>
where
    P: EventPersistence,
    SS: SnapshotStore,
{
    /// Create a loader with the default aggregate factory.
    pub fn new(events: EventStore<P>, snapshots: SS) -> Self {
        Self {
            events,
            snapshots: Arc::new(snapshots),
            factory: DefaultFactory,
        }
    }
}

impl<P, SS, S, F> AggregateLoader<P, SS, S, F>
where
    P: EventPersistence,
    SS: SnapshotStore,
    S: EventSerializer,
{
    /// Create a loader with a custom serializer and factory.
    pub fn with_factory(events: EventStore<P, S>, snapshots: SS, factory: F) -> Self {
        Self {
            events,
            snapshots: Arc::new(snapshots),
            factory,
        }
    }

    /// The event store this loader reads from.
    pub fn events(&self) -> &EventStore<P, S> {
        &self.events
    }

    /// The snapshot store this loader reads snapshots from.
    pub fn snapshots(&self) -> &SS {
        &self.snapshots
    }

    /// Rehydrate one aggregate.
    ///
    /// Starts from the latest readable snapshot (an unreadable one is a
    /// cache miss) and folds in every event committed after it. An
    /// aggregate with no snapshot and no events is a valid, fresh
    /// instance at sequence 0.
    ///
    /// # Errors
    ///
    /// Propagates load, upgrade, and deserialization failures; a failed
    /// hydration never yields a partially applied aggregate.
    pub async fn load<A>(&self, id: &A::Id) -> Result<HydratedAggregate<A>, StoreError>
    where
        A: AggregateRoot,
        F: AggregateFactory<A>,
    {
        let snapshot = self.snapshots.load_latest::<A>(id).await?;
        let mut aggregate = match snapshot {
            Some(snap) => {
                tracing::debug!(
                    aggregate_type = A::AGGREGATE_TYPE,
                    instance_id = %id,
                    sequence = snap.sequence,
                    "hydrating from snapshot"
                );
                HydratedAggregate {
                    id: id.clone(),
                    sequence: snap.sequence,
                    state: snap.state,
                }
            }
            None => HydratedAggregate::new(id.clone(), self.factory.create_new(id)),
        };

        let events = self
            .events
            .load_events_from::<A>(id, aggregate.sequence + 1)
            .await?;
        aggregate.apply_committed(&events);
        Ok(aggregate)
    }

    /// Persist the aggregate's current state as its snapshot.
    pub async fn save_snapshot<A>(&self, aggregate: &HydratedAggregate<A>) -> Result<(), StoreError>
    where
        A: AggregateRoot,
    {
        self.snapshots
            .save(aggregate.id(), &aggregate.snapshot())
            .await?;
        Ok(())
    }
}

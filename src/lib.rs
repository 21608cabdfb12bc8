//! Event-sourcing persistence core: an ordered event log with optimistic
//! concurrency, snapshot-accelerated aggregate hydration, schema upgrades
//! applied on read, and a routing registry for sagas.

mod aggregate;
pub use aggregate::{AggregateFactory, AggregateId, AggregateRoot, DefaultFactory, Id};
mod event;
pub use event::{
    AggregateEvent, AllEventsPage, CommittedEvent, DomainEvent, GlobalPosition, SerializedEvent,
    SourceId, UncommittedEvent,
};
mod error;
mod event_store;
mod loader;
mod memory;
mod metadata;
mod persistence;
mod saga;
mod serializer;
mod snapshot;
mod upgrade;

pub use error::StoreError;
pub use event_store::{EventStore, EventStoreBuilder};
pub use loader::{AggregateLoader, HydratedAggregate};
pub use memory::{BackendCalls, InMemoryPersistence, InMemorySnapshots};
pub use metadata::{keys, Metadata, MetadataProvider, StaticMetadataProvider};
pub use persistence::{EventPersistence, PersistenceError, StreamKey};
pub use saga::{EventSubscription, Saga, SagaDetails, SagaMatches, SagaRegistry};
pub use serializer::{CodecError, EventSerializer, JsonEventSerializer};
pub use snapshot::{FileSnapshotStore, Snapshot, SnapshotError, SnapshotStore};
pub use upgrade::{EventUpgrader, UpgradeContext, UpgradeError, UpgradePipeline};

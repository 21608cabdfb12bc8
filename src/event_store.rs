//! The event store: validated, metadata-enriched appends and
//! upgrade-aware reads over a pluggable persistence backend.
//!
//! [`EventStore`] owns no storage itself. It validates arguments,
//! enriches and serializes events, delegates atomic commits and ordered
//! reads to an [`EventPersistence`] backend, and runs every read through
//! the [`UpgradePipeline`] so callers only ever see payloads at their
//! latest schema version.

use std::sync::Arc;

use uuid::Uuid;

use crate::aggregate::{AggregateId, AggregateRoot};
use crate::error::StoreError;
use crate::event::{
    AllEventsPage, CommittedEvent, DomainEvent, GlobalPosition, SourceId, UncommittedEvent,
};
use crate::metadata::{keys, Metadata, MetadataProvider};
use crate::persistence::{EventPersistence, PersistenceError, StreamKey};
use crate::serializer::{EventSerializer, JsonEventSerializer};
use crate::upgrade::{UpgradeContext, UpgradePipeline};

/// Orchestrates appends and reads against one persistence backend.
///
/// `Clone` is cheap; all internal state is `Arc`-wrapped and clones share
/// the backend, serializer, providers, and upgrade pipeline.
pub struct EventStore<P, S = JsonEventSerializer> {
    backend: Arc<P>,
    serializer: Arc<S>,
    providers: Arc<[Box<dyn MetadataProvider>]>,
    upgrades: Arc<UpgradePipeline>,
}

impl<P, S> Clone for EventStore<P, S> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            serializer: Arc::clone(&self.serializer),
            providers: Arc::clone(&self.providers),
            upgrades: Arc::clone(&self.upgrades),
        }
    }
}

// Manual `Debug` because providers are type-erased.
impl<P, S> std::fmt::Debug for EventStore<P, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStore")
            .field("providers", &self.providers.len())
            .field("upgrades", &self.upgrades)
            .finish_non_exhaustive()
    }
}

impl<P: EventPersistence> EventStore<P> {
    /// Create a store over `backend` with the default JSON serializer, no
    /// metadata providers, and no upgraders.
    pub fn new(backend: P) -> Self {
        Self::builder(backend).build()
    }

    /// Start configuring a store over `backend`.
    pub fn builder(backend: P) -> EventStoreBuilder<P, JsonEventSerializer> {
        EventStoreBuilder {
            backend: Arc::new(backend),
            serializer: JsonEventSerializer,
            providers: Vec::new(),
            upgrades: UpgradePipeline::new(),
        }
    }
}

impl<P: EventPersistence, S: EventSerializer> EventStore<P, S> {
    /// Atomically append a batch of events to one aggregate's stream.
    ///
    /// Each event's metadata is the union of three layers, last writer
    /// wins: registered provider output (in registration order), then the
    /// event's own metadata, then the store entries `batch_id` (one fresh
    /// UUID shared by the whole call) and `source_id`.
    ///
    /// `expected_sequence` is the last sequence number the caller has
    /// observed for this aggregate (0 for a new one); a mismatch means
    /// another writer got there first and nothing is written.
    ///
    /// An empty batch is a no-op that performs no backend call.
    ///
    /// # Errors
    ///
    /// - [`StoreError::InvalidArgument`] for an empty instance id or
    ///   source id, raised before any backend call.
    /// - [`StoreError::Conflict`] when the stream has moved past
    ///   `expected_sequence`.
    /// - [`StoreError::Codec`] / [`StoreError::Backend`] for
    ///   serialization and storage failures.
    pub async fn store<A: AggregateRoot>(
        &self,
        id: &A::Id,
        events: Vec<UncommittedEvent<A::Event>>,
        expected_sequence: u64,
        source_id: &SourceId,
    ) -> Result<Vec<DomainEvent<A>>, StoreError> {
        if id.as_str().is_empty() {
            return Err(StoreError::InvalidArgument("instance id must not be empty"));
        }
        if source_id.is_empty() {
            return Err(StoreError::InvalidArgument("source id must not be empty"));
        }
        if events.is_empty() {
            return Ok(Vec::new());
        }

        let batch_id = Uuid::new_v4().to_string();
        let mut records = Vec::with_capacity(events.len());
        for event in &events {
            let mut record = self.serializer.serialize(event, Metadata::new())?;

            let mut metadata = Metadata::new();
            for provider in self.providers.iter() {
                let extra =
                    provider.provide(A::AGGREGATE_TYPE, id.as_str(), &record.payload, &metadata);
                metadata.merge(extra);
            }
            metadata.merge(event.metadata.clone());
            metadata.insert(keys::BATCH_ID, batch_id.clone());
            metadata.insert(keys::SOURCE_ID, source_id.as_str());

            record.metadata = metadata;
            records.push(record);
        }

        let stream = StreamKey::for_aggregate::<A>(id);
        let committed = self
            .backend
            .commit(&stream, expected_sequence, records)
            .await
            .map_err(|e| Self::map_backend::<A>(id, e))?;

        tracing::debug!(
            aggregate_type = A::AGGREGATE_TYPE,
            instance_id = %id,
            batch_id = %batch_id,
            count = committed.len(),
            "committed event batch"
        );

        self.to_domain_events(id, committed)
    }

    /// Load an aggregate's full history in sequence order.
    pub async fn load_events<A: AggregateRoot>(
        &self,
        id: &A::Id,
    ) -> Result<Vec<DomainEvent<A>>, StoreError> {
        self.load_span(id, 1, None).await
    }

    /// Load an aggregate's history from `from` (inclusive, 1-based)
    /// onwards.
    ///
    /// # Errors
    ///
    /// [`StoreError::Range`] if `from` is 0, raised before any backend
    /// call.
    pub async fn load_events_from<A: AggregateRoot>(
        &self,
        id: &A::Id,
        from: u64,
    ) -> Result<Vec<DomainEvent<A>>, StoreError> {
        self.load_span(id, from, None).await
    }

    /// Load the inclusive slice `from..=to` of an aggregate's history.
    ///
    /// # Errors
    ///
    /// [`StoreError::Range`] if `from` is 0 or `to <= from`, raised
    /// before any backend call.
    pub async fn load_events_range<A: AggregateRoot>(
        &self,
        id: &A::Id,
        from: u64,
        to: u64,
    ) -> Result<Vec<DomainEvent<A>>, StoreError> {
        self.load_span(id, from, Some(to)).await
    }

    async fn load_span<A: AggregateRoot>(
        &self,
        id: &A::Id,
        from: u64,
        to: Option<u64>,
    ) -> Result<Vec<DomainEvent<A>>, StoreError> {
        if id.as_str().is_empty() {
            return Err(StoreError::InvalidArgument("instance id must not be empty"));
        }
        if from == 0 {
            return Err(StoreError::Range(
                "sequence numbers are 1-based; from must be at least 1".to_string(),
            ));
        }
        if let Some(to) = to {
            if to <= from {
                return Err(StoreError::Range(format!(
                    "range end {to} must be greater than range start {from}"
                )));
            }
        }

        let stream = StreamKey::for_aggregate::<A>(id);
        let committed = self
            .backend
            .load_range(&stream, from, to)
            .await
            .map_err(|e| Self::map_backend::<A>(id, e))?;
        if committed.is_empty() {
            return Ok(Vec::new());
        }

        let upgraded = self.upgrades.upgrade_batch(committed, None)?;
        self.to_domain_events(id, upgraded)
    }

    /// Load one page of the store-wide event log, strictly after
    /// `position` in global order.
    ///
    /// Payloads are upgraded to their latest schema version before being
    /// returned; `ctx` is handed to the upgraders. The returned page's
    /// `next` cursor resumes the scan; an empty page leaves it at
    /// `position`.
    ///
    /// # Errors
    ///
    /// [`StoreError::Range`] if `page_size` is 0, raised before any
    /// backend call.
    pub async fn load_all_events(
        &self,
        position: GlobalPosition,
        page_size: usize,
        ctx: Option<&UpgradeContext>,
    ) -> Result<AllEventsPage, StoreError> {
        if page_size == 0 {
            return Err(StoreError::Range("page size must be at least 1".to_string()));
        }

        let (page, next) = self
            .backend
            .load_all_page(position, page_size)
            .await
            .map_err(StoreError::Backend)?;
        let events = self.upgrades.upgrade_batch(page, ctx)?;
        Ok(AllEventsPage { events, next })
    }

    /// Remove an aggregate's stream and all of its events. Deleting an
    /// unknown aggregate is a no-op.
    ///
    /// # Errors
    ///
    /// [`StoreError::InvalidArgument`] for an empty instance id, raised
    /// before any backend call.
    pub async fn delete_aggregate<A: AggregateRoot>(&self, id: &A::Id) -> Result<(), StoreError> {
        if id.as_str().is_empty() {
            return Err(StoreError::InvalidArgument("instance id must not be empty"));
        }

        let stream = StreamKey::for_aggregate::<A>(id);
        self.backend
            .delete_stream(&stream)
            .await
            .map_err(|e| Self::map_backend::<A>(id, e))?;

        tracing::info!(
            aggregate_type = A::AGGREGATE_TYPE,
            instance_id = %id,
            "deleted aggregate stream"
        );
        Ok(())
    }

    fn to_domain_events<A: AggregateRoot>(
        &self,
        id: &A::Id,
        records: Vec<CommittedEvent>,
    ) -> Result<Vec<DomainEvent<A>>, StoreError> {
        records
            .into_iter()
            .map(|record| {
                let payload = self.serializer.deserialize(&record)?;
                Ok(DomainEvent {
                    id: id.clone(),
                    sequence: record.sequence,
                    global_position: record.global_position,
                    payload,
                    metadata: record.metadata,
                })
            })
            .collect()
    }

    fn map_backend<A: AggregateRoot>(id: &A::Id, error: PersistenceError) -> StoreError {
        match error {
            PersistenceError::Conflict { expected, actual } => StoreError::Conflict {
                aggregate_type: A::AGGREGATE_TYPE,
                instance_id: id.as_str().to_string(),
                expected,
                actual,
            },
            other => StoreError::Backend(other),
        }
    }
}

/// Builder for configuring an [`EventStore`].
///
/// Collects the serializer, metadata providers, and upgrade pipeline,
/// then assembles the store with [`build`](EventStoreBuilder::build).
pub struct EventStoreBuilder<P, S> {
    backend: Arc<P>,
    serializer: S,
    providers: Vec<Box<dyn MetadataProvider>>,
    upgrades: UpgradePipeline,
}

impl<P: EventPersistence, S: EventSerializer> EventStoreBuilder<P, S> {
    /// Replace the serializer.
    pub fn serializer<S2: EventSerializer>(self, serializer: S2) -> EventStoreBuilder<P, S2> {
        EventStoreBuilder {
            backend: self.backend,
            serializer,
            providers: self.providers,
            upgrades: self.upgrades,
        }
    }

    /// Register a metadata provider. Providers run in registration order
    /// on every stored event; later providers win key collisions.
    pub fn metadata_provider(mut self, provider: impl MetadataProvider + 'static) -> Self {
        self.providers.push(Box::new(provider));
        self
    }

    /// Set the upgrade pipeline applied to every read.
    pub fn upgrades(mut self, upgrades: UpgradePipeline) -> Self {
        self.upgrades = upgrades;
        self
    }

    /// Assemble the store.
    pub fn build(self) -> EventStore<P, S> {
        EventStore {
            backend: self.backend,
            serializer: Arc::new(self.serializer),
            providers: self.providers.into(),
            upgrades: Arc::new(self.upgrades),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::test_fixtures::{Order, OrderEvent};
    use crate::aggregate::Id;
    use crate::memory::InMemoryPersistence;
    use crate::metadata::StaticMetadataProvider;
    use crate::upgrade::{EventUpgrader, UpgradeError};
    use serde_json::{json, Value};

    fn store() -> (EventStore<InMemoryPersistence>, InMemoryPersistence) {
        let backend = InMemoryPersistence::new();
        (EventStore::new(backend.clone()), backend)
    }

    fn placed(total: u64) -> UncommittedEvent<OrderEvent> {
        UncommittedEvent::new(OrderEvent::Placed { total })
    }

    fn payment(amount: u64) -> UncommittedEvent<OrderEvent> {
        UncommittedEvent::new(OrderEvent::PaymentReceived { amount })
    }

    fn source() -> SourceId {
        SourceId::new("cmd-1")
    }

    #[tokio::test]
    async fn store_then_load_preserves_order_and_numbering() {
        let (store, _) = store();
        let id: Id<Order> = Id::new("o-1");

        let committed = store
            .store::<Order>(&id, vec![placed(100), payment(40), payment(60)], 0, &source())
            .await
            .expect("store should succeed");
        assert_eq!(committed.len(), 3);
        assert_eq!(committed[0].sequence, 1);
        assert_eq!(committed[2].sequence, 3);

        let loaded = store
            .load_events::<Order>(&id)
            .await
            .expect("load should succeed");
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded[0].payload, OrderEvent::Placed { total: 100 });
        assert_eq!(loaded[1].payload, OrderEvent::PaymentReceived { amount: 40 });
        assert_eq!(loaded[2].payload, OrderEvent::PaymentReceived { amount: 60 });
        let sequences: Vec<u64> = loaded.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn empty_batch_is_a_noop_with_no_backend_call() {
        let (store, backend) = store();
        let id: Id<Order> = Id::new("o-1");

        let committed = store
            .store::<Order>(&id, Vec::new(), 0, &source())
            .await
            .expect("empty store should succeed");
        assert!(committed.is_empty());
        assert_eq!(backend.calls().commits, 0);
    }

    #[tokio::test]
    async fn invalid_arguments_fail_before_any_backend_call() {
        let (store, backend) = store();
        let empty_id: Id<Order> = Id::new("");
        let id: Id<Order> = Id::new("o-1");

        let err = store
            .store::<Order>(&empty_id, vec![placed(1)], 0, &source())
            .await
            .expect_err("empty id should be rejected");
        assert!(matches!(err, StoreError::InvalidArgument(_)));

        let err = store
            .store::<Order>(&id, vec![placed(1)], 0, &SourceId::new(""))
            .await
            .expect_err("empty source id should be rejected");
        assert!(matches!(err, StoreError::InvalidArgument(_)));

        assert_eq!(backend.calls().commits, 0);
    }

    #[tokio::test]
    async fn conflicting_write_leaves_no_partial_batch() {
        let (store, _) = store();
        let id: Id<Order> = Id::new("o-1");

        store
            .store::<Order>(&id, vec![placed(100)], 0, &source())
            .await
            .expect("first write should succeed");

        let err = store
            .store::<Order>(&id, vec![payment(10), payment(20)], 0, &source())
            .await
            .expect_err("stale write should conflict");
        assert!(err.is_conflict());
        match err {
            StoreError::Conflict { aggregate_type, instance_id, expected, actual } => {
                assert_eq!(aggregate_type, "order");
                assert_eq!(instance_id, "o-1");
                assert_eq!(expected, 1);
                assert_eq!(actual, 2);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let loaded = store.load_events::<Order>(&id).await.expect("load should succeed");
        assert_eq!(loaded.len(), 1);
    }

    #[tokio::test]
    async fn range_validation_happens_before_io() {
        let (store, backend) = store();
        let id: Id<Order> = Id::new("o-1");

        let err = store
            .load_events_from::<Order>(&id, 0)
            .await
            .expect_err("zero start should be rejected");
        assert!(matches!(err, StoreError::Range(_)));

        let err = store
            .load_events_range::<Order>(&id, 5, 2)
            .await
            .expect_err("inverted range should be rejected");
        assert!(matches!(err, StoreError::Range(_)));

        let err = store
            .load_all_events(GlobalPosition::START, 0, None)
            .await
            .expect_err("zero page size should be rejected");
        assert!(matches!(err, StoreError::Range(_)));

        let calls = backend.calls();
        assert_eq!(calls.loads, 0);
        assert_eq!(calls.pages, 0);
    }

    #[tokio::test]
    async fn range_end_equal_to_start_is_rejected_before_io() {
        let (store, backend) = store();
        let id: Id<Order> = Id::new("o-1");
        store
            .store::<Order>(&id, vec![placed(1), payment(2)], 0, &source())
            .await
            .expect("store should succeed");

        let loads_before = backend.calls().loads;
        let err = store
            .load_events_range::<Order>(&id, 1, 1)
            .await
            .expect_err("equal bounds should be rejected");
        assert!(matches!(err, StoreError::Range(_)));
        assert_eq!(backend.calls().loads, loads_before);
    }

    #[tokio::test]
    async fn range_load_returns_exact_slice() {
        let (store, _) = store();
        let id: Id<Order> = Id::new("o-1");
        store
            .store::<Order>(
                &id,
                vec![placed(1), payment(2), payment(3), payment(4)],
                0,
                &source(),
            )
            .await
            .expect("store should succeed");

        let slice = store
            .load_events_range::<Order>(&id, 2, 3)
            .await
            .expect("range load should succeed");
        let sequences: Vec<u64> = slice.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![2, 3]);
    }

    #[tokio::test]
    async fn load_of_unknown_aggregate_is_empty() {
        let (store, _) = store();
        let id: Id<Order> = Id::new("ghost");
        let loaded = store.load_events::<Order>(&id).await.expect("load should succeed");
        assert!(loaded.is_empty());
    }

    #[tokio::test]
    async fn metadata_union_is_layered_last_writer_wins() {
        let backend = InMemoryPersistence::new();
        let store = EventStore::builder(backend)
            .metadata_provider(StaticMetadataProvider::new(
                Metadata::new().with("env", "test").with("shared", "provider"),
            ))
            .build();
        let id: Id<Order> = Id::new("o-1");

        let event = placed(5).with_metadata(
            Metadata::new()
                .with("shared", "event")
                .with("source_id", "spoofed"),
        );
        let committed = store
            .store::<Order>(&id, vec![event, payment(1)], 0, &source())
            .await
            .expect("store should succeed");

        let meta = &committed[0].metadata;
        assert_eq!(meta.get("env"), Some("test"));
        assert_eq!(meta.get("shared"), Some("event"));
        // Store-level entries win over everything.
        assert_eq!(meta.get(keys::SOURCE_ID), Some("cmd-1"));
        let batch = meta.get(keys::BATCH_ID).expect("batch id should be set");
        assert_eq!(committed[1].metadata.get(keys::BATCH_ID), Some(batch));
    }

    #[tokio::test]
    async fn load_all_pages_walk_the_global_log() {
        let (store, _) = store();
        let a: Id<Order> = Id::new("o-a");
        let b: Id<Order> = Id::new("o-b");

        store
            .store::<Order>(&a, vec![placed(1)], 0, &source())
            .await
            .expect("store should succeed");
        store
            .store::<Order>(&b, vec![placed(2)], 0, &source())
            .await
            .expect("store should succeed");
        store
            .store::<Order>(&a, vec![payment(3)], 1, &source())
            .await
            .expect("store should succeed");

        let first = store
            .load_all_events(GlobalPosition::START, 2, None)
            .await
            .expect("page should succeed");
        assert_eq!(first.events.len(), 2);

        let second = store
            .load_all_events(first.next, 2, None)
            .await
            .expect("page should succeed");
        assert_eq!(second.events.len(), 1);
        assert_eq!(second.events[0].instance_id, "o-a");
        assert_eq!(second.events[0].event_type, "PaymentReceived");

        let tail = store
            .load_all_events(second.next, 2, None)
            .await
            .expect("page should succeed");
        assert!(tail.events.is_empty());
        assert_eq!(tail.next, second.next);
    }

    #[tokio::test]
    async fn delete_then_load_is_empty_everywhere() {
        let (store, _) = store();
        let id: Id<Order> = Id::new("o-1");
        let other: Id<Order> = Id::new("o-2");

        store
            .store::<Order>(&id, vec![placed(1)], 0, &source())
            .await
            .expect("store should succeed");
        store
            .store::<Order>(&other, vec![placed(2)], 0, &source())
            .await
            .expect("store should succeed");

        store
            .delete_aggregate::<Order>(&id)
            .await
            .expect("delete should succeed");

        let loaded = store.load_events::<Order>(&id).await.expect("load should succeed");
        assert!(loaded.is_empty());

        let page = store
            .load_all_events(GlobalPosition::START, 10, None)
            .await
            .expect("page should succeed");
        assert_eq!(page.events.len(), 1);
        assert_eq!(page.events[0].instance_id, "o-2");
    }

    struct DoublePlacedTotal;

    impl EventUpgrader for DoublePlacedTotal {
        fn event_type(&self) -> &'static str {
            "Placed"
        }

        fn from_version(&self) -> u32 {
            1
        }

        fn upgrade(
            &self,
            mut payload: Value,
            _ctx: Option<&UpgradeContext>,
        ) -> Result<Value, UpgradeError> {
            let total = payload["total"].as_u64().unwrap_or(0);
            payload["total"] = json!(total * 2);
            Ok(payload)
        }
    }

    #[tokio::test]
    async fn reads_pass_through_the_upgrade_pipeline() {
        let backend = InMemoryPersistence::new();
        let store = EventStore::builder(backend)
            .upgrades(
                UpgradePipeline::new()
                    .with(Box::new(DoublePlacedTotal))
                    .expect("register should succeed"),
            )
            .build();
        let id: Id<Order> = Id::new("o-1");

        let committed = store
            .store::<Order>(&id, vec![placed(21)], 0, &source())
            .await
            .expect("store should succeed");
        // The write path returns events exactly as written.
        assert_eq!(committed[0].payload, OrderEvent::Placed { total: 21 });

        let loaded = store.load_events::<Order>(&id).await.expect("load should succeed");
        assert_eq!(loaded[0].payload, OrderEvent::Placed { total: 42 });

        let page = store
            .load_all_events(GlobalPosition::START, 10, None)
            .await
            .expect("page should succeed");
        assert_eq!(page.events[0].payload["total"], 42);
        assert_eq!(page.events[0].version, 2);
    }
}

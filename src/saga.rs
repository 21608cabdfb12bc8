//! Saga definitions and the registry that routes committed events to
//! them.
//!
//! A saga declares up front, as a static table, which aggregate
//! type/event type pairs it reacts to. The registry indexes those tables
//! once at registration and answers lookups lock-cheaply afterwards; the
//! expected shape is register-at-startup, look-up-per-event.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use crate::event::CommittedEvent;

/// One aggregate type/event type pair a saga subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventSubscription {
    /// Aggregate type whose events are of interest.
    pub aggregate_type: &'static str,
    /// Event type within that aggregate.
    pub event_type: &'static str,
}

impl EventSubscription {
    /// Build a subscription pair.
    pub const fn new(aggregate_type: &'static str, event_type: &'static str) -> Self {
        Self {
            aggregate_type,
            event_type,
        }
    }
}

/// A long-running process driven by committed events.
///
/// Only the routing declaration lives here; executing the saga's
/// reactions is the caller's concern. The subscription table must be
/// static: the registry reads it exactly once, at registration.
pub trait Saga: 'static {
    /// Unique saga name. Registering two sagas with the same name is a
    /// logged no-op for the second.
    const NAME: &'static str;

    /// The aggregate/event pairs this saga reacts to.
    fn subscriptions() -> &'static [EventSubscription];
}

/// The registry's record of one saga.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SagaDetails {
    name: &'static str,
    subscriptions: &'static [EventSubscription],
}

impl SagaDetails {
    /// The saga's unique name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The saga's full subscription table.
    pub fn subscriptions(&self) -> &'static [EventSubscription] {
        self.subscriptions
    }

    /// Whether the saga subscribes to the given pair.
    pub fn handles(&self, aggregate_type: &str, event_type: &str) -> bool {
        self.subscriptions
            .iter()
            .any(|s| s.aggregate_type == aggregate_type && s.event_type == event_type)
    }
}

/// Sagas interested in one aggregate/event pair, in registration order.
/// Cheap to clone and to return for misses.
pub type SagaMatches = Arc<[Arc<SagaDetails>]>;

fn no_matches() -> SagaMatches {
    static EMPTY: OnceLock<SagaMatches> = OnceLock::new();
    Arc::clone(EMPTY.get_or_init(|| Arc::from(Vec::new())))
}

#[derive(Default)]
struct Index {
    known: HashMap<&'static str, Arc<SagaDetails>>,
    // aggregate_type -> event_type -> interested sagas. Values are the
    // shared slices handed out by lookups; registration rebuilds them.
    by_event: HashMap<&'static str, HashMap<&'static str, SagaMatches>>,
}

/// Routes committed events to the sagas that subscribe to them.
///
/// Registration rebuilds the index under a write lock; lookups take a
/// read lock and return shared slices, so the hot path never allocates.
#[derive(Default)]
pub struct SagaRegistry {
    index: RwLock<Index>,
}

impl std::fmt::Debug for SagaRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let index = self.index.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("SagaRegistry")
            .field("sagas", &index.known.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl SagaRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a saga, indexing its subscription table.
    ///
    /// Registering the same saga name twice logs a warning and leaves the
    /// first registration untouched; it never errors and never produces
    /// duplicate routing entries.
    pub fn register<S: Saga>(&self) {
        let details = Arc::new(SagaDetails {
            name: S::NAME,
            subscriptions: S::subscriptions(),
        });

        let mut index = self.index.write().unwrap_or_else(PoisonError::into_inner);
        if index.known.contains_key(S::NAME) {
            tracing::warn!(saga = S::NAME, "saga already registered; ignoring");
            return;
        }
        index.known.insert(S::NAME, Arc::clone(&details));
        for sub in details.subscriptions() {
            let slot = index
                .by_event
                .entry(sub.aggregate_type)
                .or_default()
                .entry(sub.event_type)
                .or_insert_with(no_matches);
            let mut rebuilt: Vec<Arc<SagaDetails>> = slot.iter().cloned().collect();
            rebuilt.push(Arc::clone(&details));
            *slot = rebuilt.into();
        }

        tracing::debug!(
            saga = S::NAME,
            subscriptions = details.subscriptions().len(),
            "registered saga"
        );
    }

    /// Every registered saga's details, by name.
    pub fn all(&self) -> Vec<Arc<SagaDetails>> {
        let index = self.index.read().unwrap_or_else(PoisonError::into_inner);
        index.known.values().cloned().collect()
    }

    /// Look up one saga's details by name.
    pub fn get(&self, name: &str) -> Option<Arc<SagaDetails>> {
        let index = self.index.read().unwrap_or_else(PoisonError::into_inner);
        index.known.get(name).cloned()
    }

    /// The sagas subscribed to the given aggregate/event pair, in
    /// registration order. An unknown pair yields a shared empty slice.
    pub fn details_for(&self, aggregate_type: &str, event_type: &str) -> SagaMatches {
        let index = self.index.read().unwrap_or_else(PoisonError::into_inner);
        match index
            .by_event
            .get(aggregate_type)
            .and_then(|by_type| by_type.get(event_type))
        {
            Some(matches) => Arc::clone(matches),
            None => no_matches(),
        }
    }

    /// The sagas to route one committed event to.
    pub fn sagas_for_event(&self, event: &CommittedEvent) -> SagaMatches {
        self.details_for(&event.aggregate_type, &event.event_type)
    }
}

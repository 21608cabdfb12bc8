//! Aggregate root trait, type-tagged identities, and the factory seam.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::event::AggregateEvent;

/// The unique key naming one aggregate instance within its aggregate
/// type's namespace.
///
/// Implementations must be immutable value types. The string form is
/// what the persistence backend keys streams by; it must never be reused
/// for a different logical entity.
pub trait AggregateId:
    Clone + fmt::Debug + fmt::Display + Eq + Hash + Send + Sync + 'static
{
    /// The raw identifier string.
    fn as_str(&self) -> &str;
}

/// An opaque identity tagged with the aggregate type it names.
///
/// The phantom tag makes `Id<Order>` and `Id<Customer>` distinct types,
/// so an identity can never be passed to an operation for the wrong
/// aggregate. The tag carries no runtime cost or bound on `T`.
pub struct Id<T> {
    value: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Id<T> {
    /// Wrap an identifier string.
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            _marker: PhantomData,
        }
    }

    /// Generate a fresh random (v4) identity.
    pub fn random() -> Self {
        Self::new(Uuid::new_v4().to_string())
    }
}

// Manual impls: deriving would put unnecessary bounds on `T`.
impl<T> Clone for Id<T> {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Id").field(&self.value).finish()
    }
}

impl<T> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

impl<T> PartialEq for Id<T> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl<T> Eq for Id<T> {}

impl<T> Hash for Id<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value.hash(state);
    }
}

impl<T> Serialize for Id<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.value)
    }
}

impl<'de, T> Deserialize<'de> for Id<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::new)
    }
}

impl<T: 'static> AggregateId for Id<T> {
    fn as_str(&self) -> &str {
        &self.value
    }
}

/// A domain aggregate whose state is derived from its event history.
///
/// The implementing type itself serves as the aggregate's state; it is
/// also the snapshot shape, which is why `Serialize`/`DeserializeOwned`
/// are required. State is built by folding domain events through
/// [`apply`](AggregateRoot::apply).
///
/// # Associated Types
///
/// - `Id`: the identity type paired with this aggregate. Every store and
///   loader operation taking an identity is constrained to the matching
///   aggregate type through this association.
/// - `Event`: the set of events this aggregate produces and applies.
///
/// # Contract
///
/// - [`apply`](AggregateRoot::apply) must be a pure, total function. It
///   takes ownership of the current state and a reference to a domain
///   event, returning the next state.
pub trait AggregateRoot:
    Default + Clone + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Identifies this aggregate type (e.g. "order"). Used as the stream
    /// namespace by the persistence backend.
    const AGGREGATE_TYPE: &'static str;

    /// The identity type naming instances of this aggregate.
    type Id: AggregateId;

    /// The set of events this aggregate produces and applies.
    type Event: AggregateEvent;

    /// Apply a single event to produce the next state.
    fn apply(self, event: &Self::Event) -> Self;
}

/// Creates fresh, empty aggregate instances for the loader.
///
/// The seam exists so integrators can inject construction-time
/// collaborators into an aggregate; most use [`DefaultFactory`].
pub trait AggregateFactory<A: AggregateRoot>: Send + Sync {
    /// Create a new, empty aggregate instance for the given identity.
    fn create_new(&self, id: &A::Id) -> A;
}

/// Factory that builds aggregates through their `Default` impl, ignoring
/// the identity.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultFactory;

impl<A: AggregateRoot> AggregateFactory<A> for DefaultFactory {
    fn create_new(&self, _id: &A::Id) -> A {
        A::default()
    }
}

#[cfg(test)]
pub(crate) mod test_fixtures {
    use super::{AggregateRoot, Id};
    use crate::event::AggregateEvent;
    use serde::{Deserialize, Serialize};

    /// A small order aggregate used as a fixture across the crate's tests.
    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    pub(crate) struct Order {
        pub placed: bool,
        pub total: u64,
        pub paid: u64,
        pub cancelled: bool,
    }

    /// Events produced by the `Order` fixture.
    ///
    /// Adjacently tagged, which is the payload convention for all
    /// `AggregateEvent` types in this crate.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(tag = "type", content = "data")]
    pub(crate) enum OrderEvent {
        Placed { total: u64 },
        PaymentReceived { amount: u64 },
        Cancelled,
    }

    impl AggregateEvent for OrderEvent {
        fn event_type(&self) -> &'static str {
            match self {
                OrderEvent::Placed { .. } => "Placed",
                OrderEvent::PaymentReceived { .. } => "PaymentReceived",
                OrderEvent::Cancelled => "Cancelled",
            }
        }
    }

    impl AggregateRoot for Order {
        const AGGREGATE_TYPE: &'static str = "order";

        type Id = Id<Order>;
        type Event = OrderEvent;

        fn apply(mut self, event: &Self::Event) -> Self {
            match event {
                OrderEvent::Placed { total } => {
                    self.placed = true;
                    self.total = *total;
                }
                OrderEvent::PaymentReceived { amount } => self.paid += amount,
                OrderEvent::Cancelled => self.cancelled = true,
            }
            self
        }
    }
}

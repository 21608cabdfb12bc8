//! Converting typed domain events to and from their stored JSON form.
//!
//! Payload enums are adjacently tagged (`#[serde(tag = "type", content =
//! "data")]`). On write the tag is split out into the record's
//! `event_type` field and only the content is stored; on read the tagged
//! object is rebuilt so serde can resolve the variant again.

use serde_json::{json, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::event::{AggregateEvent, CommittedEvent, SerializedEvent, UncommittedEvent};
use crate::metadata::Metadata;

/// Errors converting between typed events and stored records.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The serialized payload was not the expected adjacently tagged
    /// object (missing the `type` tag).
    #[error("event payload is not an adjacently tagged object")]
    NotTagged,

    /// JSON (de)serialization failed.
    #[error("event codec failure: {0}")]
    Json(#[from] serde_json::Error),
}

/// Converts typed events into [`SerializedEvent`] records and committed
/// records back into typed events.
///
/// Deserialization failures are fatal to the operation that triggered
/// them; the store never skips an undecodable record.
pub trait EventSerializer: Send + Sync + 'static {
    /// Serialize one uncommitted event into a storable record, assigning
    /// a fresh event id.
    fn serialize<E: AggregateEvent>(
        &self,
        event: &UncommittedEvent<E>,
        metadata: Metadata,
    ) -> Result<SerializedEvent, CodecError>;

    /// Deserialize a committed record's payload back into its typed form.
    ///
    /// The record's payload must already be at the latest schema version;
    /// upgrading happens before this step.
    fn deserialize<E: AggregateEvent>(&self, record: &CommittedEvent) -> Result<E, CodecError>;
}

/// The default serializer: adjacently tagged JSON with the tag split into
/// the record's `event_type` column.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEventSerializer;

impl EventSerializer for JsonEventSerializer {
    fn serialize<E: AggregateEvent>(
        &self,
        event: &UncommittedEvent<E>,
        metadata: Metadata,
    ) -> Result<SerializedEvent, CodecError> {
        let tagged = serde_json::to_value(&event.payload)?;

        let (event_type, payload) = match tagged {
            Value::Object(mut obj) => {
                let tag = match obj.remove("type") {
                    Some(Value::String(tag)) => tag,
                    _ => return Err(CodecError::NotTagged),
                };
                // Unit variants carry no `data` member.
                let data = obj.remove("data").unwrap_or(Value::Null);
                (tag, data)
            }
            _ => return Err(CodecError::NotTagged),
        };

        Ok(SerializedEvent {
            event_id: Uuid::new_v4(),
            event_type,
            version: event.payload.version(),
            payload,
            metadata,
        })
    }

    fn deserialize<E: AggregateEvent>(&self, record: &CommittedEvent) -> Result<E, CodecError> {
        let tagged = if record.payload.is_null() {
            json!({ "type": record.event_type })
        } else {
            json!({ "type": record.event_type, "data": record.payload })
        };
        Ok(serde_json::from_value(tagged)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::test_fixtures::OrderEvent;
    use crate::event::GlobalPosition;

    fn committed(event_type: &str, payload: Value) -> CommittedEvent {
        CommittedEvent {
            event_id: Uuid::new_v4(),
            aggregate_type: "order".to_string(),
            instance_id: "o-1".to_string(),
            sequence: 1,
            global_position: GlobalPosition::from(1),
            event_type: event_type.to_string(),
            version: 1,
            payload,
            metadata: Metadata::new(),
            recorded_at: 0,
        }
    }

    #[test]
    fn serialize_splits_tag_from_payload() {
        let event = UncommittedEvent::new(OrderEvent::Placed { total: 250 });
        let record = JsonEventSerializer
            .serialize(&event, Metadata::new())
            .expect("serialize should succeed");

        assert_eq!(record.event_type, "Placed");
        assert_eq!(record.version, 1);
        assert_eq!(record.payload, json!({"total": 250}));
    }

    #[test]
    fn serialize_unit_variant_has_null_payload() {
        let event = UncommittedEvent::new(OrderEvent::Cancelled);
        let record = JsonEventSerializer
            .serialize(&event, Metadata::new())
            .expect("serialize should succeed");

        assert_eq!(record.event_type, "Cancelled");
        assert!(record.payload.is_null());
    }

    #[test]
    fn deserialize_rebuilds_tagged_variant() {
        let record = committed("PaymentReceived", json!({"amount": 40}));
        let event: OrderEvent = JsonEventSerializer
            .deserialize(&record)
            .expect("deserialize should succeed");
        assert_eq!(event, OrderEvent::PaymentReceived { amount: 40 });
    }

    #[test]
    fn deserialize_unit_variant_from_null_payload() {
        let record = committed("Cancelled", Value::Null);
        let event: OrderEvent = JsonEventSerializer
            .deserialize(&record)
            .expect("deserialize should succeed");
        assert_eq!(event, OrderEvent::Cancelled);
    }

    #[test]
    fn deserialize_unknown_type_is_an_error() {
        let record = committed("NeverHeardOfIt", json!({}));
        let result: Result<OrderEvent, _> = JsonEventSerializer.deserialize(&record);
        assert!(result.is_err());
    }

    #[test]
    fn serializer_assigns_unique_event_ids() {
        let event = UncommittedEvent::new(OrderEvent::Placed { total: 1 });
        let a = JsonEventSerializer
            .serialize(&event, Metadata::new())
            .expect("serialize should succeed");
        let b = JsonEventSerializer
            .serialize(&event, Metadata::new())
            .expect("serialize should succeed");
        assert_ne!(a.event_id, b.event_id);
    }
}

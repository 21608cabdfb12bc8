//! Event metadata and the provider contract used to enrich events at
//! append time.
//!
//! Metadata is an ordered string-to-string map. During a store call the
//! event store unions three layers in a documented last-writer-wins order:
//! registered [`MetadataProvider`] output first, then the event's own
//! metadata, then the store-level entries (batch id and source id).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Well-known metadata keys written by the event store itself.
pub mod keys {
    /// Store-generated UUID shared by all events of one append call.
    pub const BATCH_ID: &str = "batch_id";
    /// Caller-supplied token identifying the originating command/request.
    pub const SOURCE_ID: &str = "source_id";
}

/// An ordered set of key/value metadata entries attached to an event.
///
/// Backed by a `BTreeMap` so serialization is deterministic. Merging is
/// last-writer-wins: entries from the merged-in map replace existing ones.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(BTreeMap<String, String>);

impl Metadata {
    /// Create an empty metadata map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a single entry, replacing any existing value for the key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Builder-style insert for constructing metadata inline.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Look up a value by key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Whether the map contains the given key.
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Merge `other` into `self`; entries in `other` win on key collision.
    pub fn merge(&mut self, other: Metadata) {
        self.0.extend(other.0);
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the map has no entries.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Supplies additional metadata for an event at append time.
///
/// Providers are registered on the event store and queried with the
/// aggregate identity and the raw (already serialized) payload of each
/// event being stored. Multiple providers compose; their outputs are
/// unioned in registration order, so a later provider wins a key
/// collision with an earlier one. Explicit event metadata and the
/// store-level entries are applied after all providers.
pub trait MetadataProvider: Send + Sync {
    /// Produce additional metadata entries for one event.
    ///
    /// # Arguments
    ///
    /// * `aggregate_type` - Type name of the aggregate being appended to.
    /// * `instance_id` - The aggregate instance identifier.
    /// * `payload` - The serialized event payload.
    /// * `existing` - Metadata accumulated so far (providers registered
    ///   earlier plus nothing else); informational only.
    fn provide(
        &self,
        aggregate_type: &str,
        instance_id: &str,
        payload: &serde_json::Value,
        existing: &Metadata,
    ) -> Metadata;
}

/// A provider that attaches a fixed set of entries to every event.
///
/// Useful for deployment-wide tags such as an environment name or the
/// writing service's version.
#[derive(Debug, Clone, Default)]
pub struct StaticMetadataProvider {
    entries: Metadata,
}

impl StaticMetadataProvider {
    /// Create a provider that always returns `entries`.
    pub fn new(entries: Metadata) -> Self {
        Self { entries }
    }
}

impl MetadataProvider for StaticMetadataProvider {
    fn provide(
        &self,
        _aggregate_type: &str,
        _instance_id: &str,
        _payload: &serde_json::Value,
        _existing: &Metadata,
    ) -> Metadata {
        self.entries.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_is_last_writer_wins() {
        let mut base = Metadata::new().with("a", "1").with("b", "2");
        let incoming = Metadata::new().with("b", "overwritten").with("c", "3");

        base.merge(incoming);

        assert_eq!(base.get("a"), Some("1"));
        assert_eq!(base.get("b"), Some("overwritten"));
        assert_eq!(base.get("c"), Some("3"));
        assert_eq!(base.len(), 3);
    }

    #[test]
    fn serde_roundtrip_is_transparent_map() {
        let meta = Metadata::new().with("batch_id", "b-1").with("user", "u-9");
        let json = serde_json::to_string(&meta).expect("serialize should succeed");
        assert_eq!(json, r#"{"batch_id":"b-1","user":"u-9"}"#);

        let back: Metadata = serde_json::from_str(&json).expect("deserialize should succeed");
        assert_eq!(back, meta);
    }

    #[test]
    fn from_iterator_collects_pairs() {
        let meta: Metadata = [("k1", "v1"), ("k2", "v2")].into_iter().collect();
        assert_eq!(meta.get("k1"), Some("v1"));
        assert_eq!(meta.get("k2"), Some("v2"));
    }

    #[test]
    fn static_provider_returns_fixed_entries() {
        let provider = StaticMetadataProvider::new(Metadata::new().with("env", "test"));
        let out = provider.provide("order", "o-1", &serde_json::json!({}), &Metadata::new());
        assert_eq!(out.get("env"), Some("test"));
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn empty_metadata_reports_empty() {
        let meta = Metadata::new();
        assert!(meta.is_empty());
        assert_eq!(meta.len(), 0);
        assert_eq!(meta.get("missing"), None);
    }
}

//! Schema upgrades applied to committed event payloads on read.
//!
//! Stored records keep the schema version they were written at; nothing
//! is rewritten in place. On every load path the [`UpgradePipeline`]
//! steps each record's JSON payload forward through registered
//! [`EventUpgrader`]s until it reaches the latest version for its event
//! type, so callers only ever see the newest shape.

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;
use thiserror::Error;

use crate::event::CommittedEvent;
use crate::metadata::Metadata;

/// Errors raised while upgrading committed payloads.
#[derive(Debug, Error)]
pub enum UpgradeError {
    /// A record's version has no registered upgrader, leaving a gap on
    /// the path to the latest version.
    #[error("no upgrader for event type '{event_type}' from version {version} (latest is {latest})")]
    MissingUpgrader {
        /// Event type of the record that could not be upgraded.
        event_type: String,
        /// Version the record is stuck at.
        version: u32,
        /// Latest version registered for this event type.
        latest: u32,
    },

    /// An upgrader inspected a payload and refused to transform it.
    #[error("upgrader for event type '{event_type}' v{version} rejected payload: {reason}")]
    Rejected {
        /// Event type of the rejected record.
        event_type: String,
        /// Version the rejecting upgrader handles.
        version: u32,
        /// Upgrader-supplied reason.
        reason: String,
    },

    /// Two upgraders were registered for the same event type and source
    /// version.
    #[error("duplicate upgrader for event type '{event_type}' from version {version}")]
    Duplicate {
        /// Event type with the conflicting registration.
        event_type: &'static str,
        /// Source version registered twice.
        version: u32,
    },
}

/// Caller-supplied context available to upgraders during a load.
///
/// Carries request-scoped entries (tenant, locale, feature flags) that an
/// upgrader may need to fill in fields the old schema did not record.
#[derive(Debug, Clone, Default)]
pub struct UpgradeContext {
    entries: Metadata,
}

impl UpgradeContext {
    /// Create a context from the given entries.
    pub fn new(entries: Metadata) -> Self {
        Self { entries }
    }

    /// Look up a context entry.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key)
    }
}

/// Transforms one event type's payload from one schema version to the
/// next.
///
/// Upgraders are pure JSON-to-JSON steps; they never see the typed event.
/// An upgrader for version `n` must output a payload valid at version
/// `n + 1`.
pub trait EventUpgrader: Send + Sync {
    /// Event type this upgrader applies to.
    fn event_type(&self) -> &'static str;

    /// Source schema version this upgrader transforms from.
    fn from_version(&self) -> u32;

    /// Transform a payload from [`from_version`](EventUpgrader::from_version)
    /// to the next version.
    fn upgrade(&self, payload: Value, ctx: Option<&UpgradeContext>) -> Result<Value, UpgradeError>;
}

/// An ordered set of upgraders, chained per event type.
///
/// For each event type the pipeline holds a contiguous chain keyed by
/// source version; the latest version is one past the highest registered
/// source version. Event types with no registered upgraders pass through
/// untouched.
#[derive(Default)]
pub struct UpgradePipeline {
    chains: HashMap<&'static str, BTreeMap<u32, Box<dyn EventUpgrader>>>,
}

impl std::fmt::Debug for UpgradePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for (event_type, chain) in &self.chains {
            map.key(event_type)
                .value(&chain.keys().collect::<Vec<_>>());
        }
        map.finish()
    }
}

impl UpgradePipeline {
    /// Create an empty pipeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one upgrader step.
    ///
    /// # Errors
    ///
    /// Returns [`UpgradeError::Duplicate`] if an upgrader for the same
    /// event type and source version is already registered.
    pub fn register(&mut self, upgrader: Box<dyn EventUpgrader>) -> Result<(), UpgradeError> {
        let event_type = upgrader.event_type();
        let version = upgrader.from_version();
        let chain = self.chains.entry(event_type).or_default();
        if chain.contains_key(&version) {
            return Err(UpgradeError::Duplicate { event_type, version });
        }
        chain.insert(version, upgrader);
        Ok(())
    }

    /// Builder-style [`register`](UpgradePipeline::register).
    pub fn with(mut self, upgrader: Box<dyn EventUpgrader>) -> Result<Self, UpgradeError> {
        self.register(upgrader)?;
        Ok(self)
    }

    /// The latest schema version for an event type: one past the highest
    /// registered source version, or `None` when no upgraders exist for
    /// the type.
    pub fn latest_version(&self, event_type: &str) -> Option<u32> {
        self.chains
            .get(event_type)
            .and_then(|chain| chain.keys().next_back())
            .map(|highest| highest + 1)
    }

    /// Step every record in `batch` forward to the latest version of its
    /// event type.
    ///
    /// Order and length are preserved; an empty batch succeeds without
    /// touching any upgrader. Records already at (or past) the latest
    /// version, and records of unregistered event types, pass through
    /// unchanged.
    ///
    /// # Errors
    ///
    /// Fails on the first record whose chain has a gap
    /// ([`UpgradeError::MissingUpgrader`]) or whose upgrader rejects the
    /// payload ([`UpgradeError::Rejected`]). The load that triggered the
    /// upgrade fails as a whole.
    pub fn upgrade_batch(
        &self,
        batch: Vec<CommittedEvent>,
        ctx: Option<&UpgradeContext>,
    ) -> Result<Vec<CommittedEvent>, UpgradeError> {
        if self.chains.is_empty() || batch.is_empty() {
            return Ok(batch);
        }

        batch
            .into_iter()
            .map(|record| self.upgrade_record(record, ctx))
            .collect()
    }

    fn upgrade_record(
        &self,
        mut record: CommittedEvent,
        ctx: Option<&UpgradeContext>,
    ) -> Result<CommittedEvent, UpgradeError> {
        let Some(chain) = self.chains.get(record.event_type.as_str()) else {
            return Ok(record);
        };
        // Safe: register never leaves a chain empty.
        let latest = match chain.keys().next_back() {
            Some(highest) => highest + 1,
            None => return Ok(record),
        };

        while record.version < latest {
            let Some(step) = chain.get(&record.version) else {
                return Err(UpgradeError::MissingUpgrader {
                    event_type: record.event_type.clone(),
                    version: record.version,
                    latest,
                });
            };
            record.payload = step.upgrade(record.payload, ctx)?;
            record.version += 1;
            tracing::trace!(
                event_type = %record.event_type,
                version = record.version,
                "upgraded event payload"
            );
        }
        Ok(record)
    }
}

//! Event types consumed by the aggregation engines.
//!
//! Events carry a timestamp, a group key and a flat map of numeric fields.
//! They are immutable once produced and arrive in source order, which is not
//! necessarily increasing in time.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Event time: epoch milliseconds or logical ticks.
pub type Timestamp = i64;

/// Key used to partition engine state.
pub type GroupKey = String;

/// Name of a numeric field on an event.
pub type FieldName = String;

/// A single timestamped, keyed record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event time
    pub time: Timestamp,
    /// Group key
    pub key: GroupKey,
    /// Numeric payload
    #[serde(default)]
    pub fields: BTreeMap<FieldName, f64>,
}

impl Event {
    /// Create an event with no fields.
    pub fn new(time: Timestamp, key: impl Into<GroupKey>) -> Self {
        Self {
            time,
            key: key.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Builder-style field setter.
    pub fn with_field(mut self, name: impl Into<FieldName>, value: f64) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    /// Look up a numeric field.
    pub fn field(&self, name: &str) -> Option<f64> {
        self.fields.get(name).copied()
    }
}

//! Cross-sectional snapshot aggregation.
//!
//! The engine keeps the latest event of every key it has seen and, on each
//! event, recomputes its metrics across all of those slots. A full scan is
//! O(keys) per event; the incremental policy keeps per-metric compensated
//! partial sums instead and only scans for `min`/`max`. The partials are
//! rebuilt by a full scan once every `keys` updates, so replaced values cannot
//! leave rounding error behind indefinitely.
//!
//! A slot contributes to a metric only when its latest event carries the
//! metric's field(s). An empty `sum`/`sum_product` is `0.0`, an empty
//! `avg`/`min`/`max` is null, and `count` is the number of slots.

use crate::config::ConfigError;
use crate::core::aggregate::CompensatedSum;
use crate::core::engine::Engine;
use crate::core::ordering::{OrderingGuard, OrderingMode, OutOfOrderEvent};
use crate::core::store::KeyedStore;
use crate::source::types::{Event, FieldName, GroupKey, Timestamp};
use crate::stats::{create_shared_stats, SharedEngineStats};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

const ENGINE: &str = "cross_sectional";

/// What a metric computes over the populated slots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetricKind {
    Avg { field: FieldName },
    Sum { field: FieldName },
    /// Sum over slots of `left * right`
    SumProduct { left: FieldName, right: FieldName },
    /// Number of populated slots
    Count,
    Min { field: FieldName },
    Max { field: FieldName },
}

impl MetricKind {
    /// The slot's contribution, or `None` if it lacks a required field.
    pub fn contribution(&self, event: &Event) -> Option<f64> {
        match self {
            MetricKind::Avg { field }
            | MetricKind::Sum { field }
            | MetricKind::Min { field }
            | MetricKind::Max { field } => event.field(field),
            MetricKind::SumProduct { left, right } => {
                Some(event.field(left)? * event.field(right)?)
            }
            MetricKind::Count => Some(1.0),
        }
    }

    fn fields(&self) -> Vec<&str> {
        match self {
            MetricKind::Avg { field }
            | MetricKind::Sum { field }
            | MetricKind::Min { field }
            | MetricKind::Max { field } => vec![field.as_str()],
            MetricKind::SumProduct { left, right } => vec![left.as_str(), right.as_str()],
            MetricKind::Count => Vec::new(),
        }
    }

    fn needs_scan(&self) -> bool {
        matches!(self, MetricKind::Min { .. } | MetricKind::Max { .. })
    }
}

/// A named metric.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricSpec {
    pub name: String,
    #[serde(flatten)]
    pub kind: MetricKind,
}

impl MetricSpec {
    pub fn new(name: impl Into<String>, kind: MetricKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    pub fn avg(name: impl Into<String>, field: impl Into<FieldName>) -> Self {
        Self::new(name, MetricKind::Avg { field: field.into() })
    }

    pub fn sum(name: impl Into<String>, field: impl Into<FieldName>) -> Self {
        Self::new(name, MetricKind::Sum { field: field.into() })
    }

    pub fn sum_product(
        name: impl Into<String>,
        left: impl Into<FieldName>,
        right: impl Into<FieldName>,
    ) -> Self {
        Self::new(
            name,
            MetricKind::SumProduct {
                left: left.into(),
                right: right.into(),
            },
        )
    }

    pub fn count(name: impl Into<String>) -> Self {
        Self::new(name, MetricKind::Count)
    }

    pub fn min(name: impl Into<String>, field: impl Into<FieldName>) -> Self {
        Self::new(name, MetricKind::Min { field: field.into() })
    }

    pub fn max(name: impl Into<String>, field: impl Into<FieldName>) -> Self {
        Self::new(name, MetricKind::Max { field: field.into() })
    }
}

/// How metrics are recomputed after each slot update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecomputePolicy {
    /// Rescan every slot for every metric
    #[default]
    FullScan,
    /// Adjust per-metric partial sums by the updated slot's delta
    Incremental,
}

/// Configuration for [`CrossSectionalEngine`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossSectionalConfig {
    pub metrics: Vec<MetricSpec>,
    #[serde(default)]
    pub recompute: RecomputePolicy,
    #[serde(default)]
    pub ordering: OrderingMode,
}

impl Default for CrossSectionalConfig {
    fn default() -> Self {
        Self {
            metrics: vec![
                MetricSpec::avg("avg_price", "price"),
                MetricSpec::sum("total_volume", "volume"),
                MetricSpec::sum_product("notional", "price", "volume"),
                MetricSpec::count("keys"),
            ],
            recompute: RecomputePolicy::FullScan,
            ordering: OrderingMode::Lenient,
        }
    }
}

impl CrossSectionalConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.metrics.is_empty() {
            return Err(ConfigError::InvalidMetric(
                "at least one metric is required".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for metric in &self.metrics {
            if metric.name.trim().is_empty() {
                return Err(ConfigError::InvalidMetric(
                    "metric name must not be empty".to_string(),
                ));
            }
            if !names.insert(metric.name.as_str()) {
                return Err(ConfigError::InvalidMetric(format!(
                    "duplicate metric name '{}'",
                    metric.name
                )));
            }
            if metric.kind.fields().iter().any(|f| f.trim().is_empty()) {
                return Err(ConfigError::InvalidMetric(format!(
                    "metric '{}' has an empty field name",
                    metric.name
                )));
            }
        }
        Ok(())
    }
}

/// Latest-event slot for one key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotSlot {
    pub key: GroupKey,
    pub latest: Option<Event>,
}

/// Output record emitted for every input event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotResult {
    pub time: Timestamp,
    /// Key whose slot triggered the recompute
    pub key: GroupKey,
    /// Metric values by name, in configuration order
    pub metrics: IndexMap<String, Option<f64>>,
    pub populated_slots: usize,
}

impl SnapshotResult {
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied().flatten()
    }
}

/// Running sum and contributor count for one metric.
#[derive(Debug, Clone, Copy, Default)]
struct Partial {
    sum: CompensatedSum,
    n: u64,
}

impl Partial {
    fn add(&mut self, v: f64) {
        self.sum.add(v);
        self.n += 1;
    }

    fn remove(&mut self, v: f64) {
        self.sum.remove(v);
        self.n = self.n.saturating_sub(1);
    }
}

/// Fold contributions into a metric value.
fn finish(kind: &MetricKind, sum: f64, n: u64, min: Option<f64>, max: Option<f64>) -> Option<f64> {
    match kind {
        MetricKind::Avg { .. } => (n > 0).then(|| sum / n as f64),
        MetricKind::Sum { .. } | MetricKind::SumProduct { .. } => Some(sum),
        MetricKind::Count => Some(n as f64),
        MetricKind::Min { .. } => min,
        MetricKind::Max { .. } => max,
    }
}

/// Evaluate a metric by scanning `latest` events.
pub fn evaluate<'a>(kind: &MetricKind, latest: impl IntoIterator<Item = &'a Event>) -> Option<f64> {
    let mut sum = CompensatedSum::default();
    let mut n = 0u64;
    let mut min: Option<f64> = None;
    let mut max: Option<f64> = None;
    for value in latest.into_iter().filter_map(|e| kind.contribution(e)) {
        sum.add(value);
        n += 1;
        min = Some(min.map_or(value, |m| m.min(value)));
        max = Some(max.map_or(value, |m| m.max(value)));
    }
    finish(kind, sum.value(), n, min, max)
}

/// Keyed latest-value table with per-event metric recompute.
pub struct CrossSectionalEngine {
    config: CrossSectionalConfig,
    slots: KeyedStore<SnapshotSlot>,
    /// Per-metric partials, maintained only under the incremental policy
    partials: Vec<Partial>,
    updates_since_resync: usize,
    events_seen: usize,
    ordering: OrderingGuard,
    stats: SharedEngineStats,
}

impl CrossSectionalEngine {
    /// Create an engine, rejecting invalid metric specs.
    pub fn new(config: CrossSectionalConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            partials: vec![Partial::default(); config.metrics.len()],
            updates_since_resync: 0,
            ordering: OrderingGuard::new(config.ordering),
            config,
            slots: KeyedStore::new(),
            events_seen: 0,
            stats: create_shared_stats(),
        })
    }

    /// Report into an existing stats instance.
    pub fn with_stats(mut self, stats: SharedEngineStats) -> Self {
        self.stats = stats;
        self
    }

    pub fn config(&self) -> &CrossSectionalConfig {
        &self.config
    }

    /// Upsert the event's slot and recompute every metric.
    pub fn process(&mut self, event: &Event) -> SnapshotResult {
        let event_index = self.events_seen;
        self.events_seen += 1;
        self.stats.record_event();

        let slot = self.slots.fetch_or_create(&event.key, || {
            tracing::debug!(engine = ENGINE, key = %event.key, "new slot");
            SnapshotSlot {
                key: event.key.clone(),
                latest: None,
            }
        });
        let previous_time = slot.latest.as_ref().map(|e| e.time);
        if self
            .ordering
            .observe(ENGINE, &event.key, event.time, previous_time, event_index)
        {
            self.stats.record_out_of_order();
        }
        let previous = slot.latest.replace(event.clone());

        if self.config.recompute == RecomputePolicy::Incremental {
            self.update_partials(previous.as_ref(), event);
        }

        let metrics = self
            .config
            .metrics
            .iter()
            .zip(&self.partials)
            .map(|(metric, partial)| {
                let value = match self.config.recompute {
                    RecomputePolicy::Incremental if !metric.kind.needs_scan() => {
                        finish(&metric.kind, partial.sum.value(), partial.n, None, None)
                    }
                    _ => evaluate(&metric.kind, self.latest_events()),
                };
                (metric.name.clone(), value)
            })
            .collect();

        self.stats.record_emitted(1);
        SnapshotResult {
            time: event.time,
            key: event.key.clone(),
            metrics,
            populated_slots: self.slots.len(),
        }
    }

    /// Swap the replaced event's contributions for the new one's.
    fn update_partials(&mut self, previous: Option<&Event>, event: &Event) {
        for (partial, metric) in self.partials.iter_mut().zip(&self.config.metrics) {
            if let Some(v) = previous.and_then(|e| metric.kind.contribution(e)) {
                partial.remove(v);
            }
            if let Some(v) = metric.kind.contribution(event) {
                partial.add(v);
            }
        }

        self.updates_since_resync += 1;
        if self.updates_since_resync >= self.slots.len() {
            self.resync_partials();
        }
    }

    /// Rebuild every partial from the current slots.
    fn resync_partials(&mut self) {
        for (partial, metric) in self.partials.iter_mut().zip(&self.config.metrics) {
            *partial = Partial::default();
            for slot in self.slots.values() {
                if let Some(v) = slot.latest.as_ref().and_then(|e| metric.kind.contribution(e)) {
                    partial.add(v);
                }
            }
        }
        self.updates_since_resync = 0;
    }

    fn latest_events(&self) -> impl Iterator<Item = &Event> {
        self.slots.values().filter_map(|slot| slot.latest.as_ref())
    }

    /// Copy of every slot, in first-seen key order.
    pub fn peek_all_slots(&self) -> Vec<SnapshotSlot> {
        self.slots.values().cloned().collect()
    }

    pub fn peek_slot(&self, key: &str) -> Option<&SnapshotSlot> {
        self.slots.get(key)
    }

    /// Keys seen so far, in first-seen order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.slots.keys()
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn events_seen(&self) -> usize {
        self.events_seen
    }
}

impl Engine for CrossSectionalEngine {
    type Output = SnapshotResult;

    fn name(&self) -> &'static str {
        ENGINE
    }

    fn feed(&mut self, event: &Event) -> Vec<SnapshotResult> {
        vec![self.process(event)]
    }

    fn take_warnings(&mut self) -> Vec<OutOfOrderEvent> {
        self.ordering.take_warnings()
    }

    fn stats(&self) -> &SharedEngineStats {
        &self.stats
    }
}

//! Hopping window aggregation.
//!
//! Windows of `window_size` are anchored at every multiple of `step`, so a
//! single event can fall into several overlapping windows. Windows are
//! created lazily per key and finalized when an event of the same key
//! arrives at or past their end; the key's latest observed time acts as its
//! watermark. Finalized windows are kept for inspection up to
//! `garbage_size` per key, oldest evicted first.

use crate::config::{duration_ms, ConfigError};
use crate::core::aggregate::{Accumulator, AggregateFn};
use crate::core::engine::Engine;
use crate::core::ordering::{OrderingGuard, OrderingMode, OutOfOrderEvent};
use crate::core::store::KeyedStore;
use crate::source::types::{Event, FieldName, GroupKey, Timestamp};
use crate::stats::{create_shared_stats, SharedEngineStats};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

const ENGINE: &str = "hopping";

/// Configuration for [`HoppingWindowEngine`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoppingConfig {
    /// Length of each window
    #[serde(with = "duration_ms")]
    pub window_size: Duration,

    /// Distance between consecutive window starts
    #[serde(with = "duration_ms")]
    pub step: Duration,

    /// Finalized windows retained per key
    pub garbage_size: u32,

    pub aggregate: AggregateFn,

    /// Event field folded into the aggregate
    pub field: FieldName,

    #[serde(default)]
    pub ordering: OrderingMode,
}

impl Default for HoppingConfig {
    fn default() -> Self {
        Self {
            window_size: Duration::from_secs(60),
            step: Duration::from_secs(60),
            garbage_size: 16,
            aggregate: AggregateFn::Sum,
            field: "value".to_string(),
            ordering: OrderingMode::Lenient,
        }
    }
}

impl HoppingConfig {
    /// Check the configuration, returning `(window_size, step)` in ms.
    pub fn validate(&self) -> Result<(Timestamp, Timestamp), ConfigError> {
        let window_size = self.window_size.as_millis();
        let step = self.step.as_millis();

        if window_size == 0 {
            return Err(ConfigError::NonPositiveWindowSize(window_size));
        }
        if step == 0 {
            return Err(ConfigError::NonPositiveStep(step));
        }
        if self.field.trim().is_empty() {
            return Err(ConfigError::EmptyField);
        }

        let to_ts = |name, millis: u128| {
            Timestamp::try_from(millis).map_err(|_| ConfigError::DurationOverflow { name, millis })
        };
        Ok((to_ts("window_size", window_size)?, to_ts("step", step)?))
    }
}

/// A single hopping window for one key.
#[derive(Debug, Clone, PartialEq)]
pub struct Window {
    pub key: GroupKey,
    /// Inclusive start, always a multiple of `step`
    pub start: Timestamp,
    /// Exclusive end, `start + window_size`
    pub end: Timestamp,
    pub accumulator: Accumulator,
    /// Events folded in, including those without the field
    pub member_count: u64,
    pub finalized: bool,
    /// Input position of the last event folded in
    pub last_update_event_index: Option<usize>,
}

impl Window {
    /// Create an empty open window.
    pub fn new(key: GroupKey, start: Timestamp, window_size: Timestamp) -> Self {
        Self {
            key,
            start,
            end: start.saturating_add(window_size),
            accumulator: Accumulator::default(),
            member_count: 0,
            finalized: false,
            last_update_event_index: None,
        }
    }

    /// Check if a timestamp falls within this window.
    pub fn contains(&self, time: Timestamp) -> bool {
        time >= self.start && time < self.end
    }

    fn absorb(&mut self, value: Option<f64>, event_index: usize) {
        if let Some(value) = value {
            self.accumulator.fold(value);
        }
        self.member_count += 1;
        self.last_update_event_index = Some(event_index);
    }

    /// Read-only view of the window under `aggregate`.
    pub fn view(&self, aggregate: AggregateFn) -> WindowView {
        WindowView {
            key: self.key.clone(),
            start: self.start,
            end: self.end,
            member_count: self.member_count,
            value: self.accumulator.result(aggregate, self.member_count),
            finalized: self.finalized,
            last_update_event_index: self.last_update_event_index,
        }
    }
}

/// Introspection view of a window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowView {
    pub key: GroupKey,
    pub start: Timestamp,
    pub end: Timestamp,
    pub member_count: u64,
    /// Current aggregate value
    pub value: Option<f64>,
    pub finalized: bool,
    pub last_update_event_index: Option<usize>,
}

/// Output record emitted when a window finalizes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowResult {
    /// Emission time, equal to the window end
    pub time: Timestamp,
    pub key: GroupKey,
    pub start: Timestamp,
    pub end: Timestamp,
    pub aggregate: AggregateFn,
    pub value: Option<f64>,
    pub member_count: u64,
    /// Values folded (members carrying the field)
    pub value_count: u64,
}

impl WindowResult {
    fn from_window(window: &Window, aggregate: AggregateFn) -> Self {
        Self {
            time: window.end,
            key: window.key.clone(),
            start: window.start,
            end: window.end,
            aggregate,
            value: window.accumulator.result(aggregate, window.member_count),
            member_count: window.member_count,
            value_count: window.accumulator.values,
        }
    }
}

/// Per-key window state.
#[derive(Debug, Clone, Default)]
struct KeyWindows {
    /// Open windows by start; ends grow with starts
    open: BTreeMap<Timestamp, Window>,
    /// Finalized windows in finalization order
    retained: VecDeque<Window>,
    /// Latest event time seen for the key
    watermark: Option<Timestamp>,
}

/// Starts of every window containing `time`, ascending.
///
/// The first start is the smallest multiple of `step` strictly greater than
/// `time - window_size`; the last is `floor(time / step) * step`.
pub fn window_starts(
    time: Timestamp,
    window_size: Timestamp,
    step: Timestamp,
) -> impl Iterator<Item = Timestamp> {
    let first = (time.saturating_sub(window_size).div_euclid(step) + 1).saturating_mul(step);
    let last = time.div_euclid(step).saturating_mul(step);
    std::iter::successors(Some(first).filter(|s| *s <= last), move |s| {
        s.checked_add(step).filter(|next| *next <= last)
    })
}

/// Keyed hopping window aggregator.
pub struct HoppingWindowEngine {
    config: HoppingConfig,
    window_size: Timestamp,
    step: Timestamp,
    keys: KeyedStore<KeyWindows>,
    events_seen: usize,
    ordering: OrderingGuard,
    stats: SharedEngineStats,
}

impl HoppingWindowEngine {
    /// Create an engine, rejecting non-positive sizes.
    pub fn new(config: HoppingConfig) -> Result<Self, ConfigError> {
        let (window_size, step) = config.validate()?;
        Ok(Self {
            ordering: OrderingGuard::new(config.ordering),
            config,
            window_size,
            step,
            keys: KeyedStore::new(),
            events_seen: 0,
            stats: create_shared_stats(),
        })
    }

    /// Report into an existing stats instance.
    pub fn with_stats(mut self, stats: SharedEngineStats) -> Self {
        self.stats = stats;
        self
    }

    pub fn config(&self) -> &HoppingConfig {
        &self.config
    }

    /// Process an incoming event.
    ///
    /// This will:
    /// 1. Fold the event into every window of its key that contains it
    /// 2. Finalize every open window of its key that ends at or before it
    /// 3. Evict finalized windows beyond the retention limit
    pub fn process(&mut self, event: &Event) -> Vec<WindowResult> {
        let event_index = self.events_seen;
        self.events_seen += 1;
        self.stats.record_event();

        let aggregate = self.config.aggregate;
        let garbage_size = self.config.garbage_size as usize;
        let window_size = self.window_size;
        let value = event.field(&self.config.field);
        let stats = &self.stats;

        let state = self.keys.fetch_or_create(&event.key, || {
            tracing::debug!(engine = ENGINE, key = %event.key, "new key");
            KeyWindows::default()
        });
        let watermark = state.watermark;
        if self
            .ordering
            .observe(ENGINE, &event.key, event.time, watermark, event_index)
        {
            stats.record_out_of_order();
        }

        let mut dropped = false;
        let mut absorbed = false;
        for start in window_starts(event.time, window_size, self.step) {
            // Closed windows never re-open, whether retained or evicted.
            if watermark.is_some_and(|wm| start.saturating_add(window_size) <= wm) {
                dropped = true;
                continue;
            }
            let window = state.open.entry(start).or_insert_with(|| {
                tracing::debug!(engine = ENGINE, key = %event.key, start, "opening window");
                stats.record_window_opened();
                Window::new(event.key.clone(), start, window_size)
            });
            window.absorb(value, event_index);
            absorbed = true;
        }
        if dropped && !absorbed {
            tracing::debug!(engine = ENGINE, key = %event.key, time = event.time, "late event dropped");
            stats.record_late_event();
        }

        let mut results = Vec::new();
        while let Some(entry) = state.open.first_entry() {
            if event.time < entry.get().end {
                break;
            }
            let mut window = entry.remove();
            window.finalized = true;
            tracing::debug!(
                engine = ENGINE,
                key = %window.key,
                start = window.start,
                members = window.member_count,
                "window finalized"
            );
            stats.record_window_finalized();
            results.push(WindowResult::from_window(&window, aggregate));
            state.retained.push_back(window);
        }

        while state.retained.len() > garbage_size {
            if let Some(evicted) = state.retained.pop_front() {
                tracing::trace!(engine = ENGINE, key = %evicted.key, start = evicted.start, "window evicted");
                stats.record_window_evicted();
            }
        }

        state.watermark = Some(watermark.map_or(event.time, |wm| wm.max(event.time)));
        stats.record_emitted(results.len() as u64);
        results
    }

    /// Open windows for `key`, ascending by start.
    pub fn list_open_windows(&self, key: &str) -> Vec<WindowView> {
        self.keys
            .get(key)
            .map(|state| {
                state
                    .open
                    .values()
                    .map(|w| w.view(self.config.aggregate))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Finalized windows still retained for `key`, oldest first.
    pub fn list_retained_windows(&self, key: &str) -> Vec<WindowView> {
        self.keys
            .get(key)
            .map(|state| {
                state
                    .retained
                    .iter()
                    .map(|w| w.view(self.config.aggregate))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Latest event time seen for `key`.
    pub fn watermark(&self, key: &str) -> Option<Timestamp> {
        self.keys.get(key).and_then(|state| state.watermark)
    }

    /// Keys seen so far, in first-seen order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.keys.keys()
    }

    /// Number of open windows across all keys.
    pub fn open_window_count(&self) -> usize {
        self.keys.values().map(|state| state.open.len()).sum()
    }

    pub fn events_seen(&self) -> usize {
        self.events_seen
    }
}

impl Engine for HoppingWindowEngine {
    type Output = WindowResult;

    fn name(&self) -> &'static str {
        ENGINE
    }

    fn feed(&mut self, event: &Event) -> Vec<WindowResult> {
        self.process(event)
    }

    fn take_warnings(&mut self) -> Vec<OutOfOrderEvent> {
        self.ordering.take_warnings()
    }

    fn stats(&self) -> &SharedEngineStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(window_ms: u64, step_ms: u64, garbage_size: u32) -> HoppingConfig {
        HoppingConfig {
            window_size: Duration::from_millis(window_ms),
            step: Duration::from_millis(step_ms),
            garbage_size,
            ..HoppingConfig::default()
        }
    }

    fn event(time: Timestamp, key: &str, value: f64) -> Event {
        Event::new(time, key).with_field("value", value)
    }

    #[test]
    fn test_window_starts() {
        assert_eq!(window_starts(3_661_785, 60_000, 60_000).collect::<Vec<_>>(), vec![3_660_000]);
        assert_eq!(window_starts(25, 30, 10).collect::<Vec<_>>(), vec![0, 10, 20]);
        // Boundary belongs to the later window only
        assert_eq!(window_starts(120, 60, 60).collect::<Vec<_>>(), vec![120]);
        // Gaps between windows when step exceeds size
        assert_eq!(window_starts(70, 30, 100).count(), 0);
        assert_eq!(window_starts(-5, 10, 10).collect::<Vec<_>>(), vec![-10]);
    }

    #[test]
    fn test_window_contains() {
        let window = Window::new("A".to_string(), 100, 10);

        assert!(window.contains(100));
        assert!(window.contains(109));
        assert!(!window.contains(110));
        assert!(!window.contains(99));
    }

    #[test]
    fn test_rejects_zero_sizes() {
        assert!(matches!(
            HoppingWindowEngine::new(config(0, 10, 1)),
            Err(ConfigError::NonPositiveWindowSize(0))
        ));
        assert!(matches!(
            HoppingWindowEngine::new(config(10, 0, 1)),
            Err(ConfigError::NonPositiveStep(0))
        ));
    }

    #[test]
    fn test_tumbling_finalization() {
        let mut engine = HoppingWindowEngine::new(config(60_000, 60_000, 4)).unwrap();

        assert!(engine.process(&event(3_661_785, "A", 10.0)).is_empty());
        assert!(engine.process(&event(3_672_457, "A", 28.0)).is_empty());
        let results = engine.process(&event(3_730_789, "A", 15.0));

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].start, 3_660_000);
        assert_eq!(results[0].time, 3_720_000);
        assert_eq!(results[0].value, Some(38.0));
        assert_eq!(results[0].member_count, 2);

        let open = engine.list_open_windows("A");
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].start, 3_720_000);
        assert_eq!(open[0].last_update_event_index, Some(2));
    }

    #[test]
    fn test_overlapping_windows() {
        // size 30, step 10: each event lands in three windows
        let mut engine = HoppingWindowEngine::new(config(30, 10, 8)).unwrap();

        engine.process(&event(25, "A", 1.0));
        assert_eq!(engine.list_open_windows("A").len(), 3);

        // 41 finalizes [0,30) and [10,40) and opens [40,70)
        let results = engine.process(&event(41, "A", 2.0));
        let starts: Vec<_> = results.iter().map(|r| r.start).collect();
        assert_eq!(starts, vec![0, 10]);
        assert!(results.iter().all(|r| r.value == Some(1.0)));

        let open: Vec<_> = engine.list_open_windows("A").iter().map(|w| w.start).collect();
        assert_eq!(open, vec![20, 30, 40]);
    }

    #[test]
    fn test_keys_do_not_finalize_each_other() {
        let mut engine = HoppingWindowEngine::new(config(10, 10, 4)).unwrap();

        engine.process(&event(1, "A", 1.0));
        assert!(engine.process(&event(500, "B", 1.0)).is_empty());
        assert_eq!(engine.list_open_windows("A").len(), 1);
        assert_eq!(engine.watermark("A"), Some(1));
        assert_eq!(engine.watermark("B"), Some(500));
    }

    #[test]
    fn test_garbage_eviction_keeps_newest() {
        let mut engine = HoppingWindowEngine::new(config(10, 10, 2)).unwrap();

        for t in [0, 10, 20, 30, 40] {
            engine.process(&event(t, "A", 1.0));
        }

        let retained: Vec<_> = engine
            .list_retained_windows("A")
            .iter()
            .map(|w| w.start)
            .collect();
        assert_eq!(retained, vec![20, 30]);
        assert!(engine.list_retained_windows("A").iter().all(|w| w.finalized));
        assert_eq!(engine.stats().snapshot().windows_evicted, 2);
    }

    #[test]
    fn test_late_event_never_reopens_window() {
        let mut engine = HoppingWindowEngine::new(config(10, 10, 0)).unwrap();

        engine.process(&event(5, "A", 1.0));
        let finalized = engine.process(&event(15, "A", 1.0));
        assert_eq!(finalized.len(), 1);

        // Window [0,10) was evicted immediately; a late event must not revive it
        assert!(engine.process(&event(7, "A", 100.0)).is_empty());
        assert!(engine.process(&event(25, "A", 1.0)).iter().all(|r| r.start != 0));
        assert_eq!(engine.stats().snapshot().late_events, 1);
    }

    #[test]
    fn test_partly_late_event_is_not_counted_late() {
        let mut engine = HoppingWindowEngine::new(config(30, 10, 0)).unwrap();

        engine.process(&event(35, "A", 1.0));
        engine.process(&event(65, "A", 1.0));

        // [20,50) and [30,60) are closed but [40,70) still takes the event
        engine.process(&event(45, "A", 2.0));
        assert_eq!(engine.stats().snapshot().late_events, 0);
        let open = engine.list_open_windows("A");
        let window = open.iter().find(|w| w.start == 40).unwrap();
        assert_eq!(window.value, Some(3.0));
        assert_eq!(window.member_count, 2);

        // Every window holding 12 is closed
        engine.process(&event(12, "A", 5.0));
        assert_eq!(engine.stats().snapshot().late_events, 1);
    }

    #[test]
    fn test_out_of_order_finalizes_early_and_warns_in_strict_mode() {
        let mut cfg = config(10, 10, 4);
        cfg.ordering = OrderingMode::Strict;
        let mut engine = HoppingWindowEngine::new(cfg).unwrap();

        engine.process(&event(1, "A", 1.0));
        let results = engine.process(&event(12, "A", 2.0));
        assert_eq!(results.len(), 1);

        // Belongs to [10,20) which is still open: folded, but flagged
        engine.process(&event(11, "A", 3.0));
        let warnings = engine.take_warnings();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].watermark, 12);
        assert_eq!(engine.list_open_windows("A")[0].value, Some(5.0));
    }

    #[test]
    fn test_missing_field_counts_as_member() {
        let mut cfg = config(10, 10, 4);
        cfg.aggregate = AggregateFn::Count;
        let mut engine = HoppingWindowEngine::new(cfg).unwrap();

        engine.process(&Event::new(1, "A"));
        engine.process(&event(2, "A", 4.0));
        let results = engine.process(&event(10, "A", 0.0));

        assert_eq!(results[0].value, Some(2.0));
        assert_eq!(results[0].value_count, 1);
    }

    #[test]
    fn test_unfinished_window_stays_open() {
        let mut engine = HoppingWindowEngine::new(config(10, 10, 4)).unwrap();

        assert!(engine.process(&event(3, "A", 1.0)).is_empty());
        assert_eq!(engine.open_window_count(), 1);
        assert_eq!(engine.events_seen(), 1);
    }
}

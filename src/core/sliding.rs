//! Incremental sliding-buffer aggregation.
//!
//! Each key owns a FIFO of its most recent `capacity` values plus a running
//! sum maintained on push and evict, so every update is O(1) amortized no
//! matter how large the buffer is. The running sum is compensated and is
//! rebuilt from the buffer once every `capacity` evictions, which bounds the
//! rounding error left behind by evicted values. Until the buffer is full the
//! engine emits an explicit null rather than a partial aggregate.

use crate::config::ConfigError;
use crate::core::aggregate::{CompensatedSum, SlidingAggregate};
use crate::core::engine::Engine;
use crate::core::ordering::{OrderingGuard, OrderingMode, OutOfOrderEvent};
use crate::core::store::KeyedStore;
use crate::source::types::{Event, FieldName, GroupKey, Timestamp};
use crate::stats::{create_shared_stats, SharedEngineStats};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

const ENGINE: &str = "sliding";

/// Configuration for [`SlidingBufferEngine`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlidingConfig {
    /// Number of values per key the aggregate covers
    pub capacity: u32,
    pub aggregate: SlidingAggregate,
    /// Event field pushed into the buffer
    pub field: FieldName,
    #[serde(default)]
    pub ordering: OrderingMode,
}

impl Default for SlidingConfig {
    fn default() -> Self {
        Self {
            capacity: 3,
            aggregate: SlidingAggregate::Avg,
            field: "value".to_string(),
            ordering: OrderingMode::Lenient,
        }
    }
}

impl SlidingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.field.trim().is_empty() {
            return Err(ConfigError::EmptyField);
        }
        Ok(())
    }
}

/// Buffer and running aggregates for one key.
#[derive(Debug, Clone)]
pub struct SlidingState {
    key: GroupKey,
    capacity: usize,
    buffer: VecDeque<f64>,
    running_sum: CompensatedSum,
    evictions_since_resync: usize,
    /// Total of every value ever pushed, evicted ones included
    cumulative: CompensatedSum,
    pushed: u64,
    /// Monotonic queues of (sequence, value) for O(1) amortized min/max
    min_queue: VecDeque<(u64, f64)>,
    max_queue: VecDeque<(u64, f64)>,
    last_time: Option<Timestamp>,
}

impl SlidingState {
    pub fn new(key: GroupKey, capacity: usize) -> Self {
        Self {
            key,
            capacity,
            buffer: VecDeque::with_capacity(capacity + 1),
            running_sum: CompensatedSum::default(),
            evictions_since_resync: 0,
            cumulative: CompensatedSum::default(),
            pushed: 0,
            min_queue: VecDeque::new(),
            max_queue: VecDeque::new(),
            last_time: None,
        }
    }

    /// Push a value, returning the one evicted from the front if the buffer
    /// was already full.
    pub fn push(&mut self, value: f64) -> Option<f64> {
        let seq = self.pushed;
        self.pushed += 1;

        self.buffer.push_back(value);
        self.running_sum.add(value);
        self.cumulative.add(value);

        let evicted = if self.buffer.len() > self.capacity {
            let old = self.buffer.pop_front();
            if let Some(old) = old {
                self.running_sum.remove(old);
                self.evictions_since_resync += 1;
            }
            if self.evictions_since_resync >= self.capacity {
                self.running_sum = self.buffer.iter().copied().collect();
                self.evictions_since_resync = 0;
            }
            old
        } else {
            None
        };

        while self.min_queue.back().is_some_and(|&(_, v)| v >= value) {
            self.min_queue.pop_back();
        }
        self.min_queue.push_back((seq, value));
        while self.max_queue.back().is_some_and(|&(_, v)| v <= value) {
            self.max_queue.pop_back();
        }
        self.max_queue.push_back((seq, value));

        let oldest_live = self.pushed.saturating_sub(self.capacity as u64);
        while self.min_queue.front().is_some_and(|&(s, _)| s < oldest_live) {
            self.min_queue.pop_front();
        }
        while self.max_queue.front().is_some_and(|&(s, _)| s < oldest_live) {
            self.max_queue.pop_front();
        }

        evicted
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// True once the buffer holds `capacity` values.
    pub fn is_primed(&self) -> bool {
        self.buffer.len() == self.capacity
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn running_sum(&self) -> f64 {
        self.running_sum.value()
    }

    pub fn cumulative(&self) -> f64 {
        self.cumulative.value()
    }

    pub fn buffer(&self) -> &VecDeque<f64> {
        &self.buffer
    }

    /// Aggregate over the current contents, `None` until primed.
    pub fn aggregate(&self, aggregate: SlidingAggregate) -> Option<f64> {
        if !self.is_primed() {
            return None;
        }
        match aggregate {
            SlidingAggregate::Sum => Some(self.running_sum()),
            SlidingAggregate::Avg => Some(self.running_sum() / self.capacity as f64),
            SlidingAggregate::Cumulative => Some(self.cumulative()),
            SlidingAggregate::Min => self.min_queue.front().map(|&(_, v)| v),
            SlidingAggregate::Max => self.max_queue.front().map(|&(_, v)| v),
        }
    }
}

/// Output record emitted for every event carrying the configured field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlidingResult {
    pub time: Timestamp,
    pub key: GroupKey,
    /// Value pushed by this event
    pub input: f64,
    /// Value evicted by this event, if the buffer was full
    pub evicted: Option<f64>,
    pub aggregate: SlidingAggregate,
    /// Aggregate, or null while the buffer is filling
    pub value: Option<f64>,
    pub running_sum: f64,
    pub buffer_len: usize,
    pub capacity: u32,
}

/// Keyed sliding-buffer aggregator.
pub struct SlidingBufferEngine {
    config: SlidingConfig,
    keys: KeyedStore<SlidingState>,
    events_seen: usize,
    ordering: OrderingGuard,
    stats: SharedEngineStats,
}

impl SlidingBufferEngine {
    /// Create an engine, rejecting a zero capacity.
    pub fn new(config: SlidingConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            ordering: OrderingGuard::new(config.ordering),
            config,
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

    pub fn config(&self) -> &SlidingConfig {
        &self.config
    }

    /// Push the event's value into its key's buffer and report the aggregate.
    ///
    /// Returns `None` only when the event lacks the configured field; such
    /// events leave the buffer untouched.
    pub fn process(&mut self, event: &Event) -> Option<SlidingResult> {
        let event_index = self.events_seen;
        self.events_seen += 1;
        self.stats.record_event();

        let Some(input) = event.field(&self.config.field) else {
            tracing::trace!(engine = ENGINE, key = %event.key, field = %self.config.field, "event lacks field");
            self.stats.record_skipped();
            return None;
        };

        let capacity = self.config.capacity as usize;
        let state = self.keys.fetch_or_create(&event.key, || {
            tracing::debug!(engine = ENGINE, key = %event.key, capacity, "new buffer");
            SlidingState::new(event.key.clone(), capacity)
        });
        if self
            .ordering
            .observe(ENGINE, &event.key, event.time, state.last_time, event_index)
        {
            self.stats.record_out_of_order();
        }
        state.last_time = Some(state.last_time.map_or(event.time, |t| t.max(event.time)));

        let evicted = state.push(input);
        if state.pushed == capacity as u64 {
            tracing::debug!(engine = ENGINE, key = %event.key, "buffer primed");
        }

        let value = state.aggregate(self.config.aggregate);
        if value.is_none() {
            self.stats.record_null();
        }
        self.stats.record_emitted(1);

        Some(SlidingResult {
            time: event.time,
            key: event.key.clone(),
            input,
            evicted,
            aggregate: self.config.aggregate,
            value,
            running_sum: state.running_sum(),
            buffer_len: state.len(),
            capacity: self.config.capacity,
        })
    }

    /// Current buffer contents for `key`, oldest first.
    pub fn peek_buffer(&self, key: &str) -> Vec<f64> {
        self.keys
            .get(key)
            .map(|state| state.buffer.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn peek_state(&self, key: &str) -> Option<&SlidingState> {
        self.keys.get(key)
    }

    /// Keys seen so far, in first-seen order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.keys.keys()
    }

    pub fn events_seen(&self) -> usize {
        self.events_seen
    }
}

impl Engine for SlidingBufferEngine {
    type Output = SlidingResult;

    fn name(&self) -> &'static str {
        ENGINE
    }

    fn feed(&mut self, event: &Event) -> Vec<SlidingResult> {
        self.process(event).into_iter().collect()
    }

    fn take_warnings(&mut self) -> Vec<OutOfOrderEvent> {
        self.ordering.take_warnings()
    }

    fn stats(&self) -> &SharedEngineStats {
        &self.stats
    }
}

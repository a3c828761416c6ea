//! Engine activity counters.
//!
//! Counters are atomics so one instance can be shared between an engine, a
//! runner thread and whoever reports on them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Activity counters for one engine (or a group of shard engines).
#[derive(Debug)]
pub struct EngineStats {
    /// Number of events fed in
    events_processed: AtomicU64,
    /// Events ignored because they lacked the configured field
    events_skipped: AtomicU64,
    /// Output records produced
    records_emitted: AtomicU64,
    /// Output records whose value was null (sliding buffer not yet full)
    null_records: AtomicU64,
    windows_opened: AtomicU64,
    windows_finalized: AtomicU64,
    windows_evicted: AtomicU64,
    /// Events that fell only into already-closed windows
    late_events: AtomicU64,
    out_of_order_events: AtomicU64,
    /// When counting started
    started_at: DateTime<Utc>,
}

impl EngineStats {
    pub fn new() -> Self {
        Self {
            events_processed: AtomicU64::new(0),
            events_skipped: AtomicU64::new(0),
            records_emitted: AtomicU64::new(0),
            null_records: AtomicU64::new(0),
            windows_opened: AtomicU64::new(0),
            windows_finalized: AtomicU64::new(0),
            windows_evicted: AtomicU64::new(0),
            late_events: AtomicU64::new(0),
            out_of_order_events: AtomicU64::new(0),
            started_at: Utc::now(),
        }
    }

    pub fn record_event(&self) {
        self.events_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.events_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record emitted output records.
    pub fn record_emitted(&self, count: u64) {
        self.records_emitted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_null(&self) {
        self.null_records.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_window_opened(&self) {
        self.windows_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_window_finalized(&self) {
        self.windows_finalized.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_window_evicted(&self) {
        self.windows_evicted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_late_event(&self) {
        self.late_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_out_of_order(&self) {
        self.out_of_order_events.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current statistics.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            events_processed: self.events_processed.load(Ordering::Relaxed),
            events_skipped: self.events_skipped.load(Ordering::Relaxed),
            records_emitted: self.records_emitted.load(Ordering::Relaxed),
            null_records: self.null_records.load(Ordering::Relaxed),
            windows_opened: self.windows_opened.load(Ordering::Relaxed),
            windows_finalized: self.windows_finalized.load(Ordering::Relaxed),
            windows_evicted: self.windows_evicted.load(Ordering::Relaxed),
            late_events: self.late_events.load(Ordering::Relaxed),
            out_of_order_events: self.out_of_order_events.load(Ordering::Relaxed),
            started_at: self.started_at,
            elapsed_ms: (Utc::now() - self.started_at).num_milliseconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.snapshot();
        format!(
            "Engine Statistics:\n\
             - Events processed: {}\n\
             - Events skipped: {}\n\
             - Records emitted: {} ({} null)\n\
             - Windows opened/finalized/evicted: {}/{}/{}\n\
             - Late events dropped: {}\n\
             - Out-of-order events: {}\n\
             - Elapsed: {} ms",
            stats.events_processed,
            stats.events_skipped,
            stats.records_emitted,
            stats.null_records,
            stats.windows_opened,
            stats.windows_finalized,
            stats.windows_evicted,
            stats.late_events,
            stats.out_of_order_events,
            stats.elapsed_ms
        )
    }

    /// Reset all counters.
    pub fn reset(&self) {
        for counter in [
            &self.events_processed,
            &self.events_skipped,
            &self.records_emitted,
            &self.null_records,
            &self.windows_opened,
            &self.windows_finalized,
            &self.windows_evicted,
            &self.late_events,
            &self.out_of_order_events,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

impl Default for EngineStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`EngineStats`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub events_processed: u64,
    pub events_skipped: u64,
    pub records_emitted: u64,
    pub null_records: u64,
    pub windows_opened: u64,
    pub windows_finalized: u64,
    pub windows_evicted: u64,
    pub late_events: u64,
    pub out_of_order_events: u64,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

/// Thread-safe shared engine stats.
pub type SharedEngineStats = Arc<EngineStats>;

/// Create a new shared stats instance.
pub fn create_shared_stats() -> SharedEngineStats {
    Arc::new(EngineStats::new())
}

//! Activity statistics for the aggregation engines.
//!
//! Engines count what they process, emit and discard so runners and the CLI
//! can report on a run without inspecting engine state.

pub mod counters;

// Re-export commonly used types
pub use counters::{create_shared_stats, EngineStats, SharedEngineStats, StatsSnapshot};

//! Core aggregation engines.
//!
//! This module contains:
//! - The keyed state store shared by all engines
//! - Aggregate functions and ordering checks
//! - The hopping window, sliding buffer and cross-sectional engines
//! - Output records and sinks

pub mod aggregate;
pub mod engine;
pub mod hopping;
pub mod ordering;
pub mod output;
pub mod sliding;
pub mod snapshot;
pub mod store;

// Re-export commonly used types
pub use aggregate::{Accumulator, AggregateFn, CompensatedSum, SlidingAggregate};
pub use engine::{AnyEngine, Engine, EngineKind, EngineSnapshot};
pub use hopping::{HoppingConfig, HoppingWindowEngine, Window, WindowResult, WindowView};
pub use ordering::{OrderingMode, OutOfOrderEvent};
pub use output::{JsonLinesSink, OutputRecord, OutputSink, SharedSink, SinkError};
pub use sliding::{SlidingBufferEngine, SlidingConfig, SlidingResult, SlidingState};
pub use snapshot::{
    CrossSectionalConfig, CrossSectionalEngine, MetricKind, MetricSpec, RecomputePolicy,
    SnapshotResult, SnapshotSlot,
};
pub use store::KeyedStore;

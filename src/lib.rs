//! Streamfold - keyed streaming aggregation engines.
//!
//! This library turns a stream of timestamped, keyed events into derived
//! records. Three engines share one event contract:
//!
//! - **Hopping windows**: fixed-size windows advancing by a step, finalized
//!   when a later event for the same key passes their end
//! - **Sliding buffers**: the last N values per key with O(1) running stats
//! - **Cross-sectional snapshots**: metrics over the latest event of every key
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Streamfold                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐       │
//! │  │   Source    │──▶│   Engine    │──▶│    Sink     │       │
//! │  │ (JSON lines)│   │ (per key)   │   │ (records)   │       │
//! │  └─────────────┘   └─────────────┘   └─────────────┘       │
//! │         │                 │                                 │
//! │         ▼                 ▼                                 │
//! │  ┌─────────────┐   ┌─────────────┐                         │
//! │  │   Shards    │   │    Stats    │                         │
//! │  │ (by key)    │   │ (counters)  │                         │
//! │  └─────────────┘   └─────────────┘                         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use streamfold::core::{Engine, SlidingBufferEngine, SlidingConfig};
//! use streamfold::source::Event;
//!
//! let mut engine = SlidingBufferEngine::new(SlidingConfig::default()).unwrap();
//! let out = engine.feed(&Event::new(0, "A").with_field("value", 10.5));
//!
//! // Not primed yet: the record is emitted with an explicit null value.
//! assert_eq!(out[0].value, None);
//! ```

pub mod config;
pub mod core;
pub mod shard;
pub mod source;
pub mod stats;

#[cfg(feature = "service")]
pub mod service;

// Re-export key types at crate root for convenience
pub use config::{Config, ConfigError};
pub use core::{
    AnyEngine, CrossSectionalEngine, Engine, EngineKind, HoppingWindowEngine, OutputRecord,
    OutputSink, SlidingBufferEngine,
};
pub use shard::{run_sharded, ShardError};
pub use source::{Event, GroupKey, Timestamp};
pub use stats::{EngineStats, SharedEngineStats};

#[cfg(feature = "service")]
pub use service::{spawn_engine, EngineHandle, ServiceError};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_engine_builds() {
        let engine = AnyEngine::from_config(&Config::default()).unwrap();
        assert_eq!(engine.kind(), EngineKind::Hopping);
        assert!(!VERSION.is_empty());
    }
}

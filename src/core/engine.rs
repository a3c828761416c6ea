//! The common engine contract and a config-driven dispatcher.

use crate::config::{Config, ConfigError};
use crate::core::hopping::{HoppingWindowEngine, WindowView};
use crate::core::ordering::OutOfOrderEvent;
use crate::core::output::OutputRecord;
use crate::core::sliding::SlidingBufferEngine;
use crate::core::snapshot::{CrossSectionalEngine, SnapshotSlot};
use crate::source::types::{Event, GroupKey};
use crate::stats::SharedEngineStats;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A stateful consumer of events.
///
/// `feed` is synchronous and atomic with respect to the event's key: when it
/// returns, the engine is in a consistent state that can be inspected or fed
/// again.
pub trait Engine {
    type Output: Into<OutputRecord>;

    fn name(&self) -> &'static str;

    /// Apply one event, returning the records it produced.
    fn feed(&mut self, event: &Event) -> Vec<Self::Output>;

    /// Apply events in order, concatenating their records.
    fn feed_all<'a, I>(&mut self, events: I) -> Vec<Self::Output>
    where
        I: IntoIterator<Item = &'a Event>,
    {
        let mut outputs = Vec::new();
        for event in events {
            outputs.extend(self.feed(event));
        }
        outputs
    }

    /// Drain strict-mode ordering warnings.
    fn take_warnings(&mut self) -> Vec<OutOfOrderEvent>;

    fn stats(&self) -> &SharedEngineStats;
}

/// Which engine to run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    #[default]
    Hopping,
    Sliding,
    CrossSectional,
}

impl EngineKind {
    pub fn name(&self) -> &'static str {
        match self {
            EngineKind::Hopping => "hopping",
            EngineKind::Sliding => "sliding",
            EngineKind::CrossSectional => "cross_sectional",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EngineKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "hopping" => Ok(EngineKind::Hopping),
            "sliding" => Ok(EngineKind::Sliding),
            "cross_sectional" => Ok(EngineKind::CrossSectional),
            _ => Err(ConfigError::UnknownEngine(s.to_string())),
        }
    }
}

/// Any of the three engines, chosen at runtime.
pub enum AnyEngine {
    Hopping(HoppingWindowEngine),
    Sliding(SlidingBufferEngine),
    CrossSectional(CrossSectionalEngine),
}

impl AnyEngine {
    /// Build the engine selected by `config.engine`.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Self::build(config.engine, config)
    }

    /// Build a specific engine from its section of `config`.
    pub fn build(kind: EngineKind, config: &Config) -> Result<Self, ConfigError> {
        Ok(match kind {
            EngineKind::Hopping => AnyEngine::Hopping(HoppingWindowEngine::new(config.hopping.clone())?),
            EngineKind::Sliding => AnyEngine::Sliding(SlidingBufferEngine::new(config.sliding.clone())?),
            EngineKind::CrossSectional => AnyEngine::CrossSectional(CrossSectionalEngine::new(
                config.cross_sectional.clone(),
            )?),
        })
    }

    /// Report into an existing stats instance.
    pub fn with_stats(self, stats: SharedEngineStats) -> Self {
        match self {
            AnyEngine::Hopping(e) => AnyEngine::Hopping(e.with_stats(stats)),
            AnyEngine::Sliding(e) => AnyEngine::Sliding(e.with_stats(stats)),
            AnyEngine::CrossSectional(e) => AnyEngine::CrossSectional(e.with_stats(stats)),
        }
    }

    pub fn kind(&self) -> EngineKind {
        match self {
            AnyEngine::Hopping(_) => EngineKind::Hopping,
            AnyEngine::Sliding(_) => EngineKind::Sliding,
            AnyEngine::CrossSectional(_) => EngineKind::CrossSectional,
        }
    }

    /// Read-only dump of all live state.
    pub fn inspect(&self) -> EngineSnapshot {
        match self {
            AnyEngine::Hopping(engine) => EngineSnapshot::Hopping {
                windows: engine
                    .keys()
                    .map(|key| {
                        let mut views = engine.list_retained_windows(key);
                        views.extend(engine.list_open_windows(key));
                        (key.to_owned(), views)
                    })
                    .collect(),
            },
            AnyEngine::Sliding(engine) => EngineSnapshot::Sliding {
                buffers: engine
                    .keys()
                    .map(|key| (key.to_owned(), engine.peek_buffer(key)))
                    .collect(),
            },
            AnyEngine::CrossSectional(engine) => EngineSnapshot::CrossSectional {
                slots: engine.peek_all_slots(),
            },
        }
    }
}

impl Engine for AnyEngine {
    type Output = OutputRecord;

    fn name(&self) -> &'static str {
        match self {
            AnyEngine::Hopping(e) => e.name(),
            AnyEngine::Sliding(e) => e.name(),
            AnyEngine::CrossSectional(e) => e.name(),
        }
    }

    fn feed(&mut self, event: &Event) -> Vec<OutputRecord> {
        match self {
            AnyEngine::Hopping(e) => e.feed(event).into_iter().map(Into::into).collect(),
            AnyEngine::Sliding(e) => e.feed(event).into_iter().map(Into::into).collect(),
            AnyEngine::CrossSectional(e) => e.feed(event).into_iter().map(Into::into).collect(),
        }
    }

    fn take_warnings(&mut self) -> Vec<OutOfOrderEvent> {
        match self {
            AnyEngine::Hopping(e) => e.take_warnings(),
            AnyEngine::Sliding(e) => e.take_warnings(),
            AnyEngine::CrossSectional(e) => e.take_warnings(),
        }
    }

    fn stats(&self) -> &SharedEngineStats {
        match self {
            AnyEngine::Hopping(e) => e.stats(),
            AnyEngine::Sliding(e) => e.stats(),
            AnyEngine::CrossSectional(e) => e.stats(),
        }
    }
}

/// Live engine state for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "engine", rename_all = "snake_case")]
pub enum EngineSnapshot {
    /// Retained then open windows per key
    Hopping {
        windows: IndexMap<GroupKey, Vec<WindowView>>,
    },
    Sliding {
        buffers: IndexMap<GroupKey, Vec<f64>>,
    },
    CrossSectional {
        slots: Vec<SnapshotSlot>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_kind_parsing() {
        assert_eq!("cross-sectional".parse::<EngineKind>().unwrap(), EngineKind::CrossSectional);
        assert_eq!("Hopping".parse::<EngineKind>().unwrap(), EngineKind::Hopping);
        assert!("tumbling".parse::<EngineKind>().is_err());
    }

    #[test]
    fn test_build_each_kind() {
        let config = Config::default();
        for kind in [EngineKind::Hopping, EngineKind::Sliding, EngineKind::CrossSectional] {
            let engine = AnyEngine::build(kind, &config).unwrap();
            assert_eq!(engine.kind(), kind);
            assert_eq!(engine.name(), kind.name());
        }
    }

    #[test]
    fn test_feed_all_concatenates_in_order() {
        let mut config = Config::default();
        config.engine = EngineKind::Sliding;
        config.sliding.capacity = 1;
        let mut engine = AnyEngine::from_config(&config).unwrap();

        let events: Vec<Event> = (0..3)
            .map(|i| Event::new(i, "A").with_field("value", i as f64))
            .collect();
        let outputs = engine.feed_all(&events);

        let times: Vec<_> = outputs.iter().map(|r| r.time()).collect();
        assert_eq!(times, vec![0, 1, 2]);
    }

    #[test]
    fn test_inspect_hopping() {
        let mut config = Config::default();
        config.hopping.window_size = std::time::Duration::from_millis(10);
        config.hopping.step = std::time::Duration::from_millis(10);
        let mut engine = AnyEngine::from_config(&config).unwrap();

        engine.feed(&Event::new(1, "A").with_field("value", 1.0));
        engine.feed(&Event::new(11, "A").with_field("value", 1.0));

        match engine.inspect() {
            EngineSnapshot::Hopping { windows } => {
                let views = &windows["A"];
                assert_eq!(views.len(), 2);
                assert!(views[0].finalized);
                assert!(!views[1].finalized);
            }
            other => panic!("unexpected snapshot {other:?}"),
        }
    }
}

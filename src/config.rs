//! Configuration for streamfold engines and the CLI.

use crate::core::engine::EngineKind;
use crate::core::hopping::HoppingConfig;
use crate::core::ordering::OrderingMode;
use crate::core::sliding::SlidingConfig;
use crate::core::snapshot::CrossSectionalConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration: one section per engine plus runner settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Engine the CLI feeds events into
    pub engine: EngineKind,

    pub hopping: HoppingConfig,

    pub sliding: SlidingConfig,

    pub cross_sectional: CrossSectionalConfig,

    /// Number of key shards for parallel runs (1 = single engine)
    pub shards: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            engine: EngineKind::Hopping,
            hopping: HoppingConfig::default(),
            sliding: SlidingConfig::default(),
            cross_sectional: CrossSectionalConfig::default(),
            shards: 1,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from an explicit file.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(ConfigError::Parse)
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    /// Save configuration to an explicit file.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("streamfold")
            .join("config.json")
    }

    /// Check every section, not just the selected engine's.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.shards == 0 {
            return Err(ConfigError::ZeroShards);
        }
        self.hopping.validate()?;
        self.sliding.validate()?;
        self.cross_sectional.validate()?;
        Ok(())
    }

    /// Switch every engine section to strict ordering.
    pub fn with_strict_ordering(mut self) -> Self {
        self.hopping.ordering = OrderingMode::Strict;
        self.sliding.ordering = OrderingMode::Strict;
        self.cross_sectional.ordering = OrderingMode::Strict;
        self
    }
}

/// Configuration errors.
///
/// Value errors are raised when an engine is constructed; file errors when a
/// configuration is loaded or saved.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("window_size must be positive, got {0} ms")]
    NonPositiveWindowSize(u128),
    #[error("step must be positive, got {0} ms")]
    NonPositiveStep(u128),
    #[error("{name} of {millis} ms does not fit in a timestamp")]
    DurationOverflow { name: &'static str, millis: u128 },
    #[error("capacity must be positive")]
    ZeroCapacity,
    #[error("shard count must be positive")]
    ZeroShards,
    #[error("field name must not be empty")]
    EmptyField,
    #[error("unknown engine '{0}'")]
    UnknownEngine(String),
    #[error("unknown aggregate '{0}'")]
    UnknownAggregate(String),
    #[error("invalid metric: {0}")]
    InvalidMetric(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse error: {0}")]
    Parse(serde_json::Error),
    #[error("serialize error: {0}")]
    Serialize(serde_json::Error),
}

/// Serde support for `Duration` as integer milliseconds.
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

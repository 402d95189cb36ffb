//! # Configuration
//!
//! Layered configuration for the engine: built-in defaults, then
//! `config/statepath.toml`, then `config/statepath.{env}.toml`, then
//! `STATEPATH__`-prefixed environment variables.
//!
//! ```rust,no_run
//! use statepath::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let capacity = manager.config().path_cache.max_capacity;
//! # Ok(())
//! # }
//! ```
//!
//! `STATEPATH__PATH_CACHE__MAX_CAPACITY=500` overrides `path_cache.max_capacity`.

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatePathConfig {
    pub environment: String,
    pub path_cache: PathCacheConfig,
    pub reconciliation: ReconciliationConfig,
    pub logging: LoggingConfig,
}

/// Bounds of the per-engine path/state cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathCacheConfig {
    pub max_capacity: u64,
    /// 0 disables expiry; entries then live until evicted by recency
    pub time_to_live_seconds: u64,
}

impl PathCacheConfig {
    pub fn time_to_live(&self) -> Option<Duration> {
        (self.time_to_live_seconds > 0).then(|| Duration::from_secs(self.time_to_live_seconds))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconciliationConfig {
    /// Persist a failure event when digesting a line fails
    pub record_failure_events: bool,
    /// Largest batch accepted by `digest_batch`
    pub max_batch_lines: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for StatePathConfig {
    /// Default configuration suitable for production
    fn default() -> Self {
        Self {
            environment: "production".to_string(),
            path_cache: PathCacheConfig::default(),
            reconciliation: ReconciliationConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for PathCacheConfig {
    fn default() -> Self {
        Self {
            max_capacity: 1_000,
            time_to_live_seconds: 0,
        }
    }
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            record_failure_events: true,
            max_batch_lines: 10_000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl StatePathConfig {
    /// Create test-optimized configuration with a small, short-lived cache
    pub fn for_test() -> Self {
        Self {
            environment: "test".to_string(),
            path_cache: PathCacheConfig {
                max_capacity: 100,
                time_to_live_seconds: 0,
            },
            reconciliation: ReconciliationConfig {
                record_failure_events: true,
                max_batch_lines: 1_000,
            },
            logging: LoggingConfig {
                level: "debug".to_string(),
                json: false,
            },
        }
    }

    /// Create development configuration that picks up graph edits quickly
    pub fn for_development() -> Self {
        Self {
            environment: "development".to_string(),
            path_cache: PathCacheConfig {
                max_capacity: 500,
                time_to_live_seconds: 30,
            },
            logging: LoggingConfig {
                level: "debug".to_string(),
                json: false,
            },
            ..Self::default()
        }
    }

    /// Built-in preset for an environment name
    pub fn for_environment(environment: &str) -> Self {
        match environment {
            "test" => Self::for_test(),
            "development" => Self::for_development(),
            other => Self {
                environment: other.to_string(),
                ..Self::default()
            },
        }
    }

    /// Parse a TOML document layered over the defaults
    pub fn from_toml_str(toml: &str) -> ConfigResult<Self> {
        let config: Self = config::Config::builder()
            .add_source(config::Config::try_from(&Self::default())?)
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.path_cache.max_capacity == 0 {
            return Err(ConfigurationError::invalid_value(
                "path_cache.max_capacity",
                "0",
                "cache capacity must be greater than zero",
            ));
        }

        if self.reconciliation.max_batch_lines == 0 {
            return Err(ConfigurationError::invalid_value(
                "reconciliation.max_batch_lines",
                "0",
                "batch limit must be greater than zero",
            ));
        }

        if let Err(err) = EnvFilter::try_new(&self.logging.level) {
            return Err(ConfigurationError::invalid_value(
                "logging.level",
                self.logging.level.clone(),
                err.to_string(),
            ));
        }

        Ok(())
    }
}

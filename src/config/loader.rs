//! Configuration Loader
//!
//! Environment-aware configuration loading: built-in preset for the detected
//! environment, then optional TOML files, then environment variables.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use super::error::{ConfigResult, ConfigurationError};
use super::StatePathConfig;

const ENV_PREFIX: &str = "STATEPATH";
const ENV_SEPARATOR: &str = "__";

#[derive(Debug)]
pub struct ConfigManager {
    config: StatePathConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with explicit environment
    ///
    /// An explicitly given directory must exist; the default `config/`
    /// directory is optional.
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        Self::load_with_variables(config_dir, environment, None)
    }

    /// Like [`ConfigManager::load_from_directory_with_env`], reading
    /// `STATEPATH__*` overrides from `variables` instead of the process
    /// environment
    pub fn load_with_overrides(
        config_dir: Option<PathBuf>,
        environment: &str,
        variables: HashMap<String, String>,
    ) -> ConfigResult<Arc<ConfigManager>> {
        Self::load_with_variables(config_dir, environment, Some(variables))
    }

    fn load_with_variables(
        config_dir: Option<PathBuf>,
        environment: &str,
        variables: Option<HashMap<String, String>>,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let explicit = config_dir.is_some();
        let config_directory = config_dir.unwrap_or_else(Self::default_config_directory);

        if explicit && !config_directory.is_dir() {
            return Err(ConfigurationError::DirectoryNotFound {
                path: config_directory,
            });
        }

        debug!(
            environment = environment,
            directory = %config_directory.display(),
            "Loading configuration"
        );

        let mut config = Self::load_and_merge_config(&config_directory, environment, variables)?;
        config.environment = environment.to_string();
        config.validate()?;

        debug!(
            environment = environment,
            max_capacity = config.path_cache.max_capacity,
            max_batch_lines = config.reconciliation.max_batch_lines,
            "Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    /// Wrap an already-built configuration
    pub fn from_config(config: StatePathConfig) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            environment: config.environment.clone(),
            config,
            config_directory: Self::default_config_directory(),
        }))
    }

    pub fn config(&self) -> &StatePathConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// Detect the current environment from `STATEPATH_ENV`
    pub fn detect_environment() -> String {
        crate::logging::get_environment()
    }

    fn default_config_directory() -> PathBuf {
        PathBuf::from("config")
    }

    fn load_and_merge_config(
        config_directory: &Path,
        environment: &str,
        variables: Option<HashMap<String, String>>,
    ) -> ConfigResult<StatePathConfig> {
        let preset = StatePathConfig::for_environment(environment);
        let base_file = config_directory.join("statepath.toml");
        let env_file = config_directory.join(format!("statepath.{environment}.toml"));

        let variables =
            variables.map(|vars| vars.into_iter().collect::<config::Map<String, String>>());

        let config = config::Config::builder()
            .add_source(config::Config::try_from(&preset)?)
            .add_source(config::File::from(base_file).required(false))
            .add_source(config::File::from(env_file).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator(ENV_SEPARATOR)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true)
                    .source(variables),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }
}

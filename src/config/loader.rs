//! Configuration Loader
//!
//! Environment-aware configuration loading. Handles YAML file discovery, environment
//! detection, environment-section merging and `SHEETGUARD__*` variable overrides.

use super::error::{ConfigResult, ConfigurationError};
use super::GuardConfig;
use crate::constants::{env_vars, environments};
use config::{Config, Environment, File, FileFormat};
use serde_yaml::Value as YamlValue;
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

const CONFIG_FILE_NAMES: [&str; 2] = ["sheetguard.yaml", "sheetguard.yml"];

/// Loaded configuration together with where it came from
#[derive(Debug)]
pub struct ConfigManager {
    config: GuardConfig,
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

    /// Load configuration from a specific directory with explicit environment.
    /// Useful for testing without modifying global environment variables.
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(Self::default_config_directory);

        debug!(
            environment = environment,
            directory = %config_directory.display(),
            "Loading configuration"
        );

        let config = Self::load_and_merge_config(&config_directory, environment, None)?;
        config.validate()?;

        info!(
            environment = environment,
            max_attempts = config.retry.max_attempts,
            requests_per_second = config.rate_limiter.requests_per_second,
            breakers_enabled = config.circuit_breakers.enabled,
            "Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    /// Wrap an already-built configuration, validating it first
    pub fn from_config(config: GuardConfig) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            environment: config.execution.environment.clone(),
            config,
            config_directory: PathBuf::from("config"),
        }))
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    /// Configuration as JSON, for diagnostics output
    pub fn debug_config(&self) -> serde_json::Value {
        serde_json::to_value(&self.config).unwrap_or(serde_json::Value::Null)
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// `SHEETGUARD_ENV || APP_ENV || 'development'`, lowercased
    pub fn detect_environment() -> String {
        env::var(env_vars::ENVIRONMENT)
            .or_else(|_| env::var(env_vars::FALLBACK_ENVIRONMENT))
            .unwrap_or_else(|_| environments::DEVELOPMENT.to_string())
            .to_lowercase()
    }

    fn default_config_directory() -> PathBuf {
        if let Ok(dir) = env::var(env_vars::CONFIG_DIR) {
            return PathBuf::from(dir);
        }

        let possible_dirs = [PathBuf::from("config"), PathBuf::from("../config")];
        for dir in possible_dirs {
            if CONFIG_FILE_NAMES.iter().any(|name| dir.join(name).exists()) {
                debug!(directory = %dir.display(), "Found config directory");
                return dir;
            }
        }

        PathBuf::from("config")
    }

    /// Safely read a configuration file with size limits
    fn read_config_file_safely(path: &Path) -> ConfigResult<String> {
        const MAX_CONFIG_FILE_SIZE: u64 = 10 * 1024 * 1024;

        let metadata = std::fs::metadata(path)
            .map_err(|e| ConfigurationError::file_read_error(path.display().to_string(), e))?;

        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigurationError::invalid_value(
                "file_size",
                metadata.len().to_string(),
                format!(
                    "Configuration file too large ({}MB > {}MB limit)",
                    metadata.len() / (1024 * 1024),
                    MAX_CONFIG_FILE_SIZE / (1024 * 1024)
                ),
            ));
        }

        if !metadata.is_file() {
            return Err(ConfigurationError::invalid_value(
                "file_type",
                "directory or special file",
                "Configuration path must point to a regular file",
            ));
        }

        std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::file_read_error(path.display().to_string(), e))
    }

    fn find_config_file(config_directory: &Path) -> ConfigResult<PathBuf> {
        let mut searched_paths = Vec::new();

        for name in CONFIG_FILE_NAMES {
            let config_path = config_directory.join(name);
            searched_paths.push(config_path.clone());

            if config_path.exists() {
                debug!(path = %config_path.display(), "Found configuration file");
                return Ok(config_path);
            }
        }

        Err(ConfigurationError::config_file_not_found(searched_paths))
    }

    /// Base values, then the environment section, then `SHEETGUARD__*` variables.
    ///
    /// `env_source` replaces the process environment when given.
    fn load_and_merge_config(
        config_directory: &Path,
        environment: &str,
        env_source: Option<HashMap<String, String>>,
    ) -> ConfigResult<GuardConfig> {
        let config_file = Self::find_config_file(config_directory)?;
        let yaml_content = Self::read_config_file_safely(&config_file)?;

        let mut yaml_data: YamlValue = serde_yaml::from_str(&yaml_content)
            .map_err(|e| ConfigurationError::invalid_yaml(config_file.display().to_string(), e))?;
        if yaml_data.is_null() {
            yaml_data = YamlValue::Mapping(Default::default());
        }

        if let Some(env_overrides) = yaml_data
            .get(YamlValue::String(environment.to_string()))
            .cloned()
        {
            debug!(environment = environment, "Applying environment-specific overrides");
            Self::merge_yaml_values(&mut yaml_data, env_overrides);
        }

        if let YamlValue::Mapping(ref mut map) = yaml_data {
            for name in environments::ALL {
                map.remove(YamlValue::String(name.to_string()));
            }
        }

        let mut config = Self::apply_variable_overrides(&yaml_data, env_source)
            .map_err(|e| ConfigurationError::environment_config_error(environment, e))?;

        config.execution.environment = environment.to_string();
        Ok(config)
    }

    /// Layer `SHEETGUARD__SECTION__KEY` variables over the merged YAML
    fn apply_variable_overrides(
        yaml_data: &YamlValue,
        env_source: Option<HashMap<String, String>>,
    ) -> ConfigResult<GuardConfig> {
        let base_json = serde_json::to_string(yaml_data).map_err(|e| {
            ConfigurationError::invalid_yaml("merged configuration", e)
        })?;

        let source = env_source.map(|vars| vars.into_iter().collect());
        let layered = Config::builder()
            .add_source(File::from_str(&base_json, FileFormat::Json))
            .add_source(
                Environment::with_prefix(env_vars::OVERRIDE_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .source(source),
            )
            .build()
            .map_err(|e| {
                ConfigurationError::environment_override_error(env_vars::OVERRIDE_PREFIX, e)
            })?;

        layered.try_deserialize().map_err(|e| {
            warn!(error = %e, "Configuration overrides could not be applied");
            ConfigurationError::environment_override_error(env_vars::OVERRIDE_PREFIX, e)
        })
    }

    /// Recursively merge YAML values (environment overrides into base config)
    fn merge_yaml_values(base: &mut YamlValue, override_value: YamlValue) {
        match (&mut *base, override_value) {
            (YamlValue::Mapping(base_map), YamlValue::Mapping(override_map)) => {
                for (key, value) in override_map {
                    if let Some(existing_value) = base_map.get_mut(&key) {
                        Self::merge_yaml_values(existing_value, value);
                    } else {
                        base_map.insert(key, value);
                    }
                }
            }
            (base_ref, override_val) => {
                *base_ref = override_val;
            }
        }
    }
}

static GLOBAL_CONFIG: OnceLock<Arc<ConfigManager>> = OnceLock::new();

impl ConfigManager {
    /// Get or initialize the global configuration instance, falling back to defaults
    pub fn global() -> Arc<ConfigManager> {
        GLOBAL_CONFIG
            .get_or_init(|| {
                ConfigManager::load().unwrap_or_else(|e| {
                    warn!(error = %e, "Configuration loading failed, using defaults");
                    Arc::new(ConfigManager {
                        environment: Self::detect_environment(),
                        config: GuardConfig::default(),
                        config_directory: PathBuf::from("config"),
                    })
                })
            })
            .clone()
    }
}

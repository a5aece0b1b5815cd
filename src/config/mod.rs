//! # SheetGuard Configuration System
//!
//! YAML-based configuration with environment-aware overrides.
//!
//! ## Architecture
//!
//! - **Single Source of Truth**: `config/sheetguard.yaml` holds base values
//! - **Environment Awareness**: `development` / `test` / `production` sections are deep-merged
//!   over the base values
//! - **Operator Overrides**: `SHEETGUARD__SECTION__KEY` environment variables win over both
//! - **Explicit Validation**: every section is validated after loading
//!
//! ## Usage
//!
//! ```rust,no_run
//! use sheetguard_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//!
//! let retry = &manager.config().retry;
//! let base_delay = retry.base_delay();
//! let max_cells = manager.config().policy.default_max_cells_affected;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use crate::constants::environments;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure for the mutation layer
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Effect-scope limits and submission bounds
    pub policy: PolicyConfig,

    /// Backoff for transient remote failures
    pub retry: RetryConfig,

    /// Token bucket protecting the provider quota
    pub rate_limiter: RateLimiterConfig,

    /// Per-endpoint circuit breakers
    pub circuit_breakers: CircuitBreakerSettings,

    /// Region read cache
    pub cache: CacheConfig,

    /// Pre-mutation snapshots
    pub snapshot: SnapshotConfig,

    /// Global cap on in-flight remote calls
    pub concurrency: ConcurrencyConfig,

    /// Batch compilation
    pub batching: BatchingConfig,

    /// Read deduplication
    pub deduplication: DeduplicationConfig,

    /// Deadlines and environment
    pub execution: ExecutionConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Cells a single document may be affected by when the caller sets no limit
    pub default_max_cells_affected: u64,
    /// Hard ceiling no caller-supplied limit may exceed
    pub absolute_max_cells_affected: u64,
    pub max_intents_per_submission: usize,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            default_max_cells_affected: 50_000,
            absolute_max_cells_affected: 1_000_000,
            max_intents_per_submission: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Relative jitter amplitude in `[0, 1/3]`
    pub jitter_factor: f64,
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 200,
            max_delay_ms: 30_000,
            jitter_factor: 0.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimiterConfig {
    pub enabled: bool,
    pub requests_per_second: f64,
    pub burst_capacity: u32,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_second: 5.0,
            burst_capacity: 10,
        }
    }
}

/// Circuit breaker configuration integrated with YAML config
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    /// Whether circuit breakers are enabled globally
    pub enabled: bool,

    pub global_settings: CircuitBreakerGlobalSettings,

    /// Default configuration for new circuit breakers
    pub default_config: CircuitBreakerComponentConfig,

    /// Specific configurations keyed by endpoint name
    pub component_configs: HashMap<String, CircuitBreakerComponentConfig>,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            global_settings: CircuitBreakerGlobalSettings::default(),
            default_config: CircuitBreakerComponentConfig::default(),
            component_configs: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerGlobalSettings {
    /// Soft limit on registered breakers; exceeding it only warns
    pub max_circuit_breakers: usize,
}

impl Default for CircuitBreakerGlobalSettings {
    fn default() -> Self {
        Self {
            max_circuit_breakers: 50,
        }
    }
}

/// Circuit breaker configuration for a specific endpoint from YAML
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerComponentConfig {
    /// Consecutive failures within the window before opening the circuit
    pub failure_threshold: u32,
    pub failure_window_ms: u64,
    /// Time to fail fast before a trial is allowed
    pub cool_down_ms: u64,
}

impl Default for CircuitBreakerComponentConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_window_ms: 60_000,
            cool_down_ms: 30_000,
        }
    }
}

impl CircuitBreakerSettings {
    /// Get configuration for a specific endpoint
    pub fn config_for_component(&self, component_name: &str) -> &CircuitBreakerComponentConfig {
        self.component_configs
            .get(component_name)
            .unwrap_or(&self.default_config)
    }
}

impl CircuitBreakerComponentConfig {
    /// Convert to resilience module's format
    pub fn to_resilience_config(&self) -> crate::resilience::CircuitBreakerConfig {
        crate::resilience::CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            failure_window: Duration::from_millis(self.failure_window_ms),
            cool_down: Duration::from_millis(self.cool_down_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_entries: u64,
    pub default_ttl_seconds: u64,
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_seconds)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 10_000,
            default_ttl_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SnapshotConfig {
    pub retention_seconds: u64,
    pub sweep_interval_seconds: u64,
    /// Changed cells listed per region in a diff
    pub max_diff_samples: usize,
    pub max_retained_snapshots: usize,
}

impl SnapshotConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_seconds)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            retention_seconds: 3_600,
            sweep_interval_seconds: 60,
            max_diff_samples: 50,
            max_retained_snapshots: 1_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    pub max_in_flight: usize,
    /// Callers allowed to wait for a slot before new calls are rejected
    pub max_queue_depth: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 8,
            max_queue_depth: 256,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BatchingConfig {
    /// Sub-operations per `batch_update` call
    pub max_operations_per_call: usize,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            max_operations_per_call: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DeduplicationConfig {
    pub enabled: bool,
}

impl Default for DeduplicationConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Deadline applied to a submission that does not carry its own
    pub default_deadline_ms: u64,
    pub environment: String,
}

impl ExecutionConfig {
    pub fn default_deadline(&self) -> Duration {
        Duration::from_millis(self.default_deadline_ms)
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            default_deadline_ms: 30_000,
            environment: environments::DEVELOPMENT.to_string(),
        }
    }
}

impl GuardConfig {
    /// Defaults tuned for fast deterministic tests: short backoff, no rate limiting
    pub fn for_test() -> Self {
        Self {
            retry: RetryConfig {
                max_attempts: 3,
                base_delay_ms: 10,
                max_delay_ms: 100,
                jitter_factor: 0.0,
            },
            rate_limiter: RateLimiterConfig {
                enabled: false,
                ..RateLimiterConfig::default()
            },
            snapshot: SnapshotConfig {
                sweep_interval_seconds: 3_600,
                ..SnapshotConfig::default()
            },
            execution: ExecutionConfig {
                environment: environments::TEST.to_string(),
                ..ExecutionConfig::default()
            },
            ..Self::default()
        }
    }

    /// Validate configuration for consistency and required fields
    pub fn validate(&self) -> ConfigResult<()> {
        if self.policy.default_max_cells_affected == 0 {
            return Err(ConfigurationError::invalid_value(
                "policy.default_max_cells_affected",
                "0",
                "the default effect-scope limit must be greater than 0",
            ));
        }

        if self.policy.default_max_cells_affected > self.policy.absolute_max_cells_affected {
            return Err(ConfigurationError::invalid_value(
                "policy.default_max_cells_affected",
                self.policy.default_max_cells_affected.to_string(),
                "must not exceed policy.absolute_max_cells_affected",
            ));
        }

        if self.policy.max_intents_per_submission == 0 {
            return Err(ConfigurationError::invalid_value(
                "policy.max_intents_per_submission",
                "0",
                "at least one intent per submission must be allowed",
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigurationError::invalid_value(
                "retry.max_attempts",
                "0",
                "at least one attempt is required",
            ));
        }

        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigurationError::invalid_value(
                "retry.base_delay_ms",
                self.retry.base_delay_ms.to_string(),
                "must not exceed retry.max_delay_ms",
            ));
        }

        if !(0.0..=crate::constants::MAX_JITTER_FACTOR).contains(&self.retry.jitter_factor) {
            return Err(ConfigurationError::invalid_value(
                "retry.jitter_factor",
                self.retry.jitter_factor.to_string(),
                "must be between 0 and 1/3",
            ));
        }

        if self.rate_limiter.enabled
            && !(self.rate_limiter.requests_per_second.is_finite()
                && self.rate_limiter.requests_per_second > 0.0)
        {
            return Err(ConfigurationError::invalid_value(
                "rate_limiter.requests_per_second",
                self.rate_limiter.requests_per_second.to_string(),
                "must be a positive number",
            ));
        }

        if self.rate_limiter.enabled && self.rate_limiter.burst_capacity == 0 {
            return Err(ConfigurationError::invalid_value(
                "rate_limiter.burst_capacity",
                "0",
                "burst capacity must be greater than 0",
            ));
        }

        let breakers = std::iter::once(("default_config", &self.circuit_breakers.default_config))
            .chain(
                self.circuit_breakers
                    .component_configs
                    .iter()
                    .map(|(name, config)| (name.as_str(), config)),
            );
        for (name, component) in breakers {
            component.to_resilience_config().validate().map_err(|reason| {
                ConfigurationError::invalid_value(
                    format!("circuit_breakers.{name}"),
                    format!("{component:?}"),
                    reason,
                )
            })?;
        }

        if self.cache.enabled && self.cache.max_entries == 0 {
            return Err(ConfigurationError::invalid_value(
                "cache.max_entries",
                "0",
                "an enabled cache needs room for at least one entry",
            ));
        }

        if self.snapshot.retention_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "snapshot.retention_seconds",
                "0",
                "snapshots must be retained for some time",
            ));
        }

        if self.snapshot.sweep_interval_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "snapshot.sweep_interval_seconds",
                "0",
                "sweep interval must be greater than 0",
            ));
        }

        if self.concurrency.max_in_flight == 0 {
            return Err(ConfigurationError::invalid_value(
                "concurrency.max_in_flight",
                "0",
                "at least one call must be allowed in flight",
            ));
        }

        if self.batching.max_operations_per_call == 0 {
            return Err(ConfigurationError::invalid_value(
                "batching.max_operations_per_call",
                "0",
                "batch size must be greater than 0",
            ));
        }

        if self.execution.default_deadline_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "execution.default_deadline_ms",
                "0",
                "deadline must be greater than 0",
            ));
        }

        if self.execution.environment.is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "execution.environment",
                "execution configuration",
            ));
        }

        Ok(())
    }

    /// Check if running in test environment
    pub fn is_test_environment(&self) -> bool {
        self.execution.environment == environments::TEST
    }

    /// Check if running in production environment
    pub fn is_production_environment(&self) -> bool {
        self.execution.environment == environments::PRODUCTION
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(GuardConfig::default().validate().is_ok());
        assert!(GuardConfig::for_test().validate().is_ok());
        assert!(GuardConfig::for_test().is_test_environment());
    }

    #[test]
    fn test_duration_helpers() {
        let config = GuardConfig::default();
        assert_eq!(config.retry.base_delay(), Duration::from_millis(200));
        assert_eq!(config.retry.max_delay(), Duration::from_secs(30));
        assert_eq!(config.cache.default_ttl(), Duration::from_secs(60));
        assert_eq!(config.snapshot.retention(), Duration::from_secs(3_600));
        assert_eq!(config.execution.default_deadline(), Duration::from_secs(30));
    }

    #[test]
    fn test_config_validation_errors() {
        let mut config = GuardConfig::default();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = GuardConfig::default();
        config.retry.jitter_factor = 0.5;
        assert!(config.validate().is_err());

        let mut config = GuardConfig::default();
        config.policy.default_max_cells_affected = config.policy.absolute_max_cells_affected + 1;
        assert!(config.validate().is_err());

        let mut config = GuardConfig::default();
        config.rate_limiter.requests_per_second = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_breaker_overrides_are_validated() {
        let mut config = GuardConfig::default();
        config.circuit_breakers.component_configs.insert(
            "batch_update".to_string(),
            CircuitBreakerComponentConfig {
                failure_threshold: 0,
                ..CircuitBreakerComponentConfig::default()
            },
        );

        let error = config.validate().unwrap_err();
        assert!(error.to_string().contains("circuit_breakers.batch_update"));
    }

    #[test]
    fn test_component_lookup_falls_back_to_default() {
        let mut settings = CircuitBreakerSettings::default();
        settings.component_configs.insert(
            "batch_update".to_string(),
            CircuitBreakerComponentConfig {
                failure_threshold: 2,
                ..CircuitBreakerComponentConfig::default()
            },
        );

        assert_eq!(settings.config_for_component("batch_update").failure_threshold, 2);
        assert_eq!(settings.config_for_component("read_values").failure_threshold, 5);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: GuardConfig = serde_yaml::from_str("retry:\n  max_attempts: 2\n").unwrap();
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.retry.base_delay_ms, 200);
        assert_eq!(config.cache, CacheConfig::default());
    }
}

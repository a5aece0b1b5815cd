//! # System Constants
//!
//! Stable identifiers shared across components: error codes surfaced to callers,
//! logical endpoint names used for circuit breakers and metrics, and environment
//! variable names read by the logging and configuration layers.

/// Error codes surfaced on every [`crate::GuardError`]
pub mod error_codes {
    pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
    pub const EFFECT_SCOPE_EXCEEDED: &str = "EFFECT_SCOPE_EXCEEDED";
    pub const STATE_MISMATCH: &str = "STATE_MISMATCH";
    pub const TRANSIENT_REMOTE_ERROR: &str = "TRANSIENT_REMOTE_ERROR";
    pub const PERMANENT_REMOTE_ERROR: &str = "PERMANENT_REMOTE_ERROR";
    pub const CIRCUIT_OPEN: &str = "CIRCUIT_OPEN";
    pub const CAPACITY_EXCEEDED: &str = "CAPACITY_EXCEEDED";
    pub const SNAPSHOT_NOT_FOUND: &str = "SNAPSHOT_NOT_FOUND";
    pub const CONFIGURATION_ERROR: &str = "CONFIGURATION_ERROR";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
}

/// Logical endpoint names of the remote document service
pub mod endpoints {
    pub const BATCH_UPDATE: &str = "batch_update";
    pub const READ_VALUES: &str = "read_values";
}

/// Cache query shapes
pub mod query_shapes {
    /// Plain values read of a region
    pub const VALUES: &str = "values";
}

/// Environment variables consulted at startup
pub mod env_vars {
    pub const ENVIRONMENT: &str = "SHEETGUARD_ENV";
    pub const FALLBACK_ENVIRONMENT: &str = "APP_ENV";
    pub const LOG_FORMAT: &str = "SHEETGUARD_LOG_FORMAT";
    pub const CONFIG_DIR: &str = "SHEETGUARD_CONFIG_DIR";
    /// Prefix for `config` crate overrides, e.g. `SHEETGUARD__RETRY__MAX_ATTEMPTS=3`
    pub const OVERRIDE_PREFIX: &str = "SHEETGUARD";
}

/// Environments recognised by the configuration loader
pub mod environments {
    pub const DEVELOPMENT: &str = "development";
    pub const TEST: &str = "test";
    pub const PRODUCTION: &str = "production";

    pub const ALL: [&str; 3] = [DEVELOPMENT, TEST, PRODUCTION];
}

/// Largest jitter factor for which successive backoff delays never decrease
pub const MAX_JITTER_FACTOR: f64 = 1.0 / 3.0;

/// Upper bound on the exponent used for backoff growth
pub const MAX_BACKOFF_EXPONENT: u32 = 30;

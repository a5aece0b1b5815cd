//! # Circuit Breaker Configuration
//!
//! Runtime configuration of a single breaker. The YAML-facing settings live in
//! [`crate::config::CircuitBreakerSettings`] and convert into this type per endpoint.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a single circuit breaker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures (within the window) before opening the circuit
    pub failure_threshold: u32,

    /// Consecutive failures further apart than this start a new streak
    pub failure_window: Duration,

    /// Time to fail fast in the open state before allowing a trial
    pub cool_down: Duration,
}

impl CircuitBreakerConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.failure_threshold == 0 {
            return Err("failure_threshold must be greater than 0".to_string());
        }

        if self.failure_threshold > 100 {
            return Err("failure_threshold should not exceed 100".to_string());
        }

        if self.failure_window.is_zero() {
            return Err("failure_window must be greater than 0".to_string());
        }

        if self.cool_down.is_zero() {
            return Err("cool_down must be greater than 0".to_string());
        }

        if self.cool_down > Duration::from_secs(600) {
            return Err("cool_down should not exceed 600 seconds".to_string());
        }

        Ok(())
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_window: Duration::from_secs(60),
            cool_down: Duration::from_secs(30),
        }
    }
}

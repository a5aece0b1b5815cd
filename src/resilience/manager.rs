//! # Circuit Breaker Manager
//!
//! Registry of per-endpoint circuit breakers. Breakers are created lazily from configuration
//! (endpoint overrides or the defaults) the first time an endpoint is called.

use crate::config::CircuitBreakerSettings;
use crate::resilience::{CircuitBreaker, CircuitState, SystemCircuitBreakerMetrics};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct CircuitBreakerManager {
    circuit_breakers: Arc<DashMap<String, Arc<CircuitBreaker>>>,
    config: CircuitBreakerSettings,
}

impl CircuitBreakerManager {
    pub fn from_config(config: &CircuitBreakerSettings) -> Self {
        info!(
            enabled = config.enabled,
            overrides = config.component_configs.len(),
            "Initializing circuit breaker manager"
        );

        Self {
            circuit_breakers: Arc::new(DashMap::new()),
            config: config.clone(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Get or create the circuit breaker for an endpoint
    pub fn get_circuit_breaker(&self, component_name: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.circuit_breakers.get(component_name) {
            return Arc::clone(breaker.value());
        }

        let current_count = self.circuit_breakers.len();
        if current_count >= self.config.global_settings.max_circuit_breakers {
            warn!(
                component = component_name,
                current_count = current_count,
                max_allowed = self.config.global_settings.max_circuit_breakers,
                "Maximum circuit breaker count reached, creating anyway"
            );
        }

        let entry = self
            .circuit_breakers
            .entry(component_name.to_string())
            .or_insert_with(|| {
                let component_config = self
                    .config
                    .config_for_component(component_name)
                    .to_resilience_config();
                info!(component = component_name, "Created new circuit breaker");
                Arc::new(CircuitBreaker::new(component_name, component_config))
            });
        Arc::clone(entry.value())
    }

    pub fn list_components(&self) -> Vec<String> {
        self.circuit_breakers
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn get_system_metrics(&self) -> SystemCircuitBreakerMetrics {
        let mut system_metrics = SystemCircuitBreakerMetrics::new();
        for entry in self.circuit_breakers.iter() {
            system_metrics.add_circuit_breaker(entry.key().clone(), entry.value().metrics());
        }
        system_metrics
    }

    /// Force open all circuit breakers (emergency stop)
    pub fn force_open_all(&self) {
        warn!("Forcing all circuit breakers open (emergency stop)");
        for entry in self.circuit_breakers.iter() {
            entry.value().force_open();
        }
    }

    /// Force close all circuit breakers (emergency recovery)
    pub fn force_close_all(&self) {
        warn!("Forcing all circuit breakers closed (emergency recovery)");
        for entry in self.circuit_breakers.iter() {
            entry.value().force_closed();
        }
    }

    pub fn get_state_summary(&self) -> HashMap<CircuitState, usize> {
        self.get_system_metrics().count_by_state()
    }

    pub fn system_health_score(&self) -> f64 {
        self.get_system_metrics().health_score()
    }
}

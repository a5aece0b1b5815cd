//! # Circuit Breaker Implementation
//!
//! Per-endpoint failure isolation with three states: Closed (normal operation), Open (failing
//! fast for the cool-down) and Half-Open (exactly one trial call decides recovery).
//!
//! Consecutive failures only count while they fall inside the failure window; a failure
//! arriving after the window has lapsed starts a new streak.

use crate::resilience::{CircuitBreakerConfig, CircuitBreakerMetrics};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Lock-free atomic counters for circuit breaker metrics.
#[derive(Debug)]
struct AtomicCircuitBreakerMetrics {
    total_calls: AtomicU64,
    success_count: AtomicU64,
    failure_count: AtomicU64,
    consecutive_failures: AtomicU64,
    rejected_calls: AtomicU64,
    total_duration_nanos: AtomicU64,
}

impl AtomicCircuitBreakerMetrics {
    fn new() -> Self {
        Self {
            total_calls: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
            consecutive_failures: AtomicU64::new(0),
            rejected_calls: AtomicU64::new(0),
            total_duration_nanos: AtomicU64::new(0),
        }
    }

    #[inline]
    fn record_success(&self, duration: Duration) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.success_count.fetch_add(1, Ordering::Relaxed);
        self.total_duration_nanos
            .fetch_add(duration_nanos(duration), Ordering::Relaxed);
    }

    #[inline]
    fn record_failure(&self, duration: Duration) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.failure_count.fetch_add(1, Ordering::Relaxed);
        self.total_duration_nanos
            .fetch_add(duration_nanos(duration), Ordering::Relaxed);
    }

    #[inline]
    fn record_rejection(&self) {
        self.rejected_calls.fetch_add(1, Ordering::Relaxed);
    }
}

#[inline]
fn duration_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

/// Circuit breaker states representing the current operational mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - all calls are allowed through
    Closed = 0,
    /// Failure mode - all calls fail fast without executing
    Open = 1,
    /// Testing recovery - a single trial call is allowed
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            0 => CircuitState::Closed,
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Open, // Default to safest state
        }
    }
}

/// Errors that can occur during circuit breaker operation
#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open (or its trial is taken), rejecting the call
    #[error("Circuit breaker is open for {component}")]
    CircuitOpen {
        component: String,
        retry_in: Duration,
    },

    /// Operation failed and was recorded
    #[error("Operation failed: {0}")]
    OperationFailed(E),
}

/// Outcome of asking the breaker for permission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Trial,
    Rejected { retry_in: Duration },
}

/// Releases the half-open trial slot if the trial is dropped before recording an outcome
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            debug!(component = %self.breaker.name, "Half-open trial abandoned");
            self.breaker.trial_in_flight.store(false, Ordering::Release);
        }
    }
}

/// Core circuit breaker implementation with atomic state management
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Component name for logging and metrics
    name: String,

    /// Current circuit state (atomic for thread safety)
    state: AtomicU8,

    config: CircuitBreakerConfig,

    metrics: AtomicCircuitBreakerMetrics,

    /// Monotonic nanos when the circuit was opened (0 = not open)
    opened_at_nanos: AtomicU64,

    /// Monotonic nanos of the first failure of the current streak (0 = no streak)
    streak_started_nanos: AtomicU64,

    /// Wall-clock millis of the last transition (0 = never transitioned)
    last_state_change_millis: AtomicU64,

    /// Set while the single half-open trial is running
    trial_in_flight: AtomicBool,

    /// Origin of the monotonic timestamps above
    origin: Instant,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name = name.into();
        info!(
            component = %name,
            failure_threshold = config.failure_threshold,
            failure_window_ms = config.failure_window.as_millis(),
            cool_down_ms = config.cool_down.as_millis(),
            "Circuit breaker initialized"
        );

        Self {
            name,
            state: AtomicU8::new(CircuitState::Closed as u8),
            config,
            metrics: AtomicCircuitBreakerMetrics::new(),
            opened_at_nanos: AtomicU64::new(0),
            streak_started_nanos: AtomicU64::new(0),
            last_state_change_millis: AtomicU64::new(0),
            trial_in_flight: AtomicBool::new(false),
            origin: Instant::now(),
        }
    }

    /// Nanos since creation, never zero so zero can mean "unset"
    #[inline]
    fn monotonic_nanos_now(&self) -> u64 {
        duration_nanos(Instant::now().saturating_duration_since(self.origin)).max(1)
    }

    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    /// Execute an operation with circuit breaker protection; every error counts as a failure
    pub async fn call<F, T, E, Fut>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.call_with_classifier(operation, |_| true).await
    }

    /// Execute an operation, counting only errors for which `is_failure` returns true.
    ///
    /// Errors that do not count still reach the caller but are recorded like a success, so a
    /// half-open trial ending in one closes the circuit.
    pub async fn call_with_classifier<F, T, E, Fut, C>(
        &self,
        operation: F,
        is_failure: C,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> bool,
    {
        let admission = self.admit();
        if let Admission::Rejected { retry_in } = admission {
            self.metrics.record_rejection();
            debug!(
                component = %self.name,
                retry_in_ms = retry_in.as_millis(),
                "Call rejected by open circuit"
            );
            return Err(CircuitBreakerError::CircuitOpen {
                component: self.name.clone(),
                retry_in,
            });
        }

        let mut trial = TrialGuard {
            breaker: self,
            armed: admission == Admission::Trial,
        };

        let start_time = Instant::now();
        let result = operation().await;
        let duration = start_time.elapsed();

        match &result {
            Err(error) if is_failure(error) => self.record_failure(duration),
            _ => self.record_success(duration),
        }
        if trial.armed {
            trial.armed = false;
            self.trial_in_flight.store(false, Ordering::Release);
        }

        result.map_err(CircuitBreakerError::OperationFailed)
    }

    fn admit(&self) -> Admission {
        match self.state() {
            CircuitState::Closed => Admission::Normal,
            CircuitState::Open => {
                let opened_nanos = self.opened_at_nanos.load(Ordering::Acquire);
                let elapsed = Duration::from_nanos(self.monotonic_nanos_now().saturating_sub(opened_nanos));
                if elapsed < self.config.cool_down {
                    return Admission::Rejected {
                        retry_in: self.config.cool_down - elapsed,
                    };
                }
                if self
                    .state
                    .compare_exchange(
                        CircuitState::Open as u8,
                        CircuitState::HalfOpen as u8,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
                {
                    self.touch_state_change();
                    info!(component = %self.name, "Circuit breaker half-open (testing recovery)");
                }
                self.try_take_trial()
            }
            CircuitState::HalfOpen => self.try_take_trial(),
        }
    }

    fn try_take_trial(&self) -> Admission {
        if self
            .trial_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            // State may have moved on between the load and the exchange
            if self.state() == CircuitState::HalfOpen {
                return Admission::Trial;
            }
            self.trial_in_flight.store(false, Ordering::Release);
            return self.admit_after_race();
        }
        Admission::Rejected {
            retry_in: Duration::ZERO,
        }
    }

    fn admit_after_race(&self) -> Admission {
        match self.state() {
            CircuitState::Closed => Admission::Normal,
            _ => Admission::Rejected {
                retry_in: self.remaining_cool_down(),
            },
        }
    }

    fn remaining_cool_down(&self) -> Duration {
        let opened_nanos = self.opened_at_nanos.load(Ordering::Acquire);
        if opened_nanos == 0 {
            return Duration::ZERO;
        }
        let elapsed = Duration::from_nanos(self.monotonic_nanos_now().saturating_sub(opened_nanos));
        self.config.cool_down.saturating_sub(elapsed)
    }

    fn record_success(&self, duration: Duration) {
        self.metrics.record_success(duration);

        debug!(
            component = %self.name,
            duration_ms = duration.as_millis(),
            "Operation succeeded"
        );

        match self.state() {
            CircuitState::HalfOpen => self.transition_to_closed(),
            CircuitState::Closed => self.reset_streak(),
            CircuitState::Open => {
                debug!(component = %self.name, "Success recorded while circuit is open");
            }
        }
    }

    fn record_failure(&self, duration: Duration) {
        self.metrics.record_failure(duration);

        warn!(
            component = %self.name,
            duration_ms = duration.as_millis(),
            "Operation failed"
        );

        match self.state() {
            CircuitState::Closed => {
                let failures = self.extend_streak();
                if failures >= u64::from(self.config.failure_threshold) {
                    self.transition_to_open();
                }
            }
            CircuitState::HalfOpen => {
                // A failed trial reopens for a full cool-down
                self.transition_to_open();
            }
            CircuitState::Open => {}
        }
    }

    /// Count a failure into the current streak, starting a new one if the window lapsed
    fn extend_streak(&self) -> u64 {
        let now = self.monotonic_nanos_now();
        let started = self.streak_started_nanos.load(Ordering::Acquire);
        let window = duration_nanos(self.config.failure_window);

        if started == 0 || now.saturating_sub(started) > window {
            self.streak_started_nanos.store(now, Ordering::Release);
            self.metrics.consecutive_failures.store(1, Ordering::Relaxed);
            return 1;
        }

        self.metrics
            .consecutive_failures
            .fetch_add(1, Ordering::Relaxed)
            + 1
    }

    fn reset_streak(&self) {
        self.metrics.consecutive_failures.store(0, Ordering::Relaxed);
        self.streak_started_nanos.store(0, Ordering::Release);
    }

    fn touch_state_change(&self) {
        let millis = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0);
        self.last_state_change_millis.store(millis, Ordering::Relaxed);
    }

    fn transition_to_closed(&self) {
        let total_calls = self.metrics.total_calls.load(Ordering::Relaxed);

        self.reset_streak();
        self.opened_at_nanos.store(0, Ordering::Release);

        // Store state last (after metrics reset)
        self.state
            .store(CircuitState::Closed as u8, Ordering::Release);
        self.touch_state_change();

        info!(
            component = %self.name,
            total_calls = total_calls,
            "Circuit breaker closed (recovered)"
        );
    }

    fn transition_to_open(&self) {
        self.opened_at_nanos
            .store(self.monotonic_nanos_now(), Ordering::Release);

        self.state
            .store(CircuitState::Open as u8, Ordering::Release);
        self.touch_state_change();

        let consecutive_failures = self.metrics.consecutive_failures.load(Ordering::Relaxed);
        error!(
            component = %self.name,
            consecutive_failures = consecutive_failures,
            failure_threshold = self.config.failure_threshold,
            cool_down_ms = self.config.cool_down.as_millis(),
            "Circuit breaker opened (failing fast)"
        );
    }

    /// Force circuit to open state (for emergency situations)
    pub fn force_open(&self) {
        warn!(component = %self.name, "Circuit breaker forced open");
        self.transition_to_open();
    }

    /// Force circuit to closed state (for emergency recovery)
    pub fn force_closed(&self) {
        warn!(component = %self.name, "Circuit breaker forced closed");
        self.trial_in_flight.store(false, Ordering::Release);
        self.transition_to_closed();
    }

    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let state = self.state();
        let total_calls = self.metrics.total_calls.load(Ordering::Relaxed);
        let success_count = self.metrics.success_count.load(Ordering::Relaxed);
        let failure_count = self.metrics.failure_count.load(Ordering::Relaxed);
        let total_duration_nanos = self.metrics.total_duration_nanos.load(Ordering::Relaxed);

        let (failure_rate, success_rate, average_duration) = if total_calls > 0 {
            (
                failure_count as f64 / total_calls as f64,
                success_count as f64 / total_calls as f64,
                Duration::from_nanos(total_duration_nanos / total_calls),
            )
        } else {
            (0.0, 0.0, Duration::ZERO)
        };

        let last_state_change_millis = self.last_state_change_millis.load(Ordering::Relaxed);
        let last_state_change_at = (last_state_change_millis > 0)
            .then(|| DateTime::<Utc>::from_timestamp_millis(last_state_change_millis as i64))
            .flatten();

        let opened_until = (state == CircuitState::Open)
            .then(|| {
                chrono::Duration::from_std(self.remaining_cool_down())
                    .ok()
                    .and_then(|remaining| Utc::now().checked_add_signed(remaining))
            })
            .flatten();

        CircuitBreakerMetrics {
            total_calls,
            success_count,
            failure_count,
            consecutive_failures: self.metrics.consecutive_failures.load(Ordering::Relaxed),
            rejected_calls: self.metrics.rejected_calls.load(Ordering::Relaxed),
            total_duration: Duration::from_nanos(total_duration_nanos),
            current_state: state,
            failure_rate,
            success_rate,
            average_duration,
            last_state_change_at,
            opened_until,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Check if circuit is healthy (closed state with low failure rate)
    pub fn is_healthy(&self) -> bool {
        if self.state() != CircuitState::Closed {
            return false;
        }

        let total_calls = self.metrics.total_calls.load(Ordering::Relaxed);
        if total_calls < 10 {
            // Too few calls to determine health
            return true;
        }

        let failure_count = self.metrics.failure_count.load(Ordering::Relaxed);
        (failure_count as f64 / total_calls as f64) < 0.1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    fn config(threshold: u32, cool_down_ms: u64) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: threshold,
            failure_window: Duration::from_secs(60),
            cool_down: Duration::from_millis(cool_down_ms),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_breaker_normal_operation() {
        let circuit = CircuitBreaker::new("test", config(3, 100));

        assert_eq!(circuit.state(), CircuitState::Closed);

        let result = circuit.call(|| async { Ok::<_, String>("success") }).await;
        assert!(result.is_ok());

        let metrics = circuit.metrics();
        assert_eq!(metrics.total_calls, 1);
        assert_eq!(metrics.success_count, 1);
        assert_eq!(metrics.failure_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_exactly_threshold_failures() {
        let circuit = CircuitBreaker::new("test", config(3, 1000));

        for _ in 0..2 {
            let _ = circuit.call(|| async { Err::<String, _>("error") }).await;
            assert_eq!(circuit.state(), CircuitState::Closed);
        }

        let _ = circuit.call(|| async { Err::<String, _>("error") }).await;
        assert_eq!(circuit.state(), CircuitState::Open);

        let result = circuit
            .call(|| async { Ok::<_, String>("should not execute") })
            .await;
        assert!(matches!(
            result,
            Err(CircuitBreakerError::CircuitOpen { .. })
        ));
        assert_eq!(circuit.metrics().rejected_calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fails_fast_for_full_cool_down() {
        let circuit = CircuitBreaker::new("test", config(1, 1000));
        let _ = circuit.call(|| async { Err::<String, _>("error") }).await;

        advance(Duration::from_millis(999)).await;
        let result = circuit.call(|| async { Ok::<_, String>("early") }).await;
        match result {
            Err(CircuitBreakerError::CircuitOpen { retry_in, .. }) => {
                assert!(retry_in <= Duration::from_millis(1));
            }
            other => panic!("expected open circuit, got {other:?}"),
        }

        advance(Duration::from_millis(1)).await;
        let result = circuit.call(|| async { Ok::<_, String>("trial") }).await;
        assert!(result.is_ok());
        assert_eq!(circuit.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_half_open_trial() {
        let circuit = std::sync::Arc::new(CircuitBreaker::new("test", config(1, 100)));
        let _ = circuit.call(|| async { Err::<String, _>("error") }).await;
        advance(Duration::from_millis(100)).await;

        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let trial_circuit = circuit.clone();
        let trial = tokio::spawn(async move {
            trial_circuit
                .call(|| async move {
                    let _ = release_rx.await;
                    Ok::<_, String>("trial")
                })
                .await
        });
        tokio::task::yield_now().await;
        assert_eq!(circuit.state(), CircuitState::HalfOpen);

        let second = circuit.call(|| async { Ok::<_, String>("second") }).await;
        assert!(matches!(
            second,
            Err(CircuitBreakerError::CircuitOpen { .. })
        ));

        release_tx.send(()).unwrap();
        assert!(trial.await.unwrap().is_ok());
        assert_eq!(circuit.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_trial_reopens() {
        let circuit = CircuitBreaker::new("test", config(1, 100));
        let _ = circuit.call(|| async { Err::<String, _>("error") }).await;
        advance(Duration::from_millis(100)).await;

        let _ = circuit.call(|| async { Err::<String, _>("still failing") }).await;
        assert_eq!(circuit.state(), CircuitState::Open);
        assert!(circuit.metrics().opened_until.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_outside_window_start_new_streak() {
        let circuit = CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold: 2,
                failure_window: Duration::from_secs(1),
                cool_down: Duration::from_secs(5),
            },
        );

        let _ = circuit.call(|| async { Err::<String, _>("error") }).await;
        advance(Duration::from_secs(2)).await;
        let _ = circuit.call(|| async { Err::<String, _>("error") }).await;
        assert_eq!(circuit.state(), CircuitState::Closed);
        assert_eq!(circuit.metrics().consecutive_failures, 1);

        let _ = circuit.call(|| async { Err::<String, _>("error") }).await;
        assert_eq!(circuit.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_classifier_ignores_non_failures() {
        let circuit = CircuitBreaker::new("test", config(1, 100));
        let result = circuit
            .call_with_classifier(|| async { Err::<String, _>("permanent") }, |_| false)
            .await;
        assert!(matches!(
            result,
            Err(CircuitBreakerError::OperationFailed("permanent"))
        ));
        assert_eq!(circuit.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_operations() {
        let circuit = CircuitBreaker::new("test", config(1, 1000));

        circuit.force_open();
        assert_eq!(circuit.state(), CircuitState::Open);
        assert!(!circuit.is_healthy());

        circuit.force_closed();
        assert_eq!(circuit.state(), CircuitState::Closed);
        assert!(circuit.metrics().last_state_change_at.is_some());
    }
}

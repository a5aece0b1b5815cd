//! # Resilience Module
//!
//! Fault tolerance for calls to the remote document service.
//!
//! ## Architecture
//!
//! - **Deadlines**: every suspension point is bounded by the caller's [`Deadline`]
//! - **Rate Limiting**: token bucket protecting the provider quota
//! - **Deduplication**: concurrent identical reads share one upstream call
//! - **Circuit Breakers**: per-endpoint isolation of a failing provider
//! - **Retry**: bounded exponential backoff for transient failures
//! - **Concurrency**: global cap on in-flight calls with a bounded wait queue
//!
//! [`ResilienceStack`] composes all of the above around a [`DocumentService`](crate::remote::DocumentService).
//!
//! ## Usage
//!
//! ```rust,no_run
//! use sheetguard_core::resilience::{CircuitBreaker, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CircuitBreakerConfig {
//!     failure_threshold: 5,
//!     failure_window: Duration::from_secs(60),
//!     cool_down: Duration::from_secs(30),
//! };
//!
//! let breaker = CircuitBreaker::new("batch_update", config);
//!
//! let result = breaker.call(|| async {
//!     Ok::<&str, std::io::Error>("success")
//! }).await?;
//! # Ok(())
//! # }
//! ```

pub mod circuit_breaker;
pub mod concurrency;
pub mod config;
pub mod deadline;
pub mod dedup;
pub mod manager;
pub mod metrics;
pub mod rate_limiter;
pub mod retry;
pub mod stack;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerError, CircuitState};
pub use concurrency::ConcurrencyLimiter;
pub use config::CircuitBreakerConfig;
pub use deadline::Deadline;
pub use dedup::RequestDeduplicator;
pub use manager::CircuitBreakerManager;
pub use metrics::{CircuitBreakerMetrics, SystemCircuitBreakerMetrics};
pub use rate_limiter::RateLimiter;
pub use retry::{RetryExecutor, RetryPolicy};
pub use stack::ResilienceStack;

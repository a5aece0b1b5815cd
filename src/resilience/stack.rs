//! # Resilience Stack
//!
//! A [`DocumentService`] decorator composing, outermost first:
//!
//! 1. [`RateLimiter`] - one token per logical call
//! 2. [`RequestDeduplicator`] - reads only
//! 3. [`CircuitBreaker`](crate::resilience::CircuitBreaker) - per endpoint, skipped when disabled
//! 4. [`RetryExecutor`] - transient failures only
//! 5. [`ConcurrencyLimiter`] - one in-flight slot per network attempt
//!
//! Every network attempt is additionally bounded by the request deadline. No lock is held
//! across a network call. Each completed write is recorded with the deduplicator, so a read
//! issued after a write never joins one that started before it.

use crate::config::GuardConfig;
use crate::error::{GuardError, GuardResult};
use crate::logging::log_remote_call;
use crate::remote::{
    BatchUpdateRequest, BatchUpdateResponse, DocumentService, Endpoint, ReadRequest,
    RequestContext, ValueRange,
};
use crate::resilience::{
    CircuitBreakerError, CircuitBreakerManager, ConcurrencyLimiter, RateLimiter,
    RequestDeduplicator, RetryExecutor, RetryPolicy,
};
use async_trait::async_trait;
use futures::FutureExt;
use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;

struct StackInner {
    service: Arc<dyn DocumentService>,
    rate_limiter: RateLimiter,
    dedup: RequestDeduplicator,
    breakers: CircuitBreakerManager,
    retry: RetryExecutor,
    concurrency: ConcurrencyLimiter,
}

#[derive(Debug, Clone)]
pub struct ResilienceStack {
    inner: Arc<StackInner>,
}

impl std::fmt::Debug for StackInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilienceStack")
            .field("service", &self.service)
            .field("rate_limiter", &self.rate_limiter)
            .field("dedup", &self.dedup)
            .field("breakers", &self.breakers)
            .field("retry", &self.retry)
            .field("concurrency", &self.concurrency)
            .finish()
    }
}

impl ResilienceStack {
    pub fn new(
        service: Arc<dyn DocumentService>,
        rate_limiter: RateLimiter,
        dedup: RequestDeduplicator,
        breakers: CircuitBreakerManager,
        retry: RetryExecutor,
        concurrency: ConcurrencyLimiter,
    ) -> Self {
        Self {
            inner: Arc::new(StackInner {
                service,
                rate_limiter,
                dedup,
                breakers,
                retry,
                concurrency,
            }),
        }
    }

    /// Build every layer from configuration
    pub fn from_config(service: Arc<dyn DocumentService>, config: &GuardConfig) -> Self {
        Self::new(
            service,
            RateLimiter::new(&config.rate_limiter),
            RequestDeduplicator::new(config.deduplication.enabled),
            CircuitBreakerManager::from_config(&config.circuit_breakers),
            RetryExecutor::new(RetryPolicy::from_config(&config.retry)),
            ConcurrencyLimiter::new(&config.concurrency),
        )
    }

    pub fn breakers(&self) -> &CircuitBreakerManager {
        &self.inner.breakers
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.inner.rate_limiter
    }

    pub fn deduplicator(&self) -> &RequestDeduplicator {
        &self.inner.dedup
    }

    pub fn concurrency(&self) -> &ConcurrencyLimiter {
        &self.inner.concurrency
    }
}

impl StackInner {
    /// Circuit breaker around the retry loop
    async fn guarded<T, F, Fut>(
        &self,
        endpoint: Endpoint,
        ctx: &RequestContext,
        attempt: F,
    ) -> GuardResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = GuardResult<T>>,
    {
        if !self.breakers.is_enabled() {
            return self.retry.execute(endpoint, ctx.deadline, attempt).await;
        }

        let breaker = self.breakers.get_circuit_breaker(endpoint.as_str());
        let result = breaker
            .call_with_classifier(
                || self.retry.execute(endpoint, ctx.deadline, attempt),
                GuardError::counts_toward_circuit,
            )
            .await;

        match result {
            Ok(value) => Ok(value),
            Err(CircuitBreakerError::CircuitOpen { retry_in, .. }) => Err(GuardError::CircuitOpen {
                endpoint: endpoint.as_str().to_string(),
                retry_in,
            }),
            Err(CircuitBreakerError::OperationFailed(error)) => Err(error),
        }
    }

    async fn guarded_read(&self, request: &ReadRequest, ctx: &RequestContext) -> GuardResult<ValueRange> {
        self.guarded(Endpoint::ReadValues, ctx, |attempt| {
            self.attempt_read(request, ctx, attempt)
        })
        .await
    }

    async fn attempt_read(
        &self,
        request: &ReadRequest,
        ctx: &RequestContext,
        attempt: u32,
    ) -> GuardResult<ValueRange> {
        let _permit = self.concurrency.acquire(ctx.deadline).await?;
        let start = Instant::now();
        let result = tokio::time::timeout_at(
            ctx.deadline.instant(),
            self.service.read_values(request, ctx),
        )
        .await
        .unwrap_or_else(|_| Err(GuardError::deadline_exceeded("reading values")));

        log_remote_call(
            Endpoint::ReadValues,
            &request.document_id,
            attempt,
            start.elapsed(),
            result.as_ref().err(),
        );
        result
    }

    async fn attempt_batch(
        &self,
        request: &BatchUpdateRequest,
        ctx: &RequestContext,
        attempt: u32,
    ) -> GuardResult<BatchUpdateResponse> {
        let _permit = self.concurrency.acquire(ctx.deadline).await?;
        let start = Instant::now();
        let result = tokio::time::timeout_at(
            ctx.deadline.instant(),
            self.service.batch_update(request, ctx),
        )
        .await
        .unwrap_or_else(|_| Err(GuardError::deadline_exceeded("applying a batch update")));

        log_remote_call(
            Endpoint::BatchUpdate,
            &request.document_id,
            attempt,
            start.elapsed(),
            result.as_ref().err(),
        );
        result
    }
}

#[async_trait]
impl DocumentService for ResilienceStack {
    async fn batch_update(
        &self,
        request: &BatchUpdateRequest,
        ctx: &RequestContext,
    ) -> GuardResult<BatchUpdateResponse> {
        let inner = &self.inner;
        inner.rate_limiter.acquire(ctx.deadline).await?;
        let result = inner
            .guarded(Endpoint::BatchUpdate, ctx, |attempt| {
                inner.attempt_batch(request, ctx, attempt)
            })
            .await;
        // Outcome unknown on failure, so reads begun before this point are never shared
        inner.dedup.note_write(&request.document_id);
        result
    }

    async fn read_values(
        &self,
        request: &ReadRequest,
        ctx: &RequestContext,
    ) -> GuardResult<ValueRange> {
        self.inner.rate_limiter.acquire(ctx.deadline).await?;

        let key = RequestDeduplicator::fingerprint(Endpoint::ReadValues, request);
        let inner = Arc::clone(&self.inner);
        let owned_request = request.clone();
        let owned_ctx = *ctx;
        self.inner
            .dedup
            .join_or_lead(key, &request.document_id, ctx.deadline, move || {
                async move { inner.guarded_read(&owned_request, &owned_ctx).await }.boxed()
            })
            .await
    }

    fn service_name(&self) -> &'static str {
        self.inner.service.service_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DocumentId, Region};
    use crate::remote::{InMemoryDocumentService, ScriptedFault};
    use crate::resilience::CircuitState;
    use std::time::Duration;

    fn stack_with(service: Arc<InMemoryDocumentService>, config: &GuardConfig) -> ResilienceStack {
        ResilienceStack::from_config(service, config)
    }

    fn read_request() -> ReadRequest {
        ReadRequest::new(DocumentId::from("doc"), Region::parse("S!A1:B2").unwrap())
    }

    fn ctx() -> RequestContext {
        RequestContext::with_timeout(Duration::from_secs(60))
    }

    #[tokio::test(start_paused = true)]
    async fn transient_read_failures_are_retried() {
        let service = Arc::new(InMemoryDocumentService::new());
        service.fail_next(Endpoint::ReadValues, 2, ScriptedFault::status(503, "unavailable"));
        let stack = stack_with(Arc::clone(&service), &GuardConfig::for_test());

        assert!(stack.read_values(&read_request(), &ctx()).await.is_ok());
        assert_eq!(service.read_values_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failures_do_not_trip_the_breaker() {
        let service = Arc::new(InMemoryDocumentService::new());
        let mut config = GuardConfig::for_test();
        config.circuit_breakers.default_config.failure_threshold = 1;
        service.push_fault(Endpoint::ReadValues, ScriptedFault::status(404, "missing"));
        let stack = stack_with(Arc::clone(&service), &config);

        let error = stack.read_values(&read_request(), &ctx()).await.unwrap_err();
        assert_eq!(error.code(), "PERMANENT_REMOTE_ERROR");
        assert_eq!(service.read_values_calls(), 1);
        assert_eq!(
            stack.breakers().get_circuit_breaker("read_values").state(),
            CircuitState::Closed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_open_the_circuit() {
        let service = Arc::new(InMemoryDocumentService::new());
        let mut config = GuardConfig::for_test();
        config.circuit_breakers.default_config.failure_threshold = 1;
        config.retry.max_attempts = 2;
        service.fail_next(Endpoint::BatchUpdate, 2, ScriptedFault::status(500, "boom"));
        let stack = stack_with(Arc::clone(&service), &config);

        let request = BatchUpdateRequest {
            document_id: DocumentId::from("doc"),
            operations: Vec::new(),
        };
        let error = stack.batch_update(&request, &ctx()).await.unwrap_err();
        assert!(matches!(error, GuardError::TransientRemote { attempts: 2, .. }));

        let error = stack.batch_update(&request, &ctx()).await.unwrap_err();
        assert_eq!(error.code(), "CIRCUIT_OPEN");
        assert_eq!(service.batch_update_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_identical_reads_reach_upstream_once() {
        let service = Arc::new(InMemoryDocumentService::new().with_latency(Duration::from_millis(20)));
        let stack = stack_with(Arc::clone(&service), &GuardConfig::for_test());

        let request = read_request();
        let context = ctx();
        let reads = futures::future::join_all((0..4).map(|_| stack.read_values(&request, &context))).await;

        assert!(reads.iter().all(Result::is_ok));
        assert_eq!(service.read_values_calls(), 1);
        assert_eq!(stack.deduplicator().joins(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_retry_after_hint_gives_up_instead_of_overflowing() {
        let service = Arc::new(InMemoryDocumentService::new());
        service.push_fault(
            Endpoint::ReadValues,
            ScriptedFault::rate_limited(Some(Duration::from_secs(u64::MAX))),
        );
        let stack = stack_with(Arc::clone(&service), &GuardConfig::for_test());

        let error = stack.read_values(&read_request(), &ctx()).await.unwrap_err();
        assert_eq!(error.code(), "TRANSIENT_REMOTE_ERROR");
        assert_eq!(error.retry_after(), Some(Duration::from_secs(u64::MAX)));
        assert_eq!(service.read_values_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn joiner_is_bounded_by_its_own_deadline_not_the_leaders() {
        let service = Arc::new(InMemoryDocumentService::new().with_latency(Duration::from_millis(100)));
        let stack = stack_with(Arc::clone(&service), &GuardConfig::for_test());
        let request = read_request();

        let short = RequestContext::with_timeout(Duration::from_millis(50));
        let late_joiner = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let long = RequestContext::with_timeout(Duration::from_secs(10));
            stack.read_values(&request, &long).await
        };
        let (leader, joiner) = tokio::join!(stack.read_values(&request, &short), late_joiner);

        assert_eq!(leader.unwrap_err().code(), "CAPACITY_EXCEEDED");
        assert!(joiner.is_ok());
        assert_eq!(service.read_values_calls(), 2);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(stack.deduplicator().in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn reads_after_a_write_do_not_join_earlier_reads() {
        let service = Arc::new(InMemoryDocumentService::new().with_latency(Duration::from_millis(100)));
        // First attempt fails at 100ms and the retry runs until 210ms, past the write at 110ms
        service.push_fault(Endpoint::ReadValues, ScriptedFault::status(503, "unavailable"));
        let stack = stack_with(Arc::clone(&service), &GuardConfig::for_test());
        let request = read_request();
        let context = ctx();
        let write = BatchUpdateRequest {
            document_id: DocumentId::from("doc"),
            operations: Vec::new(),
        };

        let earlier = stack.read_values(&request, &context);
        let write_then_read = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            stack.batch_update(&write, &context).await.unwrap();
            tokio::time::sleep(Duration::from_millis(1)).await;
            stack.read_values(&request, &context).await
        };
        let (earlier, later) = tokio::join!(earlier, write_then_read);

        assert!(earlier.is_ok());
        assert!(later.is_ok());
        assert_eq!(service.read_values_calls(), 3);
        assert_eq!(stack.deduplicator().joins(), 0);
    }
}

//! # Mutation Core
//!
//! The single entry point callers use. `MutationCore` wires every component from one
//! [`GuardConfig`]:
//!
//! - the [`ResilienceStack`] decorating the caller's [`DocumentService`]
//! - a shared [`RegionCache`] and read-through reader over the stack
//! - the [`PolicyEnforcer`], [`SnapshotService`] and [`BatchCompiler`]
//!
//! and exposes exactly two operations, [`submit`](MutationCore::submit) and
//! [`restore_snapshot`](MutationCore::restore_snapshot). Nothing else talks to the remote
//! service.

use super::batch_compiler::{BatchCompiler, ExecutionRequest};
use crate::cache::{CacheStats, ReadThroughReader, RegionCache};
use crate::config::{ConfigManager, GuardConfig};
use crate::error::GuardResult;
use crate::logging::{log_error, log_mutation_operation};
use crate::models::{Intent, MutationSummary, SnapshotId};
use crate::policy::{EffectScopeLimits, ExpectedState, PolicyEnforcer, SnapshotPreference};
use crate::remote::{DocumentService, RequestContext};
use crate::resilience::{CircuitState, ResilienceStack};
use crate::snapshot::{InMemorySnapshotStore, SnapshotMetadata, SnapshotService, SnapshotStore};
use crate::validation::validate_submission;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Options accepted by [`MutationCore::submit`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmitOptions {
    /// Evaluate and project without writing
    pub dry_run: bool,
    /// Preconditions re-checked against fresh reads before anything is written
    pub expected_state: Vec<ExpectedState>,
    /// Per-call override of the effect-scope limit
    pub effect_scope_limits: Option<EffectScopeLimits>,
    pub snapshot: SnapshotPreference,
    /// Overall time budget; the configured default when absent
    #[serde(with = "optional_millis")]
    pub deadline: Option<Duration>,
}

impl SubmitOptions {
    pub fn dry_run() -> Self {
        Self {
            dry_run: true,
            ..Self::default()
        }
    }

    pub fn with_expected_state(mut self, state: ExpectedState) -> Self {
        self.expected_state.push(state);
        self
    }

    pub fn with_max_cells(mut self, max_cells_affected: u64) -> Self {
        self.effect_scope_limits = Some(EffectScopeLimits::max_cells(max_cells_affected));
        self
    }

    pub fn with_snapshot(mut self, snapshot: SnapshotPreference) -> Self {
        self.snapshot = snapshot;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Point-in-time view of the layer's health
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub circuit_health_score: f64,
    pub circuit_states: HashMap<CircuitState, usize>,
    /// Calls rejected by open or probing circuits since start
    pub circuit_rejections: u64,
    pub remote_failure_rate: f64,
    pub cache: CacheStats,
    pub snapshots_retained: usize,
    pub in_flight_calls: usize,
    pub queued_calls: usize,
    pub rate_limiter_tokens: f64,
    pub deduplicated_joins: u64,
}

#[derive(Debug)]
pub struct MutationCore {
    config: GuardConfig,
    stack: ResilienceStack,
    cache: Arc<RegionCache>,
    snapshots: Arc<SnapshotService>,
    compiler: BatchCompiler,
}

impl MutationCore {
    /// Wire every component around `service` with an in-memory snapshot store
    pub fn new(service: Arc<dyn DocumentService>, config: GuardConfig) -> GuardResult<Self> {
        let store = Arc::new(InMemorySnapshotStore::new(
            config.snapshot.max_retained_snapshots,
        ));
        Self::with_snapshot_store(service, config, store)
    }

    /// Build from a loaded configuration manager
    pub fn from_config(
        service: Arc<dyn DocumentService>,
        config_manager: &ConfigManager,
    ) -> GuardResult<Self> {
        info!(
            environment = config_manager.environment(),
            "🔧 CORE: Initializing MutationCore from configuration"
        );
        Self::new(service, config_manager.config().clone())
    }

    pub fn with_snapshot_store(
        service: Arc<dyn DocumentService>,
        config: GuardConfig,
        store: Arc<dyn SnapshotStore>,
    ) -> GuardResult<Self> {
        config.validate()?;

        let stack = ResilienceStack::from_config(service, &config);
        let cache = Arc::new(RegionCache::new(&config.cache));
        let reader = ReadThroughReader::new(Arc::new(stack.clone()), Arc::clone(&cache));
        let snapshots = Arc::new(SnapshotService::new(
            store,
            reader.clone(),
            config.snapshot.clone(),
        ));
        let compiler = BatchCompiler::new(
            Arc::new(stack.clone()),
            reader.clone(),
            PolicyEnforcer::new(reader, config.policy.clone()),
            Arc::clone(&snapshots),
            config.batching.clone(),
        );

        snapshots.start_sweeper();

        info!(
            circuit_breakers = config.circuit_breakers.enabled,
            rate_limiter = config.rate_limiter.enabled,
            cache = config.cache.enabled,
            max_in_flight = config.concurrency.max_in_flight,
            "✅ CORE: MutationCore ready"
        );

        Ok(Self {
            config,
            stack,
            cache,
            snapshots,
            compiler,
        })
    }

    /// Validate, evaluate, compile and execute a set of intents
    #[instrument(skip_all, fields(intents = intents.len(), dry_run = options.dry_run))]
    pub async fn submit(
        &self,
        intents: Vec<Intent>,
        options: SubmitOptions,
    ) -> GuardResult<MutationSummary> {
        let ctx = self.request_context(options.deadline);
        let intent_count = intents.len();

        if let Err(error) =
            validate_submission(&intents, &options.expected_state, &self.config.policy)
        {
            let error = error.into();
            log_error("mutation_core", "submit", &error, None);
            return Err(error);
        }

        let request = ExecutionRequest {
            expected_state: &options.expected_state,
            limits: options.effect_scope_limits.unwrap_or_default(),
            dry_run: options.dry_run,
            snapshot: options.snapshot,
        };

        match self.compiler.execute(intents, request, &ctx).await {
            Ok(summary) => {
                let status = match (summary.dry_run, summary.is_partial()) {
                    (true, _) => "dry_run",
                    (false, true) => "partial",
                    (false, false) => "completed",
                };
                let details = format!(
                    "{} cells, {}/{} calls",
                    summary.cells_affected, summary.calls_completed, summary.calls_planned
                );
                log_mutation_operation("submit", None, intent_count, status, Some(&details));
                Ok(summary)
            }
            Err(error) => {
                log_error("mutation_core", "submit", &error, None);
                Err(error)
            }
        }
    }

    /// Put a snapshot's captured values back and consume the snapshot
    #[instrument(skip(self))]
    pub async fn restore_snapshot(&self, snapshot_id: SnapshotId) -> GuardResult<MutationSummary> {
        let ctx = self.request_context(None);
        let snapshot = self.snapshots.get(snapshot_id).await?;

        let summary = match self.compiler.restore(&snapshot, &ctx).await {
            Ok(summary) => summary,
            Err(error) => {
                log_error(
                    "mutation_core",
                    "restore_snapshot",
                    &error,
                    Some(&snapshot_id.to_string()),
                );
                return Err(error);
            }
        };

        // A partly restored snapshot stays available for another attempt
        if summary.failures.is_empty() {
            self.snapshots.consume(snapshot_id).await?;
        }

        log_mutation_operation(
            "restore_snapshot",
            Some(&snapshot.document_id),
            snapshot.regions.len(),
            if summary.failures.is_empty() { "completed" } else { "partial" },
            Some(&format!("{} cells", summary.cells_affected)),
        );
        Ok(summary)
    }

    pub async fn list_snapshots(&self) -> GuardResult<Vec<SnapshotMetadata>> {
        self.snapshots.list().await
    }

    pub async fn health(&self) -> HealthReport {
        let metrics = self.stack.breakers().get_system_metrics();
        let circuit_states = metrics.count_by_state();
        debug!(summary = %metrics.format_summary(), "Circuit breaker health");
        for (endpoint, breaker) in metrics.unhealthy_circuits() {
            warn!(endpoint = %endpoint, summary = %breaker.format_summary(), "Unhealthy circuit breaker");
        }
        let open = circuit_states
            .get(&CircuitState::Open)
            .copied()
            .unwrap_or(0);

        HealthReport {
            healthy: open == 0,
            circuit_health_score: metrics.health_score(),
            circuit_states,
            circuit_rejections: metrics.total_rejections(),
            remote_failure_rate: metrics.system_failure_rate(),
            cache: self.cache.stats().await,
            snapshots_retained: self.snapshots.retained(),
            in_flight_calls: self.stack.concurrency().in_flight(),
            queued_calls: self.stack.concurrency().queued(),
            rate_limiter_tokens: self.stack.rate_limiter().available_tokens(),
            deduplicated_joins: self.stack.deduplicator().joins(),
        }
    }

    /// Stop background work and drop cached reads
    pub fn shutdown(&self) {
        info!("🛑 CORE: Shutting down MutationCore");
        self.snapshots.stop_sweeper();
        self.cache.clear();
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    pub fn stack(&self) -> &ResilienceStack {
        &self.stack
    }

    pub fn cache(&self) -> &Arc<RegionCache> {
        &self.cache
    }

    pub fn snapshots(&self) -> &Arc<SnapshotService> {
        &self.snapshots
    }

    fn request_context(&self, deadline: Option<Duration>) -> RequestContext {
        RequestContext::with_timeout(
            deadline.unwrap_or_else(|| self.config.execution.default_deadline()),
        )
    }
}

mod optional_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer
                .serialize_some(&u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{IntentKind, Region};
    use crate::remote::InMemoryDocumentService;
    use serde_json::json;

    fn core() -> (Arc<InMemoryDocumentService>, MutationCore) {
        let remote = Arc::new(InMemoryDocumentService::new());
        let core = MutationCore::new(remote.clone(), GuardConfig::for_test()).unwrap();
        (remote, core)
    }

    #[tokio::test]
    async fn invalid_submission_never_reaches_the_remote() {
        let (remote, core) = core();
        let err = core.submit(Vec::new(), SubmitOptions::default()).await.unwrap_err();

        assert_eq!(err.code(), "VALIDATION_ERROR");
        assert_eq!(remote.read_values_calls(), 0);
        assert_eq!(remote.batch_update_calls(), 0);
    }

    #[tokio::test]
    async fn invalid_configuration_is_rejected() {
        let mut config = GuardConfig::for_test();
        config.retry.max_attempts = 0;
        let err = MutationCore::new(Arc::new(InMemoryDocumentService::new()), config).unwrap_err();
        assert_eq!(err.code(), "CONFIGURATION_ERROR");
    }

    #[tokio::test]
    async fn health_reports_components() {
        let (_remote, core) = core();
        let intent = Intent::new(
            "doc",
            Region::parse("S!A1").unwrap(),
            IntentKind::FormatCells,
            json!({}),
        );
        core.submit(vec![intent], SubmitOptions::default())
            .await
            .unwrap();

        let health = core.health().await;
        assert!(health.healthy);
        assert_eq!(health.in_flight_calls, 0);
        assert_eq!(health.snapshots_retained, 0);
        core.shutdown();
        assert!(!core.snapshots().is_sweeping());
    }

    #[test]
    fn submit_options_deserialize_with_defaults() {
        let options: SubmitOptions =
            serde_json::from_value(json!({"dry_run": true, "deadline": 1500})).unwrap();
        assert!(options.dry_run);
        assert_eq!(options.deadline, Some(Duration::from_millis(1500)));
        assert_eq!(options.snapshot, SnapshotPreference::Auto);
        assert!(options.effect_scope_limits.is_none());
    }
}

//! # Batch Compiler
//!
//! Drives one submission from approved intents to a [`MutationSummary`]:
//!
//! 1. Evaluate policy for every document; a denial blocks that document's whole set, and a
//!    document whose evaluation reads failed is reported as a failure without any write
//! 2. Capture a snapshot where the policy asks for one, before any write
//! 3. Compile each document's intents into ordered calls ([`compile_batch`])
//! 4. Dry run: project the effect and stop
//! 5. Otherwise issue the calls through the resilience stack, stopping a document at its
//!    first failed call
//! 6. Invalidate overlapping cache entries, then diff and summarize
//!
//! Documents execute concurrently; calls within a document execute strictly in order.

use super::call_plan::{compile_batch, CallPlan};
use crate::cache::{ReadConsistency, ReadThroughReader};
use crate::config::BatchingConfig;
use crate::error::{GuardError, GuardResult, PolicyViolation};
use crate::logging::{log_error, log_mutation_operation};
use crate::models::{
    partition_by_document, CallFailure, DiffSource, DocumentId, DocumentOutcome, Intent,
    IntentId, MutationDiff, MutationSummary, Region, RegionDiff,
};
use crate::policy::{
    EffectScopeLimits, EvaluationInput, ExpectedState, PolicyEnforcer, SnapshotPreference,
};
use crate::remote::{DocumentService, Endpoint, RequestContext};
use crate::snapshot::{
    diff_region, effect_report_diff, project_intent, ProjectionOverlay, Snapshot,
    SnapshotService,
};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Caller options for one execution, besides the intents themselves
#[derive(Debug, Clone, Copy)]
pub struct ExecutionRequest<'a> {
    pub expected_state: &'a [ExpectedState],
    pub limits: EffectScopeLimits,
    pub dry_run: bool,
    pub snapshot: SnapshotPreference,
}

/// A document's intents after policy approval
#[derive(Debug)]
struct ApprovedSet {
    document_id: DocumentId,
    intents: Vec<Intent>,
    requires_snapshot: bool,
    would_deny: Vec<PolicyViolation>,
}

#[derive(Debug)]
struct DocumentRun {
    outcome: DocumentOutcome,
    diff: MutationDiff,
    failure: Option<CallFailure>,
}

#[derive(Debug)]
pub struct BatchCompiler {
    service: Arc<dyn DocumentService>,
    reader: ReadThroughReader,
    enforcer: PolicyEnforcer,
    snapshots: Arc<SnapshotService>,
    batching: BatchingConfig,
}

impl BatchCompiler {
    pub fn new(
        service: Arc<dyn DocumentService>,
        reader: ReadThroughReader,
        enforcer: PolicyEnforcer,
        snapshots: Arc<SnapshotService>,
        batching: BatchingConfig,
    ) -> Self {
        Self {
            service,
            reader,
            enforcer,
            snapshots,
            batching,
        }
    }

    pub fn enforcer(&self) -> &PolicyEnforcer {
        &self.enforcer
    }

    /// Evaluate, compile and (unless dry-running) execute a validated submission
    pub async fn execute(
        &self,
        intents: Vec<Intent>,
        request: ExecutionRequest<'_>,
        ctx: &RequestContext,
    ) -> GuardResult<MutationSummary> {
        let decisions = self
            .enforcer
            .evaluate(
                EvaluationInput {
                    intents: &intents,
                    limits: request.limits,
                    expected_state: request.expected_state,
                    dry_run: request.dry_run,
                    snapshot: request.snapshot,
                },
                ctx,
            )
            .await?;

        let mut approved = Vec::new();
        let mut denied = Vec::new();
        let mut unevaluated = Vec::new();
        for (document_id, group) in partition_by_document(intents) {
            let Some(decision) = decisions.iter().find(|d| d.document_id == document_id) else {
                continue;
            };
            if let Some(error) = &decision.evaluation_error {
                unevaluated.push(CallFailure {
                    document_id,
                    call_index: None,
                    intents_not_applied: group.iter().map(Intent::id).collect(),
                    error: error.clone(),
                });
            } else if decision.allowed {
                approved.push(ApprovedSet {
                    document_id,
                    intents: group,
                    requires_snapshot: decision.requires_snapshot,
                    would_deny: decision.would_deny.clone(),
                });
            } else if let Some(reason) = &decision.reason {
                denied.push(reason.clone());
            }
        }

        if approved.is_empty() {
            return Err(match (denied.into_iter().next(), unevaluated.into_iter().next()) {
                (Some(violation), _) => violation.into(),
                (None, Some(failure)) => failure.error,
                (None, None) => GuardError::validation("intents", "submission contains no intents"),
            });
        }

        if request.dry_run {
            let runs = join_all(approved.into_iter().map(|set| self.project(set, ctx))).await;
            return Ok(summarize(true, runs, denied, unevaluated));
        }

        let runs = join_all(approved.into_iter().map(|set| self.execute_document(set, ctx))).await;

        // Nothing took effect anywhere: report the failure itself
        if runs.iter().all(|run| run.outcome.intents_applied.is_empty()) {
            let first_failure = runs
                .iter()
                .find_map(|run| run.failure.as_ref())
                .or(unevaluated.first());
            if let Some(failure) = first_failure {
                return Err(failure.error.clone());
            }
        }

        Ok(summarize(false, runs, denied, unevaluated))
    }

    /// Write a snapshot's captured values back. Policy is not consulted; the calls still go
    /// through the full resilience stack.
    pub async fn restore(
        &self,
        snapshot: &Snapshot,
        ctx: &RequestContext,
    ) -> GuardResult<MutationSummary> {
        let before = self.snapshots.read_current(snapshot, ctx).await?;

        let mut run = self
            .execute_document(
                ApprovedSet {
                    document_id: snapshot.document_id.clone(),
                    intents: SnapshotService::restore_intents(snapshot),
                    requires_snapshot: false,
                    would_deny: Vec::new(),
                },
                ctx,
            )
            .await;

        if run.outcome.intents_applied.is_empty() {
            if let Some(failure) = run.failure.take() {
                return Err(failure.error);
            }
        }

        match self.snapshots.read_current(snapshot, ctx).await {
            Ok(after) => {
                run.diff = MutationDiff {
                    regions: snapshot
                        .regions
                        .iter()
                        .zip(before.iter().zip(&after))
                        .map(|(captured, (before, after))| {
                            diff_region(
                                &captured.region,
                                before,
                                after,
                                self.snapshots.config().max_diff_samples,
                                DiffSource::Snapshot,
                            )
                        })
                        .collect(),
                };
            }
            Err(error) => {
                warn!(snapshot_id = %snapshot.id, error = %error, "Post-restore read failed, keeping reported effect");
            }
        }

        Ok(summarize(false, vec![run], Vec::new(), Vec::new()))
    }

    async fn execute_document(&self, set: ApprovedSet, ctx: &RequestContext) -> DocumentRun {
        let ApprovedSet {
            document_id,
            intents,
            requires_snapshot,
            ..
        } = set;
        let intent_count = intents.len();
        let value_restorable = intents.iter().all(|i| i.kind().is_value_restorable());
        let plan = compile_batch(&document_id, intents, self.batching.max_operations_per_call);
        debug!(
            document_id = %document_id,
            intents = intent_count,
            calls = plan.len(),
            "Compiled call plan"
        );

        let snapshot = if requires_snapshot {
            let regions: Vec<Region> = plan
                .calls
                .iter()
                .flat_map(|call| call.intents.iter().map(|i| i.region().clone()))
                .collect();
            let ids: Vec<IntentId> = plan.calls.iter().flat_map(|c| c.intent_ids()).collect();
            match self
                .snapshots
                .capture_regions(&document_id, &regions, &ids, ctx)
                .await
            {
                Ok(snapshot) => Some(snapshot),
                Err(error) => {
                    log_error("batch_compiler", "capture", &error, Some(document_id.as_str()));
                    return not_started(&plan, error);
                }
            }
        } else {
            None
        };

        let mut calls_completed = 0;
        let mut cells_affected = 0u64;
        let mut applied: Vec<IntentId> = Vec::new();
        let mut reported: Vec<RegionDiff> = Vec::new();
        let mut touched: Vec<Region> = Vec::new();
        let mut failure = None;

        for call in &plan.calls {
            touched.extend(call.footprints());
            let request = call.request(&document_id);

            let error = match self.service.batch_update(&request, ctx).await {
                Ok(response) => {
                    for (intent, reply) in call.intents.iter().zip(&response.replies) {
                        if reply.success {
                            let cells = reply
                                .cells_affected
                                .unwrap_or(intent.metadata().estimated_cells_affected);
                            cells_affected = cells_affected.saturating_add(cells);
                            applied.push(intent.id());
                            reported.push(effect_report_diff(intent.region(), Some(cells)));
                        }
                    }
                    if response.all_succeeded() && response.replies.len() == call.intents.len() {
                        calls_completed += 1;
                        continue;
                    }
                    GuardError::PermanentRemote {
                        endpoint: Endpoint::BatchUpdate.as_str().to_string(),
                        status: None,
                        message: response
                            .first_error()
                            .unwrap_or("fewer replies than sub-operations")
                            .to_string(),
                    }
                }
                Err(error) => error,
            };

            log_error(
                "batch_compiler",
                "batch_update",
                &error,
                Some(&format!("document {document_id}, call {}", call.index)),
            );
            let intents_not_applied = plan.calls[call.index..]
                .iter()
                .flat_map(|c| c.intents.iter().map(Intent::id))
                .filter(|id| !applied.contains(id))
                .collect();
            failure = Some(CallFailure {
                document_id: document_id.clone(),
                call_index: Some(call.index),
                intents_not_applied,
                error,
            });
            break;
        }

        for region in &touched {
            self.reader
                .cache()
                .invalidate_region(&document_id, region)
                .await;
        }

        let diff = match &snapshot {
            Some(snapshot) => match self.snapshots.read_current(snapshot, ctx).await {
                Ok(after) => self.snapshots.diff(snapshot, &after),
                Err(error) => {
                    warn!(document_id = %document_id, error = %error, "Post-mutation read failed, using reported effect");
                    MutationDiff { regions: reported }
                }
            },
            None => MutationDiff { regions: reported },
        };

        let status = if failure.is_some() { "partial" } else { "completed" };
        let details = format!("{calls_completed}/{} calls, {cells_affected} cells", plan.len());
        log_mutation_operation("execute", Some(&document_id), intent_count, status, Some(&details));

        DocumentRun {
            outcome: DocumentOutcome {
                document_id,
                calls_planned: plan.len(),
                calls_completed,
                cells_affected,
                snapshot_id: snapshot.as_ref().map(|s| s.id),
                intents_applied: applied,
                reversible: snapshot.is_some() && value_restorable,
                would_deny: Vec::new(),
            },
            diff,
            failure,
        }
    }

    /// Dry run: the would-be effect of a document's intents, without writing. Each intent
    /// projects against the state the intents before it in plan order would leave.
    async fn project(&self, set: ApprovedSet, ctx: &RequestContext) -> DocumentRun {
        let plan = compile_batch(
            &set.document_id,
            set.intents,
            self.batching.max_operations_per_call,
        );
        let max_samples = self.snapshots.config().max_diff_samples;

        let mut diff = MutationDiff::default();
        let mut cells_affected = 0u64;
        let mut overlay = ProjectionOverlay::new();
        for intent in plan.calls.iter().flat_map(|call| call.intents.iter()) {
            let estimated = intent.metadata().estimated_cells_affected;
            cells_affected = cells_affected.saturating_add(estimated);

            let projected = match self
                .reader
                .read(&set.document_id, intent.region(), ReadConsistency::Cached, ctx)
                .await
            {
                Ok(read) => {
                    let current = overlay.apply(intent.region(), &read);
                    project_intent(&current, intent).map(|after| {
                        overlay.record(intent.region(), &after);
                        diff_region(intent.region(), &current, &after, max_samples, DiffSource::Projection)
                    })
                }
                Err(error) => {
                    warn!(intent_id = %intent.id(), error = %error, "Dry-run read failed, reporting estimate");
                    None
                }
            };

            diff.regions.push(projected.unwrap_or_else(|| RegionDiff {
                source: DiffSource::Projection,
                ..effect_report_diff(intent.region(), Some(estimated))
            }));
        }

        info!(
            document_id = %set.document_id,
            calls = plan.len(),
            cells = cells_affected,
            advisories = set.would_deny.len(),
            "🔍 DRY RUN: projected effect"
        );

        DocumentRun {
            outcome: DocumentOutcome {
                document_id: set.document_id,
                calls_planned: plan.len(),
                calls_completed: 0,
                cells_affected,
                snapshot_id: None,
                intents_applied: Vec::new(),
                reversible: false,
                would_deny: set.would_deny,
            },
            diff,
            failure: None,
        }
    }
}

/// Outcome of a document whose snapshot capture failed: nothing was written
fn not_started(plan: &CallPlan, error: GuardError) -> DocumentRun {
    DocumentRun {
        outcome: DocumentOutcome {
            document_id: plan.document_id.clone(),
            calls_planned: plan.len(),
            calls_completed: 0,
            cells_affected: 0,
            snapshot_id: None,
            intents_applied: Vec::new(),
            reversible: false,
            would_deny: Vec::new(),
        },
        diff: MutationDiff::default(),
        failure: Some(CallFailure {
            document_id: plan.document_id.clone(),
            call_index: None,
            intents_not_applied: plan.calls.iter().flat_map(|c| c.intent_ids()).collect(),
            error,
        }),
    }
}

fn summarize(
    dry_run: bool,
    runs: Vec<DocumentRun>,
    denied: Vec<PolicyViolation>,
    unevaluated: Vec<CallFailure>,
) -> MutationSummary {
    let mut documents = Vec::with_capacity(runs.len());
    let mut diff = MutationDiff::default();
    let mut failures = unevaluated;
    for run in runs {
        documents.push(run.outcome);
        diff.extend(run.diff);
        failures.extend(run.failure);
    }
    MutationSummary::from_documents(dry_run, documents, diff, denied, failures)
}

//! # Policy Enforcer
//!
//! Decides, per document, whether a set of intents may proceed:
//!
//! - the summed `estimated_cells_affected` must not exceed the effective limit
//! - every expected-state precondition must still hold on a fresh read
//!
//! Intents on unbounded regions (whole sheets, whole rows or columns) count the larger of
//! their declared estimate and the populated extent of their footprint, measured on a fresh
//! read. Structural kinds measure their whole sheet.
//!
//! A denial applies to every intent of the document. In a dry run nothing is denied; the
//! violations are reported as advisory `would_deny` entries instead. A document whose
//! evaluation reads fail is blocked with the error attached; other documents are unaffected.
//! The enforcer never writes to the remote service.

use super::{EffectScopeLimits, ExpectedState, PolicyDecision, SnapshotPreference};
use crate::cache::{ReadConsistency, ReadThroughReader};
use crate::config::PolicyConfig;
use crate::error::{GuardResult, PolicyViolation};
use crate::models::{partition_by_document, DocumentId, Intent};
use crate::remote::RequestContext;
use tracing::{debug, warn};

/// Everything the enforcer looks at for one submission
#[derive(Debug, Clone, Copy)]
pub struct EvaluationInput<'a> {
    pub intents: &'a [Intent],
    pub limits: EffectScopeLimits,
    pub expected_state: &'a [ExpectedState],
    pub dry_run: bool,
    pub snapshot: SnapshotPreference,
}

#[derive(Debug, Clone)]
pub struct PolicyEnforcer {
    reader: ReadThroughReader,
    config: PolicyConfig,
}

impl PolicyEnforcer {
    pub fn new(reader: ReadThroughReader, config: PolicyConfig) -> Self {
        Self { reader, config }
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// One decision per intent, in input order. Read failures are recorded per document in
    /// [`PolicyDecision::evaluation_error`] rather than failing the whole evaluation.
    pub async fn evaluate(
        &self,
        input: EvaluationInput<'_>,
        ctx: &RequestContext,
    ) -> GuardResult<Vec<PolicyDecision>> {
        let limit = input.limits.resolve(&self.config);
        let mut decisions = Vec::with_capacity(input.intents.len());

        for (document_id, intents) in partition_by_document(input.intents) {
            let preconditions: Vec<&ExpectedState> = input
                .expected_state
                .iter()
                .filter(|state| state.document_id == document_id)
                .collect();

            let (violations, evaluation_error) = match self
                .check_document(&document_id, &intents, limit, &preconditions, input.dry_run, ctx)
                .await
            {
                Ok(violations) => (violations, None),
                Err(error) => {
                    warn!(document_id = %document_id, error = %error, "Policy evaluation failed, document blocked");
                    (Vec::new(), Some(error))
                }
            };

            let allowed = evaluation_error.is_none() && (input.dry_run || violations.is_empty());
            let requires_snapshot = allowed
                && match input.snapshot {
                    SnapshotPreference::Always => true,
                    SnapshotPreference::Never => false,
                    SnapshotPreference::Auto => {
                        intents.iter().any(|intent| intent.metadata().destructive)
                    }
                };

            if let Some(violation) = violations.first() {
                if input.dry_run {
                    debug!(document_id = %document_id, violations = violations.len(), "Dry run would be denied");
                } else {
                    warn!(document_id = %document_id, code = violation.code.as_str(), "Mutation denied by policy");
                }
            }

            let (reason, would_deny) = if input.dry_run {
                (None, violations)
            } else {
                (violations.into_iter().next(), Vec::new())
            };

            for intent in intents {
                decisions.push(PolicyDecision {
                    intent_id: intent.id(),
                    document_id: document_id.clone(),
                    allowed,
                    reason: reason.clone(),
                    dry_run: input.dry_run,
                    requires_snapshot,
                    would_deny: would_deny.clone(),
                    evaluation_error: evaluation_error.clone(),
                });
            }
        }

        // Restore input order across documents
        decisions.sort_by_key(|decision| {
            input
                .intents
                .iter()
                .position(|intent| intent.id() == decision.intent_id)
        });
        Ok(decisions)
    }

    /// All violations for a dry run; the first one otherwise
    async fn check_document(
        &self,
        document_id: &DocumentId,
        intents: &[&Intent],
        limit: u64,
        preconditions: &[&ExpectedState],
        dry_run: bool,
        ctx: &RequestContext,
    ) -> GuardResult<Vec<PolicyViolation>> {
        let mut violations = Vec::new();

        let mut requested = 0u64;
        for intent in intents {
            let cells = self.estimate_cells(document_id, intent, ctx).await?;
            requested = requested.saturating_add(cells);
        }
        if requested > limit {
            violations.push(PolicyViolation::effect_scope_exceeded(
                document_id.clone(),
                requested,
                limit,
            ));
            if !dry_run {
                return Ok(violations);
            }
        }

        for state in preconditions {
            let observed = self
                .reader
                .read(document_id, &state.region, ReadConsistency::Fresh, ctx)
                .await?;

            if !state.condition.matches(&observed) {
                violations.push(PolicyViolation::state_mismatch(
                    document_id.clone(),
                    state.region.clone(),
                    state.condition.describe_expected(),
                    state.condition.describe_observed(&observed),
                ));
                if !dry_run {
                    return Ok(violations);
                }
            }
        }

        Ok(violations)
    }

    /// Cells `intent` may touch. Bounded targets use the declared estimate.
    async fn estimate_cells(
        &self,
        document_id: &DocumentId,
        intent: &Intent,
        ctx: &RequestContext,
    ) -> GuardResult<u64> {
        let declared = intent.metadata().estimated_cells_affected;
        let footprint = intent.footprint();
        if footprint.is_bounded() {
            return Ok(declared);
        }

        let populated = self
            .reader
            .read(document_id, &footprint, ReadConsistency::Fresh, ctx)
            .await?;
        let measured = (populated.row_count() as u64).saturating_mul(populated.column_count() as u64);
        debug!(
            document_id = %document_id,
            region = %footprint,
            declared = declared,
            measured = measured,
            "Measured unbounded intent"
        );
        Ok(declared.max(measured))
    }
}

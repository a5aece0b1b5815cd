//! # Mutation Summaries
//!
//! The caller-facing record of what a submission (or a restore) actually did.

use super::ids::{DocumentId, IntentId, SnapshotId};
use super::region::Region;
use crate::error::{GuardError, PolicyViolation};
use serde::Serialize;
use serde_json::Value;

/// One cell's before/after values
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellChange {
    pub cell: String,
    pub before: Value,
    pub after: Value,
}

/// Where a region diff came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffSource {
    /// Captured snapshot compared against a fresh post-mutation read
    Snapshot,
    /// Per-call effect report from the remote service
    EffectReport,
    /// Would-be effect computed for a dry run
    Projection,
}

/// Cell-level diff of one region. `samples` holds at most the configured sample size of
/// individual changes; the counts are always exact.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionDiff {
    pub region: Region,
    pub added: u64,
    pub removed: u64,
    pub changed: u64,
    pub sampled: bool,
    pub samples: Vec<CellChange>,
    pub source: DiffSource,
}

impl RegionDiff {
    pub fn total(&self) -> u64 {
        self.added + self.removed + self.changed
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MutationDiff {
    pub regions: Vec<RegionDiff>,
}

impl MutationDiff {
    pub fn added(&self) -> u64 {
        self.regions.iter().map(|r| r.added).sum()
    }

    pub fn removed(&self) -> u64 {
        self.regions.iter().map(|r| r.removed).sum()
    }

    pub fn changed(&self) -> u64 {
        self.regions.iter().map(|r| r.changed).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.iter().all(|r| r.total() == 0)
    }

    pub fn extend(&mut self, other: MutationDiff) {
        self.regions.extend(other.regions);
    }
}

/// Per-document execution outcome
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentOutcome {
    pub document_id: DocumentId,
    pub calls_planned: usize,
    pub calls_completed: usize,
    pub cells_affected: u64,
    pub snapshot_id: Option<SnapshotId>,
    pub intents_applied: Vec<IntentId>,
    pub reversible: bool,
    /// Advisory denials found while evaluating a dry run
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub would_deny: Vec<PolicyViolation>,
}

/// A call that failed terminally, with the intents it left unapplied
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallFailure {
    pub document_id: DocumentId,
    pub call_index: Option<usize>,
    pub intents_not_applied: Vec<IntentId>,
    pub error: GuardError,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MutationSummary {
    pub cells_affected: u64,
    pub reversible: bool,
    /// Snapshot of the first document that captured one
    pub snapshot_id: Option<SnapshotId>,
    pub diff: MutationDiff,
    pub dry_run: bool,
    pub calls_planned: usize,
    pub calls_completed: usize,
    pub documents: Vec<DocumentOutcome>,
    /// Documents denied by policy while others in the submission went ahead
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub denied: Vec<PolicyViolation>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<CallFailure>,
}

impl MutationSummary {
    pub fn from_documents(
        dry_run: bool,
        documents: Vec<DocumentOutcome>,
        diff: MutationDiff,
        denied: Vec<PolicyViolation>,
        failures: Vec<CallFailure>,
    ) -> Self {
        let cells_affected = documents.iter().map(|d| d.cells_affected).sum();
        let calls_planned = documents.iter().map(|d| d.calls_planned).sum();
        let calls_completed = documents.iter().map(|d| d.calls_completed).sum();
        let snapshot_id = documents.iter().find_map(|d| d.snapshot_id);
        let reversible = !dry_run
            && !documents.is_empty()
            && documents.iter().all(|d| d.reversible);

        Self {
            cells_affected,
            reversible,
            snapshot_id,
            diff,
            dry_run,
            calls_planned,
            calls_completed,
            documents,
            denied,
            failures,
        }
    }

    /// Some calls failed or some documents were denied
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty() || !self.denied.is_empty()
    }

    /// Advisory denials collected during a dry run
    pub fn would_deny(&self) -> impl Iterator<Item = &PolicyViolation> {
        self.documents.iter().flat_map(|d| d.would_deny.iter())
    }
}

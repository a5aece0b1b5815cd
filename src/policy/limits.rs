//! Caller-supplied policy inputs and the decisions the enforcer returns.

use crate::config::PolicyConfig;
use crate::error::{GuardError, PolicyViolation};
use crate::models::{DocumentId, IntentId, Region};
use crate::remote::ValueRange;
use serde::{Deserialize, Serialize};

/// Per-call override of the effect-scope limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EffectScopeLimits {
    pub max_cells_affected: Option<u64>,
}

impl EffectScopeLimits {
    pub fn max_cells(max_cells_affected: u64) -> Self {
        Self {
            max_cells_affected: Some(max_cells_affected),
        }
    }

    /// The limit in force: the override or the configured default, never above the ceiling
    pub fn resolve(&self, policy: &PolicyConfig) -> u64 {
        self.max_cells_affected
            .unwrap_or(policy.default_max_cells_affected)
            .min(policy.absolute_max_cells_affected)
    }
}

/// Whether to capture a snapshot before writing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotPreference {
    /// Capture when any intent of the document is destructive
    #[default]
    Auto,
    Always,
    Never,
}

/// Something the caller observed about a region earlier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExpectedCondition {
    VersionToken { token: String },
    /// SHA-256 hex of the region's values, as produced by [`ValueRange::checksum`]
    Checksum { checksum: String },
    Dimensions { rows: usize, columns: usize },
}

impl ExpectedCondition {
    pub fn matches(&self, observed: &ValueRange) -> bool {
        match self {
            Self::VersionToken { token } => observed.revision.as_deref() == Some(token.as_str()),
            Self::Checksum { checksum } => observed.checksum() == *checksum,
            Self::Dimensions { rows, columns } => {
                observed.row_count() == *rows && observed.column_count() == *columns
            }
        }
    }

    pub fn describe_expected(&self) -> String {
        match self {
            Self::VersionToken { token } => format!("revision {token}"),
            Self::Checksum { checksum } => format!("checksum {checksum}"),
            Self::Dimensions { rows, columns } => format!("{rows}x{columns}"),
        }
    }

    pub fn describe_observed(&self, observed: &ValueRange) -> String {
        match self {
            Self::VersionToken { .. } => match &observed.revision {
                Some(revision) => format!("revision {revision}"),
                None => "no revision".to_string(),
            },
            Self::Checksum { .. } => format!("checksum {}", observed.checksum()),
            Self::Dimensions { .. } => {
                format!("{}x{}", observed.row_count(), observed.column_count())
            }
        }
    }
}

/// A precondition on one region of one document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedState {
    pub document_id: DocumentId,
    pub region: Region,
    pub condition: ExpectedCondition,
}

impl ExpectedState {
    pub fn version_token(
        document_id: impl Into<DocumentId>,
        region: Region,
        token: impl Into<String>,
    ) -> Self {
        Self {
            document_id: document_id.into(),
            region,
            condition: ExpectedCondition::VersionToken {
                token: token.into(),
            },
        }
    }

    pub fn checksum(
        document_id: impl Into<DocumentId>,
        region: Region,
        checksum: impl Into<String>,
    ) -> Self {
        Self {
            document_id: document_id.into(),
            region,
            condition: ExpectedCondition::Checksum {
                checksum: checksum.into(),
            },
        }
    }

    pub fn dimensions(
        document_id: impl Into<DocumentId>,
        region: Region,
        rows: usize,
        columns: usize,
    ) -> Self {
        Self {
            document_id: document_id.into(),
            region,
            condition: ExpectedCondition::Dimensions { rows, columns },
        }
    }
}

/// Outcome of evaluating one intent
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyDecision {
    pub intent_id: IntentId,
    pub document_id: DocumentId,
    pub allowed: bool,
    /// First violation when denied
    pub reason: Option<PolicyViolation>,
    pub dry_run: bool,
    pub requires_snapshot: bool,
    /// Violations a dry run would have been denied for
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub would_deny: Vec<PolicyViolation>,
    /// The document could not be evaluated (a read it needed failed); nothing may proceed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluation_error: Option<GuardError>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn observed(revision: Option<&str>) -> ValueRange {
        ValueRange {
            region: Region::parse("S!A1:B2").unwrap(),
            values: vec![vec![json!(1), json!(2)], vec![json!(3)]],
            revision: revision.map(String::from),
        }
    }

    #[test]
    fn limit_is_clamped_to_ceiling() {
        let policy = PolicyConfig::default();
        assert_eq!(EffectScopeLimits::default().resolve(&policy), 50_000);
        assert_eq!(EffectScopeLimits::max_cells(10).resolve(&policy), 10);
        assert_eq!(
            EffectScopeLimits::max_cells(u64::MAX).resolve(&policy),
            policy.absolute_max_cells_affected
        );
    }

    #[test]
    fn conditions_match_observed_state() {
        let values = observed(Some("7"));

        let token = ExpectedCondition::VersionToken { token: "7".into() };
        assert!(token.matches(&values));
        assert!(!token.matches(&observed(Some("8"))));
        assert!(!token.matches(&observed(None)));

        let checksum = ExpectedCondition::Checksum {
            checksum: values.checksum(),
        };
        assert!(checksum.matches(&values));

        let dims = ExpectedCondition::Dimensions { rows: 2, columns: 2 };
        assert!(dims.matches(&values));
        assert_eq!(dims.describe_observed(&values), "2x2");
    }

    #[test]
    fn expected_state_deserializes_tagged() {
        let state: ExpectedState = serde_json::from_value(json!({
            "document_id": "doc",
            "region": "Sheet1!A1:B2",
            "condition": {"type": "version_token", "token": "42"}
        }))
        .unwrap();
        assert_eq!(
            state,
            ExpectedState::version_token("doc", Region::parse("Sheet1!A1:B2").unwrap(), "42")
        );
    }
}

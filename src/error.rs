//! Error types for SheetGuard.
//!
//! Every failure surfaced to a caller is a [`GuardError`] carrying a stable code string and
//! enough structured detail (document, region, cell counts, limits, endpoint, attempts) to act
//! on without parsing the message.

use crate::config::ConfigurationError;
use crate::constants::error_codes;
use crate::models::{DocumentId, IntentId, Region, SnapshotId};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Crate-wide result alias
pub type GuardResult<T> = Result<T, GuardError>;

#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "error", content = "detail", rename_all = "snake_case")]
pub enum GuardError {
    #[error("Validation error: {0}")]
    Validation(ValidationError),

    #[error("Policy violation: {0}")]
    PolicyViolation(PolicyViolation),

    #[error("Transient remote error on {endpoint} after {attempts} attempt(s): {message}")]
    TransientRemote {
        endpoint: String,
        attempts: u32,
        status: Option<u16>,
        message: String,
        #[serde(with = "optional_duration_ms")]
        retry_after: Option<Duration>,
    },

    #[error("Permanent remote error on {endpoint}: {message}")]
    PermanentRemote {
        endpoint: String,
        status: Option<u16>,
        message: String,
    },

    #[error("Circuit breaker open for {endpoint}, retry in {retry_in:?}")]
    CircuitOpen {
        endpoint: String,
        #[serde(with = "duration_ms")]
        retry_in: Duration,
    },

    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(CapacityExceeded),

    #[error("Snapshot not found or expired: {snapshot_id}")]
    SnapshotNotFound { snapshot_id: SnapshotId },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Broad grouping used by logging and health reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Validation,
    Policy,
    Remote,
    Capacity,
    Snapshot,
    Configuration,
    Internal,
}

/// A malformed intent or submission, rejected before policy evaluation
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{field}: {reason}")]
pub struct ValidationError {
    pub intent_id: Option<IntentId>,
    pub field: String,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            intent_id: None,
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn for_intent(
        intent_id: IntentId,
        field: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            intent_id: Some(intent_id),
            field: field.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicyViolationCode {
    EffectScopeExceeded,
    StateMismatch,
}

impl PolicyViolationCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EffectScopeExceeded => error_codes::EFFECT_SCOPE_EXCEEDED,
            Self::StateMismatch => error_codes::STATE_MISMATCH,
        }
    }
}

/// A denial produced by the policy enforcer
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{} for document {document_id}: {message}", code.as_str())]
pub struct PolicyViolation {
    pub code: PolicyViolationCode,
    pub document_id: DocumentId,
    pub region: Option<Region>,
    pub cells_requested: Option<u64>,
    pub limit: Option<u64>,
    pub expected: Option<String>,
    pub observed: Option<String>,
    pub message: String,
}

impl PolicyViolation {
    pub fn effect_scope_exceeded(document_id: DocumentId, cells_requested: u64, limit: u64) -> Self {
        Self {
            code: PolicyViolationCode::EffectScopeExceeded,
            message: format!("{cells_requested} cells requested, limit is {limit}"),
            document_id,
            region: None,
            cells_requested: Some(cells_requested),
            limit: Some(limit),
            expected: None,
            observed: None,
        }
    }

    pub fn state_mismatch(
        document_id: DocumentId,
        region: Region,
        expected: impl Into<String>,
        observed: impl Into<String>,
    ) -> Self {
        let expected = expected.into();
        let observed = observed.into();
        Self {
            code: PolicyViolationCode::StateMismatch,
            message: format!("{region} expected {expected}, observed {observed}"),
            document_id,
            region: Some(region),
            cells_requested: None,
            limit: None,
            expected: Some(expected),
            observed: Some(observed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum CapacityExceeded {
    #[error("queue full ({in_flight} in flight, max queue depth {max_queue_depth})")]
    QueueFull {
        max_queue_depth: usize,
        in_flight: usize,
    },
    #[error("deadline exceeded while {stage}")]
    DeadlineExceeded { stage: String },
}

impl GuardError {
    /// Stable code string for this error
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => error_codes::VALIDATION_ERROR,
            Self::PolicyViolation(violation) => violation.code.as_str(),
            Self::TransientRemote { .. } => error_codes::TRANSIENT_REMOTE_ERROR,
            Self::PermanentRemote { .. } => error_codes::PERMANENT_REMOTE_ERROR,
            Self::CircuitOpen { .. } => error_codes::CIRCUIT_OPEN,
            Self::CapacityExceeded(_) => error_codes::CAPACITY_EXCEEDED,
            Self::SnapshotNotFound { .. } => error_codes::SNAPSHOT_NOT_FOUND,
            Self::Configuration(_) => error_codes::CONFIGURATION_ERROR,
            Self::Internal(_) => error_codes::INTERNAL_ERROR,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation(_) => ErrorCategory::Validation,
            Self::PolicyViolation(_) => ErrorCategory::Policy,
            Self::TransientRemote { .. } | Self::PermanentRemote { .. } | Self::CircuitOpen { .. } => {
                ErrorCategory::Remote
            }
            Self::CapacityExceeded(_) => ErrorCategory::Capacity,
            Self::SnapshotNotFound { .. } => ErrorCategory::Snapshot,
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::Internal(_) => ErrorCategory::Internal,
        }
    }

    /// Whether the caller may reasonably resubmit the same request later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransientRemote { .. } | Self::CircuitOpen { .. } | Self::CapacityExceeded(_)
        )
    }

    /// Whether the retry executor may attempt the call again
    pub fn is_locally_retryable(&self) -> bool {
        matches!(self, Self::TransientRemote { .. })
    }

    /// Whether this failure counts toward opening a circuit breaker (permanent errors do not)
    pub fn counts_toward_circuit(&self) -> bool {
        matches!(self, Self::TransientRemote { .. })
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::TransientRemote { retry_after, .. } => *retry_after,
            Self::CircuitOpen { retry_in, .. } => Some(*retry_in),
            _ => None,
        }
    }

    /// Record the number of attempts made on a transient failure
    pub fn with_attempts(self, total: u32) -> Self {
        match self {
            Self::TransientRemote {
                endpoint,
                status,
                message,
                retry_after,
                ..
            } => Self::TransientRemote {
                endpoint,
                attempts: total,
                status,
                message,
                retry_after,
            },
            other => other,
        }
    }

    pub fn deadline_exceeded(stage: impl Into<String>) -> Self {
        Self::CapacityExceeded(CapacityExceeded::DeadlineExceeded {
            stage: stage.into(),
        })
    }

    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation(ValidationError::new(field, reason))
    }

    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(
            self,
            Self::CapacityExceeded(CapacityExceeded::DeadlineExceeded { .. })
        )
    }
}

impl From<ValidationError> for GuardError {
    fn from(error: ValidationError) -> Self {
        Self::Validation(error)
    }
}

impl From<PolicyViolation> for GuardError {
    fn from(violation: PolicyViolation) -> Self {
        Self::PolicyViolation(violation)
    }
}

impl From<CapacityExceeded> for GuardError {
    fn from(error: CapacityExceeded) -> Self {
        Self::CapacityExceeded(error)
    }
}

impl From<ConfigurationError> for GuardError {
    fn from(error: ConfigurationError) -> Self {
        Self::Configuration(error.to_string())
    }
}

impl From<serde_json::Error> for GuardError {
    fn from(error: serde_json::Error) -> Self {
        Self::Internal(format!("JSON serialization error: {error}"))
    }
}

mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }
}

mod optional_duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => {
                serializer.serialize_some(&u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
            }
            None => serializer.serialize_none(),
        }
    }
}

use super::types::Endpoint;
use crate::error::GuardError;
use std::time::Duration;
use thiserror::Error;

/// Failure reported by the remote service, classified by HTTP-style status
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },
    #[error("transient failure ({status}): {message}")]
    Transient { status: u16, message: String },
    #[error("permanent failure ({status}): {message}")]
    Permanent { status: u16, message: String },
    #[error("transport error: {0}")]
    Transport(String),
}

impl RemoteError {
    /// 429 is a rate limit, 408 and 5xx are transient, every other status is permanent
    pub fn from_status(status: u16, message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        let message = message.into();
        match status {
            429 => Self::RateLimited {
                message,
                retry_after,
            },
            408 | 500..=599 => Self::Transient { status, message },
            _ => Self::Permanent { status, message },
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::RateLimited { .. } => Some(429),
            Self::Transient { status, .. } | Self::Permanent { status, .. } => Some(*status),
            Self::Transport(_) => None,
        }
    }

    pub fn into_guard(self, endpoint: Endpoint) -> GuardError {
        let status = self.status();
        let endpoint = endpoint.as_str().to_string();
        match self {
            Self::RateLimited {
                message,
                retry_after,
            } => GuardError::TransientRemote {
                endpoint,
                attempts: 1,
                status,
                message,
                retry_after,
            },
            Self::Transient { message, .. } => GuardError::TransientRemote {
                endpoint,
                attempts: 1,
                status,
                message,
                retry_after: None,
            },
            Self::Transport(message) => GuardError::TransientRemote {
                endpoint,
                attempts: 1,
                status,
                message,
                retry_after: None,
            },
            Self::Permanent { message, .. } => GuardError::PermanentRemote {
                endpoint,
                status,
                message,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_statuses() {
        assert!(matches!(
            RemoteError::from_status(429, "slow down", Some(Duration::from_secs(2))),
            RemoteError::RateLimited { .. }
        ));
        assert!(matches!(
            RemoteError::from_status(408, "timeout", None),
            RemoteError::Transient { status: 408, .. }
        ));
        assert!(matches!(
            RemoteError::from_status(503, "unavailable", None),
            RemoteError::Transient { status: 503, .. }
        ));
        assert!(matches!(
            RemoteError::from_status(404, "missing", None),
            RemoteError::Permanent { status: 404, .. }
        ));
    }

    #[test]
    fn rate_limit_keeps_retry_after_hint() {
        let error = RemoteError::from_status(429, "slow down", Some(Duration::from_secs(3)))
            .into_guard(Endpoint::BatchUpdate);
        assert!(error.is_locally_retryable());
        assert_eq!(error.retry_after(), Some(Duration::from_secs(3)));
        assert_eq!(error.code(), "TRANSIENT_REMOTE_ERROR");
    }

    #[test]
    fn permanent_is_not_retryable() {
        let error = RemoteError::from_status(400, "bad", None).into_guard(Endpoint::ReadValues);
        assert!(!error.is_locally_retryable());
        assert_eq!(error.code(), "PERMANENT_REMOTE_ERROR");
    }
}

//! # Structured Logging Module
//!
//! Environment-aware structured logging for the mutation pipeline, plus helpers emitting
//! uniform operation events.

use crate::constants::{env_vars, environments};
use crate::error::GuardError;
use crate::models::{DocumentId, SnapshotId};
use crate::remote::Endpoint;
use chrono::Utc;
use std::sync::OnceLock;
use std::time::Duration;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration.
///
/// `RUST_LOG` overrides the environment's default level. Set `SHEETGUARD_LOG_FORMAT=json` for
/// JSON lines. Safe to call more than once.
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(get_log_level(&environment)));

        let layer = if use_json_format() {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(false)
                .json()
                .with_filter(filter)
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_filter(filter)
                .boxed()
        };

        if tracing_subscriber::registry().with(layer).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized, keeping it");
        }

        tracing::info!(
            environment = %environment,
            json = use_json_format(),
            "🔧 STRUCTURED LOGGING: Initialized"
        );
    });
}

fn get_environment() -> String {
    std::env::var(env_vars::ENVIRONMENT)
        .or_else(|_| std::env::var(env_vars::FALLBACK_ENVIRONMENT))
        .unwrap_or_else(|_| environments::DEVELOPMENT.to_string())
}

fn get_log_level(environment: &str) -> &'static str {
    match environment {
        environments::PRODUCTION => "info",
        _ => "debug",
    }
}

fn use_json_format() -> bool {
    std::env::var(env_vars::LOG_FORMAT)
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

/// Log structured data for submission and restore operations
pub fn log_mutation_operation(
    operation: &str,
    document_id: Option<&DocumentId>,
    intent_count: usize,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        document_id = document_id.map(DocumentId::as_str),
        intent_count = intent_count,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "📝 MUTATION_OPERATION"
    );
}

/// Log one network attempt against the remote service
pub fn log_remote_call(
    endpoint: Endpoint,
    document_id: &DocumentId,
    attempt: u32,
    duration: Duration,
    error: Option<&GuardError>,
) {
    match error {
        None => tracing::debug!(
            endpoint = %endpoint,
            document_id = %document_id,
            attempt = attempt,
            duration_ms = duration.as_millis(),
            "🌐 REMOTE_CALL"
        ),
        Some(error) => tracing::warn!(
            endpoint = %endpoint,
            document_id = %document_id,
            attempt = attempt,
            duration_ms = duration.as_millis(),
            error_code = error.code(),
            error = %error,
            "🌐 REMOTE_CALL failed"
        ),
    }
}

/// Log structured data for snapshot capture, restore and expiry
pub fn log_snapshot_operation(
    operation: &str,
    snapshot_id: SnapshotId,
    document_id: &DocumentId,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        snapshot_id = %snapshot_id,
        document_id = %document_id,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "📸 SNAPSHOT_OPERATION"
    );
}

/// Log error with full context
pub fn log_error(component: &str, operation: &str, error: &GuardError, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error_code = error.code(),
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "❌ ERROR"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_mapping() {
        assert_eq!(get_log_level("test"), "debug");
        assert_eq!(get_log_level("development"), "debug");
        assert_eq!(get_log_level("production"), "info");
        assert_eq!(get_log_level("unknown"), "debug");
    }

    #[test]
    fn test_init_is_idempotent() {
        init_structured_logging();
        init_structured_logging();
        log_error(
            "test",
            "noop",
            &GuardError::Internal("nothing wrong".into()),
            None,
        );
    }
}

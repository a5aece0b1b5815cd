#![allow(clippy::doc_markdown)] // Allow technical terms like A1, SHA-256 in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # SheetGuard Core
//!
//! Mutation safety and resilience layer for a rate-limited, eventually-consistent remote
//! spreadsheet service.
//!
//! ## Overview
//!
//! Callers describe the changes they want as [`Intent`]s. SheetGuard decides whether those
//! changes are allowed, captures what they are about to overwrite, compiles them into the
//! smallest ordered set of remote batch calls, pushes those calls through a resilience stack
//! and hands back a [`MutationSummary`] describing exactly what happened.
//!
//! ## Architecture
//!
//! ```text
//! Caller ─▶ Validation ─▶ PolicyEnforcer ─▶ [SnapshotService] ─▶ BatchCompiler
//!                                                                    │
//!   ┌────────────────────────────── ResilienceStack ◀────────────────┘
//!   │  RateLimiter ─▶ Deduplicator ─▶ CircuitBreaker ─▶ RetryExecutor ─▶ ConcurrencyLimiter
//!   ▼
//! DocumentService (remote) ─▶ diff / MutationSummary ─▶ RegionCache invalidation ─▶ Caller
//! ```
//!
//! ## Module Organization
//!
//! - [`models`] - Regions, intents, identifiers and mutation summaries
//! - [`remote`] - The remote document service contract and an in-memory implementation
//! - [`resilience`] - Rate limiting, deduplication, circuit breaking, retry and concurrency
//! - [`cache`] - Region-aware read-through cache
//! - [`policy`] - Effect-scope limits and optimistic-concurrency preconditions
//! - [`snapshot`] - Pre-mutation capture, restore planning and cell-level diffs
//! - [`orchestration`] - Batch compilation, execution and the [`MutationCore`] entry points
//! - [`config`] - YAML + environment layered configuration
//! - [`error`] - Structured error taxonomy
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sheetguard_core::{
//!     GuardConfig, Intent, IntentKind, MutationCore, SubmitOptions,
//!     remote::InMemoryDocumentService,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let service = Arc::new(InMemoryDocumentService::new());
//! let core = MutationCore::new(service, GuardConfig::default())?;
//!
//! let intent = Intent::new(
//!     "budget-2025",
//!     "Sheet1!A1:B2".parse()?,
//!     IntentKind::WriteValues,
//!     serde_json::json!({ "values": [[1, 2], [3, 4]] }),
//! );
//!
//! let summary = core.submit(vec![intent], SubmitOptions::default()).await?;
//! println!("{} cells affected", summary.cells_affected);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod policy;
pub mod remote;
pub mod resilience;
pub mod snapshot;
pub mod validation;

pub use config::{ConfigManager, GuardConfig};
pub use error::{
    CapacityExceeded, ErrorCategory, GuardError, GuardResult, PolicyViolation,
    PolicyViolationCode, ValidationError,
};
pub use models::{
    DocumentId, Intent, IntentId, IntentKind, IntentMetadata, IntentTarget, MutationSummary,
    Priority, Region, SnapshotId,
};
pub use orchestration::{HealthReport, MutationCore, SnapshotPreference, SubmitOptions};
pub use policy::{EffectScopeLimits, ExpectedCondition, ExpectedState, PolicyDecision};

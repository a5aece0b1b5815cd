//! # Orchestration
//!
//! From validated intents to executed remote calls.
//!
//! ## Core Components
//!
//! - **MutationCore**: the `submit` / `restore_snapshot` entry points and component lifecycle
//! - **BatchCompiler**: policy, snapshot, compile, execute, invalidate, summarize
//! - **call_plan**: minimal ordered call compilation under region-overlap constraints

pub mod batch_compiler;
pub mod call_plan;
pub mod core;

pub use self::core::{HealthReport, MutationCore, SubmitOptions};
pub use batch_compiler::{BatchCompiler, ExecutionRequest};
pub use call_plan::{compile_batch, CallPlan, CompiledCall};
pub use crate::policy::SnapshotPreference;

//! # Policy
//!
//! Effect-scope limits and optimistic-concurrency preconditions, evaluated before anything is
//! written.

pub mod enforcer;
pub mod limits;

pub use enforcer::{EvaluationInput, PolicyEnforcer};
pub use limits::{
    EffectScopeLimits, ExpectedCondition, ExpectedState, PolicyDecision, SnapshotPreference,
};

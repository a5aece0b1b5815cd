//! # Domain Models
//!
//! Value types shared by every component: identifiers, A1-notation regions, intents and the
//! summary returned to callers once a submission completes.

pub mod ids;
pub mod intent;
pub mod region;
pub mod summary;

pub use ids::{DocumentId, IntentId, SnapshotId};
pub use intent::{
    partition_by_document, Intent, IntentKind, IntentMetadata, IntentTarget, Priority,
};
pub use region::{Region, RegionParseError, Span};
pub use summary::{
    CallFailure, CellChange, DiffSource, DocumentOutcome, MutationDiff, MutationSummary,
    RegionDiff,
};

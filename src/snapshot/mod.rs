//! # Snapshot & Diff
//!
//! Pre-mutation capture of region values, retention-bounded storage, restore planning and
//! cell-level diffs for mutation summaries.

pub mod diff;
pub mod service;
pub mod store;

pub use diff::{diff_region, effect_report_diff, project_intent, ProjectionOverlay};
pub use service::SnapshotService;
pub use store::{
    CapturedRegion, InMemorySnapshotStore, Snapshot, SnapshotMetadata, SnapshotStore,
};

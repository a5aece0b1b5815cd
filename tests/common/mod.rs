//! Shared fixtures for the integration suite

#![allow(dead_code)]

use serde_json::{json, Value};
use sheetguard_core::remote::InMemoryDocumentService;
use sheetguard_core::{DocumentId, GuardConfig, Intent, IntentKind, MutationCore, Region};
use std::sync::Arc;
use tracing::Level;

pub const DOC: &str = "budget-2025";

pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .with_test_writer()
        .try_init();
}

pub fn region(a1: &str) -> Region {
    Region::parse(a1).unwrap()
}

pub fn doc() -> DocumentId {
    DocumentId::from(DOC)
}

/// A core over a fresh in-memory service, with test defaults
pub fn test_core() -> (Arc<InMemoryDocumentService>, MutationCore) {
    test_core_with(GuardConfig::for_test())
}

pub fn test_core_with(config: GuardConfig) -> (Arc<InMemoryDocumentService>, MutationCore) {
    init_test_logging();
    let remote = Arc::new(InMemoryDocumentService::new());
    let core = MutationCore::new(remote.clone(), config).unwrap();
    (remote, core)
}

pub fn write_values(a1: &str, values: Value) -> Intent {
    Intent::new(DOC, region(a1), IntentKind::WriteValues, json!({ "values": values }))
}

pub fn format_cells(a1: &str) -> Intent {
    Intent::new(DOC, region(a1), IntentKind::FormatCells, json!({"bold": true}))
}

pub fn clear_values(a1: &str) -> Intent {
    Intent::new(DOC, region(a1), IntentKind::ClearValues, json!({}))
}

/// Seed `a1` with a matrix of JSON values
pub fn seed(remote: &InMemoryDocumentService, a1: &str, values: Value) {
    let rows = values
        .as_array()
        .unwrap()
        .iter()
        .map(|row| row.as_array().unwrap().clone())
        .collect();
    remote.seed_values(&doc(), &region(a1), rows);
}

pub fn peek(remote: &InMemoryDocumentService, a1: &str) -> Vec<Vec<Value>> {
    remote.peek_values(&doc(), &region(a1)).values
}

//! End-to-end behaviour of `MutationCore::submit` and `MutationCore::restore_snapshot`
//! against the in-memory document service.

mod common;

use common::*;
use serde_json::json;
use sheetguard_core::models::DiffSource;
use sheetguard_core::remote::{Endpoint, ScriptedFault};
use sheetguard_core::{ExpectedState, Intent, IntentKind, SnapshotId, SnapshotPreference, SubmitOptions};

#[tokio::test]
async fn over_limit_submission_is_denied_without_remote_calls() {
    let (remote, core) = test_core();
    let intent = write_values("Sheet1!A1:J100", json!([[1]]));
    assert_eq!(intent.metadata().estimated_cells_affected, 1000);

    let err = core
        .submit(vec![intent], SubmitOptions::default().with_max_cells(100))
        .await
        .unwrap_err();

    assert_eq!(err.code(), "EFFECT_SCOPE_EXCEEDED");
    assert_eq!(remote.batch_update_calls(), 0);
    assert_eq!(remote.read_values_calls(), 0);
    assert_eq!(core.snapshots().retained(), 0);
}

#[tokio::test]
async fn whole_sheet_clear_counts_its_populated_cells() {
    let (remote, core) = test_core();
    seed(&remote, "Sheet1!A1:C3", json!([[1, 2, 3], [4, 5, 6], [7, 8, 9]]));

    let err = core
        .submit(
            vec![clear_values("Sheet1")],
            SubmitOptions::default().with_max_cells(1),
        )
        .await
        .unwrap_err();

    assert_eq!(err.code(), "EFFECT_SCOPE_EXCEEDED");
    assert_eq!(remote.batch_update_calls(), 0);
    assert_eq!(peek(&remote, "Sheet1!A1:C3").len(), 3);

    let summary = core
        .submit(
            vec![clear_values("Sheet1!A:C")],
            SubmitOptions::default()
                .with_max_cells(9)
                .with_snapshot(SnapshotPreference::Never),
        )
        .await
        .unwrap();
    assert_eq!(summary.documents.len(), 1);
    assert_eq!(remote.batch_update_calls(), 1);
}

#[tokio::test]
async fn dry_run_is_idempotent_and_writes_nothing() {
    let (remote, core) = test_core();
    seed(&remote, "Sheet1!A1:B2", json!([[1, 2], [3, 4]]));
    let intents = vec![write_values("Sheet1!A1:B2", json!([[1, 9], [3, 9]]))];

    let first = core
        .submit(intents.clone(), SubmitOptions::dry_run())
        .await
        .unwrap();
    let second = core.submit(intents, SubmitOptions::dry_run()).await.unwrap();

    assert!(first.dry_run);
    assert!(!first.reversible);
    assert!(first.snapshot_id.is_none());
    assert_eq!(first.cells_affected, second.cells_affected);
    assert_eq!(first.diff, second.diff);
    assert_eq!(first.diff.changed(), 2);
    assert_eq!(first.diff.regions[0].source, DiffSource::Projection);

    assert_eq!(remote.batch_update_calls(), 0);
    assert_eq!(peek(&remote, "Sheet1!A1:B2"), vec![vec![json!(1), json!(2)], vec![json!(3), json!(4)]]);
    assert_eq!(core.snapshots().retained(), 0);
}

#[tokio::test]
async fn dry_run_reports_what_would_be_denied() {
    let (remote, core) = test_core();
    let intent = write_values("Sheet1!A1:J100", json!([[1]]));

    let summary = core
        .submit(vec![intent], SubmitOptions::dry_run().with_max_cells(100))
        .await
        .unwrap();

    assert!(summary.dry_run);
    assert_eq!(summary.documents.len(), 1);
    assert_eq!(summary.documents[0].would_deny.len(), 1);
    assert_eq!(remote.batch_update_calls(), 0);
}

#[tokio::test]
async fn disjoint_intents_compile_into_one_call() {
    let (remote, core) = test_core();
    let intents = vec![
        write_values("Sheet1!A1:B1", json!([[1, 2]])),
        write_values("Sheet1!D1:E1", json!([[3, 4]])),
    ];

    let summary = core
        .submit(
            intents,
            SubmitOptions::default().with_snapshot(SnapshotPreference::Never),
        )
        .await
        .unwrap();

    assert_eq!(remote.batch_update_calls(), 1);
    assert_eq!(remote.recorded_batches()[0].operations.len(), 2);
    assert_eq!(summary.calls_planned, 1);
    assert_eq!(summary.calls_completed, 1);
    assert_eq!(summary.cells_affected, 4);
    assert!(!summary.reversible);
    assert!(summary.snapshot_id.is_none());
}

#[tokio::test]
async fn destructive_intent_captures_one_snapshot() {
    let (remote, core) = test_core();
    seed(&remote, "Sheet1!A1:B2", json!([[1, 2], [3, 4]]));

    let summary = core
        .submit(
            vec![write_values("Sheet1!A1:B2", json!([[9, 9], [9, 9]]))],
            SubmitOptions::default(),
        )
        .await
        .unwrap();

    assert!(summary.reversible);
    let snapshot_id = summary.snapshot_id.expect("destructive write captures a snapshot");
    assert_eq!(core.snapshots().retained(), 1);

    let listed = core.list_snapshots().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, snapshot_id);
    assert_eq!(listed[0].cell_count, 4);

    assert_eq!(summary.diff.changed(), 4);
    assert_eq!(summary.diff.regions[0].source, DiffSource::Snapshot);
    assert_eq!(remote.batch_update_calls(), 1);
}

#[tokio::test]
async fn failed_capture_stops_the_write() {
    let (remote, core) = test_core();
    seed(&remote, "Sheet1!A1:B2", json!([[1, 2], [3, 4]]));
    remote.push_fault(Endpoint::ReadValues, ScriptedFault::status(403, "forbidden"));

    let err = core
        .submit(
            vec![write_values("Sheet1!A1:B2", json!([[9, 9], [9, 9]]))],
            SubmitOptions::default(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.code(), "PERMANENT_REMOTE_ERROR");
    assert_eq!(remote.batch_update_calls(), 0);
    assert_eq!(peek(&remote, "Sheet1!A1:A1"), vec![vec![json!(1)]]);
    assert_eq!(core.snapshots().retained(), 0);
}

#[tokio::test]
async fn snapshot_restore_round_trip() {
    let (remote, core) = test_core();
    let original = json!([["q1", 100], ["q2", 250]]);
    seed(&remote, "Sheet1!A1:B2", original.clone());

    let summary = core
        .submit(
            vec![clear_values("Sheet1!A1:B2")],
            SubmitOptions::default(),
        )
        .await
        .unwrap();
    let snapshot_id = summary.snapshot_id.unwrap();
    assert!(peek(&remote, "Sheet1!A1:B2").is_empty());

    let restored = core.restore_snapshot(snapshot_id).await.unwrap();
    assert!(restored.failures.is_empty());
    assert_eq!(restored.diff.regions[0].source, DiffSource::Snapshot);
    assert_eq!(restored.diff.added(), 4);

    let values = peek(&remote, "Sheet1!A1:B2");
    assert_eq!(serde_json::to_value(values).unwrap(), original);

    // Consumed by the successful restore
    let err = core.restore_snapshot(snapshot_id).await.unwrap_err();
    assert_eq!(err.code(), "SNAPSHOT_NOT_FOUND");
    assert_eq!(core.snapshots().retained(), 0);
}

#[tokio::test]
async fn restoring_an_unknown_snapshot_fails() {
    let (remote, core) = test_core();
    let err = core.restore_snapshot(SnapshotId::new()).await.unwrap_err();
    assert_eq!(err.code(), "SNAPSHOT_NOT_FOUND");
    assert_eq!(remote.batch_update_calls(), 0);
}

#[tokio::test]
async fn stale_expected_state_is_rejected_before_writing() {
    let (remote, core) = test_core();
    seed(&remote, "Sheet1!A1:B2", json!([[1, 2], [3, 4]]));
    let observed = region("Sheet1!A1:B2");

    let err = core
        .submit(
            vec![write_values("Sheet1!A1:B2", json!([[5, 6], [7, 8]]))],
            SubmitOptions::default()
                .with_expected_state(ExpectedState::version_token(DOC, observed.clone(), "0")),
        )
        .await
        .unwrap_err();

    assert_eq!(err.code(), "STATE_MISMATCH");
    assert_eq!(remote.batch_update_calls(), 0);

    let summary = core
        .submit(
            vec![write_values("Sheet1!A1:B2", json!([[5, 6], [7, 8]]))],
            SubmitOptions::default()
                .with_expected_state(ExpectedState::version_token(DOC, observed, "1")),
        )
        .await
        .unwrap();
    assert_eq!(summary.cells_affected, 4);
    assert_eq!(remote.batch_update_calls(), 1);
}

#[tokio::test]
async fn permanent_failure_mid_plan_reports_what_was_applied() {
    let (remote, core) = test_core();
    let intents: Vec<Intent> = (0..3).map(|_| format_cells("Sheet1!A1")).collect();
    let ids: Vec<_> = intents.iter().map(Intent::id).collect();

    remote.push_fault(Endpoint::BatchUpdate, ScriptedFault::Pass);
    remote.push_fault(Endpoint::BatchUpdate, ScriptedFault::status(400, "invalid range"));

    let summary = core.submit(intents, SubmitOptions::default()).await.unwrap();

    assert!(summary.is_partial());
    assert_eq!(summary.calls_planned, 3);
    assert_eq!(summary.calls_completed, 1);
    assert_eq!(summary.documents[0].intents_applied, vec![ids[0]]);

    assert_eq!(summary.failures.len(), 1);
    let failure = &summary.failures[0];
    assert_eq!(failure.call_index, Some(1));
    assert_eq!(failure.intents_not_applied, vec![ids[1], ids[2]]);
    assert_eq!(failure.error.code(), "PERMANENT_REMOTE_ERROR");

    // The third call is never attempted and permanent errors are not retried
    assert_eq!(remote.batch_update_calls(), 2);
}

#[tokio::test]
async fn denied_document_does_not_block_the_others() {
    let (remote, core) = test_core();
    let small = write_values("Sheet1!A1", json!([[1]]));
    let large = Intent::new(
        "other-doc",
        region("Sheet1!A1:J100"),
        IntentKind::WriteValues,
        json!({"values": [[1]]}),
    );

    let summary = core
        .submit(
            vec![small, large],
            SubmitOptions::default()
                .with_max_cells(100)
                .with_snapshot(SnapshotPreference::Never),
        )
        .await
        .unwrap();

    assert_eq!(summary.denied.len(), 1);
    assert_eq!(summary.denied[0].document_id.as_str(), "other-doc");
    assert_eq!(summary.documents.len(), 1);
    assert_eq!(summary.cells_affected, 1);
    assert_eq!(remote.batch_update_calls(), 1);
}

#[tokio::test]
async fn transient_failures_are_retried_transparently() {
    let (remote, core) = test_core();
    remote.fail_next(
        Endpoint::BatchUpdate,
        2,
        ScriptedFault::status(503, "backend unavailable"),
    );

    let summary = core
        .submit(vec![format_cells("Sheet1!A1:B2")], SubmitOptions::default())
        .await
        .unwrap();

    assert!(summary.failures.is_empty());
    assert_eq!(summary.calls_completed, 1);
    assert_eq!(remote.batch_update_calls(), 3);
}

//! Integration tests for the extraction → staging → load → checkpoint pipeline
//!
//! Every test drives the [`Orchestrator`] with scripted collaborators from
//! `common` and checks outcomes, staged objects, warehouse contents and
//! stored checkpoints.

mod common;

use common::{batch, spec, table, ts, Attempt, Fault, Harness, Item};
use sluice::adapters::traits::{CheckpointStorage, StagingStore};
use sluice::core::pipeline::{
    exit_code, Cancellation, LockHolder, Orchestrator, OutcomeStatus, RunLock, RunReport,
};
use sluice::core::state::CheckpointBuilder;
use sluice::domain::{
    ErrorKind, LoadType, MergeStrategy, SystemDateConfig, TableSpec, WriteDisposition,
};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use uuid::Uuid;

const NOW: &str = "2024-05-01 12:00:00";
const WINDOW: &str = "SystemDate BETWEEN '2024-05-01 11:00:00' AND '2024-05-01 12:00:00'";
const LOCK: &str = "exports/_run.lock";

async fn run(h: &Harness, tables: Vec<TableSpec>) -> RunReport {
    Orchestrator::new(h.context(ts(NOW)), Cancellation::never())
        .with_max_concurrency(2)
        .run(tables)
        .await
}

async fn stored(h: &Harness, name: &str) -> Option<String> {
    h.checkpoints
        .load_checkpoint(&table(name))
        .await
        .unwrap()
        .map(|c| c.last_run_time_literal())
}

fn two_batches() -> Attempt {
    Attempt::rows(vec![
        batch(&[("1", "2024-05-01 11:10:00"), ("2", "2024-05-01 11:20:00")]),
        batch(&[("3", "2024-05-01 11:30:00")]),
    ])
}

#[tokio::test]
async fn test_incremental_run_stages_loads_and_commits() {
    let h = Harness::new();
    h.source.script("orders", vec![two_batches()]);

    let report = run(&h, vec![spec("orders")]).await;

    let outcome = report.outcome("orders").unwrap();
    assert_eq!(outcome.status, OutcomeStatus::Succeeded);
    assert_eq!(outcome.load_type, LoadType::Incremental);
    assert_eq!(outcome.rows_processed, 3);
    assert_eq!(outcome.checkpoint.as_deref(), Some(NOW));
    assert_eq!(report.exit_code(), exit_code::SUCCESS);

    assert_eq!(
        h.source.queries_for("orders"),
        vec![format!("SELECT * FROM orders WHERE {WINDOW}")]
    );

    let paths = h.staging.paths_for("orders");
    assert_eq!(
        paths,
        vec![
            "exports/20240501/120000/orders/orders_0001.csv".to_string(),
            "exports/20240501/120000/orders/orders_0002.csv".to_string(),
        ]
    );
    assert_eq!(
        h.staging.body(&paths[1]).unwrap(),
        "id,SystemDate\n3,2024-05-01 11:30:00\n"
    );
    assert_eq!(outcome.staged_objects.len(), 2);

    let requests = h.loader.requests_for("orders");
    assert_eq!(requests.len(), 1, "one load job per table and run");
    assert_eq!(requests[0].source_uris.len(), 2);
    assert_eq!(requests[0].destination_table, "orders__landing");
    assert_eq!(requests[0].write_disposition, WriteDisposition::Truncate);
    assert_eq!(requests[0].create_like.as_deref(), Some("orders"));

    let merges = h.loader.merges_for("orders");
    assert_eq!(merges.len(), 1);
    assert_eq!(merges[0].strategy, MergeStrategy::ReplaceWindow);
    assert_eq!(merges[0].target_table, "orders");
    assert_eq!(merges[0].window_column, "SystemDate");
    assert_eq!(merges[0].columns, vec!["id".to_string(), "SystemDate".to_string()]);
    assert_eq!(outcome.load_job_id, Some("job_orders_2".to_string()));
    assert_eq!(h.loader.rows("orders").len(), 3);

    assert_eq!(stored(&h, "orders").await.as_deref(), Some(NOW));
    assert_eq!(h.closed_cursors(), 1);
}

#[tokio::test]
async fn test_failed_table_does_not_affect_others() {
    let h = Harness::new();
    for name in ["orders", "customers", "invoices"] {
        h.source.script(name, vec![two_batches()]);
    }
    h.loader.fail_job("customers");

    let report = run(&h, vec![spec("orders"), spec("customers"), spec("invoices")]).await;

    let names: Vec<_> = report
        .outcomes
        .iter()
        .map(|o| (o.table_name.as_str(), o.status))
        .collect();
    assert_eq!(
        names,
        vec![
            ("orders", OutcomeStatus::Succeeded),
            ("customers", OutcomeStatus::Failed),
            ("invoices", OutcomeStatus::Succeeded),
        ]
    );
    assert_eq!(
        report.outcome("customers").unwrap().error_kind(),
        Some(ErrorKind::LoadJobFailed)
    );
    assert_eq!(report.exit_code(), exit_code::TABLE_FAILED);

    assert_eq!(stored(&h, "orders").await.as_deref(), Some(NOW));
    assert_eq!(stored(&h, "invoices").await.as_deref(), Some(NOW));
    assert_eq!(stored(&h, "customers").await, None);

    // Kept for inspection after a failed load
    assert_eq!(h.staging.paths_for("customers").len(), 2);
}

#[tokio::test]
async fn test_next_run_starts_at_previous_checkpoint() {
    let h = Harness::new();
    h.source.script("orders", vec![two_batches(), two_batches()]);

    let first = run(&h, vec![spec("orders")]).await;
    assert!(first.is_success());

    let later = ts("2024-05-01 13:00:00");
    let second = Orchestrator::new(h.context(later), Cancellation::never())
        .run(vec![spec("orders")])
        .await;
    assert!(second.is_success());

    let queries = h.source.queries_for("orders");
    assert_eq!(
        queries[1],
        "SELECT * FROM orders WHERE SystemDate BETWEEN '2024-05-01 12:00:00' AND '2024-05-01 13:00:00'"
    );
    assert_eq!(
        stored(&h, "orders").await.as_deref(),
        Some("2024-05-01 13:00:00")
    );
}

#[tokio::test]
async fn test_checkpoint_never_moves_backwards() {
    let h = Harness::new();
    let future = CheckpointBuilder::new(table("orders"), ts("2024-05-02 00:00:00")).build();
    h.checkpoints.save_checkpoint(&future).await.unwrap();

    let report = run(&h, vec![spec("orders")]).await;

    let outcome = report.outcome("orders").unwrap();
    assert_eq!(outcome.status, OutcomeStatus::Failed);
    assert_eq!(outcome.error_kind(), Some(ErrorKind::RangeResolution));
    assert_eq!(h.source.total_queries(), 0);
    assert_eq!(
        stored(&h, "orders").await.as_deref(),
        Some("2024-05-02 00:00:00")
    );
}

#[tokio::test]
async fn test_forced_full_load_runs_base_query_and_keeps_checkpoint() {
    let h = Harness::new();
    let existing = CheckpointBuilder::new(table("orders"), ts("2024-04-30 00:00:00")).build();
    h.checkpoints.save_checkpoint(&existing).await.unwrap();
    h.source.script("orders", vec![two_batches()]);

    let mut ctx = h.context(ts(NOW));
    ctx.params.force_full_load = true;
    let report = Orchestrator::new(ctx, Cancellation::never())
        .run(vec![spec("orders")])
        .await;

    let outcome = report.outcome("orders").unwrap();
    assert_eq!(outcome.status, OutcomeStatus::Succeeded);
    assert_eq!(outcome.load_type, LoadType::Full);
    assert_eq!(outcome.range, None);
    assert_eq!(outcome.checkpoint, None);

    assert_eq!(h.source.queries_for("orders"), vec!["SELECT * FROM orders"]);
    let requests = h.loader.requests_for("orders");
    assert_eq!(requests[0].destination_table, "orders");
    assert_eq!(requests[0].write_disposition, WriteDisposition::Truncate);
    assert!(h.loader.merges_for("orders").is_empty());
    assert_eq!(
        stored(&h, "orders").await.as_deref(),
        Some("2024-04-30 00:00:00")
    );
}

#[tokio::test]
async fn test_configured_window_ignores_checkpoint() {
    let h = Harness::new();
    let existing = CheckpointBuilder::new(table("orders"), ts("2024-04-30 00:00:00")).build();
    h.checkpoints.save_checkpoint(&existing).await.unwrap();

    let mut ctx = h.context(ts(NOW));
    ctx.systemdate = SystemDateConfig::window(
        Some(ts("2024-04-01 00:00:00")),
        Some(ts("2024-04-02 00:00:00")),
    );
    let report = Orchestrator::new(ctx, Cancellation::never())
        .run(vec![spec("orders")])
        .await;

    assert!(report.is_success());
    assert_eq!(
        h.source.queries_for("orders"),
        vec!["SELECT * FROM orders WHERE SystemDate BETWEEN '2024-04-01 00:00:00' AND '2024-04-02 00:00:00'"]
    );
    // Monotonic: the older window end does not replace the newer checkpoint
    assert_eq!(
        stored(&h, "orders").await.as_deref(),
        Some("2024-04-30 00:00:00")
    );
}

#[tokio::test]
async fn test_zero_rows_skips_load_but_advances_checkpoint() {
    let h = Harness::new();
    h.source.script("orders", vec![Attempt::rows(vec![])]);

    let report = run(&h, vec![spec("orders")]).await;

    let outcome = report.outcome("orders").unwrap();
    assert_eq!(outcome.status, OutcomeStatus::Succeeded);
    assert_eq!(outcome.rows_processed, 0);
    assert_eq!(outcome.load_job_id, None);
    assert!(outcome.staged_objects.is_empty());
    assert!(h.loader.requests().is_empty());
    assert_eq!(stored(&h, "orders").await.as_deref(), Some(NOW));

    // An empty marker documents the run in the staging directory
    let marker = "exports/20240501/120000/orders/_EMPTY";
    assert_eq!(h.staging.paths(), vec![marker.to_string()]);
    assert_eq!(h.staging.body(marker).as_deref(), Some(""));
}

#[tokio::test]
async fn test_checkpoint_write_failure_is_alerted() {
    let h = Harness::new();
    h.source.script("orders", vec![two_batches()]);
    h.source.script("customers", vec![two_batches()]);
    h.loader.fail_job("customers");
    h.checkpoints.fail_writes(true);

    let report = run(&h, vec![spec("orders"), spec("customers")]).await;

    let outcome = report.outcome("orders").unwrap();
    assert_eq!(outcome.status, OutcomeStatus::Failed);
    assert_eq!(outcome.error_kind(), Some(ErrorKind::CheckpointPersistence));
    assert!(outcome.checkpoint_not_recorded());
    assert!(
        outcome
            .load_job_id
            .as_deref()
            .is_some_and(|id| id.starts_with("job_orders_")),
        "the load itself completed"
    );

    // Outranks the ordinary failure of customers
    assert_eq!(report.exit_code(), exit_code::CHECKPOINT_NOT_RECORDED);
    assert_eq!(report.checkpoint_alerts().count(), 1);
}

#[tokio::test]
async fn test_staging_upload_is_retried() {
    let h = Harness::new();
    h.source.script("orders", vec![two_batches()]);
    h.staging.fail_next_puts(2);

    let report = run(&h, vec![spec("orders")]).await;

    assert!(report.is_success());
    assert_eq!(h.staging.paths_for("orders").len(), 2);
    // Two refused uploads, then one per batch
    assert_eq!(h.staging.put_attempts(), 4);
    assert_eq!(h.source.queries_for("orders").len(), 1);
}

#[tokio::test]
async fn test_staging_failure_after_retries_fails_table() {
    let h = Harness::new();
    h.source.script("orders", vec![two_batches()]);
    h.staging.fail_next_puts(10);

    let report = run(&h, vec![spec("orders")]).await;

    let outcome = report.outcome("orders").unwrap();
    assert_eq!(outcome.error_kind(), Some(ErrorKind::Staging));
    assert!(h.loader.requests().is_empty());
    assert_eq!(stored(&h, "orders").await, None);
}

#[tokio::test]
async fn test_transient_extraction_restarts_from_scratch() {
    let h = Harness::new();
    h.source.script(
        "orders",
        vec![
            Attempt::Stream(vec![
                Item::Batch(batch(&[("1", "2024-05-01 11:10:00"), ("2", "2024-05-01 11:20:00")])),
                Item::Fail(Fault::Transient),
            ]),
            two_batches(),
        ],
    );

    let report = run(&h, vec![spec("orders")]).await;

    let outcome = report.outcome("orders").unwrap();
    assert_eq!(outcome.status, OutcomeStatus::Succeeded);
    assert_eq!(outcome.rows_processed, 3, "rows of the failed attempt are not counted");
    assert_eq!(h.source.queries_for("orders").len(), 2);
    assert_eq!(h.closed_cursors(), 2);
    // The first attempt's object was rolled back, then rewritten by the second
    assert_eq!(
        h.staging.deleted(),
        vec!["exports/20240501/120000/orders/orders_0001.csv".to_string()]
    );
    assert_eq!(h.staging.paths_for("orders").len(), 2);
}

#[tokio::test]
async fn test_permanent_extraction_error_is_not_retried() {
    let h = Harness::new();
    h.source
        .script("orders", vec![Attempt::FailOpen(Fault::Permanent), two_batches()]);

    let report = run(&h, vec![spec("orders")]).await;

    let outcome = report.outcome("orders").unwrap();
    assert_eq!(outcome.error_kind(), Some(ErrorKind::Extraction));
    assert_eq!(h.source.queries_for("orders").len(), 1);
}

#[tokio::test]
async fn test_rejected_submission_fails_table() {
    let h = Harness::new();
    h.source.script("orders", vec![two_batches()]);
    h.loader.reject_submit("orders");

    let report = run(&h, vec![spec("orders")]).await;

    assert_eq!(
        report.outcome("orders").unwrap().error_kind(),
        Some(ErrorKind::LoadSubmission)
    );
    assert_eq!(stored(&h, "orders").await, None);
}

#[tokio::test]
async fn test_cancellation_rolls_back_staged_objects() {
    let h = Harness::new();
    h.source.script(
        "orders",
        vec![Attempt::Stream(vec![
            Item::Batch(batch(&[("1", "2024-05-01 11:10:00"), ("2", "2024-05-01 11:20:00")])),
            Item::Hang,
        ])],
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let orchestrator = Orchestrator::new(h.context(ts(NOW)), Cancellation::new(shutdown_rx));
    let running = tokio::spawn(async move { orchestrator.run(vec![spec("orders")]).await });

    // Wait for the first batch to be staged
    for _ in 0..200 {
        if !h.staging.paths().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(h.staging.paths().len(), 1);
    shutdown_tx.send(true).unwrap();

    let report = tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("run did not stop after cancellation")
        .unwrap();

    assert!(report.cancelled);
    let outcome = report.outcome("orders").unwrap();
    assert_eq!(outcome.error_kind(), Some(ErrorKind::Cancelled));
    assert!(h.staging.paths().is_empty(), "staged objects are rolled back");
    assert!(h.loader.requests().is_empty());
    assert_eq!(stored(&h, "orders").await, None);
}

#[tokio::test]
async fn test_submitted_load_is_awaited_after_cancellation() {
    let h = Harness::new();
    h.source.script("orders", vec![two_batches()]);
    h.loader.slow_jobs(Duration::from_millis(200));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let orchestrator = Orchestrator::new(h.context(ts(NOW)), Cancellation::new(shutdown_rx));
    let running = tokio::spawn(async move { orchestrator.run(vec![spec("orders")]).await });

    for _ in 0..200 {
        if !h.loader.requests().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    shutdown_tx.send(true).unwrap();

    let report = running.await.unwrap();
    let outcome = report.outcome("orders").unwrap();
    assert_eq!(outcome.status, OutcomeStatus::Succeeded);
    assert_eq!(stored(&h, "orders").await.as_deref(), Some(NOW));
}

#[tokio::test]
async fn test_dry_run_touches_nothing() {
    let h = Harness::new();
    h.source.script("orders", vec![two_batches()]);

    let mut ctx = h.context(ts(NOW));
    ctx.dry_run = true;
    let report = Orchestrator::new(ctx, Cancellation::never())
        .run(vec![spec("orders")])
        .await;

    let outcome = report.outcome("orders").unwrap();
    assert_eq!(outcome.status, OutcomeStatus::Skipped);
    assert_eq!(outcome.skip_reason.as_deref(), Some("dry run"));
    assert!(outcome.range.is_some());
    assert!(report.dry_run);
    assert_eq!(report.exit_code(), exit_code::SUCCESS);

    assert_eq!(h.source.total_queries(), 0);
    assert!(h.staging.paths().is_empty());
    assert!(h.loader.requests().is_empty());
    assert_eq!(stored(&h, "orders").await, None);
}

#[tokio::test]
async fn test_table_filter_and_duplicates() {
    let h = Harness::new();
    h.source.script("orders", vec![two_batches()]);

    let report = Orchestrator::new(h.context(ts(NOW)), Cancellation::never())
        .with_table_filter(["orders"])
        .run(vec![spec("orders"), spec("customers"), spec("orders")])
        .await;

    let statuses: Vec<_> = report.outcomes.iter().map(|o| o.status).collect();
    assert_eq!(
        statuses,
        vec![
            OutcomeStatus::Succeeded,
            OutcomeStatus::Skipped,
            OutcomeStatus::Failed
        ]
    );
    assert_eq!(
        report.outcomes[1].skip_reason.as_deref(),
        Some("not selected")
    );
    assert_eq!(
        report.outcomes[2].error_kind(),
        Some(ErrorKind::ConfigValidation)
    );
    assert_eq!(h.source.queries_for("orders").len(), 1);
}

#[tokio::test]
async fn test_excluded_columns_are_not_staged() {
    let h = Harness::new();
    h.source.script("orders", vec![two_batches()]);

    let mut orders = spec("orders");
    orders.exclude_columns = vec!["SystemDate".to_string()];
    let report = run(&h, vec![orders]).await;

    assert!(report.is_success());
    let paths = h.staging.paths_for("orders");
    assert_eq!(h.staging.body(&paths[0]).unwrap(), "id\n1\n2\n");
}

#[tokio::test]
async fn test_repeated_window_leaves_one_copy_of_each_row() {
    let h = Harness::new();
    h.source.script("orders", vec![two_batches(), two_batches()]);

    assert!(run(&h, vec![spec("orders")]).await.is_success());
    // Same window again, e.g. after a checkpoint write was lost
    let mut ctx = h.context(ts(NOW));
    ctx.systemdate = SystemDateConfig::window(
        Some(ts("2024-05-01 11:00:00")),
        Some(ts("2024-05-01 12:00:00")),
    );
    let report = Orchestrator::new(ctx, Cancellation::never())
        .run(vec![spec("orders")])
        .await;
    assert!(report.is_success());

    let mut ids: Vec<String> = h.loader.rows("orders").into_iter().map(|r| r[0].clone()).collect();
    ids.sort();
    assert_eq!(ids, vec!["1", "2", "3"]);
}

#[tokio::test]
async fn test_boundary_row_of_adjacent_windows_is_not_duplicated() {
    let h = Harness::new();
    h.source.script(
        "orders",
        vec![
            Attempt::rows(vec![batch(&[
                ("1", "2024-05-01 11:30:00"),
                ("2", "2024-05-01 12:00:00"),
            ])]),
            // The inclusive lower bound returns the boundary row again
            Attempt::rows(vec![batch(&[
                ("2", "2024-05-01 12:00:00"),
                ("3", "2024-05-01 12:30:00"),
            ])]),
        ],
    );

    assert!(run(&h, vec![spec("orders")]).await.is_success());
    let second = Orchestrator::new(h.context(ts("2024-05-01 13:00:00")), Cancellation::never())
        .run(vec![spec("orders")])
        .await;
    assert!(second.is_success());

    let rows = h.loader.rows("orders");
    assert_eq!(rows.len(), 3);
    assert_eq!(rows.iter().filter(|r| r[0] == "2").count(), 1);
}

#[tokio::test]
async fn test_upsert_merge_replaces_rows_by_key() {
    let h = Harness::new();
    h.source.script(
        "orders",
        vec![
            Attempt::rows(vec![batch(&[("1", "2024-05-01 11:10:00"), ("2", "2024-05-01 11:20:00")])]),
            Attempt::rows(vec![batch(&[("2", "2024-05-01 12:40:00")])]),
        ],
    );
    let mut orders = spec("orders");
    orders.merge = MergeStrategy::Upsert {
        keys: vec!["id".to_string()],
    };

    assert!(run(&h, vec![orders.clone()]).await.is_success());
    let second = Orchestrator::new(h.context(ts("2024-05-01 13:00:00")), Cancellation::never())
        .run(vec![orders])
        .await;
    assert!(second.is_success());

    let mut rows = h.loader.rows("orders");
    rows.sort();
    assert_eq!(
        rows,
        vec![
            vec!["1".to_string(), "2024-05-01 11:10:00".to_string()],
            vec!["2".to_string(), "2024-05-01 12:40:00".to_string()],
        ]
    );
}

#[tokio::test]
async fn test_missing_execution_gate_halts_before_staging() {
    let h = Harness::new();
    h.source.script("orders", vec![two_batches(), two_batches()]);

    let report = Orchestrator::new(
        h.context_with_gate(ts(NOW), "control/EXECUTE_APPLY"),
        Cancellation::never(),
    )
    .run(vec![spec("orders")])
    .await;

    let outcome = report.outcome("orders").unwrap();
    assert_eq!(outcome.error_kind(), Some(ErrorKind::ExecutionHalted));
    assert_eq!(h.source.queries_for("orders").len(), 1, "halting is not retried");
    assert!(h.staging.paths().is_empty());
    assert!(h.loader.requests().is_empty());
    assert_eq!(stored(&h, "orders").await, None);

    h.staging
        .put("control/EXECUTE_APPLY", Vec::new())
        .await
        .unwrap();
    let report = Orchestrator::new(
        h.context_with_gate(ts(NOW), "control/EXECUTE_APPLY"),
        Cancellation::never(),
    )
    .run(vec![spec("orders")])
    .await;
    assert!(report.is_success());
    assert_eq!(stored(&h, "orders").await.as_deref(), Some(NOW));
}

#[tokio::test]
async fn test_held_run_lock_starts_no_table() {
    let h = Harness::new();
    h.source.script("orders", vec![two_batches()]);
    let other = LockHolder::current(Uuid::new_v4());
    h.staging
        .put(LOCK, serde_json::to_vec(&other).unwrap())
        .await
        .unwrap();

    let report = Orchestrator::new(h.context(ts(NOW)), Cancellation::never())
        .with_run_lock(RunLock::new(h.staging.clone(), LOCK))
        .run(vec![spec("orders"), spec("customers")])
        .await;

    assert_eq!(report.exit_code(), exit_code::RUN_LOCKED);
    assert!(report
        .lock_conflict
        .as_deref()
        .is_some_and(|c| c.contains(&other.run_id.to_string())));
    assert!(report
        .outcomes
        .iter()
        .all(|o| o.status == OutcomeStatus::Skipped));
    assert_eq!(h.source.total_queries(), 0);
    assert!(h.staging.get(LOCK).await.unwrap().is_some(), "foreign lock is kept");
}

#[tokio::test]
async fn test_run_lock_released_on_success_and_failure() {
    let h = Harness::new();
    h.source.script("orders", vec![two_batches()]);
    h.source.script("customers", vec![two_batches()]);
    h.loader.fail_job("customers");

    let report = Orchestrator::new(h.context(ts(NOW)), Cancellation::never())
        .with_run_lock(RunLock::new(h.staging.clone(), LOCK))
        .run(vec![spec("orders"), spec("customers")])
        .await;

    assert_eq!(report.exit_code(), exit_code::TABLE_FAILED);
    assert_eq!(report.lock_conflict, None);
    assert!(h.staging.get(LOCK).await.unwrap().is_none());
    assert!(h.staging.deleted().contains(&LOCK.to_string()));
}

#[tokio::test]
async fn test_concurrent_run_is_locked_out_and_lock_released_after_cancel() {
    let h = Harness::new();
    h.source.script(
        "orders",
        vec![Attempt::Stream(vec![
            Item::Batch(batch(&[("1", "2024-05-01 11:10:00")])),
            Item::Hang,
        ])],
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let first = Orchestrator::new(h.context(ts(NOW)), Cancellation::new(shutdown_rx))
        .with_run_lock(RunLock::new(h.staging.clone(), LOCK));
    let running = tokio::spawn(async move { first.run(vec![spec("orders")]).await });

    for _ in 0..200 {
        if h.staging.paths_for("orders").len() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let second = Orchestrator::new(h.context(ts(NOW)), Cancellation::never())
        .with_run_lock(RunLock::new(h.staging.clone(), LOCK))
        .run(vec![spec("orders")])
        .await;
    assert_eq!(second.exit_code(), exit_code::RUN_LOCKED);

    shutdown_tx.send(true).unwrap();
    let first = tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("run did not stop after cancellation")
        .unwrap();
    assert!(first.cancelled);
    assert!(h.staging.get(LOCK).await.unwrap().is_none());
}

#[tokio::test]
async fn test_dry_run_ignores_run_lock() {
    let h = Harness::new();
    let other = LockHolder::current(Uuid::new_v4());
    h.staging
        .put(LOCK, serde_json::to_vec(&other).unwrap())
        .await
        .unwrap();

    let mut ctx = h.context(ts(NOW));
    ctx.dry_run = true;
    let report = Orchestrator::new(ctx, Cancellation::never())
        .with_run_lock(RunLock::new(h.staging.clone(), LOCK))
        .run(vec![spec("orders")])
        .await;

    assert_eq!(report.exit_code(), exit_code::SUCCESS);
    assert_eq!(
        report.outcome("orders").unwrap().skip_reason.as_deref(),
        Some("dry run")
    );
}

/// Counts `Run completed` events
struct SummaryCounter(Arc<AtomicUsize>);

struct MessageVisitor(Option<String>);

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.0 = Some(value.to_string());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.0 = Some(format!("{value:?}"));
        }
    }
}

impl<S: Subscriber> Layer<S> for SummaryCounter {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor(None);
        event.record(&mut visitor);
        if visitor.0.as_deref() == Some("Run completed") {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[tokio::test]
async fn test_run_summary_logged_once() {
    let count = Arc::new(AtomicUsize::new(0));
    let subscriber = tracing_subscriber::registry().with(SummaryCounter(count.clone()));
    let _guard = tracing::subscriber::set_default(subscriber);

    let h = Harness::new();
    h.source.script("orders", vec![two_batches()]);
    let report = run(&h, vec![spec("orders")]).await;

    assert!(report.is_success());
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

//! Uploads, slot limits, waiting, history and metrics through the service

mod helpers;

use helpers::*;
use serde_json::json;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use targetflow::core::config::IngestConfig;
use targetflow::core::{RunStatus, TriggerSource};
use targetflow::ingest::IngestError;
use targetflow::persistence::{RunStore, SqliteStore, TargetStore};
use targetflow::service::{StatusReply, TriggerReply, WaitOutcome};

const ORDERS_CSV: &str = "\
order_id,order_delivered_carrier_date,price
a1,2018-01-03 10:00:00,10
a2,not a date,20
a3,2018-02-14,30
a4,,40
";

#[tokio::test]
async fn test_second_trigger_is_rejected_while_one_is_running() {
    let (runner, gate) = MockRunner::succeeding("ok").gated();
    let (service, store) = memory_service(runner.clone());

    let first = service.trigger(TriggerSource::Upload).await;
    assert!(matches!(first, TriggerReply::Accepted(_)));

    let second = service.trigger(TriggerSource::Rerun).await;
    assert!(matches!(second, TriggerReply::Busy));
    assert_eq!(second.http_status(), 409);
    let body = serde_json::to_value(second.body()).unwrap();
    assert_eq!(body["success"], json!(false));
    assert_eq!(body["status"], json!("busy"));

    // The rejected trigger never created a record
    assert_eq!(store.counts().await.unwrap().total, 1);

    gate.notify_one();
    wait_for_terminal(&service, first.log_id().unwrap()).await;
    wait_until_idle(&service).await;

    let third = service.trigger(TriggerSource::Rerun).await;
    assert!(matches!(third, TriggerReply::Accepted(_)));
    gate.notify_one();
    let (run, _) = wait_for_terminal(&service, third.log_id().unwrap()).await;
    assert_eq!(run.status, RunStatus::Success);
    assert_eq!(runner.calls(), 2);
}

#[tokio::test]
async fn test_upload_stores_rows_and_triggers_run() {
    let (service, store) = memory_service(MockRunner::succeeding("ok"));

    let report = service.upload(Cursor::new(ORDERS_CSV)).await.unwrap();
    assert_eq!(report.rows_saved, 2);
    assert_eq!(report.total_rows, 4);
    assert_eq!(report.dropped_rows, 2);
    assert_eq!(report.table_name, "raw_user_targets");
    assert_eq!(report.columns, vec!["order_id", "order_delivered_carrier_date", "price"]);
    assert_eq!(report.preview.len(), 2);
    assert!(report.message.starts_with("Upload succeeded! 2 rows saved"));
    assert!(report.message.contains("running in the background"));
    assert_eq!(store.count_targets().await.unwrap(), 2);

    let id = report.trigger.log_id().unwrap();
    let (run, _) = wait_for_terminal(&service, id).await;
    assert_eq!(run.triggered_by, TriggerSource::Upload);
    assert_eq!(run.status, RunStatus::Success);

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["trigger"]["log_id"], json!(id));
}

#[tokio::test]
async fn test_upload_with_missing_column_triggers_nothing() {
    let runner = MockRunner::succeeding("ok");
    let (service, store) = memory_service(runner.clone());

    let err = service
        .upload(Cursor::new("month,amount\n2018-01-01,5\n"))
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::MissingColumn { .. }));
    assert!(err.to_string().contains("month, amount"));

    assert_eq!(store.count_targets().await.unwrap(), 0);
    assert_eq!(store.counts().await.unwrap().total, 0);
    assert_eq!(runner.calls(), 0);
}

#[tokio::test]
async fn test_upload_without_valid_dates_is_rejected() {
    let (service, store) = memory_service(MockRunner::succeeding("ok"));

    let err = service
        .upload(Cursor::new("order_delivered_carrier_date\nsoon\nlater\n"))
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::NoValidRows { .. }));
    assert!(service.upload(Cursor::new("")).await.unwrap_err().to_string().contains("empty"));
    assert_eq!(store.counts().await.unwrap().total, 0);
}

#[tokio::test]
async fn test_upload_uses_configured_amount_column() {
    let (service, store) = memory_service(MockRunner::succeeding("ok"));
    let service = service.with_ingest(IngestConfig {
        date_column: "month".to_string(),
        amount_column: Some("target".to_string()),
        default_amount: 1,
    });

    let report = service
        .upload(Cursor::new("month,target\n2024-01-01,1500\n2024-02-01,abc\n"))
        .await
        .unwrap();
    assert_eq!(report.rows_saved, 1);
    assert_eq!(report.dropped_rows, 1);
    assert_eq!(store.count_targets().await.unwrap(), 1);
}

#[tokio::test]
async fn test_upload_to_unmigrated_database_fails_cleanly() {
    let runner = MockRunner::succeeding("ok");
    let store = Arc::new(SqliteStore::in_memory().await.unwrap());
    let schema = store.schema_status().await.unwrap();
    let service = build_service(runner.clone(), store.clone(), store.clone(), schema);

    let err = service.upload(Cursor::new(ORDERS_CSV)).await.unwrap_err();
    assert!(matches!(err, IngestError::Store(ref e) if e.is_unavailable()));
    assert_eq!(runner.calls(), 0);
}

#[tokio::test]
async fn test_history_and_metrics_reflect_runs() {
    let store = Arc::new(SqliteStore::in_memory().await.unwrap());
    store.migrate().await.unwrap();
    let schema = store.schema_status().await.unwrap();

    let ok = build_service(MockRunner::succeeding("ok"), store.clone(), store.clone(), schema.clone());
    let report = ok.upload(Cursor::new(ORDERS_CSV)).await.unwrap();
    let first = report.trigger.log_id().unwrap();
    wait_for_terminal(&ok, first).await;

    let failing = build_service(MockRunner::failing(1, "boom"), store.clone(), store.clone(), schema);
    let second = failing.trigger(TriggerSource::Rerun).await.log_id().unwrap();
    let (failed, _) = wait_for_terminal(&failing, second).await;

    let history = failing.history(10).await.unwrap();
    assert_eq!(history.iter().map(|r| r.id).collect::<Vec<_>>(), vec![second, first]);
    assert_eq!(failing.latest().await.unwrap().id, second);

    let metrics = failing.metrics().await;
    assert_eq!(metrics.total_uploads, 2);
    assert_eq!(metrics.total_processed, 0);
    assert_eq!(metrics.total_runs, 2);
    assert_eq!(metrics.success_count, 1);
    assert_eq!(metrics.success_rate, 50.0);
    assert_eq!(metrics.latest_status, "failed");
    assert_eq!(metrics.latest_duration, failed.duration_seconds);
}

#[tokio::test]
async fn test_metrics_degrade_when_schema_is_missing() {
    let store = Arc::new(SqliteStore::in_memory().await.unwrap());
    let schema = store.schema_status().await.unwrap();
    let service = build_service(MockRunner::succeeding("ok"), store.clone(), store.clone(), schema);

    let metrics = service.metrics().await;
    assert_eq!(metrics.total_runs, 0);
    assert_eq!(metrics.success_rate, 0.0);
    assert_eq!(metrics.latest_status, "N/A");
    assert!(service.latest().await.is_none());
}

#[tokio::test]
async fn test_wait_for_run_reports_finished_run() {
    let (service, _store) = memory_service(MockRunner::succeeding("ok"));
    let id = service.trigger(TriggerSource::Rerun).await.log_id().unwrap();

    let mut polls = 0;
    let outcome = service
        .wait_for_run(id, Duration::from_millis(5), Duration::from_secs(5), |_| polls += 1)
        .await;

    match outcome {
        WaitOutcome::Finished(run) => assert_eq!(run.status, RunStatus::Success),
        other => panic!("expected a finished run, got {:?}", other),
    }
    assert!(polls >= 1);
}

#[tokio::test]
async fn test_wait_for_run_gives_up_at_the_limit() {
    let (runner, gate) = MockRunner::succeeding("ok").gated();
    let (service, _store) = memory_service(runner);
    let id = service.trigger(TriggerSource::Upload).await.log_id().unwrap();

    let outcome = service
        .wait_for_run(id, Duration::from_millis(5), Duration::from_millis(100), |_| {})
        .await;

    match outcome {
        WaitOutcome::TimedOut(Some(run)) => assert_eq!(run.status, RunStatus::Running),
        other => panic!("expected a timed out wait, got {:?}", other),
    }
    gate.notify_one();
}

#[tokio::test]
async fn test_wait_for_unknown_run_is_lost() {
    let (service, _store) = memory_service(MockRunner::succeeding("ok"));

    let outcome = service
        .wait_for_run(77, Duration::from_millis(5), Duration::from_secs(1), |_| {})
        .await;
    assert!(matches!(outcome, WaitOutcome::Lost(StatusReply::NotFound(77))));
}

#[tokio::test]
async fn test_upload_file_reads_from_disk() {
    let (service, store) = memory_service(MockRunner::succeeding("ok"));
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("orders.csv");
    std::fs::write(&path, ORDERS_CSV).unwrap();

    let report = service.upload_file(&path).await.unwrap();
    assert_eq!(report.rows_saved, 2);
    assert_eq!(store.count_targets().await.unwrap(), 2);
    wait_for_terminal(&service, report.trigger.log_id().unwrap()).await;

    let err = service
        .upload_file(&dir.path().join("missing.csv"))
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::Io(_)));
}

//! End-to-end runs of a real child process
//!
//! The transformation executable is `sh`; the project directory holds a
//! script named `run`, so `sh run --project-dir <dir>` executes it.
#![cfg(unix)]

mod helpers;

use helpers::*;
use std::path::Path;
use std::sync::Arc;
use targetflow::core::config::TransformConfig;
use targetflow::core::{RunStatus, TriggerSource};
use targetflow::persistence::SqliteStore;
use targetflow::service::TriggerReply;
use targetflow::transform::TransformSubprocess;
use tempfile::TempDir;

fn project_with_script(script: &str) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("run"), script).unwrap();
    dir
}

fn subprocess(project_dir: &Path, timeout_secs: u64) -> TransformSubprocess {
    TransformSubprocess::new(
        TransformConfig::default()
            .with_executable("sh")
            .with_project_dir(project_dir)
            .with_profiles_dir(project_dir.join("profiles"))
            .with_timeout(timeout_secs),
    )
}

async fn migrated_store() -> Arc<SqliteStore> {
    let store = Arc::new(SqliteStore::in_memory().await.unwrap());
    store.migrate().await.unwrap();
    store
}

#[tokio::test]
async fn test_process_sees_project_dir_and_profiles_env() {
    let project = project_with_script(
        "echo \"cwd=$(pwd -P)\"\necho \"profiles=$DBT_PROFILES_DIR\"\necho \"args=$*\"\n",
    );
    let store = migrated_store().await;
    let schema = store.schema_status().await.unwrap();
    let service = build_service(subprocess(project.path(), 10), store.clone(), store, schema);

    let id = service.trigger(TriggerSource::Upload).await.log_id().unwrap();
    let (run, seen) = wait_for_terminal(&service, id).await;

    assert_forward_sequence(&seen);
    assert_terminal_fields(&run);
    assert_eq!(run.status, RunStatus::Success);
    assert!(run.error.is_none());

    let output = run.output.unwrap();
    let project_dir = project.path().canonicalize().unwrap();
    assert!(output.contains(&format!("cwd={}", project_dir.display())));
    assert!(output.contains(&format!(
        "profiles={}",
        project.path().join("profiles").display()
    )));
    assert!(output.contains("args=--project-dir"));
}

#[tokio::test]
async fn test_non_zero_exit_keeps_stdout_and_stderr() {
    let project = project_with_script("echo partial\nprintf boom >&2\nexit 1\n");
    let store = migrated_store().await;
    let schema = store.schema_status().await.unwrap();
    let service = build_service(subprocess(project.path(), 10), store.clone(), store, schema);

    let id = service.trigger(TriggerSource::Rerun).await.log_id().unwrap();
    let (run, _) = wait_for_terminal(&service, id).await;

    assert_terminal_fields(&run);
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.error.as_deref(), Some("boom"));
    assert_eq!(run.output.as_deref(), Some("partial\n"));
}

#[tokio::test]
async fn test_slow_process_is_killed_at_the_timeout() {
    let project = project_with_script("sleep 30\n");
    let store = migrated_store().await;
    let schema = store.schema_status().await.unwrap();
    let service = build_service(subprocess(project.path(), 1), store.clone(), store, schema);

    let id = service.trigger(TriggerSource::Upload).await.log_id().unwrap();
    let (run, _) = wait_for_terminal(&service, id).await;

    assert_terminal_fields(&run);
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.error.as_deref(), Some("Timed out after 1 seconds"));
    assert_eq!(run.duration_seconds, Some(1.0));
}

#[tokio::test]
async fn test_missing_executable_fails_the_run() {
    let project = project_with_script("exit 0\n");
    let runner = TransformSubprocess::new(
        TransformConfig::default()
            .with_executable("targetflow-no-such-binary")
            .with_project_dir(project.path()),
    );
    let store = migrated_store().await;
    let schema = store.schema_status().await.unwrap();
    let service = build_service(runner, store.clone(), store, schema);

    let id = service.trigger(TriggerSource::Rerun).await.log_id().unwrap();
    let (run, _) = wait_for_terminal(&service, id).await;

    assert_eq!(run.status, RunStatus::Failed);
    assert!(run
        .error
        .as_deref()
        .unwrap()
        .contains("targetflow-no-such-binary"));
}

#[tokio::test]
async fn test_fallback_runs_real_process_synchronously() {
    let project = project_with_script("echo synced\n");
    let store = Arc::new(SqliteStore::in_memory().await.unwrap());
    let schema = store.schema_status().await.unwrap();
    let service = build_service(subprocess(project.path(), 10), store.clone(), store, schema);

    match service.trigger(TriggerSource::Upload).await {
        TriggerReply::Fallback(result) => {
            assert!(result.success);
            assert_eq!(result.output.as_deref(), Some("synced\n"));
            assert!(result.error.is_none());
        }
        other => panic!("expected a fallback run, got {:?}", other),
    }
}

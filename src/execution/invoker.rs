//! Pipeline invoker - runs the transformation and records the outcome

use crate::core::{PipelineRun, RunCompletion, RunUpdate, TriggerSource};
use crate::persistence::{RunStore, StoreError};
use crate::transform::{InvokeError, ProcessOutput, ProcessRunner};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Outcome of an untracked run, used when run records cannot be stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncRunResult {
    pub success: bool,
    pub message: String,
    pub output: Option<String>,
    pub error: Option<String>,
}

/// Runs the transformation process on behalf of one run record
pub struct PipelineInvoker<R> {
    runner: R,
    store: Arc<dyn RunStore>,
}

impl<R: ProcessRunner> PipelineInvoker<R> {
    pub fn new(runner: R, store: Arc<dyn RunStore>) -> Self {
        Self { runner, store }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Drive run `run_id` from `pending` to a terminal state.
    ///
    /// Never returns an error: every failure ends up on the record. Returns
    /// the final record, or `None` if it could not be written.
    pub async fn run_tracked(
        &self,
        run_id: i64,
        triggered_by: TriggerSource,
    ) -> Option<PipelineRun> {
        // Persist `running` before spawning so pollers never see `pending` mid-run
        let completion = match self.store.update(run_id, RunUpdate::Running).await {
            Ok(_) => self.invoke(run_id, triggered_by).await,
            Err(e) => {
                error!("Error running pipeline (run {}): {}", run_id, e);
                RunCompletion::failed(None, e.to_string(), None)
            }
        };
        let duration = completion.duration_seconds;

        let e = match self
            .store
            .update(run_id, RunUpdate::Finished(completion))
            .await
        {
            Ok(run) => return Some(run),
            Err(e @ (StoreError::NotFound(_) | StoreError::InvalidTransition { .. })) => {
                error!("Failed to record outcome of run {}: {}", run_id, e);
                return None;
            }
            Err(e) => e,
        };

        // The process has exited; do not leave the record in `running`
        warn!(
            "Failed to record outcome of run {} ({}); marking it failed",
            run_id, e
        );
        let failed = RunCompletion::failed(None, e.to_string(), duration);
        match self.store.update(run_id, RunUpdate::Finished(failed)).await {
            Ok(run) => Some(run),
            Err(e) => {
                error!("Run {} could not be marked failed: {}", run_id, e);
                None
            }
        }
    }

    async fn invoke(&self, run_id: i64, triggered_by: TriggerSource) -> RunCompletion {
        info!(
            "Starting transformation (run {}, triggered by {})",
            run_id, triggered_by
        );
        let started = Instant::now();

        match self.runner.run().await {
            Ok(output) => completion_from_output(run_id, output, started.elapsed()),
            Err(InvokeError::Timeout(secs)) => {
                error!("Transformation timed out (run {})", run_id);
                RunCompletion::failed(
                    None,
                    InvokeError::Timeout(secs).to_string(),
                    Some(secs as f64),
                )
            }
            Err(e) => {
                error!("Error running transformation (run {}): {}", run_id, e);
                RunCompletion::failed(None, e.to_string(), Some(started.elapsed().as_secs_f64()))
            }
        }
    }

    /// Run the transformation without a run record.
    ///
    /// Same process semantics as [`run_tracked`](Self::run_tracked); the
    /// outcome is returned instead of persisted.
    pub async fn run_sync(&self) -> SyncRunResult {
        info!("Starting transformation (untracked)");

        match self.runner.run().await {
            Ok(output) if output.success() => {
                info!("Transformation succeeded");
                SyncRunResult {
                    success: true,
                    message: "Transformation run completed successfully".to_string(),
                    output: Some(output.stdout),
                    error: None,
                }
            }
            Ok(output) => {
                let error = failure_text(&output);
                error!("Transformation failed: {}", error.trim());
                SyncRunResult {
                    success: false,
                    message: "Transformation run failed".to_string(),
                    output: Some(output.stdout),
                    error: Some(error),
                }
            }
            Err(e @ InvokeError::Timeout(_)) => {
                error!("Transformation timed out");
                SyncRunResult {
                    success: false,
                    message: "Transformation run timed out".to_string(),
                    output: None,
                    error: Some(e.to_string()),
                }
            }
            Err(e) => {
                error!("Error running transformation: {}", e);
                SyncRunResult {
                    success: false,
                    message: format!("Error running transformation: {}", e),
                    output: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}

fn completion_from_output(run_id: i64, output: ProcessOutput, elapsed: Duration) -> RunCompletion {
    let duration = elapsed.as_secs_f64();
    if output.success() {
        info!("Transformation succeeded (run {}) in {:.2}s", run_id, duration);
        RunCompletion::success(output.stdout, duration)
    } else {
        let error = failure_text(&output);
        error!(
            "Transformation failed (run {}) with code {}: {}",
            run_id,
            output.exit_code,
            error.trim()
        );
        RunCompletion::failed(Some(output.stdout), error, Some(duration))
    }
}

/// Stderr, or a description of the exit when the process wrote nothing
fn failure_text(output: &ProcessOutput) -> String {
    if output.stderr.trim().is_empty() {
        warn!("Transformation exited with code {} and no stderr", output.exit_code);
        format!("Process exited with code {}", output.exit_code)
    } else {
        output.stderr.clone()
    }
}

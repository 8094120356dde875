//! Trigger and status operations
//!
//! Every operation here resolves to a reply value. Storage and process
//! failures are logged and folded into the reply; nothing propagates to
//! the caller as an error except malformed uploads.

pub mod metrics;
pub mod replies;

pub use metrics::AchievementMetrics;
pub use replies::{RunView, StatusReply, TriggerReply, TriggerResponse, TriggerState};

use crate::core::config::IngestConfig;
use crate::core::{PipelineRun, TriggerSource};
use crate::execution::{RunLauncher, RunSlot};
use crate::ingest::{parse_targets, IngestError, PreviewRow};
use crate::persistence::{
    RunStore, SchemaStatus, StoreError, TargetStore, RUNS_TABLE, TARGETS_TABLE,
};
use crate::transform::ProcessRunner;
use serde::Serialize;
use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Result of a successful upload
#[derive(Debug, Clone, Serialize)]
pub struct UploadReport {
    pub message: String,
    pub table_name: &'static str,
    pub rows_saved: usize,
    pub total_rows: usize,
    pub dropped_rows: usize,
    pub columns: Vec<String>,
    pub preview: Vec<PreviewRow>,
    pub trigger: TriggerReply,
}

/// How polling a run ended
#[derive(Debug, Clone)]
pub enum WaitOutcome {
    /// The run reached `success` or `failed`
    Finished(PipelineRun),
    /// The run could not be read; carries the status reply
    Lost(StatusReply),
    /// The limit passed first; carries the last record seen
    TimedOut(Option<PipelineRun>),
}

/// Front door for uploads, pipeline triggers and run polling
pub struct PipelineService<R> {
    runs: Arc<dyn RunStore>,
    targets: Arc<dyn TargetStore>,
    launcher: RunLauncher<R>,
    schema: SchemaStatus,
    ingest: IngestConfig,
    processed_table: String,
}

impl<R: ProcessRunner + 'static> PipelineService<R> {
    /// `schema` is the result of the startup schema check
    pub fn new(
        runs: Arc<dyn RunStore>,
        targets: Arc<dyn TargetStore>,
        launcher: RunLauncher<R>,
        schema: SchemaStatus,
    ) -> Self {
        Self {
            runs,
            targets,
            launcher,
            schema,
            ingest: IngestConfig::default(),
            processed_table: "user_targets_clean".to_string(),
        }
    }

    pub fn with_ingest(mut self, ingest: IngestConfig) -> Self {
        self.ingest = ingest;
        self
    }

    pub fn with_processed_table(mut self, table: impl Into<String>) -> Self {
        self.processed_table = table.into();
        self
    }

    pub fn schema(&self) -> &SchemaStatus {
        &self.schema
    }

    pub fn launcher(&self) -> &RunLauncher<R> {
        &self.launcher
    }

    /// Start a pipeline run.
    ///
    /// Returns as soon as the run is scheduled; poll [`status`](Self::status)
    /// with the returned `log_id` to follow it. When run records cannot be
    /// stored the pipeline runs synchronously and the reply carries its
    /// outcome instead of an ID.
    pub async fn trigger(&self, source: TriggerSource) -> TriggerReply {
        let Some(slot) = self.launcher.try_reserve() else {
            warn!("Rejecting {} trigger: a pipeline run is already in progress", source);
            return TriggerReply::Busy;
        };

        if self.schema.is_missing(RUNS_TABLE) {
            warn!(
                "Table {} does not exist; running the pipeline synchronously. Run the migration first.",
                RUNS_TABLE
            );
            return self.run_fallback(slot).await;
        }

        match self.runs.create(source).await {
            Ok(run) => {
                info!("Created pipeline run {} (triggered by {})", run.id, source);
                self.launcher.launch(slot, run.id, source);
                TriggerReply::Accepted(run)
            }
            Err(StoreError::Unavailable(e)) => {
                warn!("Run history table is unavailable ({}); running the pipeline synchronously", e);
                self.run_fallback(slot).await
            }
            Err(e) => {
                error!("Failed to create pipeline run: {}", e);
                TriggerReply::Failed(e.to_string())
            }
        }
    }

    async fn run_fallback(&self, slot: RunSlot) -> TriggerReply {
        let result = self.launcher.invoker().run_sync().await;
        drop(slot);
        TriggerReply::Fallback(result)
    }

    /// Look up a run by ID
    pub async fn status(&self, id: i64) -> StatusReply {
        match self.runs.get(id).await {
            Ok(Some(run)) => StatusReply::Found(run),
            Ok(None) => StatusReply::NotFound(id),
            Err(e) if e.is_unavailable() => {
                warn!("Run history table is unavailable: {}", e);
                StatusReply::Unavailable(e.to_string())
            }
            Err(e) => {
                error!("Error getting status of run {}: {}", id, e);
                StatusReply::Failed(e.to_string())
            }
        }
    }

    /// Poll run `id` every `interval` until it is terminal or `limit` passes.
    ///
    /// `on_poll` sees every record read along the way.
    pub async fn wait_for_run<F>(
        &self,
        id: i64,
        interval: Duration,
        limit: Duration,
        mut on_poll: F,
    ) -> WaitOutcome
    where
        F: FnMut(&PipelineRun),
    {
        let mut last = None;
        let polling = async {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                match self.status(id).await {
                    StatusReply::Found(run) => {
                        debug!("Run {} is {}", id, run.status);
                        on_poll(&run);
                        if run.status.is_terminal() {
                            return WaitOutcome::Finished(run);
                        }
                        last = Some(run);
                    }
                    other => return WaitOutcome::Lost(other),
                }
            }
        };

        let result = tokio::time::timeout(limit, polling).await;
        match result {
            Ok(outcome) => outcome,
            Err(_) => {
                error!("Run {} did not finish within {}s", id, limit.as_secs());
                WaitOutcome::TimedOut(last)
            }
        }
    }

    /// Most recent run, if the history can be read
    pub async fn latest(&self) -> Option<PipelineRun> {
        match self.runs.latest().await {
            Ok(run) => run,
            Err(e) => {
                warn!("Could not load the latest pipeline run: {}", e);
                None
            }
        }
    }

    /// Newest runs first
    pub async fn history(&self, limit: usize) -> Result<Vec<PipelineRun>, StoreError> {
        self.runs.list(limit).await
    }

    pub async fn metrics(&self) -> AchievementMetrics {
        metrics::collect(
            self.runs.as_ref(),
            self.targets.as_ref(),
            &self.processed_table,
        )
        .await
    }

    /// Parse and store an uploaded CSV, then trigger an `upload` run.
    ///
    /// Malformed input is returned as an error and no run is triggered.
    pub async fn upload<I: Read>(&self, input: I) -> Result<UploadReport, IngestError> {
        let parsed = parse_targets(input, &self.ingest)?;
        let rows_saved = self.targets.insert_targets(&parsed.rows).await?;
        info!("Saved {} rows to {}", rows_saved, TARGETS_TABLE);

        let trigger = self.trigger(TriggerSource::Upload).await;
        let saved = format!("Upload succeeded! {} rows saved to the database.", rows_saved);
        let message = match &trigger {
            TriggerReply::Accepted(_) => {
                format!("{} The pipeline is running in the background...", saved)
            }
            TriggerReply::Fallback(result) if result.success => {
                format!("{} The pipeline run completed.", saved)
            }
            TriggerReply::Fallback(result) => format!(
                "{} However, the pipeline run failed: {}",
                saved,
                result.error.as_deref().unwrap_or("Unknown error")
            ),
            TriggerReply::Busy => format!(
                "{} A pipeline run is already in progress; re-run the pipeline once it finishes.",
                saved
            ),
            TriggerReply::Failed(e) => {
                format!("{} However, the pipeline could not be started: {}", saved, e)
            }
        };

        Ok(UploadReport {
            message,
            table_name: TARGETS_TABLE,
            rows_saved,
            total_rows: parsed.total_rows,
            dropped_rows: parsed.dropped_rows,
            columns: parsed.columns,
            preview: parsed.preview,
            trigger,
        })
    }

    /// [`upload`](Self::upload) from a file on disk
    pub async fn upload_file(&self, path: &Path) -> Result<UploadReport, IngestError> {
        info!("Reading upload {}", path.display());
        let content = tokio::fs::read(path).await?;
        self.upload(Cursor::new(content)).await
    }
}

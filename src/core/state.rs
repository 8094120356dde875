//! Pipeline run records and their lifecycle

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Status of a tracked pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Record created, process not started yet
    Pending,
    /// Transformation process is running
    Running,
    /// Process exited with code 0
    Success,
    /// Process failed, timed out, or could not be orchestrated
    Failed,
}

impl RunStatus {
    pub const ALL: [RunStatus; 4] = [
        RunStatus::Pending,
        RunStatus::Running,
        RunStatus::Success,
        RunStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
        }
    }

    /// Check if the run has reached a final state
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Success | RunStatus::Failed)
    }

    /// Forward-only lifecycle. `Pending -> Failed` covers runs that never
    /// got as far as spawning the process.
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        matches!(
            (*self, next),
            (RunStatus::Pending, RunStatus::Running)
                | (RunStatus::Pending, RunStatus::Failed)
                | (RunStatus::Running, RunStatus::Success)
                | (RunStatus::Running, RunStatus::Failed)
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RunStatus::Pending),
            "running" => Ok(RunStatus::Running),
            "success" => Ok(RunStatus::Success),
            "failed" => Ok(RunStatus::Failed),
            other => Err(format!("unknown run status '{}'", other)),
        }
    }
}

/// What caused a run to be triggered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerSource {
    /// Fired after a CSV upload was stored
    Upload,
    /// Fired by an explicit manual re-run
    Rerun,
}

impl TriggerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerSource::Upload => "upload",
            TriggerSource::Rerun => "rerun",
        }
    }
}

impl fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upload" => Ok(TriggerSource::Upload),
            "rerun" => Ok(TriggerSource::Rerun),
            other => Err(format!("unknown trigger source '{}'", other)),
        }
    }
}

/// A single tracked attempt to run the transformation pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    /// Monotonically assigned identifier
    pub id: i64,

    /// Current status
    pub status: RunStatus,

    /// When the record was created
    pub started_at: DateTime<Utc>,

    /// Set once, on the terminal transition
    pub completed_at: Option<DateTime<Utc>>,

    /// Captured standard output
    pub output: Option<String>,

    /// Captured standard error or failure description
    pub error: Option<String>,

    /// Wall-clock time of the invocation
    pub duration_seconds: Option<f64>,

    /// What triggered the run
    pub triggered_by: TriggerSource,
}

impl PipelineRun {
    /// Create a fresh pending record
    pub fn new(id: i64, triggered_by: TriggerSource) -> Self {
        Self {
            id,
            status: RunStatus::Pending,
            started_at: Utc::now(),
            completed_at: None,
            output: None,
            error: None,
            duration_seconds: None,
            triggered_by,
        }
    }

    /// Apply an update in place, enforcing the forward-only lifecycle.
    ///
    /// Returns the rejected target status if the transition is not allowed.
    pub fn apply(&mut self, update: &RunUpdate) -> Result<(), RunStatus> {
        let next = update.status();
        if !self.status.can_transition_to(next) {
            return Err(next);
        }

        self.status = next;
        if let RunUpdate::Finished(completion) = update {
            self.output = completion.output.clone();
            self.error = completion.error.clone();
            self.duration_seconds = completion.duration_seconds;
            self.completed_at = Some(completion.completed_at);
        }
        Ok(())
    }
}

/// Terminal fields written when a run finishes
#[derive(Debug, Clone, PartialEq)]
pub struct RunCompletion {
    pub status: RunStatus,
    pub output: Option<String>,
    pub error: Option<String>,
    pub duration_seconds: Option<f64>,
    pub completed_at: DateTime<Utc>,
}

impl RunCompletion {
    /// Process exited with code 0
    pub fn success(output: String, duration_seconds: f64) -> Self {
        Self {
            status: RunStatus::Success,
            output: Some(output),
            error: None,
            duration_seconds: Some(duration_seconds),
            completed_at: Utc::now(),
        }
    }

    /// Run failed; `output` is whatever stdout was captured, if any
    pub fn failed(
        output: Option<String>,
        error: String,
        duration_seconds: Option<f64>,
    ) -> Self {
        Self {
            status: RunStatus::Failed,
            output,
            error: Some(error),
            duration_seconds,
            completed_at: Utc::now(),
        }
    }
}

/// A mutation applied to a run record by the invoker
#[derive(Debug, Clone, PartialEq)]
pub enum RunUpdate {
    /// Process is about to be spawned
    Running,
    /// Process finished (or could not be run)
    Finished(RunCompletion),
}

impl RunUpdate {
    /// Status the record moves to
    pub fn status(&self) -> RunStatus {
        match self {
            RunUpdate::Running => RunStatus::Running,
            RunUpdate::Finished(completion) => completion.status,
        }
    }
}

/// Aggregate run counts used by the metrics view
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunCounts {
    pub total: u64,
    pub success: u64,
}

//! Reply values returned by the trigger and status operations

use crate::core::{PipelineRun, RunStatus, TriggerSource};
use crate::execution::SyncRunResult;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

/// `status` field of a trigger reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerState {
    /// Run record created, execution scheduled
    Pending,
    /// Synchronous fallback run succeeded
    Completed,
    /// Synchronous fallback run failed
    Failed,
    /// Another run holds every execution slot
    Busy,
}

/// Wire body of a trigger reply
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriggerResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TriggerState>,
}

/// Outcome of a trigger request
#[derive(Debug, Clone)]
pub enum TriggerReply {
    /// Run record created and launched in the background
    Accepted(PipelineRun),
    /// Run records are unavailable; the pipeline ran synchronously
    Fallback(SyncRunResult),
    /// Rejected because a run is already in progress
    Busy,
    /// Unexpected failure while handling the trigger
    Failed(String),
}

impl TriggerReply {
    pub fn http_status(&self) -> u16 {
        match self {
            TriggerReply::Accepted(_) | TriggerReply::Fallback(_) => 200,
            TriggerReply::Busy => 409,
            TriggerReply::Failed(_) => 500,
        }
    }

    /// ID of the run to poll, if one was created
    pub fn log_id(&self) -> Option<i64> {
        match self {
            TriggerReply::Accepted(run) => Some(run.id),
            _ => None,
        }
    }

    pub fn body(&self) -> TriggerResponse {
        match self {
            TriggerReply::Accepted(run) => TriggerResponse {
                success: true,
                message: "Pipeline is running in the background".to_string(),
                log_id: Some(run.id),
                status: Some(TriggerState::Pending),
            },
            TriggerReply::Fallback(result) => TriggerResponse {
                success: result.success,
                message: result.message.clone(),
                log_id: None,
                status: Some(if result.success {
                    TriggerState::Completed
                } else {
                    TriggerState::Failed
                }),
            },
            TriggerReply::Busy => TriggerResponse {
                success: false,
                message: "A pipeline run is already in progress".to_string(),
                log_id: None,
                status: Some(TriggerState::Busy),
            },
            TriggerReply::Failed(error) => TriggerResponse {
                success: false,
                message: format!("Error: {}", error),
                log_id: None,
                status: None,
            },
        }
    }
}

impl Serialize for TriggerReply {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.body().serialize(serializer)
    }
}

/// Wire body of a successful status query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunView {
    pub id: i64,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
    pub triggered_by: TriggerSource,
}

impl From<&PipelineRun> for RunView {
    fn from(run: &PipelineRun) -> Self {
        Self {
            id: run.id,
            status: run.status,
            started_at: run.started_at,
            completed_at: run.completed_at,
            duration_seconds: run.duration_seconds,
            triggered_by: run.triggered_by,
        }
    }
}

/// Wire body of a failed status query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorBody {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<&'static str>,
}

/// Outcome of a status query
#[derive(Debug, Clone)]
pub enum StatusReply {
    Found(PipelineRun),
    NotFound(i64),
    /// Run tracking tables have not been created
    Unavailable(String),
    Failed(String),
}

impl StatusReply {
    pub fn http_status(&self) -> u16 {
        match self {
            StatusReply::Found(_) => 200,
            StatusReply::NotFound(_) | StatusReply::Unavailable(_) => 404,
            StatusReply::Failed(_) => 500,
        }
    }

    pub fn run(&self) -> Option<&PipelineRun> {
        match self {
            StatusReply::Found(run) => Some(run),
            _ => None,
        }
    }

    pub fn body(&self) -> serde_json::Value {
        let body = match self {
            StatusReply::Found(run) => return serde_json::json!(RunView::from(run)),
            StatusReply::NotFound(id) => ErrorBody {
                success: false,
                message: format!("Run {} not found", id),
                status: Some("not_found"),
            },
            StatusReply::Unavailable(_) => ErrorBody {
                success: false,
                message: "Run history table does not exist yet. Run the migration first."
                    .to_string(),
                status: Some("not_available"),
            },
            StatusReply::Failed(error) => ErrorBody {
                success: false,
                message: format!("Error: {}", error),
                status: None,
            },
        };
        serde_json::json!(body)
    }
}

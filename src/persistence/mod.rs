//! Persistence layer for uploaded targets and pipeline run history

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteStore;

use crate::core::{PipelineRun, RunCounts, RunStatus, RunUpdate, TargetRow, TriggerSource};
use std::collections::BTreeMap;
use thiserror::Error;

/// Table holding uploaded target rows
pub const TARGETS_TABLE: &str = "raw_user_targets";

/// Table holding pipeline run records
pub const RUNS_TABLE: &str = "pipeline_runs";

/// Errors surfaced by the storage layer
#[derive(Debug, Error)]
pub enum StoreError {
    /// The tables needed to track runs have not been created yet
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Run {0} not found")]
    NotFound(i64),

    #[error("Run {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: i64,
        from: RunStatus,
        to: RunStatus,
    },

    #[error("Database error: {0}")]
    Database(String),
}

impl StoreError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Result of the startup schema check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaStatus {
    /// All tables exist
    Ready,
    /// These tables are missing
    Missing(Vec<String>),
}

impl SchemaStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, SchemaStatus::Ready)
    }

    pub fn is_missing(&self, table: &str) -> bool {
        match self {
            SchemaStatus::Ready => false,
            SchemaStatus::Missing(tables) => tables.iter().any(|t| t == table),
        }
    }
}

/// Storage for pipeline run records
#[async_trait::async_trait]
pub trait RunStore: Send + Sync {
    /// Create a new pending run
    async fn create(&self, triggered_by: TriggerSource) -> Result<PipelineRun, StoreError>;

    /// Load a run by ID
    async fn get(&self, id: i64) -> Result<Option<PipelineRun>, StoreError>;

    /// Apply an update, rejecting backward transitions
    async fn update(&self, id: i64, update: RunUpdate) -> Result<PipelineRun, StoreError>;

    /// Most recently started run
    async fn latest(&self) -> Result<Option<PipelineRun>, StoreError>;

    /// Runs ordered by `started_at` descending
    async fn list(&self, limit: usize) -> Result<Vec<PipelineRun>, StoreError>;

    /// Total and successful run counts
    async fn counts(&self) -> Result<RunCounts, StoreError>;
}

/// Storage for uploaded target rows
#[async_trait::async_trait]
pub trait TargetStore: Send + Sync {
    /// Insert all rows in one transaction
    async fn insert_targets(&self, rows: &[TargetRow]) -> Result<usize, StoreError>;

    /// Number of uploaded rows
    async fn count_targets(&self) -> Result<u64, StoreError>;

    /// Number of rows in a derived table; 0 if the pipeline has not created it
    async fn count_processed(&self, table: &str) -> Result<u64, StoreError>;
}

#[derive(Default)]
struct MemoryState {
    next_id: i64,
    runs: BTreeMap<i64, PipelineRun>,
    targets: Vec<TargetRow>,
    processed: BTreeMap<String, u64>,
}

/// In-memory persistence (for testing or ephemeral use)
pub struct InMemoryStore {
    state: tokio::sync::RwLock<MemoryState>,
    provisioned: bool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            state: tokio::sync::RwLock::new(MemoryState::default()),
            provisioned: true,
        }
    }

    /// A store whose schema was never created; every call is `Unavailable`
    pub fn unprovisioned() -> Self {
        Self {
            provisioned: false,
            ..Self::new()
        }
    }

    pub fn schema_status(&self) -> SchemaStatus {
        if self.provisioned {
            SchemaStatus::Ready
        } else {
            SchemaStatus::Missing(vec![TARGETS_TABLE.to_string(), RUNS_TABLE.to_string()])
        }
    }

    /// Pretend the pipeline wrote `rows` rows into `table`
    pub async fn set_processed(&self, table: &str, rows: u64) {
        self.state.write().await.processed.insert(table.to_string(), rows);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.provisioned {
            Ok(())
        } else {
            Err(StoreError::Unavailable(
                "no such table: pipeline_runs".to_string(),
            ))
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl RunStore for InMemoryStore {
    async fn create(&self, triggered_by: TriggerSource) -> Result<PipelineRun, StoreError> {
        self.check()?;
        let mut state = self.state.write().await;
        state.next_id += 1;
        let run = PipelineRun::new(state.next_id, triggered_by);
        state.runs.insert(run.id, run.clone());
        Ok(run)
    }

    async fn get(&self, id: i64) -> Result<Option<PipelineRun>, StoreError> {
        self.check()?;
        Ok(self.state.read().await.runs.get(&id).cloned())
    }

    async fn update(&self, id: i64, update: RunUpdate) -> Result<PipelineRun, StoreError> {
        self.check()?;
        let mut state = self.state.write().await;
        let run = state.runs.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        let from = run.status;
        run.apply(&update)
            .map_err(|to| StoreError::InvalidTransition { id, from, to })?;
        Ok(run.clone())
    }

    async fn latest(&self) -> Result<Option<PipelineRun>, StoreError> {
        Ok(self.list(1).await?.into_iter().next())
    }

    async fn list(&self, limit: usize) -> Result<Vec<PipelineRun>, StoreError> {
        self.check()?;
        let state = self.state.read().await;
        let mut runs: Vec<PipelineRun> = state.runs.values().cloned().collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at).then(b.id.cmp(&a.id)));
        runs.truncate(limit);
        Ok(runs)
    }

    async fn counts(&self) -> Result<RunCounts, StoreError> {
        self.check()?;
        let state = self.state.read().await;
        Ok(RunCounts {
            total: state.runs.len() as u64,
            success: state
                .runs
                .values()
                .filter(|r| r.status == RunStatus::Success)
                .count() as u64,
        })
    }
}

#[async_trait::async_trait]
impl TargetStore for InMemoryStore {
    async fn insert_targets(&self, rows: &[TargetRow]) -> Result<usize, StoreError> {
        self.check()?;
        self.state.write().await.targets.extend_from_slice(rows);
        Ok(rows.len())
    }

    async fn count_targets(&self) -> Result<u64, StoreError> {
        self.check()?;
        Ok(self.state.read().await.targets.len() as u64)
    }

    async fn count_processed(&self, table: &str) -> Result<u64, StoreError> {
        Ok(self.state.read().await.processed.get(table).copied().unwrap_or(0))
    }
}

//! SQLite-based persistence store

use crate::core::config::is_identifier;
use crate::core::{PipelineRun, RunCounts, RunStatus, RunUpdate, TargetRow, TriggerSource};
use crate::persistence::{
    RunStore, SchemaStatus, StoreError, TargetStore, RUNS_TABLE, TARGETS_TABLE,
};
use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, info};

/// Tables the application owns
const REQUIRED_TABLES: [&str; 2] = [TARGETS_TABLE, RUNS_TABLE];

const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS raw_user_targets (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    month TEXT NOT NULL,
    target_amount INTEGER NOT NULL,
    uploaded_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS pipeline_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    status TEXT NOT NULL DEFAULT 'pending',
    started_at TEXT NOT NULL,
    completed_at TEXT,
    output TEXT,
    error TEXT,
    duration_seconds REAL,
    triggered_by TEXT NOT NULL DEFAULT 'upload'
);

CREATE INDEX IF NOT EXISTS idx_pipeline_runs_started_at ON pipeline_runs(started_at);
CREATE INDEX IF NOT EXISTS idx_pipeline_runs_status ON pipeline_runs(status);
"#;

const RUN_COLUMNS: &str =
    "id, status, started_at, completed_at, output, error, duration_seconds, triggered_by";

fn missing_table_regex() -> &'static Regex {
    static MISSING: OnceLock<Regex> = OnceLock::new();
    MISSING.get_or_init(|| {
        Regex::new(r"(?i)no such table|relation .* does not exist").expect("static regex")
    })
}

/// Sort storage failures into "schema missing" and everything else
fn classify(err: sqlx::Error) -> StoreError {
    let message = err.to_string();
    if missing_table_regex().is_match(&message) {
        StoreError::Unavailable(message)
    } else {
        StoreError::Database(message)
    }
}

/// SQLite store for run records and uploaded targets
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a database file. Tables are not created here.
    pub async fn open(db_path: &Path) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Database(format!("Failed to connect to database: {}", e)))?;

        debug!("Opened database at {}", db_path.display());
        Ok(Self { pool })
    }

    /// Private in-memory database backed by a single long-lived connection
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(classify)?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(classify)?;
        Ok(Self { pool })
    }

    /// Create the application tables if they do not exist
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(CREATE_TABLES)
            .execute(&self.pool)
            .await
            .map_err(classify)?;
        info!("Database schema is up to date");
        Ok(())
    }

    /// Probe which application tables exist
    pub async fn schema_status(&self) -> Result<SchemaStatus, StoreError> {
        let mut missing = Vec::new();
        for table in REQUIRED_TABLES {
            if !self.table_exists(table).await? {
                missing.push(table.to_string());
            }
        }

        if missing.is_empty() {
            Ok(SchemaStatus::Ready)
        } else {
            Ok(SchemaStatus::Missing(missing))
        }
    }

    async fn table_exists(&self, table: &str) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1")
            .bind(table)
            .fetch_optional(&self.pool)
            .await
            .map_err(classify)?;
        Ok(row.is_some())
    }

    /// Convert DateTime<Utc> to NaiveDateTime for SQLite
    fn to_naive(dt: DateTime<Utc>) -> NaiveDateTime {
        dt.naive_utc()
    }

    /// Convert NaiveDateTime to DateTime<Utc>
    fn from_naive(dt: NaiveDateTime) -> DateTime<Utc> {
        DateTime::from_naive_utc_and_offset(dt, Utc)
    }

    fn map_run(row: &SqliteRow) -> Result<PipelineRun, StoreError> {
        let status: String = row.try_get("status").map_err(classify)?;
        let triggered_by: String = row.try_get("triggered_by").map_err(classify)?;

        Ok(PipelineRun {
            id: row.try_get("id").map_err(classify)?,
            status: status.parse::<RunStatus>().map_err(StoreError::Database)?,
            started_at: Self::from_naive(row.try_get("started_at").map_err(classify)?),
            completed_at: row
                .try_get::<Option<NaiveDateTime>, _>("completed_at")
                .map_err(classify)?
                .map(Self::from_naive),
            output: row.try_get("output").map_err(classify)?,
            error: row.try_get("error").map_err(classify)?,
            duration_seconds: row.try_get("duration_seconds").map_err(classify)?,
            triggered_by: triggered_by
                .parse::<TriggerSource>()
                .map_err(StoreError::Database)?,
        })
    }
}

#[async_trait::async_trait]
impl RunStore for SqliteStore {
    async fn create(&self, triggered_by: TriggerSource) -> Result<PipelineRun, StoreError> {
        let started_at = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO pipeline_runs (status, started_at, triggered_by)
            VALUES (?1, ?2, ?3)
            "#,
        )
        .bind(RunStatus::Pending.as_str())
        .bind(Self::to_naive(started_at))
        .bind(triggered_by.as_str())
        .execute(&self.pool)
        .await
        .map_err(classify)?;

        let id = result.last_insert_rowid();
        self.get(id).await?.ok_or(StoreError::NotFound(id))
    }

    async fn get(&self, id: i64) -> Result<Option<PipelineRun>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM pipeline_runs WHERE id = ?1",
            RUN_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(classify)?;

        row.as_ref().map(Self::map_run).transpose()
    }

    async fn update(&self, id: i64, update: RunUpdate) -> Result<PipelineRun, StoreError> {
        let next = update.status();
        let allowed_from: Vec<RunStatus> = RunStatus::ALL
            .into_iter()
            .filter(|from| from.can_transition_to(next))
            .collect();
        let placeholders = vec!["?"; allowed_from.len()].join(", ");

        // The status guard makes the transition check and the write one atomic step
        let guard = format!("WHERE id = ? AND status IN ({})", placeholders);
        let sql = match &update {
            RunUpdate::Running => format!("UPDATE pipeline_runs SET status = ? {}", guard),
            RunUpdate::Finished(_) => format!(
                "UPDATE pipeline_runs \
                 SET status = ?, output = ?, error = ?, duration_seconds = ?, completed_at = ? {}",
                guard
            ),
        };

        let mut query = sqlx::query(&sql).bind(next.as_str());
        if let RunUpdate::Finished(completion) = &update {
            query = query
                .bind(completion.output.clone())
                .bind(completion.error.clone())
                .bind(completion.duration_seconds)
                .bind(Self::to_naive(completion.completed_at));
        }
        query = query.bind(id);
        for from in &allowed_from {
            query = query.bind(from.as_str());
        }

        let result = query.execute(&self.pool).await.map_err(classify)?;

        let current = self.get(id).await?.ok_or(StoreError::NotFound(id))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::InvalidTransition {
                id,
                from: current.status,
                to: next,
            });
        }
        Ok(current)
    }

    async fn latest(&self) -> Result<Option<PipelineRun>, StoreError> {
        Ok(self.list(1).await?.into_iter().next())
    }

    async fn list(&self, limit: usize) -> Result<Vec<PipelineRun>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM pipeline_runs ORDER BY started_at DESC, id DESC LIMIT ?1",
            RUN_COLUMNS
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(classify)?;

        rows.iter().map(Self::map_run).collect()
    }

    async fn counts(&self) -> Result<RunCounts, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COALESCE(SUM(CASE WHEN status = 'success' THEN 1 ELSE 0 END), 0) AS success
            FROM pipeline_runs
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(classify)?;

        Ok(RunCounts {
            total: row.try_get::<i64, _>("total").map_err(classify)? as u64,
            success: row.try_get::<i64, _>("success").map_err(classify)? as u64,
        })
    }
}

#[async_trait::async_trait]
impl TargetStore for SqliteStore {
    async fn insert_targets(&self, rows: &[TargetRow]) -> Result<usize, StoreError> {
        let uploaded_at = Self::to_naive(Utc::now());
        let mut tx = self.pool.begin().await.map_err(classify)?;

        for row in rows {
            sqlx::query(
                "INSERT INTO raw_user_targets (month, target_amount, uploaded_at) VALUES (?1, ?2, ?3)",
            )
            .bind(row.month)
            .bind(row.target_amount)
            .bind(uploaded_at)
            .execute(&mut *tx)
            .await
            .map_err(classify)?;
        }

        tx.commit().await.map_err(classify)?;
        Ok(rows.len())
    }

    async fn count_targets(&self) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM raw_user_targets")
            .fetch_one(&self.pool)
            .await
            .map_err(classify)?;
        Ok(count as u64)
    }

    async fn count_processed(&self, table: &str) -> Result<u64, StoreError> {
        if !is_identifier(table) {
            return Err(StoreError::Database(format!(
                "'{}' is not a valid table name",
                table
            )));
        }
        if !self.table_exists(table).await? {
            return Ok(0);
        }

        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM \"{}\"", table))
            .fetch_one(&self.pool)
            .await
            .map_err(classify)?;
        Ok(count as u64)
    }
}

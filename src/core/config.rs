//! Application configuration from YAML

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Default hard timeout for one transformation run
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Top-level configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// SQLite database file (defaults to the local data dir)
    pub database: Option<PathBuf>,

    /// Create missing tables on startup instead of running in fallback mode
    pub auto_migrate: bool,

    /// How many pipeline runs may be in flight at once
    pub max_concurrent_runs: usize,

    /// How often the CLI polls a run while waiting on it
    pub poll_interval_ms: u64,

    /// Derived table the pipeline writes, counted by the metrics view
    pub processed_table: String,

    /// External transformation process
    pub transform: TransformConfig,

    /// CSV ingest rules
    pub ingest: IngestConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: None,
            auto_migrate: false,
            max_concurrent_runs: 1,
            poll_interval_ms: 1000,
            processed_table: "user_targets_clean".to_string(),
            transform: TransformConfig::default(),
            ingest: IngestConfig::default(),
        }
    }
}

/// How to invoke the external transformation process
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    /// Executable name or path
    pub executable: String,

    /// Deployment root, passed as `--project-dir` and used as the working directory
    pub project_dir: PathBuf,

    /// Directory holding the process's configuration profiles
    pub profiles_dir: PathBuf,

    /// Environment variable that points the process at `profiles_dir`
    pub profiles_env: String,

    /// Hard timeout in seconds; the process is killed when it expires
    pub timeout_secs: u64,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            executable: "dbt".to_string(),
            project_dir: PathBuf::from("/app"),
            profiles_dir: PathBuf::from("/app/dbt_profiles"),
            profiles_env: "DBT_PROFILES_DIR".to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl TransformConfig {
    pub fn with_executable(mut self, executable: impl Into<String>) -> Self {
        self.executable = executable.into();
        self
    }

    pub fn with_project_dir(mut self, project_dir: impl Into<PathBuf>) -> Self {
        self.project_dir = project_dir.into();
        self
    }

    pub fn with_profiles_dir(mut self, profiles_dir: impl Into<PathBuf>) -> Self {
        self.profiles_dir = profiles_dir.into();
        self
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }
}

/// Rules for turning an uploaded CSV into target rows
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Column holding the date each row is bucketed by
    pub date_column: String,

    /// Column holding the target amount; `None` uses `default_amount`
    pub amount_column: Option<String>,

    /// Amount stored when no amount column is configured
    pub default_amount: i64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            date_column: "order_delivered_carrier_date".to_string(),
            amount_column: None,
            default_amount: 1,
        }
    }
}

fn identifier_regex() -> &'static Regex {
    static IDENT: OnceLock<Regex> = OnceLock::new();
    IDENT.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static regex"))
}

/// Check that a name is safe to splice into SQL or use as an env var
pub fn is_identifier(name: &str) -> bool {
    identifier_regex().is_match(name)
}

impl AppConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: AppConfig = if yaml.trim().is_empty() {
            AppConfig::default()
        } else {
            serde_yaml::from_str(yaml)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.transform.timeout_secs == 0 {
            anyhow::bail!("transform.timeout_secs must be greater than zero");
        }
        if self.transform.executable.trim().is_empty() {
            anyhow::bail!("transform.executable must not be empty");
        }
        if !is_identifier(&self.transform.profiles_env) {
            anyhow::bail!(
                "transform.profiles_env '{}' is not a valid environment variable name",
                self.transform.profiles_env
            );
        }
        if self.max_concurrent_runs == 0 {
            anyhow::bail!("max_concurrent_runs must be at least 1");
        }
        if self.poll_interval_ms == 0 {
            anyhow::bail!("poll_interval_ms must be greater than zero");
        }
        if !is_identifier(&self.processed_table) {
            anyhow::bail!(
                "processed_table '{}' is not a valid table name",
                self.processed_table
            );
        }
        if self.ingest.date_column.trim().is_empty() {
            anyhow::bail!("ingest.date_column must not be empty");
        }
        if let Some(column) = &self.ingest.amount_column {
            if column.trim().is_empty() {
                anyhow::bail!("ingest.amount_column must not be empty when set");
            }
        }
        Ok(())
    }

    /// Resolve the database path, falling back to the local data dir
    pub fn database_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.database {
            return Ok(path.clone());
        }
        let data_dir = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
        let db_dir = data_dir.join("targetflow");
        std::fs::create_dir_all(&db_dir)
            .with_context(|| format!("Failed to create {}", db_dir.display()))?;
        Ok(db_dir.join("targetflow.db"))
    }
}

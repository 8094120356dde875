//! CLI command definitions

use clap::Args;
use std::path::PathBuf;

/// Flags shared by commands that trigger a run
#[derive(Debug, Args, Clone)]
pub struct WaitArgs {
    /// Print the trigger reply and exit without waiting for the run
    #[arg(long)]
    pub no_wait: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Upload a target CSV
#[derive(Debug, Args, Clone)]
pub struct UploadCommand {
    /// Path to the CSV file
    #[arg(short, long)]
    pub file: PathBuf,

    #[command(flatten)]
    pub wait: WaitArgs,
}

/// Re-run the pipeline
#[derive(Debug, Args, Clone)]
pub struct RerunCommand {
    #[command(flatten)]
    pub wait: WaitArgs,
}

/// Show a single run
#[derive(Debug, Args, Clone)]
pub struct StatusCommand {
    /// Run ID returned by upload or rerun
    pub id: i64,

    /// Output in JSON format; the global --verbose flag adds captured output
    #[arg(long)]
    pub json: bool,
}

/// Show run history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Number of recent runs to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show metrics
#[derive(Debug, Args, Clone)]
pub struct MetricsCommand {
    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

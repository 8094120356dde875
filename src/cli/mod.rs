//! Command-line interface

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use commands::{HistoryCommand, MetricsCommand, RerunCommand, StatusCommand, UploadCommand};
use std::ffi::OsString;
use std::path::PathBuf;

/// Monthly target loader and transformation pipeline trigger
#[derive(Debug, Parser, Clone)]
#[command(name = "targetflow")]
#[command(author = "Targetflow Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Upload monthly targets and run the transformation pipeline", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to the YAML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// SQLite database path (overrides the config file)
    #[arg(long, global = true)]
    pub database: Option<PathBuf>,

    /// Keep run history in memory only
    #[arg(long, global = true)]
    pub ephemeral: bool,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Create the target and run history tables
    Migrate,

    /// Upload a target CSV and trigger the pipeline
    Upload(UploadCommand),

    /// Re-run the pipeline without uploading
    Rerun(RerunCommand),

    /// Show the status of a run
    Status(StatusCommand),

    /// Show recent runs
    History(HistoryCommand),

    /// Show upload and run metrics
    Metrics(MetricsCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }
}

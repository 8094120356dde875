//! CSV ingest for uploaded target files

pub mod reader;

pub use reader::{parse_targets, ParsedUpload, PreviewRow};

use crate::persistence::StoreError;
use thiserror::Error;

/// Why an upload was rejected. The message is shown to the uploader.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Could not read the uploaded file: {0}")]
    Io(#[from] std::io::Error),

    #[error("The CSV file is empty or invalid")]
    Empty,

    #[error("Invalid CSV format: {0}")]
    Csv(#[from] csv::Error),

    #[error("Column '{column}' was not found in the CSV. Available columns: {}", .found.join(", "))]
    MissingColumn { column: String, found: Vec<String> },

    #[error("No valid rows remain after cleaning. Make sure column '{column}' contains valid dates")]
    NoValidRows { column: String },

    #[error("Upload failed: {0}")]
    Store(#[from] StoreError),
}

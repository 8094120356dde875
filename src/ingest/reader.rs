//! Parse uploaded CSV files into target rows

use crate::core::config::IngestConfig;
use crate::core::TargetRow;
use crate::ingest::IngestError;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::io::Read;
use tracing::{debug, info, warn};

/// How many source rows are echoed back after an upload
pub const PREVIEW_ROWS: usize = 5;

const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
];

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%m/%d/%Y", "%Y/%m/%d"];

/// One accepted source row, as shown back to the uploader
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreviewRow {
    pub values: Vec<(String, String)>,
}

/// Result of parsing an upload
#[derive(Debug, Clone)]
pub struct ParsedUpload {
    /// Header row of the file
    pub columns: Vec<String>,

    /// Rows ready to store
    pub rows: Vec<TargetRow>,

    /// Data rows in the file
    pub total_rows: usize,

    /// Rows dropped for an unparsable date or amount
    pub dropped_rows: usize,

    /// First accepted rows, dates normalized
    pub preview: Vec<PreviewRow>,
}

/// Parse a date or datetime leniently and keep the calendar date
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.date_naive());
    }
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Some(dt.date());
        }
    }
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(value, format).ok())
}

fn parse_amount(value: &str) -> Option<i64> {
    let value = value.trim();
    value.parse::<i64>().ok().or_else(|| {
        value
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(|v| v.round() as i64)
    })
}

/// Read a CSV with a header row and turn it into target rows.
///
/// Rows whose date (or amount, when an amount column is configured) does
/// not parse are dropped. Fails if the file is empty, the date column is
/// missing, or nothing survives cleaning.
pub fn parse_targets<R: Read>(input: R, config: &IngestConfig) -> Result<ParsedUpload, IngestError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::Headers)
        .flexible(true)
        .from_reader(input);

    let columns: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    if columns.is_empty() || columns.iter().all(|c| c.is_empty()) {
        return Err(IngestError::Empty);
    }
    debug!("CSV columns: {:?}", columns);

    let column_index = |name: &str| columns.iter().position(|c| c == name);
    let date_index = column_index(&config.date_column).ok_or_else(|| IngestError::MissingColumn {
        column: config.date_column.clone(),
        found: columns.clone(),
    })?;
    let amount_index = match &config.amount_column {
        Some(name) => Some(column_index(name).ok_or_else(|| IngestError::MissingColumn {
            column: name.clone(),
            found: columns.clone(),
        })?),
        None => None,
    };

    let mut rows = Vec::new();
    let mut preview = Vec::new();
    let mut total_rows = 0;

    for record in reader.records() {
        let record = record?;
        total_rows += 1;

        let Some(month) = record.get(date_index).and_then(parse_date) else {
            continue;
        };
        let target_amount = match amount_index {
            Some(index) => match record.get(index).and_then(parse_amount) {
                Some(amount) => amount,
                None => continue,
            },
            None => config.default_amount,
        };

        if preview.len() < PREVIEW_ROWS {
            let values = columns
                .iter()
                .enumerate()
                .map(|(i, column)| {
                    let value = if i == date_index {
                        month.to_string()
                    } else {
                        match record.get(i).map(str::trim) {
                            Some(v) if !v.is_empty() => v.to_string(),
                            _ => "-".to_string(),
                        }
                    };
                    (column.clone(), value)
                })
                .collect();
            preview.push(PreviewRow { values });
        }

        rows.push(TargetRow::new(month, target_amount));
    }

    let dropped_rows = total_rows - rows.len();
    if dropped_rows > 0 {
        warn!(
            "Dropped {} of {} rows with an invalid '{}' value",
            dropped_rows, total_rows, config.date_column
        );
    }
    if rows.is_empty() {
        return Err(IngestError::NoValidRows {
            column: config.date_column.clone(),
        });
    }

    info!("Parsed {} valid rows out of {}", rows.len(), total_rows);
    Ok(ParsedUpload {
        columns,
        rows,
        total_rows,
        dropped_rows,
        preview,
    })
}

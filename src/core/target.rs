//! Uploaded target rows

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One parsed row destined for `raw_user_targets`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetRow {
    pub month: NaiveDate,
    pub target_amount: i64,
}

impl TargetRow {
    pub fn new(month: NaiveDate, target_amount: i64) -> Self {
        Self {
            month,
            target_amount,
        }
    }
}

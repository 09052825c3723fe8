use serde::{Deserialize, Serialize};

use crate::row::{DataType, Field, RowLayout};

/// Error handling configuration for a stage.
///
/// Negative thresholds disable the corresponding check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorPolicy {
    /// Stage receiving error rows. Must be reached through an error hop.
    pub target_stage: String,
    /// Copy of the target stage receiving error rows. The first channel to
    /// the target stage is used when unset.
    pub target_copy: Option<usize>,
    /// Maximum number of rejected rows.
    pub max_errors: i64,
    /// Maximum percentage of rejected rows relative to rows read.
    pub max_error_percent: i64,
    /// Rows that must be read before the percentage check applies.
    pub min_rows_for_percent: u64,
    pub error_count_field: String,
    pub error_descriptions_field: String,
    pub error_fields_field: String,
    pub error_codes_field: String,
}

impl Default for ErrorPolicy {
    fn default() -> Self {
        ErrorPolicy {
            target_stage: String::new(),
            target_copy: None,
            max_errors: -1,
            max_error_percent: -1,
            min_rows_for_percent: 0,
            error_count_field: "error_count".to_string(),
            error_descriptions_field: "error_descriptions".to_string(),
            error_fields_field: "error_fields".to_string(),
            error_codes_field: "error_codes".to_string(),
        }
    }
}

impl ErrorPolicy {
    pub fn new(target_stage: impl Into<String>) -> Self {
        ErrorPolicy {
            target_stage: target_stage.into(),
            ..Default::default()
        }
    }

    pub fn with_max_errors(mut self, max_errors: i64) -> Self {
        self.max_errors = max_errors;
        self
    }

    pub fn with_max_error_percent(mut self, percent: i64, min_rows: u64) -> Self {
        self.max_error_percent = percent;
        self.min_rows_for_percent = min_rows;
        self
    }

    pub fn with_target_copy(mut self, copy: usize) -> Self {
        self.target_copy = Some(copy);
        self
    }

    /// Layout of the fields appended to every error row.
    pub fn error_fields_layout(&self) -> RowLayout {
        RowLayout::new([
            Field::new(&self.error_count_field, DataType::Integer),
            Field::new(&self.error_descriptions_field, DataType::String),
            Field::new(&self.error_fields_field, DataType::String),
            Field::new(&self.error_codes_field, DataType::String),
        ])
    }
}

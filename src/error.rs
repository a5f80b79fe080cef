//! Engine error types.

use thiserror::Error;

/// Maximum number of raw values quoted in an [`EngineError::InvalidTimestamp`].
pub const MAX_TIMESTAMP_SAMPLES: usize = 5;

/// Failures that abort an analysis pass.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Required columns are absent from the input table.
    #[error("Missing required columns: {}. Columns found: {}", .missing.join(", "), .found.join(", "))]
    MissingColumns {
        missing: Vec<String>,
        found: Vec<String>,
    },
    /// One or more timestamps could not be parsed.
    #[error(
        "Invalid timestamps in {} row(s) at rows {}; examples: {}",
        .rows.len(),
        format_rows(.rows),
        .samples.join(", ")
    )]
    InvalidTimestamp {
        /// Offending row numbers (1-based, header lines included).
        rows: Vec<usize>,
        /// First raw values that failed to parse, capped at [`MAX_TIMESTAMP_SAMPLES`].
        samples: Vec<String>,
    },
    /// A required identifier cell is blank.
    #[error("Column '{column}' is empty at rows {}", format_rows(.rows))]
    EmptyRequiredValue { column: String, rows: Vec<usize> },
    /// A detector rejected its parameters or input.
    #[error("Detector {detector} failed: {reason}")]
    Detector {
        detector: &'static str,
        reason: String,
    },
}

impl EngineError {
    /// Stable machine-readable kind for structured error output.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingColumns { .. } => "missing_columns",
            Self::InvalidTimestamp { .. } => "invalid_timestamp",
            Self::EmptyRequiredValue { .. } => "empty_required_value",
            Self::Detector { .. } => "detector",
        }
    }
}

fn format_rows(rows: &[usize]) -> String {
    const SHOWN: usize = 20;
    let mut out = rows
        .iter()
        .take(SHOWN)
        .map(usize::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    if rows.len() > SHOWN {
        out.push_str(&format!(" (+{} more)", rows.len() - SHOWN));
    }
    out
}

/// Convenience alias.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

//! Error types for order interval reconstruction.
//!
//! Clean error handling using `thiserror` for ergonomic error definitions.
//! Orphaned Change/Delete events are not errors; they are counted in
//! [`ResolveStats`](crate::statistics::ResolveStats) and dropped.

use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

/// Result type alias for reconstruction operations.
pub type Result<T> = std::result::Result<T, CobError>;

/// Main error type for reconstruction operations.
#[derive(Error, Debug, Clone)]
pub enum CobError {
    /// Raw file does not match the schema expected for its feed format
    #[error("Format error in {variant} file {}: {reason}", .file.display())]
    Format {
        variant: String,
        file: PathBuf,
        reason: String,
    },

    /// No raw file found for a requested date
    #[error("Missing {variant} file for {date}: {}", .path.display())]
    MissingFile {
        variant: String,
        date: NaiveDate,
        path: PathBuf,
    },

    /// Invalid date range or unsupported exchange/date combination
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Two Add-type versions of one order id share the latest transaction time
    #[error("Ambiguous latest version for order {order_id} at {transaction_time}")]
    AmbiguousVersion {
        order_id: i64,
        transaction_time: DateTime<Utc>,
    },

    /// Failure while processing a specific calendar day
    #[error("Failed to process {date}: {source}")]
    Day {
        date: NaiveDate,
        #[source]
        source: Box<CobError>,
    },

    /// I/O failure outside of schema parsing
    #[error("IO error: {0}")]
    Io(String),

    /// Generic error with context
    #[error("Error: {0}")]
    Generic(String),
}

impl CobError {
    /// Create a generic error from any string-like type.
    pub fn generic(msg: impl Into<String>) -> Self {
        CobError::Generic(msg.into())
    }

    /// Create a format error for a file of the given variant.
    pub fn format(
        variant: impl Into<String>,
        file: impl Into<PathBuf>,
        reason: impl Into<String>,
    ) -> Self {
        CobError::Format {
            variant: variant.into(),
            file: file.into(),
            reason: reason.into(),
        }
    }

    /// Attach the failing date to an error.
    ///
    /// Errors that already carry a date are returned unchanged.
    pub fn on_day(self, date: NaiveDate) -> Self {
        if matches!(self, CobError::Day { .. }) {
            return self;
        }
        CobError::Day {
            date,
            source: Box::new(self),
        }
    }

    /// The date this error was raised for, if known.
    pub fn date(&self) -> Option<NaiveDate> {
        match self {
            CobError::Day { date, .. } | CobError::MissingFile { date, .. } => Some(*date),
            _ => None,
        }
    }

    /// Returns true for schema mismatches, including ones wrapped in a day context.
    pub fn is_format(&self) -> bool {
        match self {
            CobError::Format { .. } => true,
            CobError::Day { source, .. } => source.is_format(),
            _ => false,
        }
    }

    /// Returns true for missing raw files, including ones wrapped in a day context.
    pub fn is_missing_file(&self) -> bool {
        match self {
            CobError::MissingFile { .. } => true,
            CobError::Day { source, .. } => source.is_missing_file(),
            _ => false,
        }
    }
}

// Implement From for common error types for ergonomic error handling
impl From<std::io::Error> for CobError {
    fn from(err: std::io::Error) -> Self {
        CobError::Io(err.to_string())
    }
}

impl From<zip::result::ZipError> for CobError {
    fn from(err: zip::result::ZipError) -> Self {
        CobError::Io(format!("zip: {err}"))
    }
}

impl From<csv::Error> for CobError {
    fn from(err: csv::Error) -> Self {
        CobError::Io(format!("csv: {err}"))
    }
}

impl From<serde_json::Error> for CobError {
    fn from(err: serde_json::Error) -> Self {
        CobError::Generic(format!("JSON error: {err}"))
    }
}

#[cfg(feature = "nordpool")]
impl From<parquet::errors::ParquetError> for CobError {
    fn from(err: parquet::errors::ParquetError) -> Self {
        CobError::Io(format!("parquet: {err}"))
    }
}

impl From<String> for CobError {
    fn from(err: String) -> Self {
        CobError::Generic(err)
    }
}

impl From<&str> for CobError {
    fn from(err: &str) -> Self {
        CobError::Generic(err.to_string())
    }
}

//! Run configuration.
//!
//! Everything a run needs is checked by [`PipelineConfig::validate`] before
//! any file is touched: a bad date range or an EPEX date before 2020 fails
//! with [`CobError::Configuration`] up front instead of halfway through.
//!
//! # Example
//!
//! ```
//! use chrono::NaiveDate;
//! use cob_interval_reconstructor::{Exchange, PipelineConfig, TiePolicy};
//!
//! let config = PipelineConfig::new(
//!     Exchange::Epex,
//!     NaiveDate::from_ymd_opt(2021, 3, 1).unwrap(),
//!     NaiveDate::from_ymd_opt(2021, 3, 3).unwrap(),
//!     "/data/raw/epex",
//!     "/data/orderbook",
//! )
//! .with_tie_policy(TiePolicy::PreferLastSeen);
//!
//! config.validate().unwrap();
//! assert_eq!(config.dates().len(), 3);
//! ```

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{CobError, Result};
use crate::feeds::Exchange;
use crate::interval::TiePolicy;

/// Configuration of one reconstruction run over an inclusive date range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// First day to emit
    pub start_date: NaiveDate,

    /// Last day to emit (inclusive)
    pub end_date: NaiveDate,

    /// Root directory of the raw exchange files
    pub source_root: PathBuf,

    /// Directory receiving `orderbook_{date}.csv.zip`
    pub destination: PathBuf,

    /// Exchange whose feed is read
    pub exchange: Exchange,

    /// Log per-day progress at info level
    #[serde(default)]
    pub verbose: bool,

    /// Handling of latest-version ties in the resolver
    #[serde(default)]
    pub tie_policy: TiePolicy,

    /// Where to save the JSON run summary, if anywhere
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary_path: Option<PathBuf>,
}

impl PipelineConfig {
    /// Create a configuration with default flags.
    pub fn new(
        exchange: Exchange,
        start_date: NaiveDate,
        end_date: NaiveDate,
        source_root: impl Into<PathBuf>,
        destination: impl Into<PathBuf>,
    ) -> Self {
        Self {
            start_date,
            end_date,
            source_root: source_root.into(),
            destination: destination.into(),
            exchange,
            verbose: false,
            tie_policy: TiePolicy::default(),
            summary_path: None,
        }
    }

    /// Enable/disable verbose progress logging.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Set tie handling policy.
    pub fn with_tie_policy(mut self, policy: TiePolicy) -> Self {
        self.tie_policy = policy;
        self
    }

    /// Save a JSON run summary to `path` when the run completes.
    pub fn with_summary_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.summary_path = Some(path.into());
        self
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// `Configuration` if the start is after the end, a path is empty, or the
    /// exchange has no supported format for the start date.
    pub fn validate(&self) -> Result<()> {
        if self.start_date > self.end_date {
            return Err(CobError::Configuration(format!(
                "start date {} is after end date {}",
                self.start_date, self.end_date
            )));
        }
        if self.source_root.as_os_str().is_empty() {
            return Err(CobError::Configuration("source root is empty".to_string()));
        }
        if self.destination.as_os_str().is_empty() {
            return Err(CobError::Configuration("destination is empty".to_string()));
        }
        // Formats only ever start at a year boundary, so checking the
        // first day covers the whole range.
        self.exchange.format_for(self.start_date)?;
        Ok(())
    }

    /// Every date of the range, in order.
    pub fn dates(&self) -> Vec<NaiveDate> {
        self.start_date
            .iter_days()
            .take_while(|d| *d <= self.end_date)
            .collect()
    }

    /// Save to JSON file.
    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load from JSON file.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

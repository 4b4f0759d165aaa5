//! Day-level source abstraction for raw order events.
//!
//! The pipeline only ever asks one question of its input: "give me the
//! normalized events for this calendar day". This module provides the trait
//! for that question, the batch type it answers with, and an in-memory
//! implementation for tests and replay of already-parsed data.
//!
//! # Example
//!
//! ```
//! use chrono::{NaiveDate, TimeZone, Utc};
//! use cob_interval_reconstructor::source::{DaySource, VecSource};
//! use cob_interval_reconstructor::{Action, RawOrderEvent, Side};
//!
//! let day = NaiveDate::from_ymd_opt(2021, 6, 1).unwrap();
//! let t0 = Utc.with_ymd_and_hms(2021, 6, 1, 9, 0, 0).unwrap();
//!
//! let mut source = VecSource::new();
//! source.insert(day, vec![RawOrderEvent::new(1, 1, Action::Add, Side::Buy, t0)]);
//!
//! let batch = source.load_day(day).unwrap();
//! assert_eq!(batch.events.len(), 1);
//! ```
//!
//! # Implementing Custom Sources
//!
//! ```ignore
//! use cob_interval_reconstructor::source::{DaySource, FeedBatch};
//!
//! struct ArchiveSource { /* ... */ }
//!
//! impl DaySource for ArchiveSource {
//!     fn load_day(&self, date: NaiveDate) -> Result<FeedBatch> {
//!         // locate, parse and normalize the day's raw file
//!     }
//! }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;

use crate::error::{CobError, Result};
use crate::feeds::FeedFormat;
use crate::statistics::FeedStats;
use crate::types::RawOrderEvent;

// ============================================================================
// Feed Metadata
// ============================================================================

/// Where a batch of events came from.
///
/// Carried alongside the events so that errors and logs can name the
/// date, format and files involved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedMetadata {
    /// Format the files were parsed with (`None` for in-memory sources)
    pub format: Option<FeedFormat>,

    /// Calendar date the files were requested for
    pub date: Option<NaiveDate>,

    /// Files the events were read from
    pub files: Vec<PathBuf>,
}

impl FeedMetadata {
    /// Create new empty metadata.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the format.
    pub fn with_format(mut self, format: FeedFormat) -> Self {
        self.format = Some(format);
        self
    }

    /// Set the date.
    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    /// Add a file path.
    pub fn with_file(mut self, path: impl AsRef<Path>) -> Self {
        self.files.push(path.as_ref().to_path_buf());
        self
    }

    /// Whether rows with non-positive quantity are removed after resolution.
    pub fn drops_non_positive_quantity(&self) -> bool {
        self.format
            .map_or(false, |format| format.drops_non_positive_quantity())
    }
}

// ============================================================================
// Feed Batch
// ============================================================================

/// Normalized events of one raw day, sorted by transaction time.
#[derive(Debug, Clone, Default)]
pub struct FeedBatch {
    pub events: Vec<RawOrderEvent>,
    pub stats: FeedStats,
    pub metadata: FeedMetadata,
}

impl FeedBatch {
    /// Wrap already-normalized events, sorting them by transaction time.
    ///
    /// The sort is stable, so feed order breaks ties.
    pub fn new(mut events: Vec<RawOrderEvent>, metadata: FeedMetadata) -> Self {
        events.sort_by_key(|e| e.transaction_time);
        let stats = FeedStats {
            rows_read: events.len() as u64,
            events_emitted: events.len() as u64,
            ..Default::default()
        };
        Self {
            events,
            stats,
            metadata,
        }
    }

    /// Number of events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// True if the batch holds no events.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

// ============================================================================
// Source Trait
// ============================================================================

/// Anything that can produce one calendar day's normalized events.
pub trait DaySource {
    /// Load, parse and normalize the events recorded for `date`.
    ///
    /// # Errors
    ///
    /// `MissingFile` if no raw data exists for the date, `Format` if the raw
    /// data does not match its schema.
    fn load_day(&self, date: NaiveDate) -> Result<FeedBatch>;
}

impl<S: DaySource + ?Sized> DaySource for &S {
    fn load_day(&self, date: NaiveDate) -> Result<FeedBatch> {
        (**self).load_day(date)
    }
}

// ============================================================================
// In-memory source
// ============================================================================

/// In-memory source keyed by date.
///
/// Useful for tests and for replaying events that were parsed elsewhere.
/// Requesting a date that was never inserted yields `MissingFile`.
#[derive(Debug, Clone, Default)]
pub struct VecSource {
    days: BTreeMap<NaiveDate, Vec<RawOrderEvent>>,
    format: Option<FeedFormat>,
}

impl VecSource {
    /// Create an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Tag batches with a format, enabling its post-resolution filters.
    pub fn with_format(mut self, format: FeedFormat) -> Self {
        self.format = Some(format);
        self
    }

    /// Set the events for a date, replacing previous ones.
    pub fn insert(&mut self, date: NaiveDate, events: Vec<RawOrderEvent>) {
        self.days.insert(date, events);
    }

    /// Number of dates held.
    pub fn len(&self) -> usize {
        self.days.len()
    }

    /// True if no dates are held.
    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }
}

impl DaySource for VecSource {
    fn load_day(&self, date: NaiveDate) -> Result<FeedBatch> {
        let events = self.days.get(&date).ok_or_else(|| CobError::MissingFile {
            variant: "memory".to_string(),
            date,
            path: PathBuf::new(),
        })?;

        let mut metadata = FeedMetadata::new().with_date(date);
        metadata.format = self.format;
        Ok(FeedBatch::new(events.clone(), metadata))
    }
}

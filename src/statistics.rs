//! Counters for feed normalization, resolution and day emission.
//!
//! Every stage reports what it kept and what it dropped so that a run can be
//! audited without re-parsing the raw files. Orphaned Change/Delete events
//! show up here, never as errors.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// What a feed adapter did to one raw file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedStats {
    /// Data rows read from the file(s)
    pub rows_read: u64,

    /// Exact duplicates on the business key
    pub duplicates_dropped: u64,

    /// Rows outside hourly, non-block, non-OTC products
    pub products_dropped: u64,

    /// Rows with an action code other than Add/Change/Delete/Iceberg
    pub actions_dropped: u64,

    /// Events handed to the iceberg filter
    pub events_emitted: u64,
}

impl FeedStats {
    /// Fold another file's counters into this one.
    pub fn merge(&mut self, other: &FeedStats) {
        self.rows_read += other.rows_read;
        self.duplicates_dropped += other.duplicates_dropped;
        self.products_dropped += other.products_dropped;
        self.actions_dropped += other.actions_dropped;
        self.events_emitted += other.events_emitted;
    }
}

/// What the iceberg filter and validity resolver did to one day's events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveStats {
    /// Distinct lineages carrying an iceberg marker
    pub iceberg_lineages: u64,

    /// Events removed because their lineage is an iceberg order
    pub iceberg_events_dropped: u64,

    /// Events entering resolution
    pub events_in: u64,

    /// Change events promoted to active versions
    pub changes_promoted: u64,

    /// Change events whose order id never had an active version
    pub orphan_changes: u64,

    /// Delete events that closed an active version
    pub deletes_applied: u64,

    /// Delete events whose order id never had an active version
    pub orphan_deletes: u64,

    /// Number of fixpoint passes over pending Change events
    pub change_passes: u64,

    /// Latest-version ties resolved by feed order instead of failing
    pub ties_resolved: u64,

    /// Intervals whose close preceded their start, clamped to zero length
    pub intervals_clamped: u64,

    /// Rows removed for non-positive quantity
    pub non_positive_dropped: u64,

    /// Intervals produced
    pub intervals_out: u64,
}

/// Everything recorded for one emitted calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayStats {
    /// The emitted day
    pub date: NaiveDate,

    /// Normalization counters of this day's own feed
    pub feed: FeedStats,

    /// Resolution counters of this day's own feed
    pub resolve: ResolveStats,

    /// Rows in the emitted partition
    pub rows_written: u64,

    /// Rows of the partition contributed by the next day's feed
    pub rows_from_lookahead: u64,

    /// Rows dropped at assembly for an iceberg lineage marked in the window
    #[serde(default)]
    pub iceberg_rows_dropped: u64,

    /// Copies of one version found in both days, merged into one row
    #[serde(default)]
    pub duplicates_collapsed: u64,
}

impl DayStats {
    /// Create empty statistics for a day.
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            feed: FeedStats::default(),
            resolve: ResolveStats::default(),
            rows_written: 0,
            rows_from_lookahead: 0,
            iceberg_rows_dropped: 0,
            duplicates_collapsed: 0,
        }
    }
}

/// Per-day statistics of a whole run, exportable as JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub days: Vec<DayStats>,
}

impl RunSummary {
    /// Create an empty summary.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one emitted day.
    pub fn push(&mut self, day: DayStats) {
        self.days.push(day);
    }

    /// Total rows written over all days.
    pub fn total_rows(&self) -> u64 {
        self.days.iter().map(|d| d.rows_written).sum()
    }

    /// Total orphaned Change and Delete events over all days.
    pub fn total_orphans(&self) -> u64 {
        self.days
            .iter()
            .map(|d| d.resolve.orphan_changes + d.resolve.orphan_deletes)
            .sum()
    }

    /// Save to JSON file.
    pub fn save_json(&self, path: impl AsRef<std::path::Path>) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        std::fs::write(path, json)
    }

    /// Load from JSON file.
    pub fn load_json(path: impl AsRef<std::path::Path>) -> std::io::Result<Self> {
        let json = std::fs::read_to_string(path)?;
        serde_json::from_str(&json).map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
    }
}

// ============================================================================
// Tests
// ============================================================================

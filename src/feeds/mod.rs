//! Exchange feed adapters.
//!
//! Each supported raw schema gets one [`FeedAdapter`] implementation that
//! knows where its files live, how its columns are named and which literal
//! codes it uses. All adapters produce the same [`RawOrderEvent`] stream:
//!
//! - exact duplicates on (order id, initial id, action, validity, price,
//!   quantity) removed, first occurrence kept
//! - only hourly, non-block, non-OTC products
//! - only Add/Change/Delete/IcebergMarker actions
//! - timestamps in UTC with sub-second precision
//! - stably sorted by transaction time
//!
//! | Format | Exchange | Dates | File |
//! |--------|----------|-------|------|
//! | [`FeedFormat::EpexLegacy`] | EPEX | 2020 | `{root}/YYYY/MM/*Continuous_Orders_DE_YYYYMMDD*.zip` |
//! | [`FeedFormat::EpexCurrent`] | EPEX | 2021+ | `{root}/YYYY/MM/*Continuous_Orders-DE-YYYYMMDD*.zip` |
//! | [`FeedFormat::NordPool`] | NordPool | any | `{root}/YYYY/MM/DD/NordPool_*.parquet` |

pub mod epex;
pub mod nordpool;

use std::fmt;
use std::path::{Path, PathBuf};

use ahash::AHashSet;
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{CobError, Result};
use crate::source::{DaySource, FeedBatch, FeedMetadata};
use crate::statistics::FeedStats;
use crate::types::{DedupKey, OrderId, RawOrderEvent};

pub use epex::EpexAdapter;
pub use nordpool::{NordPoolAdapter, NordPoolRow};

/// First year EPEX files are supported for.
pub const EPEX_FIRST_YEAR: i32 = 2020;

// ============================================================================
// Exchange / format selection
// ============================================================================

/// Exchange whose order book feed is being processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Exchange {
    Epex,
    NordPool,
}

impl Exchange {
    /// Raw file format used by this exchange on `date`.
    ///
    /// # Errors
    ///
    /// `Configuration` for EPEX dates before 2020.
    pub fn format_for(self, date: NaiveDate) -> Result<FeedFormat> {
        match self {
            Exchange::Epex if date.year() < EPEX_FIRST_YEAR => Err(CobError::Configuration(
                format!("EPEX dates before {EPEX_FIRST_YEAR} are not supported: {date}"),
            )),
            Exchange::Epex if date.year() == EPEX_FIRST_YEAR => Ok(FeedFormat::EpexLegacy),
            Exchange::Epex => Ok(FeedFormat::EpexCurrent),
            Exchange::NordPool => Ok(FeedFormat::NordPool),
        }
    }

    /// Parse a user-supplied exchange name (case-insensitive).
    pub fn parse(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "epex" => Ok(Exchange::Epex),
            "nordpool" => Ok(Exchange::NordPool),
            other => Err(CobError::Configuration(format!(
                "unknown exchange {other:?}, expected \"epex\" or \"nordpool\""
            ))),
        }
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Exchange::Epex => f.write_str("epex"),
            Exchange::NordPool => f.write_str("nordpool"),
        }
    }
}

/// One concrete raw schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeedFormat {
    /// EPEX files of 2020 (`;`-separated, spaced column names)
    EpexLegacy,
    /// EPEX files from 2021 on (`,`-separated, preamble line)
    EpexCurrent,
    /// NordPool parquet parts
    NordPool,
}

impl FeedFormat {
    /// Short name used in errors and logs.
    pub fn name(self) -> &'static str {
        match self {
            FeedFormat::EpexLegacy => "epex-2020",
            FeedFormat::EpexCurrent => "epex-2021",
            FeedFormat::NordPool => "nordpool",
        }
    }

    /// Whether rows with quantity ≤ 0 are removed after resolution.
    pub fn drops_non_positive_quantity(self) -> bool {
        matches!(self, FeedFormat::NordPool)
    }

    /// The adapter implementing this format.
    pub fn adapter(self) -> Box<dyn FeedAdapter> {
        match self {
            FeedFormat::EpexLegacy => Box::new(EpexAdapter::legacy()),
            FeedFormat::EpexCurrent => Box::new(EpexAdapter::current()),
            FeedFormat::NordPool => Box::new(NordPoolAdapter::new()),
        }
    }
}

impl fmt::Display for FeedFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Adapter trait
// ============================================================================

/// Parses one exchange's raw files into normalized events.
pub trait FeedAdapter {
    /// The format this adapter implements.
    fn format(&self) -> FeedFormat;

    /// Raw file(s) holding the events of `date` under `root`.
    fn locate(&self, root: &Path, date: NaiveDate) -> Result<Vec<PathBuf>>;

    /// Parse one raw file.
    fn parse(&self, path: &Path) -> Result<FeedBatch>;

    /// Locate and parse every file of `date`, merged into one sorted batch.
    fn load_day(&self, root: &Path, date: NaiveDate) -> Result<FeedBatch> {
        let files = self.locate(root, date)?;
        let mut stats = FeedStats::default();
        let mut events = Vec::new();
        let mut metadata = FeedMetadata::new()
            .with_format(self.format())
            .with_date(date);

        for file in &files {
            let batch = self.parse(file)?;
            stats.merge(&batch.stats);
            events.extend(batch.events);
            metadata = metadata.with_file(file);
        }

        // Parts are deduplicated and sorted individually; redo both across parts.
        let mut collector = EventCollector::with_capacity(events.len());
        collector.stats = stats;
        collector.stats.events_emitted = 0;
        for event in events {
            collector.push(event);
        }
        let (events, stats) = collector.finish();

        log::info!(
            "{} {}: {} events from {} file(s) ({} rows read, {} duplicates dropped)",
            self.format(),
            date,
            events.len(),
            files.len(),
            stats.rows_read,
            stats.duplicates_dropped
        );

        Ok(FeedBatch {
            events,
            stats,
            metadata,
        })
    }
}

// ============================================================================
// Exchange-backed day source
// ============================================================================

/// [`DaySource`] reading an exchange's raw files from a root directory.
///
/// Picks the adapter per date, so an EPEX range spanning 2020 and 2021
/// switches from the legacy to the current schema at the year boundary.
#[derive(Debug, Clone)]
pub struct ExchangeSource {
    exchange: Exchange,
    root: PathBuf,
}

impl ExchangeSource {
    /// Create a source for `exchange` files under `root`.
    pub fn new(exchange: Exchange, root: impl Into<PathBuf>) -> Self {
        Self {
            exchange,
            root: root.into(),
        }
    }

    /// The exchange being read.
    pub fn exchange(&self) -> Exchange {
        self.exchange
    }

    /// The source root.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl DaySource for ExchangeSource {
    fn load_day(&self, date: NaiveDate) -> Result<FeedBatch> {
        let format = self.exchange.format_for(date)?;
        format.adapter().load_day(&self.root, date)
    }
}

// ============================================================================
// Shared normalization
// ============================================================================

/// Parse an exchange order id; integral floats (`"123.0"`) are accepted.
pub(crate) fn parse_order_id(raw: &str) -> Option<OrderId> {
    let raw = raw.trim();
    if let Ok(id) = raw.parse::<OrderId>() {
        return Some(id);
    }
    let value = raw.parse::<f64>().ok()?;
    (value.fract() == 0.0 && value.abs() < 9.0e15).then_some(value as OrderId)
}

/// Accumulates adapter output: drops duplicates, counts, sorts.
#[derive(Debug, Default)]
pub(crate) struct EventCollector {
    seen: AHashSet<DedupKey>,
    events: Vec<RawOrderEvent>,
    pub(crate) stats: FeedStats,
}

impl EventCollector {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            seen: AHashSet::with_capacity(capacity),
            events: Vec::with_capacity(capacity),
            stats: FeedStats::default(),
        }
    }

    /// Keep `event` unless an identical business key was already kept.
    pub(crate) fn push(&mut self, event: RawOrderEvent) {
        if self.seen.insert(event.dedup_key()) {
            self.events.push(event);
        } else {
            self.stats.duplicates_dropped += 1;
        }
    }

    /// Sorted events plus final counters.
    pub(crate) fn finish(mut self) -> (Vec<RawOrderEvent>, FeedStats) {
        self.events.sort_by_key(|e| e.transaction_time);
        self.stats.events_emitted = self.events.len() as u64;
        (self.events, self.stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Action, Side};
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_epex_format_by_year() {
        let d2019 = NaiveDate::from_ymd_opt(2019, 12, 31).unwrap();
        let d2020 = NaiveDate::from_ymd_opt(2020, 12, 31).unwrap();
        let d2021 = NaiveDate::from_ymd_opt(2021, 1, 1).unwrap();

        assert!(matches!(
            Exchange::Epex.format_for(d2019),
            Err(CobError::Configuration(_))
        ));
        assert_eq!(Exchange::Epex.format_for(d2020).unwrap(), FeedFormat::EpexLegacy);
        assert_eq!(Exchange::Epex.format_for(d2021).unwrap(), FeedFormat::EpexCurrent);
        assert_eq!(Exchange::NordPool.format_for(d2019).unwrap(), FeedFormat::NordPool);
    }

    #[test]
    fn test_exchange_parse() {
        assert_eq!(Exchange::parse("EPEX").unwrap(), Exchange::Epex);
        assert_eq!(Exchange::parse("nordpool").unwrap(), Exchange::NordPool);
        assert!(Exchange::parse("nasdaq").is_err());
        assert_eq!(Exchange::NordPool.to_string(), "nordpool");
    }

    #[test]
    fn test_adapter_for_format() {
        for format in [FeedFormat::EpexLegacy, FeedFormat::EpexCurrent, FeedFormat::NordPool] {
            assert_eq!(format.adapter().format(), format);
        }
        assert!(FeedFormat::NordPool.drops_non_positive_quantity());
        assert!(!FeedFormat::EpexCurrent.drops_non_positive_quantity());
    }

    #[test]
    fn test_collector_dedups_and_sorts() {
        let t0 = Utc.with_ymd_and_hms(2021, 1, 1, 10, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2021, 1, 1, 9, 0, 0).unwrap();

        let mut collector = EventCollector::default();
        collector.push(RawOrderEvent::new(1, 1, Action::Add, Side::Buy, t0));
        // same business key, different transaction time: duplicate
        collector.push(RawOrderEvent::new(1, 1, Action::Add, Side::Buy, t1));
        collector.push(RawOrderEvent::new(2, 2, Action::Add, Side::Sell, t1));

        let (events, stats) = collector.finish();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].order_id, 2);
        assert_eq!(stats.duplicates_dropped, 1);
        assert_eq!(stats.events_emitted, 2);
    }

    #[test]
    fn test_parse_order_id() {
        assert_eq!(parse_order_id("12345"), Some(12345));
        assert_eq!(parse_order_id(" 42.0 "), Some(42));
        assert_eq!(parse_order_id("42.5"), None);
        assert_eq!(parse_order_id(""), None);
    }

    #[test]
    fn test_exchange_source_rejects_early_epex() {
        let source = ExchangeSource::new(Exchange::Epex, "/nonexistent");
        let err = source
            .load_day(NaiveDate::from_ymd_opt(2019, 5, 5).unwrap())
            .unwrap_err();
        assert!(matches!(err, CobError::Configuration(_)));
    }
}

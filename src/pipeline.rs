//! Date-range driver.
//!
//! For each requested day, in order:
//!
//! 1. load and normalize the day's raw feed ([`DaySource`])
//! 2. drop iceberg lineages and resolve intervals ([`resolve_day`])
//! 3. do the same for the next day, if it is in range (lookahead)
//! 4. cut the day's partition from both ([`DayWindow::assemble`])
//! 5. write it atomically ([`DayStore::write`])
//!
//! The lookahead day moves into the current slot when the window advances,
//! so each raw day is loaded and resolved exactly once per run. The last day
//! of the range is emitted from its own feed alone.
//!
//! Any failure stops the run; the error is wrapped in [`CobError::Day`]
//! naming the day being loaded or written. Days emitted before the failure
//! stay on disk, the failing day leaves no file.

use chrono::NaiveDate;

use crate::config::PipelineConfig;
use crate::error::{CobError, Result};
use crate::feeds::ExchangeSource;
use crate::interval::{resolve_day, DayWindow, ResolvedDay};
use crate::source::DaySource;
use crate::statistics::{DayStats, RunSummary};
use crate::store::DayStore;

/// Runs the full reconstruction over a date range.
#[derive(Debug)]
pub struct Pipeline<S: DaySource> {
    config: PipelineConfig,
    source: S,
    store: DayStore,
}

impl Pipeline<ExchangeSource> {
    /// Pipeline reading the configured exchange's files from disk.
    ///
    /// # Errors
    ///
    /// `Configuration` if the configuration does not validate.
    pub fn from_config(config: PipelineConfig) -> Result<Self> {
        let source = ExchangeSource::new(config.exchange, config.source_root.clone());
        Self::with_source(config, source)
    }
}

impl<S: DaySource> Pipeline<S> {
    /// Pipeline over an arbitrary day source.
    ///
    /// `config.source_root` and `config.exchange` are not used to read data
    /// here; the source decides where events come from.
    ///
    /// # Errors
    ///
    /// `Configuration` if the configuration does not validate.
    pub fn with_source(config: PipelineConfig, source: S) -> Result<Self> {
        config.validate()?;
        let store = DayStore::new(&config.destination);
        Ok(Self {
            config,
            source,
            store,
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Get the output store.
    pub fn store(&self) -> &DayStore {
        &self.store
    }

    /// Emit every day of the range.
    pub fn run(&self) -> Result<RunSummary> {
        let dates = self.config.dates();
        let mut window = DayWindow::new();
        let mut summary = RunSummary::new();

        log::info!(
            "Reconstructing {} day(s) of {} from {} to {}",
            dates.len(),
            self.config.exchange,
            self.config.start_date,
            self.config.end_date
        );

        for (i, &date) in dates.iter().enumerate() {
            if window.current_date() != Some(date) {
                window.set_current(self.resolve(date)?);
            }
            if let Some(&next) = dates.get(i + 1) {
                window
                    .set_lookahead(self.resolve(next)?)
                    .map_err(|e| e.on_day(next))?;
            }

            let partition = window.assemble().map_err(|e| e.on_day(date))?;
            self.store.write(&partition).map_err(|e| e.on_day(date))?;

            let mut stats = DayStats::new(date);
            if let Some(current) = window.current() {
                stats.feed = current.feed.clone();
                stats.resolve = current.resolve.clone();
            }
            stats.rows_written = partition.rows.len() as u64;
            stats.rows_from_lookahead = partition.rows_from_lookahead;
            stats.iceberg_rows_dropped = partition.iceberg_rows_dropped;
            stats.duplicates_collapsed = partition.duplicates_collapsed;

            log::info!(
                "Day {} ({}/{}): {} rows, {} from lookahead, {} orphan changes, {} orphan deletes",
                date,
                i + 1,
                dates.len(),
                stats.rows_written,
                stats.rows_from_lookahead,
                stats.resolve.orphan_changes,
                stats.resolve.orphan_deletes
            );

            summary.push(stats);
            window.advance();
        }

        if let Some(path) = &self.config.summary_path {
            summary.save_json(path).map_err(|e| {
                CobError::Io(format!("Failed to save summary {}: {}", path.display(), e))
            })?;
        }

        log::info!(
            "Finished: {} day(s), {} rows, {} orphans",
            summary.days.len(),
            summary.total_rows(),
            summary.total_orphans()
        );
        Ok(summary)
    }

    /// Load and resolve one raw day.
    fn resolve(&self, date: NaiveDate) -> Result<ResolvedDay> {
        let batch = self.source.load_day(date).map_err(|e| e.on_day(date))?;
        resolve_day(date, batch, self.config.tie_policy).map_err(|e| e.on_day(date))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feeds::Exchange;
    use crate::source::{FeedBatch, VecSource};
    use crate::types::{Action, RawOrderEvent, Side};
    use chrono::{DateTime, TimeZone, Utc};
    use std::cell::RefCell;
    use std::collections::BTreeMap;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2021, 6, d).unwrap()
    }

    fn at(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 6, d, h, 0, 0).unwrap()
    }

    /// Counts loads per date.
    struct CountingSource {
        inner: VecSource,
        loads: RefCell<BTreeMap<NaiveDate, u32>>,
    }

    impl DaySource for CountingSource {
        fn load_day(&self, date: NaiveDate) -> Result<FeedBatch> {
            *self.loads.borrow_mut().entry(date).or_default() += 1;
            self.inner.load_day(date)
        }
    }

    #[test]
    fn test_each_day_loaded_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut inner = VecSource::new();
        for d in 1..=4 {
            inner.insert(
                date(d),
                vec![RawOrderEvent::new(d as i64, d as i64, Action::Add, Side::Buy, at(d, 10))],
            );
        }
        let source = CountingSource {
            inner,
            loads: RefCell::new(BTreeMap::new()),
        };

        let config = PipelineConfig::new(Exchange::Epex, date(1), date(4), "/unused", dir.path());
        let pipeline = Pipeline::with_source(config, &source).unwrap();
        let summary = pipeline.run().unwrap();

        assert_eq!(summary.days.len(), 4);
        assert_eq!(summary.total_rows(), 4);
        assert!(source.loads.borrow().values().all(|&n| n == 1));
        // day 5 is past the range and never requested
        assert_eq!(source.loads.borrow().len(), 4);
    }

    #[test]
    fn test_failure_names_the_day() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = VecSource::new();
        source.insert(date(1), Vec::new());

        let config = PipelineConfig::new(Exchange::Epex, date(1), date(2), "/unused", dir.path());
        let err = Pipeline::with_source(config, source).unwrap().run().unwrap_err();

        assert!(err.is_missing_file());
        assert_eq!(err.date(), Some(date(2)));
        // day 1 needs day 2 as lookahead, so nothing was written
        assert!(!dir.path().join("orderbook_2021-06-01.csv.zip").exists());
    }

    #[test]
    fn test_lookahead_iceberg_marker_excludes_lineage() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = VecSource::new();
        source.insert(
            date(1),
            vec![
                RawOrderEvent::new(1, 100, Action::Add, Side::Buy, at(1, 10)),
                RawOrderEvent::new(3, 300, Action::Add, Side::Buy, at(1, 11)),
            ],
        );
        // lineage 100 is only flagged in the next day's feed
        source.insert(
            date(2),
            vec![RawOrderEvent::new(1, 100, Action::IcebergMarker, Side::Buy, at(2, 0))],
        );

        let config = PipelineConfig::new(Exchange::Epex, date(1), date(2), "/unused", dir.path());
        let pipeline = Pipeline::with_source(config, source).unwrap();
        let summary = pipeline.run().unwrap();

        let csv = pipeline.store().read_csv(date(1)).unwrap();
        assert!(!csv.lines().any(|line| line.starts_with("100,")));
        assert!(csv.lines().any(|line| line.starts_with("300,")));
        assert_eq!(summary.days[0].iceberg_rows_dropped, 1);
    }

    #[test]
    fn test_version_in_both_feeds_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let add = RawOrderEvent::new(2, 200, Action::Add, Side::Sell, at(1, 23));
        let mut source = VecSource::new();
        source.insert(date(1), vec![add.clone()]);
        source.insert(
            date(2),
            vec![add, RawOrderEvent::new(2, 200, Action::Delete, Side::Sell, at(2, 1))],
        );

        let config = PipelineConfig::new(Exchange::Epex, date(1), date(2), "/unused", dir.path());
        let pipeline = Pipeline::with_source(config, source).unwrap();
        let summary = pipeline.run().unwrap();

        let csv = pipeline.store().read_csv(date(1)).unwrap();
        let rows: Vec<&str> = csv.lines().skip(1).collect();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].contains("2021-06-02T01:00:00.000Z"));
        assert_eq!(summary.days[0].duplicates_collapsed, 1);
        assert_eq!(summary.days[0].rows_from_lookahead, 1);
    }

    #[test]
    fn test_invalid_config_rejected_before_io() {
        let config = PipelineConfig::new(Exchange::Epex, date(3), date(1), "/unused", "/unused");
        let err = Pipeline::with_source(config, VecSource::new()).unwrap_err();
        assert!(matches!(err, CobError::Configuration(_)));
    }
}

//! Day-window assembly with a one-day lookahead.
//!
//! A Change or Delete recorded in day `d+1`'s feed can still close a version
//! that went live on day `d`. Day `d`'s partition is therefore cut from the
//! union of `d`'s and `d+1`'s resolved intervals:
//!
//! ```text
//!   resolved(d) ∪ resolved(d+1)  ──sort by tx──▶  keep tx.date == d  ──▶  partition(d)
//! ```
//!
//! Two rules keep the union well formed:
//!
//! | Rule | Effect |
//! |------|--------|
//! | Iceberg exclusion | rows of a lineage marked in either day's raw feed are dropped |
//! | Version collapse | rows sharing `(initial_id, transaction_time)` become one row |
//!
//! A version shipped with both feeds appears in both resolved sets, possibly
//! closed in one and still open in the other. Every Change or Delete can only
//! shorten a version, so the copy with the earliest `validity_time` is kept
//! (an open copy counts as latest). On equal validity the lookahead copy wins.
//!
//! [`DayWindow`] is the caller-owned buffer of the two resolved days. When
//! the caller advances, the lookahead slot moves into the current slot, so
//! every day is resolved exactly once per run.

use ahash::{AHashMap, AHashSet};
use chrono::{DateTime, NaiveDate, Utc};

use super::ResolvedDay;
use crate::error::{CobError, Result};
use crate::types::{OrderId, OrderInterval};

/// One emitted calendar day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayPartition {
    pub date: NaiveDate,

    /// Rows that went live on `date`, sorted by transaction time
    pub rows: Vec<OrderInterval>,

    /// How many of `rows` came from the lookahead day's feed
    pub rows_from_lookahead: u64,

    /// Rows dropped because their lineage is an iceberg order in the window
    pub iceberg_rows_dropped: u64,

    /// Rows merged into another copy of the same version
    pub duplicates_collapsed: u64,
}

impl DayPartition {
    /// Partition holding `rows` as given, with zeroed counters.
    pub fn new(date: NaiveDate, rows: Vec<OrderInterval>) -> Self {
        Self {
            date,
            rows,
            rows_from_lookahead: 0,
            iceberg_rows_dropped: 0,
            duplicates_collapsed: 0,
        }
    }
}

/// True if `candidate` ends before `kept`; an open interval ends last.
fn closes_earlier(candidate: &OrderInterval, kept: &OrderInterval) -> bool {
    match (candidate.validity_time, kept.validity_time) {
        (Some(c), Some(k)) => c < k,
        (Some(_), None) => true,
        (None, _) => false,
    }
}

/// Cut the partition of `date` from its own and the next day's intervals.
///
/// Rows whose `initial_id` is in `icebergs` are dropped. The union is sorted
/// stably, so on equal transaction times rows keep the order in which their
/// version was first seen, `current` before `lookahead`.
pub fn assemble_day(
    date: NaiveDate,
    current: &[OrderInterval],
    lookahead: Option<&[OrderInterval]>,
    icebergs: &AHashSet<OrderId>,
) -> DayPartition {
    let mut tagged: Vec<(&OrderInterval, bool)> = Vec::with_capacity(current.len());
    let mut slots: AHashMap<(OrderId, DateTime<Utc>), usize> =
        AHashMap::with_capacity(current.len());
    let mut iceberg_rows_dropped = 0u64;
    let mut duplicates_collapsed = 0u64;

    let candidates = current
        .iter()
        .map(|row| (row, false))
        .chain(lookahead.into_iter().flatten().map(|row| (row, true)));

    for (row, ahead) in candidates {
        if row.transaction_date() != date {
            continue;
        }
        if icebergs.contains(&row.initial_id) {
            iceberg_rows_dropped += 1;
            continue;
        }

        match slots.get(&(row.initial_id, row.transaction_time)) {
            Some(&slot) => {
                duplicates_collapsed += 1;
                let kept = tagged[slot].0;
                let replace = closes_earlier(row, kept)
                    || (ahead && row.validity_time == kept.validity_time);
                if replace {
                    tagged[slot] = (row, ahead);
                }
            }
            None => {
                slots.insert((row.initial_id, row.transaction_time), tagged.len());
                tagged.push((row, ahead));
            }
        }
    }

    if iceberg_rows_dropped > 0 || duplicates_collapsed > 0 {
        log::debug!(
            "Day {}: {} iceberg rows dropped, {} duplicate versions collapsed",
            date,
            iceberg_rows_dropped,
            duplicates_collapsed
        );
    }

    tagged.sort_by_key(|(row, _)| row.transaction_time);

    let rows_from_lookahead = tagged.iter().filter(|(_, ahead)| *ahead).count() as u64;
    DayPartition {
        date,
        rows: tagged.into_iter().map(|(row, _)| row.clone()).collect(),
        rows_from_lookahead,
        iceberg_rows_dropped,
        duplicates_collapsed,
    }
}

/// Sliding buffer of at most two resolved days.
#[derive(Debug, Default)]
pub struct DayWindow {
    current: Option<ResolvedDay>,
    lookahead: Option<ResolvedDay>,
}

impl DayWindow {
    /// Create an empty window.
    pub fn new() -> Self {
        Self::default()
    }

    /// Date held in the current slot.
    pub fn current_date(&self) -> Option<NaiveDate> {
        self.current.as_ref().map(|day| day.date)
    }

    /// Date held in the lookahead slot.
    pub fn lookahead_date(&self) -> Option<NaiveDate> {
        self.lookahead.as_ref().map(|day| day.date)
    }

    /// The resolved day in the current slot.
    pub fn current(&self) -> Option<&ResolvedDay> {
        self.current.as_ref()
    }

    /// Fill the current slot, discarding anything held.
    pub fn set_current(&mut self, day: ResolvedDay) {
        self.current = Some(day);
        self.lookahead = None;
    }

    /// Fill the lookahead slot.
    ///
    /// # Errors
    ///
    /// `Generic` unless `day` is the day right after the current one.
    pub fn set_lookahead(&mut self, day: ResolvedDay) -> Result<()> {
        let current = self
            .current_date()
            .ok_or_else(|| CobError::generic("lookahead set on an empty day window"))?;
        if current.succ_opt() != Some(day.date) {
            return Err(CobError::generic(format!(
                "lookahead {} does not follow {}",
                day.date, current
            )));
        }
        self.lookahead = Some(day);
        Ok(())
    }

    /// Partition of the current day, completed with the lookahead if held.
    ///
    /// Iceberg lineages of both held days are excluded.
    ///
    /// # Errors
    ///
    /// `Generic` if the current slot is empty.
    pub fn assemble(&self) -> Result<DayPartition> {
        let current = self
            .current
            .as_ref()
            .ok_or_else(|| CobError::generic("nothing to assemble in an empty day window"))?;
        let lookahead = self.lookahead.as_ref();

        let mut icebergs = current.iceberg_lineages.clone();
        if let Some(next) = lookahead {
            icebergs.extend(next.iceberg_lineages.iter().copied());
        }

        Ok(assemble_day(
            current.date,
            &current.intervals,
            lookahead.map(|day| day.intervals.as_slice()),
            &icebergs,
        ))
    }

    /// Slide forward one day: the lookahead becomes current.
    ///
    /// Returns the day that left the window.
    pub fn advance(&mut self) -> Option<ResolvedDay> {
        let emitted = self.current.take();
        self.current = self.lookahead.take();
        emitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statistics::{FeedStats, ResolveStats};
    use crate::types::Side;
    use chrono::{DateTime, TimeZone, Utc};
    use rust_decimal::Decimal;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2021, 6, day).unwrap()
    }

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 6, day, hour, 0, 0).unwrap()
    }

    fn row(initial: i64, tx: DateTime<Utc>, validity: Option<DateTime<Utc>>) -> OrderInterval {
        OrderInterval {
            initial_id: initial,
            side: Side::Sell,
            delivery_start: tx,
            transaction_time: tx,
            validity_time: validity,
            price: Decimal::new(40, 0),
            quantity: Decimal::new(1, 0),
        }
    }

    fn resolved(day: u32, intervals: Vec<OrderInterval>) -> ResolvedDay {
        ResolvedDay {
            date: date(day),
            intervals,
            iceberg_lineages: AHashSet::new(),
            feed: FeedStats::default(),
            resolve: ResolveStats::default(),
        }
    }

    #[test]
    fn test_assemble_takes_lookahead_rows_of_the_day() {
        let current = vec![row(1, at(1, 12), None), row(2, at(1, 8), Some(at(1, 9)))];
        // order added on day 1, closed by a message of day 2
        let lookahead = vec![row(3, at(1, 23), Some(at(2, 1))), row(4, at(2, 3), None)];

        let partition = assemble_day(date(1), &current, Some(&lookahead), &AHashSet::new());
        let ids: Vec<_> = partition.rows.iter().map(|r| r.initial_id).collect();
        assert_eq!(ids, vec![2, 1, 3]);
        assert_eq!(partition.rows_from_lookahead, 1);
        assert_eq!(partition.rows[2].validity_time, Some(at(2, 1)));
    }

    #[test]
    fn test_assemble_without_lookahead() {
        let current = vec![row(1, at(1, 12), None), row(9, at(2, 0), None)];
        let partition = assemble_day(date(1), &current, None, &AHashSet::new());
        assert_eq!(partition.rows.len(), 1);
        assert_eq!(partition.rows_from_lookahead, 0);
    }

    #[test]
    fn test_empty_partition() {
        let partition = assemble_day(date(1), &[], Some(&[row(1, at(2, 1), None)]), &AHashSet::new());
        assert!(partition.rows.is_empty());
    }

    #[test]
    fn test_assemble_drops_iceberg_lineages() {
        let current = vec![row(1, at(1, 10), None), row(2, at(1, 11), None)];
        let lookahead = vec![row(1, at(1, 23), None)];
        let icebergs: AHashSet<OrderId> = [1].into_iter().collect();

        let partition = assemble_day(date(1), &current, Some(&lookahead), &icebergs);
        let ids: Vec<_> = partition.rows.iter().map(|r| r.initial_id).collect();
        assert_eq!(ids, vec![2]);
        assert_eq!(partition.iceberg_rows_dropped, 2);
        assert_eq!(partition.rows_from_lookahead, 0);
    }

    #[test]
    fn test_assemble_collapses_version_seen_in_both_days() {
        // same Add in both feeds, only the lookahead feed carries its Delete
        let current = vec![row(2, at(1, 23), None)];
        let lookahead = vec![row(2, at(1, 23), Some(at(2, 1)))];

        let partition = assemble_day(date(1), &current, Some(&lookahead), &AHashSet::new());
        assert_eq!(partition.rows.len(), 1);
        assert_eq!(partition.rows[0].validity_time, Some(at(2, 1)));
        assert_eq!(partition.rows_from_lookahead, 1);
        assert_eq!(partition.duplicates_collapsed, 1);
    }

    #[test]
    fn test_collapse_keeps_earliest_close() {
        // current closed the version by a Change the lookahead feed lacks
        let current = vec![row(3, at(1, 22), Some(at(1, 22)))];
        let lookahead = vec![row(3, at(1, 22), Some(at(2, 5))), row(4, at(1, 23), None)];

        let partition = assemble_day(date(1), &current, Some(&lookahead), &AHashSet::new());
        let ids: Vec<_> = partition.rows.iter().map(|r| r.initial_id).collect();
        assert_eq!(ids, vec![3, 4]);
        assert_eq!(partition.rows[0].validity_time, Some(at(1, 22)));
        assert_eq!(partition.rows_from_lookahead, 1);

        // equal copies resolve to the lookahead one
        let partition = assemble_day(date(1), &lookahead[..1], Some(&lookahead[..1]), &AHashSet::new());
        assert_eq!(partition.rows.len(), 1);
        assert_eq!(partition.rows_from_lookahead, 1);
    }

    #[test]
    fn test_window_excludes_lookahead_icebergs() {
        let mut window = DayWindow::new();
        window.set_current(resolved(1, vec![row(100, at(1, 10), None), row(7, at(1, 11), None)]));

        // lineage 100 is only marked in day 2's feed
        let mut next = resolved(2, Vec::new());
        next.iceberg_lineages.insert(100);
        window.set_lookahead(next).unwrap();

        let partition = window.assemble().unwrap();
        assert!(partition.rows.iter().all(|r| r.initial_id != 100));
        assert_eq!(partition.rows.len(), 1);
        assert_eq!(partition.iceberg_rows_dropped, 1);
    }

    #[test]
    fn test_window_slides() {
        let mut window = DayWindow::new();
        assert!(window.assemble().is_err());

        window.set_current(resolved(1, vec![row(1, at(1, 1), None)]));
        window
            .set_lookahead(resolved(2, vec![row(2, at(1, 22), None), row(3, at(2, 2), None)]))
            .unwrap();
        assert_eq!(window.assemble().unwrap().rows.len(), 2);

        let left = window.advance().unwrap();
        assert_eq!(left.date, date(1));
        assert_eq!(window.current_date(), Some(date(2)));
        assert_eq!(window.lookahead_date(), None);
        assert_eq!(window.assemble().unwrap().rows.len(), 1);
    }

    #[test]
    fn test_lookahead_must_follow_current() {
        let mut window = DayWindow::new();
        assert!(window.set_lookahead(resolved(2, Vec::new())).is_err());

        window.set_current(resolved(1, Vec::new()));
        assert!(window.set_lookahead(resolved(3, Vec::new())).is_err());
        assert!(window.set_lookahead(resolved(2, Vec::new())).is_ok());
    }
}

//! From normalized raw events to day partitions of order intervals.
//!
//! | Stage | Module | Granularity |
//! |-------|--------|-------------|
//! | Iceberg filter | [`iceberg`] | one raw day |
//! | Validity resolver | [`resolver`] | one raw day |
//! | Day-window assembler | [`day_window`] | two adjacent raw days |
//!
//! [`resolve_day`] chains the first two stages for one adapter batch.

pub mod day_window;
pub mod iceberg;
pub mod resolver;

use ahash::AHashSet;
use chrono::NaiveDate;

use crate::error::Result;
use crate::source::FeedBatch;
use crate::statistics::{FeedStats, ResolveStats};
use crate::types::{OrderId, OrderInterval};

pub use day_window::{assemble_day, DayPartition, DayWindow};
pub use iceberg::{filter_icebergs, iceberg_lineages};
pub use resolver::{Resolution, ResolverConfig, TiePolicy, ValidityResolver};

/// Resolved intervals of one raw day, with the counters that produced them.
#[derive(Debug, Clone)]
pub struct ResolvedDay {
    pub date: NaiveDate,
    pub intervals: Vec<OrderInterval>,

    /// Lineages marked as iceberg orders in this day's raw feed
    pub iceberg_lineages: AHashSet<OrderId>,

    pub feed: FeedStats,
    pub resolve: ResolveStats,
}

/// Filter icebergs from one day's batch and resolve the rest.
///
/// The quantity filter follows the batch's feed format. The marked lineages
/// are kept so the day window can exclude them from the adjacent day too.
pub fn resolve_day(date: NaiveDate, batch: FeedBatch, tie_policy: TiePolicy) -> Result<ResolvedDay> {
    let config = ResolverConfig::new()
        .with_tie_policy(tie_policy)
        .with_non_positive_filter(batch.metadata.drops_non_positive_quantity());

    let marked = iceberg_lineages(&batch.events);
    let mut iceberg_stats = ResolveStats::default();
    let events = filter_icebergs(batch.events, &mut iceberg_stats);

    let Resolution {
        intervals,
        mut stats,
    } = ValidityResolver::new(config).resolve(events)?;
    stats.iceberg_lineages = iceberg_stats.iceberg_lineages;
    stats.iceberg_events_dropped = iceberg_stats.iceberg_events_dropped;

    Ok(ResolvedDay {
        date,
        intervals,
        iceberg_lineages: marked,
        feed: batch.stats,
        resolve: stats,
    })
}

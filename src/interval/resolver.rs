//! Validity resolver: raw Add/Change/Delete events to order intervals.
//!
//! Versions are tracked per `order_id`. Every Add opens an active version.
//! A Change closes the latest active version of its `order_id` at the
//! Change's transaction time and then becomes an active version itself.
//! A Delete closes the latest active version and disappears.
//!
//! # Algorithm
//!
//! ```text
//! pending = Changes grouped by order_id, each queue in transaction order
//! drop queues whose order_id has no Add        (orphans, never retried)
//! while pending is not empty:                  (one pass)
//!     for each order_id, pop its first Change:
//!         close latest version at change.tx
//!         promote change to an active version
//! for each Delete in transaction order:
//!     close latest version at delete.tx        (orphans dropped)
//! ```
//!
//! Only a Change's own `order_id` can gain a version through promotion, so
//! an order id without an Add stays orphaned for the whole resolution. A
//! lineage of N Changes therefore resolves in exactly N passes.
//!
//! # Ties
//!
//! "Latest" means maximal transaction time. Two versions sharing that
//! maximum make the target ambiguous; [`TiePolicy`] decides whether that
//! fails the day or falls back to the version seen last.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use ahash::AHashMap;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{CobError, Result};
use crate::statistics::ResolveStats;
use crate::types::{Action, OrderId, OrderInterval, RawOrderEvent};

// ============================================================================
// Configuration
// ============================================================================

/// How to handle two latest versions of one order id with equal transaction times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TiePolicy {
    /// Fail the day with `AmbiguousVersion` (default)
    #[default]
    Error,

    /// Close the version inserted last, log a warning and count it
    #[serde(alias = "prefer-last-seen")]
    PreferLastSeen,
}

impl TiePolicy {
    /// Parse a policy name; `prefer_last_seen` and `prefer-last-seen` are equivalent.
    pub fn parse(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "error" => Ok(TiePolicy::Error),
            "prefer_last_seen" => Ok(TiePolicy::PreferLastSeen),
            other => Err(CobError::Configuration(format!(
                "unknown tie policy {other:?}, expected \"error\" or \"prefer_last_seen\""
            ))),
        }
    }
}

impl FromStr for TiePolicy {
    type Err = CobError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for TiePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TiePolicy::Error => f.write_str("error"),
            TiePolicy::PreferLastSeen => f.write_str("prefer_last_seen"),
        }
    }
}

/// Resolver behavior.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolverConfig {
    /// Handling of latest-version ties
    pub tie_policy: TiePolicy,

    /// Remove intervals with quantity ≤ 0 from the output
    pub drop_non_positive_quantity: bool,
}

impl ResolverConfig {
    /// Default configuration: ties are errors, all quantities kept.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set tie handling policy.
    pub fn with_tie_policy(mut self, policy: TiePolicy) -> Self {
        self.tie_policy = policy;
        self
    }

    /// Enable/disable the non-positive quantity filter.
    pub fn with_non_positive_filter(mut self, enabled: bool) -> Self {
        self.drop_non_positive_quantity = enabled;
        self
    }
}

// ============================================================================
// Version book
// ============================================================================

/// Active (Add-type) versions, indexed by order id in insertion order.
#[derive(Debug, Default)]
struct VersionBook {
    versions: Vec<RawOrderEvent>,
    by_order: AHashMap<OrderId, Vec<usize>>,
}

impl VersionBook {
    fn insert(&mut self, version: RawOrderEvent) {
        self.by_order
            .entry(version.order_id)
            .or_default()
            .push(self.versions.len());
        self.versions.push(version);
    }

    #[inline]
    fn contains(&self, order_id: OrderId) -> bool {
        self.by_order.contains_key(&order_id)
    }

    /// Index of the latest version of `order_id`, plus whether it was tied.
    fn latest(&self, order_id: OrderId) -> Option<(usize, bool)> {
        let indices = self.by_order.get(&order_id)?;
        let mut best = *indices.first()?;
        let mut tied = false;

        for &idx in &indices[1..] {
            let t = self.versions[idx].transaction_time;
            let best_t = self.versions[best].transaction_time;
            if t > best_t {
                best = idx;
                tied = false;
            } else if t == best_t {
                // Later insertion wins the fallback
                best = idx;
                tied = true;
            }
        }
        Some((best, tied))
    }
}

// ============================================================================
// Resolver
// ============================================================================

/// Intervals produced from one event sequence.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// Resolved intervals, stably sorted by transaction time
    pub intervals: Vec<OrderInterval>,

    pub stats: ResolveStats,
}

/// Resolves Change chains to a fixpoint, then applies Deletes.
///
/// # Example
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use cob_interval_reconstructor::{Action, RawOrderEvent, ResolverConfig, Side, ValidityResolver};
///
/// let t = |s| Utc.with_ymd_and_hms(2021, 6, 1, 9, 0, s).unwrap();
/// let events = vec![
///     RawOrderEvent::new(1, 100, Action::Add, Side::Buy, t(10)),
///     RawOrderEvent::new(1, 100, Action::Delete, Side::Buy, t(20)),
/// ];
///
/// let resolution = ValidityResolver::new(ResolverConfig::new()).resolve(events).unwrap();
/// assert_eq!(resolution.intervals.len(), 1);
/// assert_eq!(resolution.intervals[0].validity_time, Some(t(20)));
/// ```
#[derive(Debug, Clone, Default)]
pub struct ValidityResolver {
    config: ResolverConfig,
}

impl ValidityResolver {
    /// Create a resolver with the given configuration.
    pub fn new(config: ResolverConfig) -> Self {
        Self { config }
    }

    /// Get the configuration.
    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Resolve one window's filtered events into intervals.
    ///
    /// Iceberg markers, if any are left, are ignored.
    ///
    /// # Errors
    ///
    /// `AmbiguousVersion` on a latest-version tie under [`TiePolicy::Error`].
    pub fn resolve(&self, events: Vec<RawOrderEvent>) -> Result<Resolution> {
        let mut stats = ResolveStats {
            events_in: events.len() as u64,
            ..Default::default()
        };

        let mut book = VersionBook::default();
        let mut pending: IndexMap<OrderId, VecDeque<RawOrderEvent>> = IndexMap::new();
        let mut deletes = Vec::new();

        for event in events {
            match event.action {
                Action::Add => book.insert(event),
                Action::Change => pending.entry(event.order_id).or_default().push_back(event),
                Action::Delete => deletes.push(event),
                Action::IcebergMarker => {}
            }
        }

        self.resolve_changes(&mut book, pending, &mut stats)?;
        self.resolve_deletes(&mut book, deletes, &mut stats)?;

        let intervals = self.collect(book, &mut stats);
        stats.intervals_out = intervals.len() as u64;

        log::debug!(
            "Resolved {} events into {} intervals ({} passes, {} orphan changes, {} orphan deletes)",
            stats.events_in,
            stats.intervals_out,
            stats.change_passes,
            stats.orphan_changes,
            stats.orphan_deletes
        );

        Ok(Resolution { intervals, stats })
    }

    /// Worklist fixpoint over pending Changes.
    fn resolve_changes(
        &self,
        book: &mut VersionBook,
        mut pending: IndexMap<OrderId, VecDeque<RawOrderEvent>>,
        stats: &mut ResolveStats,
    ) -> Result<()> {
        for queue in pending.values_mut() {
            queue.make_contiguous().sort_by_key(|e| e.transaction_time);
        }

        pending.retain(|order_id, queue| {
            if book.contains(*order_id) {
                true
            } else {
                stats.orphan_changes += queue.len() as u64;
                false
            }
        });

        while !pending.is_empty() {
            stats.change_passes += 1;
            let mut promoted = 0u64;

            for (&order_id, queue) in pending.iter_mut() {
                let Some(mut change) = queue.pop_front() else {
                    continue;
                };
                self.close_latest(book, order_id, change.transaction_time, stats)?;
                change.action = Action::Add;
                book.insert(change);
                promoted += 1;
            }

            pending.retain(|_, queue| !queue.is_empty());
            stats.changes_promoted += promoted;

            log::debug!(
                "Change pass {}: {} promoted, {} order ids still pending",
                stats.change_passes,
                promoted,
                pending.len()
            );
        }

        Ok(())
    }

    /// Single pass over Deletes in transaction order; the last one wins.
    fn resolve_deletes(
        &self,
        book: &mut VersionBook,
        mut deletes: Vec<RawOrderEvent>,
        stats: &mut ResolveStats,
    ) -> Result<()> {
        deletes.sort_by_key(|e| e.transaction_time);

        for delete in &deletes {
            if book.contains(delete.order_id) {
                self.close_latest(book, delete.order_id, delete.transaction_time, stats)?;
                stats.deletes_applied += 1;
            } else {
                stats.orphan_deletes += 1;
            }
        }
        Ok(())
    }

    /// Set the validity of `order_id`'s latest version to `at`.
    fn close_latest(
        &self,
        book: &mut VersionBook,
        order_id: OrderId,
        at: DateTime<Utc>,
        stats: &mut ResolveStats,
    ) -> Result<()> {
        let Some((idx, tied)) = book.latest(order_id) else {
            return Ok(());
        };

        let version = &mut book.versions[idx];
        if tied {
            match self.config.tie_policy {
                TiePolicy::Error => {
                    return Err(CobError::AmbiguousVersion {
                        order_id,
                        transaction_time: version.transaction_time,
                    });
                }
                TiePolicy::PreferLastSeen => {
                    stats.ties_resolved += 1;
                    log::warn!(
                        "Order {} has several versions at {}, closing the last seen",
                        order_id,
                        version.transaction_time
                    );
                }
            }
        }

        if at < version.transaction_time {
            stats.intervals_clamped += 1;
            log::warn!(
                "Order {} closed at {} before it opened at {}, clamping",
                order_id,
                at,
                version.transaction_time
            );
            version.validity_time = Some(version.transaction_time);
        } else {
            version.validity_time = Some(at);
        }
        Ok(())
    }

    /// Turn the final versions into sorted output rows.
    fn collect(&self, book: VersionBook, stats: &mut ResolveStats) -> Vec<OrderInterval> {
        let mut intervals = Vec::with_capacity(book.versions.len());

        for version in book.versions {
            if self.config.drop_non_positive_quantity && version.quantity <= Decimal::ZERO {
                stats.non_positive_dropped += 1;
                continue;
            }

            let mut interval = version.to_interval();
            if !interval.is_well_formed() {
                // Claimed expiry before the message itself
                stats.intervals_clamped += 1;
                interval.validity_time = Some(interval.transaction_time);
            }
            intervals.push(interval);
        }

        intervals.sort_by_key(|i| i.transaction_time);
        intervals
    }
}

//! Iceberg lineage exclusion.
//!
//! An iceberg order only shows its peak in the feed, so none of its versions
//! describe real visible liquidity. Any `initial_id` that carries at least one
//! [`Action::IcebergMarker`] is removed wholesale, whatever the action of the
//! individual event. Runs once per raw day, before resolution.

use ahash::AHashSet;

use crate::statistics::ResolveStats;
use crate::types::{Action, OrderId, RawOrderEvent};

/// Initial ids marked as iceberg orders anywhere in `events`.
pub fn iceberg_lineages(events: &[RawOrderEvent]) -> AHashSet<OrderId> {
    events
        .iter()
        .filter(|e| e.action == Action::IcebergMarker)
        .map(|e| e.initial_id)
        .collect()
}

/// Drop every event of a marked lineage, keeping the order of the rest.
///
/// Idempotent: the output carries no markers, so a second pass removes nothing.
pub fn filter_icebergs(events: Vec<RawOrderEvent>, stats: &mut ResolveStats) -> Vec<RawOrderEvent> {
    let marked = iceberg_lineages(&events);
    if marked.is_empty() {
        return events;
    }

    let before = events.len();
    let kept: Vec<RawOrderEvent> = events
        .into_iter()
        .filter(|e| !marked.contains(&e.initial_id))
        .collect();

    stats.iceberg_lineages += marked.len() as u64;
    stats.iceberg_events_dropped += (before - kept.len()) as u64;

    log::debug!(
        "Iceberg filter: {} lineages, {} events dropped",
        marked.len(),
        before - kept.len()
    );
    kept
}

//! # COB-Interval-Reconstructor
//!
//! Order validity intervals from continuous intraday power order book feeds.
//!
//! Exchanges publish their continuous order books as streams of
//! Add/Change/Delete messages keyed by mutable order ids. This library turns
//! those streams into one row per order version, live in
//! `[transaction_time, validity_time)`, partitioned by the day the version
//! went live.
//!
//! ## Features
//!
//! - **Three raw schemas**: EPEX 2020 (legacy), EPEX 2021+ (current), NordPool parquet
//! - **Iceberg exclusion**: whole lineages dropped once marked
//! - **Fixpoint Change resolution**: explicit worklist, one pass per chain link
//! - **Cross-day stitching**: one-day lookahead closes versions opened the day before
//! - **Atomic, reproducible output**: byte-identical zipped CSV per day
//!
//! ## Quick Start
//!
//! ### Resolving Events
//!
//! ```rust
//! use chrono::{TimeZone, Utc};
//! use cob_interval_reconstructor::{Action, RawOrderEvent, ResolverConfig, Side, ValidityResolver};
//!
//! let t = |s| Utc.with_ymd_and_hms(2021, 6, 1, 9, 0, s).unwrap();
//! let events = vec![
//!     RawOrderEvent::new(1, 100, Action::Add, Side::Buy, t(10)),
//!     RawOrderEvent::new(1, 100, Action::Change, Side::Buy, t(20)),
//!     RawOrderEvent::new(1, 100, Action::Change, Side::Buy, t(30)),
//! ];
//!
//! let resolution = ValidityResolver::new(ResolverConfig::new()).resolve(events).unwrap();
//! let ends: Vec<_> = resolution.intervals.iter().map(|i| i.validity_time).collect();
//! assert_eq!(ends, vec![Some(t(20)), Some(t(30)), None]);
//! ```
//!
//! ### Running a Date Range
//!
//! ```ignore
//! use cob_interval_reconstructor::{Exchange, Pipeline, PipelineConfig};
//!
//! let config = PipelineConfig::new(Exchange::Epex, start, end, "/data/raw/epex", "/data/orderbook");
//! let summary = Pipeline::from_config(config)?.run()?;
//! println!("{} rows written", summary.total_rows());
//! ```
//!
//! ## Module Overview
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`types`] | `RawOrderEvent`, `OrderInterval`, `Action`, `Side` |
//! | [`feeds`] | Feed adapters: `EpexAdapter`, `NordPoolAdapter`, `ExchangeSource` |
//! | [`interval`] | Iceberg filter, `ValidityResolver`, `DayWindow` |
//! | [`store`] | Atomic per-day zip/CSV output |
//! | [`pipeline`] | Date-range driver |
//! | [`config`] | `PipelineConfig` with validation |
//! | [`statistics`] | Per-day counters and JSON run summary |
//! | [`source`] | `DaySource` trait and in-memory `VecSource` |
//! | [`loader`] | Raw file location and archive reading |
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `nordpool` | ✅ | Enable NordPool parquet file support |

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod config;
pub mod error;
pub mod feeds;
pub mod interval;
pub mod loader;
pub mod pipeline;
pub mod source;
pub mod statistics;
pub mod store;
pub mod types;

// Re-exports - Core types
pub use error::{CobError, Result};
pub use types::{Action, OrderId, OrderInterval, RawOrderEvent, Side};

// Re-exports - Feed adapters
pub use feeds::{EpexAdapter, Exchange, ExchangeSource, FeedAdapter, FeedFormat, NordPoolAdapter};

// Re-exports - Resolution
pub use interval::{
    assemble_day, filter_icebergs, resolve_day, DayPartition, DayWindow, ResolvedDay, ResolverConfig,
    TiePolicy, ValidityResolver,
};

// Re-exports - Running
pub use config::PipelineConfig;
pub use pipeline::Pipeline;
pub use store::DayStore;

// Re-exports - Statistics
pub use statistics::{DayStats, FeedStats, ResolveStats, RunSummary};

// Re-exports - Source abstraction
pub use source::{DaySource, FeedBatch, FeedMetadata, VecSource};

pub use loader::IO_BUFFER_SIZE;

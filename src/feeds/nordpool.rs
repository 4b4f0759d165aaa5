//! NordPool intraday order book exports.
//!
//! One directory per delivery day, `{root}/YYYY/MM/DD/`, holding one or more
//! `NordPool_*.parquet` parts that are read in name order and concatenated.
//!
//! Columns used:
//!
//! | Column | Meaning |
//! |--------|---------|
//! | `orderId` | message lineage id |
//! | `originalOrderId` | initial id |
//! | `action` | `UserAdded`, `UserModified`, `UserDeleted`, `SystemDeleted` |
//! | `side` | `BUY` / `SELL` |
//! | `contractName` | hourly contracts start with `PH` |
//! | `deliveryStart`, `deliveryEnd` | must be exactly one hour apart |
//! | `createdTime` | transaction time |
//! | `expirationTime` | validity time |
//! | `price`, `volume` | price and quantity |
//! | `orderType` | `Iceberg` marks the whole lineage |
//!
//! Iceberg flags live on the rows themselves rather than in a dedicated
//! action, so the adapter emits one synthetic [`Action::IcebergMarker`] per
//! flagged lineage for the shared iceberg filter to act on.

use std::path::{Path, PathBuf};

use ahash::AHashSet;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;

use super::{EventCollector, FeedAdapter, FeedFormat};
use crate::error::{CobError, Result};
use crate::loader::{day_dir, find_parts};
use crate::source::{FeedBatch, FeedMetadata};
use crate::types::{Action, OrderId, RawOrderEvent, Side};

/// Contract name prefix of hourly products.
pub const HOURLY_CONTRACT_PREFIX: &str = "PH";

/// `orderType` value flagging an iceberg order.
pub const ICEBERG_ORDER_TYPE: &str = "Iceberg";

const PART_PREFIX: &str = "NordPool_";
const PART_SUFFIX: &str = ".parquet";

/// One raw row with the columns the adapter cares about.
///
/// Fields are `None` when the column is absent or null.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NordPoolRow {
    pub order_id: Option<OrderId>,
    pub original_order_id: Option<OrderId>,
    pub action: Option<String>,
    pub side: Option<String>,
    pub contract_name: Option<String>,
    pub order_type: Option<String>,
    pub delivery_start: Option<DateTime<Utc>>,
    pub delivery_end: Option<DateTime<Utc>>,
    pub created_time: Option<DateTime<Utc>>,
    pub expiration_time: Option<DateTime<Utc>>,
    pub price: Option<Decimal>,
    pub volume: Option<Decimal>,
}

/// Adapter for NordPool parquet parts.
#[derive(Debug, Clone, Copy, Default)]
pub struct NordPoolAdapter;

impl NordPoolAdapter {
    /// Create the adapter.
    pub fn new() -> Self {
        Self
    }

    /// Normalize already-read rows into a sorted, deduplicated batch.
    ///
    /// `file` only labels errors and metadata.
    pub fn normalize<I>(&self, rows: I, file: &Path) -> Result<FeedBatch>
    where
        I: IntoIterator<Item = NordPoolRow>,
    {
        let variant = FeedFormat::NordPool.name();
        let row_error =
            |row: u64, reason: &str| CobError::format(variant, file, format!("row {row}: {reason}"));

        let mut collector = EventCollector::default();
        let mut iceberg_lineages: AHashSet<OrderId> = AHashSet::new();

        for (i, raw) in rows.into_iter().enumerate() {
            let row = i as u64 + 1;
            collector.stats.rows_read += 1;

            let hourly = raw
                .contract_name
                .as_deref()
                .map_or(false, |name| name.starts_with(HOURLY_CONTRACT_PREFIX));
            if !hourly {
                collector.stats.products_dropped += 1;
                continue;
            }

            let delivery_start = raw
                .delivery_start
                .ok_or_else(|| row_error(row, "missing deliveryStart"))?;
            let delivery_end = raw
                .delivery_end
                .ok_or_else(|| row_error(row, "missing deliveryEnd"))?;
            if delivery_end - delivery_start != Duration::hours(1) {
                collector.stats.products_dropped += 1;
                continue;
            }

            let action = match raw.action.as_deref().and_then(Action::from_nordpool) {
                Some(action) => action,
                None => {
                    collector.stats.actions_dropped += 1;
                    continue;
                }
            };
            let lenient = action == Action::Delete;

            let order_id = raw.order_id.ok_or_else(|| row_error(row, "missing orderId"))?;
            let initial_id = raw
                .original_order_id
                .ok_or_else(|| row_error(row, "missing originalOrderId"))?;
            let transaction_time = raw
                .created_time
                .ok_or_else(|| row_error(row, "missing createdTime"))?;

            let side = match raw.side.as_deref().and_then(Side::parse) {
                Some(side) => side,
                None if lenient => Side::Buy,
                None => return Err(row_error(row, "missing or invalid side")),
            };
            let price = match raw.price {
                Some(price) => price,
                None if lenient => Decimal::ZERO,
                None => return Err(row_error(row, "missing price")),
            };
            let quantity = match raw.volume {
                Some(volume) => volume,
                None if lenient => Decimal::ZERO,
                None => return Err(row_error(row, "missing volume")),
            };

            let event = RawOrderEvent {
                order_id,
                initial_id,
                side,
                action,
                delivery_start,
                transaction_time,
                validity_time: raw.expiration_time,
                price,
                quantity,
            };

            if raw.order_type.as_deref() == Some(ICEBERG_ORDER_TYPE)
                && iceberg_lineages.insert(initial_id)
            {
                let mut marker = event.clone();
                marker.action = Action::IcebergMarker;
                collector.push(marker);
            }
            collector.push(event);
        }

        let (events, stats) = collector.finish();
        Ok(FeedBatch {
            events,
            stats,
            metadata: FeedMetadata::new()
                .with_format(FeedFormat::NordPool)
                .with_file(file),
        })
    }
}

impl FeedAdapter for NordPoolAdapter {
    fn format(&self) -> FeedFormat {
        FeedFormat::NordPool
    }

    fn locate(&self, root: &Path, date: NaiveDate) -> Result<Vec<PathBuf>> {
        find_parts(
            &day_dir(root, date),
            PART_PREFIX,
            PART_SUFFIX,
            FeedFormat::NordPool.name(),
            date,
        )
    }

    fn parse(&self, path: &Path) -> Result<FeedBatch> {
        let rows = parquet_rows::read(path)?;
        self.normalize(rows, path)
    }
}

// ============================================================================
// Parquet reading
// ============================================================================

#[cfg(feature = "nordpool")]
mod parquet_rows {
    use std::fs::File;
    use std::path::Path;

    use ahash::AHashSet;
    use chrono::{DateTime, Utc};
    use parquet::basic::{LogicalType, TimeUnit};
    use parquet::data_type::Decimal as ParquetDecimal;
    use parquet::file::reader::{FileReader, SerializedFileReader};
    use parquet::record::Field;
    use rust_decimal::Decimal;

    use super::NordPoolRow;
    use crate::error::{CobError, Result};
    use crate::feeds::{parse_order_id, FeedFormat};
    use crate::types::{parse_decimal, parse_timestamp, OrderId};

    /// Read every row of one parquet part.
    pub(super) fn read(path: &Path) -> Result<Vec<NordPoolRow>> {
        let variant = FeedFormat::NordPool.name();
        let file = File::open(path)
            .map_err(|e| CobError::Io(format!("Failed to open {}: {}", path.display(), e)))?;
        let reader = SerializedFileReader::new(file)
            .map_err(|e| CobError::format(variant, path, format!("not a parquet file: {e}")))?;

        let file_metadata = reader.metadata().file_metadata();
        let expected = file_metadata.num_rows().max(0) as usize;
        // The row API has no nanosecond variant and yields these as plain longs
        let nanos = nanosecond_columns(file_metadata.schema_descr().columns());
        let mut rows = Vec::with_capacity(expected);

        let iter = reader
            .get_row_iter(None)
            .map_err(|e| CobError::format(variant, path, e.to_string()))?;
        for (i, row) in iter.enumerate() {
            let row = row.map_err(|e| CobError::format(variant, path, format!("row {}: {e}", i + 1)))?;
            let mut out = NordPoolRow::default();
            for (name, field) in row.get_column_iter() {
                let ts = |field: &Field| to_timestamp(field, nanos.contains(name.as_str()));
                match name.as_str() {
                    "orderId" => out.order_id = to_id(field),
                    "originalOrderId" => out.original_order_id = to_id(field),
                    "action" => out.action = to_string(field),
                    "side" => out.side = to_string(field),
                    "contractName" => out.contract_name = to_string(field),
                    "orderType" => out.order_type = to_string(field),
                    "deliveryStart" => out.delivery_start = ts(field),
                    "deliveryEnd" => out.delivery_end = ts(field),
                    "createdTime" => out.created_time = ts(field),
                    "expirationTime" => out.expiration_time = ts(field),
                    "price" => out.price = to_decimal(field),
                    "volume" => out.volume = to_decimal(field),
                    _ => {}
                }
            }
            rows.push(out);
        }

        log::debug!("Read {} rows from {}", rows.len(), path.display());
        Ok(rows)
    }

    fn nanosecond_columns(columns: &[parquet::schema::types::ColumnDescPtr]) -> AHashSet<String> {
        columns
            .iter()
            .filter(|column| {
                matches!(
                    column.logical_type(),
                    Some(LogicalType::Timestamp {
                        unit: TimeUnit::NANOS(_),
                        ..
                    })
                )
            })
            .map(|column| column.name().to_string())
            .collect()
    }

    fn to_string(field: &Field) -> Option<String> {
        match field {
            Field::Str(s) => Some(s.clone()),
            _ => None,
        }
    }

    fn to_id(field: &Field) -> Option<OrderId> {
        match field {
            Field::Int(v) => Some(OrderId::from(*v)),
            Field::Long(v) => Some(*v),
            Field::UInt(v) => Some(OrderId::from(*v)),
            Field::ULong(v) => OrderId::try_from(*v).ok(),
            Field::Str(s) => parse_order_id(s),
            _ => None,
        }
    }

    fn from_units(value: i64, per_second: i64) -> Option<DateTime<Utc>> {
        let nanos_per_unit = 1_000_000_000 / per_second;
        DateTime::from_timestamp(
            value.div_euclid(per_second),
            (value.rem_euclid(per_second) * nanos_per_unit) as u32,
        )
    }

    fn to_timestamp(field: &Field, nanos: bool) -> Option<DateTime<Utc>> {
        match field {
            Field::TimestampMillis(ms) => from_units(*ms, 1_000),
            Field::TimestampMicros(us) => from_units(*us, 1_000_000),
            Field::Long(ns) if nanos => from_units(*ns, 1_000_000_000),
            Field::Str(s) => parse_timestamp(s),
            _ => None,
        }
    }

    /// Unscaled big-endian two's complement bytes plus scale.
    fn from_parquet_decimal(decimal: &ParquetDecimal) -> Option<Decimal> {
        let bytes = decimal.data();
        if bytes.len() > 16 {
            return None;
        }
        let negative = bytes.first().map_or(false, |b| b & 0x80 != 0);
        let unscaled = bytes
            .iter()
            .fold(if negative { -1i128 } else { 0 }, |acc, b| (acc << 8) | i128::from(*b));
        let scale = u32::try_from(decimal.scale()).ok()?;
        Decimal::try_from_i128_with_scale(unscaled, scale).ok()
    }

    fn to_decimal(field: &Field) -> Option<Decimal> {
        match field {
            Field::Int(v) => Some(Decimal::from(*v)),
            Field::Long(v) => Some(Decimal::from(*v)),
            // Shortest round-trip formatting keeps 45.1 as 45.1
            Field::Float(v) => parse_decimal(&v.to_string()),
            Field::Double(v) => parse_decimal(&v.to_string()),
            Field::Decimal(d) => from_parquet_decimal(d),
            Field::Str(s) => parse_decimal(s),
            _ => None,
        }
    }

}

#[cfg(not(feature = "nordpool"))]
mod parquet_rows {
    use std::path::Path;

    use super::NordPoolRow;
    use crate::error::{CobError, Result};

    pub(super) fn read(path: &Path) -> Result<Vec<NordPoolRow>> {
        Err(CobError::Configuration(format!(
            "cannot read {}: built without the \"nordpool\" feature",
            path.display()
        )))
    }
}

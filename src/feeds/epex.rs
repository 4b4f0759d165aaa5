//! EPEX continuous order book exports (2020 legacy and 2021+ current schema).
//!
//! Both eras ship one zip per trading day holding a single CSV. They differ
//! in delimiter, column names, the block-order flag literal and whether a
//! preamble line precedes the header:
//!
//! | | Legacy (2020) | Current (2021+) |
//! |--|--|--|
//! | file marker | `Continuous_Orders_DE_YYYYMMDD` | `Continuous_Orders-DE-YYYYMMDD` |
//! | delimiter | `;` | `,` |
//! | preamble | none | one line |
//! | non-block flag | `Is User Defined Block == 0` | `UserDefinedBlock == N` |
//!
//! Action codes are `A` (add), `C` (change), `D` (delete) and `I` (iceberg);
//! every other code is dropped. Only `Intraday_Hour_Power` and
//! `XBID_Hour_Power` products are kept.

use std::path::{Path, PathBuf};

use chrono::{Duration, NaiveDate};
use rust_decimal::Decimal;

use super::{parse_order_id, EventCollector, FeedAdapter, FeedFormat};
use crate::error::{CobError, Result};
use crate::loader::{find_archive, month_dir, read_archive_entry, skip_lines, ColumnIndex};
use crate::source::{FeedBatch, FeedMetadata};
use crate::types::{parse_decimal, parse_timestamp, Action, RawOrderEvent, Side};

/// Products carrying single-hour delivery contracts.
pub const HOUR_PRODUCTS: [&str; 2] = ["Intraday_Hour_Power", "XBID_Hour_Power"];

/// Column names and literals of one EPEX era.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpexLayout {
    pub format: FeedFormat,
    /// Substring identifying the day's archive, followed by `YYYYMMDD`
    pub file_marker: &'static str,
    pub delimiter: u8,
    /// Lines to skip before the CSV header
    pub preamble_lines: usize,
    pub order_id: &'static str,
    pub initial_id: &'static str,
    pub action: &'static str,
    pub side: &'static str,
    pub delivery_start: &'static str,
    pub delivery_end: &'static str,
    pub transaction_time: &'static str,
    pub validity_time: &'static str,
    pub price: &'static str,
    pub quantity: &'static str,
    pub product: &'static str,
    pub block: &'static str,
    /// Block column value meaning "not a user-defined block"
    pub not_block: &'static str,
    pub otc: &'static str,
}

/// 2020 exports.
pub const LEGACY_LAYOUT: EpexLayout = EpexLayout {
    format: FeedFormat::EpexLegacy,
    file_marker: "Continuous_Orders_DE_",
    delimiter: b';',
    preamble_lines: 0,
    order_id: "Order ID",
    initial_id: "Initial ID",
    action: "Action code",
    side: "Side",
    delivery_start: "Delivery Start",
    delivery_end: "Delivery End",
    transaction_time: "Transaction Time",
    validity_time: "Validity time",
    price: "Price",
    quantity: "Quantity",
    product: "Product",
    block: "Is User Defined Block",
    not_block: "0",
    otc: "isOTC",
};

/// 2021 and later exports.
pub const CURRENT_LAYOUT: EpexLayout = EpexLayout {
    format: FeedFormat::EpexCurrent,
    file_marker: "Continuous_Orders-DE-",
    delimiter: b',',
    preamble_lines: 1,
    order_id: "OrderId",
    initial_id: "InitialId",
    action: "ActionCode",
    side: "Side",
    delivery_start: "DeliveryStart",
    delivery_end: "DeliveryEnd",
    transaction_time: "TransactionTime",
    validity_time: "ValidityTime",
    price: "Price",
    quantity: "Quantity",
    product: "Product",
    block: "UserDefinedBlock",
    not_block: "N",
    otc: "IsOTC",
};

/// Resolved column positions for one file.
struct Columns {
    order_id: usize,
    initial_id: usize,
    action: usize,
    side: usize,
    delivery_start: usize,
    delivery_end: Option<usize>,
    transaction_time: usize,
    validity_time: usize,
    price: usize,
    quantity: usize,
    product: usize,
    block: usize,
    otc: Option<usize>,
}

impl Columns {
    fn resolve(index: &ColumnIndex, layout: &EpexLayout) -> Result<Self> {
        Ok(Self {
            order_id: index.require(layout.order_id)?,
            initial_id: index.require(layout.initial_id)?,
            action: index.require(layout.action)?,
            side: index.require(layout.side)?,
            delivery_start: index.require(layout.delivery_start)?,
            delivery_end: index.optional(layout.delivery_end),
            transaction_time: index.require(layout.transaction_time)?,
            validity_time: index.require(layout.validity_time)?,
            price: index.require(layout.price)?,
            quantity: index.require(layout.quantity)?,
            product: index.require(layout.product)?,
            block: index.require(layout.block)?,
            otc: index
                .optional(layout.otc)
                .or_else(|| index.optional("isOTC")),
        })
    }
}

/// Outcome of one CSV row.
enum RowOutcome {
    Event(RawOrderEvent),
    ProductDropped,
    ActionDropped,
}

fn is_truthy(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "y" | "yes" | "true"
    )
}

/// Adapter for either EPEX era.
#[derive(Debug, Clone, Copy)]
pub struct EpexAdapter {
    layout: EpexLayout,
}

impl EpexAdapter {
    /// Adapter for 2020 files.
    pub fn legacy() -> Self {
        Self {
            layout: LEGACY_LAYOUT,
        }
    }

    /// Adapter for 2021+ files.
    pub fn current() -> Self {
        Self {
            layout: CURRENT_LAYOUT,
        }
    }

    /// The schema this adapter reads.
    pub fn layout(&self) -> &EpexLayout {
        &self.layout
    }

    /// Parse a decompressed CSV payload.
    ///
    /// `file` only labels errors and metadata.
    pub fn parse_csv(&self, bytes: &[u8], file: &Path) -> Result<FeedBatch> {
        let variant = self.layout.format.name();
        let body = skip_lines(bytes, self.layout.preamble_lines);

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(self.layout.delimiter)
            .has_headers(true)
            .flexible(true)
            .from_reader(body);

        let headers = reader
            .headers()
            .map_err(|e| CobError::format(variant, file, format!("bad header: {e}")))?
            .clone();
        let index = ColumnIndex::from_headers(&headers, variant, file);
        let cols = Columns::resolve(&index, &self.layout)?;

        let mut collector = EventCollector::default();
        let mut record = csv::StringRecord::new();
        let mut row = 0u64;

        while reader
            .read_record(&mut record)
            .map_err(|e| index.row_error(row + 1, e))?
        {
            row += 1;
            collector.stats.rows_read += 1;
            match self.parse_row(&record, &cols, &index, row)? {
                RowOutcome::Event(event) => collector.push(event),
                RowOutcome::ProductDropped => collector.stats.products_dropped += 1,
                RowOutcome::ActionDropped => collector.stats.actions_dropped += 1,
            }
        }

        let (events, stats) = collector.finish();
        Ok(FeedBatch {
            events,
            stats,
            metadata: FeedMetadata::new()
                .with_format(self.layout.format)
                .with_file(file),
        })
    }

    fn parse_row(
        &self,
        record: &csv::StringRecord,
        cols: &Columns,
        index: &ColumnIndex,
        row: u64,
    ) -> Result<RowOutcome> {
        let field = |i: usize| record.get(i).unwrap_or("").trim();

        let product = field(cols.product);
        if !HOUR_PRODUCTS.iter().any(|p| *p == product) {
            return Ok(RowOutcome::ProductDropped);
        }
        if field(cols.block) != self.layout.not_block {
            return Ok(RowOutcome::ProductDropped);
        }
        if cols.otc.map_or(false, |i| is_truthy(field(i))) {
            return Ok(RowOutcome::ProductDropped);
        }

        let action = match Action::from_epex_code(field(cols.action)) {
            Some(action) => action,
            None => return Ok(RowOutcome::ActionDropped),
        };
        // Markers and deletes only need their ids and time to be meaningful.
        let lenient = matches!(action, Action::IcebergMarker | Action::Delete);

        let order_id = parse_order_id(field(cols.order_id))
            .ok_or_else(|| index.row_error(row, format!("invalid order id {:?}", field(cols.order_id))))?;
        let initial_id = parse_order_id(field(cols.initial_id)).ok_or_else(|| {
            index.row_error(row, format!("invalid initial id {:?}", field(cols.initial_id)))
        })?;
        let transaction_time = parse_timestamp(field(cols.transaction_time)).ok_or_else(|| {
            index.row_error(
                row,
                format!("invalid transaction time {:?}", field(cols.transaction_time)),
            )
        })?;

        let delivery_start = match parse_timestamp(field(cols.delivery_start)) {
            Some(start) => Some(start),
            None if lenient => None,
            None => {
                return Err(index.row_error(
                    row,
                    format!("invalid delivery start {:?}", field(cols.delivery_start)),
                ))
            }
        };
        // A start taken from the transaction time says nothing about the hour.
        if let Some(start) = delivery_start {
            if let Some(end) = cols.delivery_end.and_then(|i| parse_timestamp(field(i))) {
                if end - start != Duration::hours(1) {
                    return Ok(RowOutcome::ProductDropped);
                }
            }
        }
        let delivery_start = delivery_start.unwrap_or(transaction_time);

        let side = match Side::parse(field(cols.side)) {
            Some(side) => side,
            None if lenient => Side::Buy,
            None => {
                return Err(index.row_error(row, format!("invalid side {:?}", field(cols.side))))
            }
        };

        let raw_validity = field(cols.validity_time);
        let validity_time = if raw_validity.is_empty() {
            None
        } else {
            match parse_timestamp(raw_validity) {
                Some(validity) => Some(validity),
                None if lenient => None,
                None => {
                    return Err(
                        index.row_error(row, format!("invalid validity time {raw_validity:?}"))
                    )
                }
            }
        };

        let decimal = |i: usize, name: &str| -> Result<Decimal> {
            match parse_decimal(field(i)) {
                Some(value) => Ok(value),
                None if lenient => Ok(Decimal::ZERO),
                None => Err(index.row_error(row, format!("invalid {name} {:?}", field(i)))),
            }
        };
        let price = decimal(cols.price, "price")?;
        let quantity = decimal(cols.quantity, "quantity")?;

        Ok(RowOutcome::Event(RawOrderEvent {
            order_id,
            initial_id,
            side,
            action,
            delivery_start,
            transaction_time,
            validity_time,
            price,
            quantity,
        }))
    }
}

impl FeedAdapter for EpexAdapter {
    fn format(&self) -> FeedFormat {
        self.layout.format
    }

    fn locate(&self, root: &Path, date: NaiveDate) -> Result<Vec<PathBuf>> {
        let needle = format!("{}{}", self.layout.file_marker, date.format("%Y%m%d"));
        let archive = find_archive(&month_dir(root, date), &needle, self.layout.format.name(), date)?;
        Ok(vec![archive])
    }

    fn parse(&self, path: &Path) -> Result<FeedBatch> {
        // The CSV entry is named like the archive minus ".zip"
        let entry = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_suffix(".zip"));
        let bytes = read_archive_entry(path, entry, self.layout.format.name())?;
        self.parse_csv(&bytes, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike, Utc};

    const LEGACY_HEADER: &str = "Delivery area;Order ID;Initial ID;Parent ID;Side;Product;Delivery Start;Delivery End;Currency;Price;Quantity;Volume;Action code;Transaction Time;Validity time;Entry time;Is User Defined Block;isOTC;Execution restriction;Market area;RevisionNo;";

    fn legacy_row(
        order: i64,
        initial: i64,
        side: &str,
        product: &str,
        action: &str,
        tx: &str,
        validity: &str,
        block: u8,
    ) -> String {
        format!(
            "10YDE;{order};{initial};;{side};{product};2020-06-01T10:00:00Z;2020-06-01T11:00:00Z;EUR;31.5;5.0;5;{action};{tx};{validity};{tx};{block};0;NON;DE;1;"
        )
    }

    fn legacy_csv(rows: &[String]) -> Vec<u8> {
        let mut out = String::from(LEGACY_HEADER);
        out.push('\n');
        for row in rows {
            out.push_str(row);
            out.push('\n');
        }
        out.into_bytes()
    }

    // -------------------------------------------------------------------------
    // Legacy layout
    // -------------------------------------------------------------------------

    #[test]
    fn test_legacy_parses_basic_rows() {
        let csv = legacy_csv(&[
            legacy_row(1, 1, "buy", "Intraday_Hour_Power", "A", "2020-06-01T08:00:00.250Z", "2020-06-01T09:45:00Z", 0),
            legacy_row(2, 2, "sell", "XBID_Hour_Power", "A", "2020-06-01T07:00:00.000Z", "", 0),
        ]);
        let batch = EpexAdapter::legacy()
            .parse_csv(&csv, Path::new("legacy.csv"))
            .unwrap();

        assert_eq!(batch.events.len(), 2);
        // sorted by transaction time
        assert_eq!(batch.events[0].order_id, 2);
        assert_eq!(batch.events[0].side, Side::Sell);
        assert!(batch.events[0].validity_time.is_none());

        let first = &batch.events[1];
        assert_eq!(first.side, Side::Buy);
        assert_eq!(first.transaction_time.nanosecond(), 250_000_000);
        assert_eq!(
            first.validity_time,
            Some(Utc.with_ymd_and_hms(2020, 6, 1, 9, 45, 0).unwrap())
        );
        assert_eq!(first.price, Decimal::new(315, 1));
        assert_eq!(batch.metadata.format, Some(FeedFormat::EpexLegacy));
    }

    #[test]
    fn test_legacy_filters_products_blocks_and_actions() {
        let csv = legacy_csv(&[
            legacy_row(1, 1, "buy", "Intraday_Quarter_Hour_Power", "A", "2020-06-01T08:00:00.000Z", "", 0),
            legacy_row(2, 2, "buy", "Intraday_Hour_Power", "A", "2020-06-01T08:00:00.000Z", "", 1),
            legacy_row(3, 3, "buy", "Intraday_Hour_Power", "H", "2020-06-01T08:00:00.000Z", "", 0),
            legacy_row(4, 4, "buy", "Intraday_Hour_Power", "I", "2020-06-01T08:00:00.000Z", "", 0),
        ]);
        let batch = EpexAdapter::legacy()
            .parse_csv(&csv, Path::new("legacy.csv"))
            .unwrap();

        assert_eq!(batch.events.len(), 1);
        assert_eq!(batch.events[0].action, Action::IcebergMarker);
        assert_eq!(batch.stats.rows_read, 4);
        assert_eq!(batch.stats.products_dropped, 2);
        assert_eq!(batch.stats.actions_dropped, 1);
    }

    #[test]
    fn test_legacy_drops_exact_duplicates() {
        let row = legacy_row(1, 1, "buy", "Intraday_Hour_Power", "C", "2020-06-01T08:00:00.000Z", "", 0);
        let later = legacy_row(1, 1, "buy", "Intraday_Hour_Power", "C", "2020-06-01T08:00:01.000Z", "", 0);
        let csv = legacy_csv(&[row.clone(), row, later]);
        let batch = EpexAdapter::legacy()
            .parse_csv(&csv, Path::new("legacy.csv"))
            .unwrap();

        // transaction time is not part of the business key
        assert_eq!(batch.events.len(), 1);
        assert_eq!(batch.stats.duplicates_dropped, 2);
    }

    #[test]
    fn test_legacy_rejects_bad_timestamp() {
        let csv = legacy_csv(&[legacy_row(1, 1, "buy", "Intraday_Hour_Power", "A", "not-a-time", "", 0)]);
        let err = EpexAdapter::legacy()
            .parse_csv(&csv, Path::new("legacy.csv"))
            .unwrap_err();
        assert!(err.is_format());
        assert!(err.to_string().contains("row 1"));
    }

    #[test]
    fn test_legacy_rejects_missing_column() {
        let csv = b"Order ID;Initial ID\n1;1\n";
        let err = EpexAdapter::legacy()
            .parse_csv(csv, Path::new("legacy.csv"))
            .unwrap_err();
        assert!(err.is_format());
    }

    // -------------------------------------------------------------------------
    // Current layout
    // -------------------------------------------------------------------------

    #[test]
    fn test_current_skips_preamble_and_checks_duration() {
        let csv = "# Continuous orders export\n\
OrderId,InitialId,ParentId,Side,Product,DeliveryStart,DeliveryEnd,Price,Quantity,ActionCode,TransactionTime,ValidityTime,UserDefinedBlock\n\
11,11,,BUY,XBID_Hour_Power,2021-03-02T05:00:00Z,2021-03-02T06:00:00Z,40.25,3.5,A,2021-03-01T12:00:00.123Z,2021-03-02T04:00:00Z,N\n\
12,12,,SELL,XBID_Hour_Power,2021-03-02T05:00:00Z,2021-03-02T07:00:00Z,41,1,A,2021-03-01T12:00:00.200Z,,N\n\
13,13,,SELL,XBID_Hour_Power,2021-03-02T05:00:00Z,2021-03-02T06:00:00Z,41,1,D,2021-03-01T12:00:01.000Z,,Y\n";
        let batch = EpexAdapter::current()
            .parse_csv(csv.as_bytes(), Path::new("current.csv"))
            .unwrap();

        assert_eq!(batch.events.len(), 1);
        let event = &batch.events[0];
        assert_eq!(event.order_id, 11);
        assert_eq!(event.quantity, Decimal::new(35, 1));
        assert_eq!(
            event.delivery_start,
            Utc.with_ymd_and_hms(2021, 3, 2, 5, 0, 0).unwrap()
        );
        assert_eq!(batch.stats.products_dropped, 2);
    }

    #[test]
    fn test_current_delete_tolerates_empty_price() {
        let csv = "preamble\n\
OrderId,InitialId,Side,Product,DeliveryStart,Price,Quantity,ActionCode,TransactionTime,ValidityTime,UserDefinedBlock\n\
5,5,SELL,Intraday_Hour_Power,2021-03-02T05:00:00Z,,,D,2021-03-01T12:00:00.000Z,,N\n";
        let batch = EpexAdapter::current()
            .parse_csv(csv.as_bytes(), Path::new("current.csv"))
            .unwrap();
        assert_eq!(batch.events.len(), 1);
        assert_eq!(batch.events[0].action, Action::Delete);
        assert_eq!(batch.events[0].price, Decimal::ZERO);
    }

    #[test]
    fn test_current_delete_without_delivery_start_kept() {
        let csv = "preamble\n\
OrderId,InitialId,ParentId,Side,Product,DeliveryStart,DeliveryEnd,Price,Quantity,ActionCode,TransactionTime,ValidityTime,UserDefinedBlock\n\
6,6,,SELL,XBID_Hour_Power,,2021-03-02T06:00:00Z,,,D,2021-03-01T12:00:00.000Z,,N\n\
7,7,,SELL,XBID_Hour_Power,2021-03-02T05:00:00Z,2021-03-02T08:00:00Z,,,D,2021-03-01T12:00:00.000Z,,N\n";
        let batch = EpexAdapter::current()
            .parse_csv(csv.as_bytes(), Path::new("current.csv"))
            .unwrap();

        // the cancel keeps its transaction time as delivery start
        assert_eq!(batch.events.len(), 1);
        let event = &batch.events[0];
        assert_eq!(event.order_id, 6);
        assert_eq!(event.action, Action::Delete);
        assert_eq!(event.delivery_start, event.transaction_time);
        // a parsed start still gets the duration check
        assert_eq!(batch.stats.products_dropped, 1);
    }

    #[test]
    fn test_locate_uses_monthly_folder() {
        let root = std::env::temp_dir().join(format!("epex_locate_{}", std::process::id()));
        let dir = root.join("2021").join("03");
        std::fs::create_dir_all(&dir).unwrap();
        let name = "Continuous_Orders-DE-20210302-20210303T000000000Z.csv.zip";
        std::fs::write(dir.join(name), b"").unwrap();

        let date = NaiveDate::from_ymd_opt(2021, 3, 2).unwrap();
        let files = EpexAdapter::current().locate(&root, date).unwrap();
        assert_eq!(files, vec![dir.join(name)]);

        // the legacy marker does not match current files
        assert!(EpexAdapter::legacy().locate(&root, date).is_err());

        let _ = std::fs::remove_dir_all(&root);
    }
}

//! Core data types for raw order events and resolved validity intervals.
//!
//! Raw events are what a feed adapter produces from one exchange file;
//! intervals are what the resolver hands to the day-window assembler and,
//! eventually, the output store.

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Exchange-assigned order identifier.
pub type OrderId = i64;

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    /// Buy order (bid)
    Buy,
    /// Sell order (ask)
    Sell,
}

impl Side {
    /// Parse a raw side literal (case-insensitive `BUY`/`SELL`, `B`/`S`).
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case("buy") || raw.eq_ignore_ascii_case("b") {
            Some(Side::Buy)
        } else if raw.eq_ignore_ascii_case("sell") || raw.eq_ignore_ascii_case("s") {
            Some(Side::Sell)
        } else {
            None
        }
    }

    /// Canonical output literal.
    pub fn as_str(self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

/// What a raw message did to its order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    /// New order (or a resolved Change promoted to an active version)
    Add,
    /// Modification closing the active version and opening a successor
    Change,
    /// Cancellation closing the active version
    Delete,
    /// Marks the lineage as an iceberg order
    IcebergMarker,
}

impl Action {
    /// Parse an EPEX action code. Codes outside `A`/`C`/`D`/`I` yield `None`.
    pub fn from_epex_code(code: &str) -> Option<Self> {
        match code.trim() {
            "A" => Some(Action::Add),
            "C" => Some(Action::Change),
            "D" => Some(Action::Delete),
            "I" => Some(Action::IcebergMarker),
            _ => None,
        }
    }

    /// Parse a NordPool action name. Unmapped names yield `None`.
    pub fn from_nordpool(name: &str) -> Option<Self> {
        match name.trim() {
            "UserAdded" => Some(Action::Add),
            "UserModified" => Some(Action::Change),
            "UserDeleted" | "SystemDeleted" => Some(Action::Delete),
            _ => None,
        }
    }
}

/// One normalized message from a raw feed.
///
/// `order_id` identifies the message lineage the exchange mutates;
/// `initial_id` is stable across every version of the logical order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawOrderEvent {
    pub order_id: OrderId,
    pub initial_id: OrderId,
    pub side: Side,
    pub action: Action,
    /// Start of the traded delivery hour
    pub delivery_start: DateTime<Utc>,
    /// When the exchange recorded the message
    pub transaction_time: DateTime<Utc>,
    /// Claimed expiry; `None` means open-ended
    pub validity_time: Option<DateTime<Utc>>,
    pub price: Decimal,
    pub quantity: Decimal,
}

/// Business key used to drop exact duplicate messages.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    order_id: OrderId,
    initial_id: OrderId,
    action: Action,
    validity_time: Option<DateTime<Utc>>,
    price: Decimal,
    quantity: Decimal,
}

impl RawOrderEvent {
    /// Create an event with zero price/quantity and an open validity.
    ///
    /// Delivery start defaults to the transaction time; use the `with_*`
    /// setters to fill in the rest.
    pub fn new(
        order_id: OrderId,
        initial_id: OrderId,
        action: Action,
        side: Side,
        transaction_time: DateTime<Utc>,
    ) -> Self {
        Self {
            order_id,
            initial_id,
            side,
            action,
            delivery_start: transaction_time,
            transaction_time,
            validity_time: None,
            price: Decimal::ZERO,
            quantity: Decimal::ZERO,
        }
    }

    /// Set the claimed validity.
    pub fn with_validity(mut self, validity_time: DateTime<Utc>) -> Self {
        self.validity_time = Some(validity_time);
        self
    }

    /// Set the delivery start.
    pub fn with_delivery_start(mut self, delivery_start: DateTime<Utc>) -> Self {
        self.delivery_start = delivery_start;
        self
    }

    /// Set price and quantity.
    pub fn with_price_quantity(mut self, price: Decimal, quantity: Decimal) -> Self {
        self.price = price;
        self.quantity = quantity;
        self
    }

    /// Key over (order id, initial id, action, validity, price, quantity).
    pub fn dedup_key(&self) -> DedupKey {
        DedupKey {
            order_id: self.order_id,
            initial_id: self.initial_id,
            action: self.action,
            validity_time: self.validity_time,
            price: self.price,
            quantity: self.quantity,
        }
    }

    /// Convert this event into an interval row, keeping its own validity.
    pub fn to_interval(&self) -> OrderInterval {
        OrderInterval {
            initial_id: self.initial_id,
            side: self.side,
            delivery_start: self.delivery_start,
            transaction_time: self.transaction_time,
            validity_time: self.validity_time,
            price: self.price,
            quantity: self.quantity,
        }
    }
}

/// A resolved order version: live in `[transaction_time, validity_time)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderInterval {
    pub initial_id: OrderId,
    pub side: Side,
    pub delivery_start: DateTime<Utc>,
    pub transaction_time: DateTime<Utc>,
    pub validity_time: Option<DateTime<Utc>>,
    pub price: Decimal,
    pub quantity: Decimal,
}

impl OrderInterval {
    /// Calendar date (UTC) the version went live; decides its output partition.
    #[inline]
    pub fn transaction_date(&self) -> NaiveDate {
        self.transaction_time.date_naive()
    }

    /// True unless the interval ends before it starts.
    #[inline]
    pub fn is_well_formed(&self) -> bool {
        self.validity_time
            .map_or(true, |validity| validity >= self.transaction_time)
    }
}

// ============================================================================
// Field parsing and formatting
// ============================================================================

/// Parse a raw timestamp into UTC.
///
/// Accepts RFC 3339 (`2021-03-01T10:00:00.123Z`, offsets allowed) and naive
/// `YYYY-MM-DD[T ]HH:MM:SS[.fff]`, which is read as UTC. Sub-second precision
/// is preserved. Returns `None` for anything else.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    let naive = raw.trim_end_matches('Z');
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(naive, fmt).ok())
        .map(|dt| dt.and_utc())
}

/// Parse a decimal literal, accepting scientific notation.
pub fn parse_decimal(raw: &str) -> Option<Decimal> {
    let raw = raw.trim();
    Decimal::from_str(raw)
        .or_else(|_| Decimal::from_scientific(raw))
        .ok()
}

/// `YYYY-MM-DDTHH:MM:SS.mmmZ`
pub fn format_timestamp_millis(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// `YYYY-MM-DDTHH:MM:SSZ`
pub fn format_timestamp_seconds(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};

    #[test]
    fn test_side_parse() {
        assert_eq!(Side::parse("buy"), Some(Side::Buy));
        assert_eq!(Side::parse(" SELL "), Some(Side::Sell));
        assert_eq!(Side::parse("S"), Some(Side::Sell));
        assert_eq!(Side::parse("hold"), None);
        assert_eq!(Side::Buy.as_str(), "BUY");
    }

    #[test]
    fn test_action_codes() {
        assert_eq!(Action::from_epex_code("A"), Some(Action::Add));
        assert_eq!(Action::from_epex_code("I"), Some(Action::IcebergMarker));
        assert_eq!(Action::from_epex_code("X"), None);
        assert_eq!(Action::from_nordpool("SystemDeleted"), Some(Action::Delete));
        assert_eq!(Action::from_nordpool("UserModified"), Some(Action::Change));
        assert_eq!(Action::from_nordpool("UserHibernated"), None);
    }

    #[test]
    fn test_parse_timestamp_variants() {
        let with_fraction = parse_timestamp("2021-03-01T10:15:30.123Z").unwrap();
        assert_eq!(with_fraction.nanosecond(), 123_000_000);

        let plain = parse_timestamp("2020-05-01T00:00:00Z").unwrap();
        assert_eq!(plain, Utc.with_ymd_and_hms(2020, 5, 1, 0, 0, 0).unwrap());

        let offset = parse_timestamp("2023-01-01T01:00:00+01:00").unwrap();
        assert_eq!(offset, Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap());

        let naive = parse_timestamp("2023-01-01 12:00:00.5").unwrap();
        assert_eq!(naive.nanosecond(), 500_000_000);

        assert!(parse_timestamp("").is_none());
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn test_timestamp_formatting() {
        let ts = parse_timestamp("2021-03-01T10:15:30.123456Z").unwrap();
        assert_eq!(format_timestamp_millis(&ts), "2021-03-01T10:15:30.123Z");
        assert_eq!(format_timestamp_seconds(&ts), "2021-03-01T10:15:30Z");

        let whole = parse_timestamp("2021-03-01T10:15:30Z").unwrap();
        assert_eq!(format_timestamp_millis(&whole), "2021-03-01T10:15:30.000Z");
    }

    #[test]
    fn test_parse_decimal() {
        assert_eq!(parse_decimal("45.10"), Some(Decimal::new(4510, 2)));
        assert_eq!(parse_decimal("-3"), Some(Decimal::new(-3, 0)));
        assert_eq!(parse_decimal("1e-1"), Some(Decimal::new(1, 1)));
        assert_eq!(parse_decimal("abc"), None);
    }

    #[test]
    fn test_dedup_key_ignores_transaction_time() {
        let t0 = Utc.with_ymd_and_hms(2021, 1, 1, 10, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2021, 1, 1, 10, 0, 1).unwrap();
        let a = RawOrderEvent::new(1, 1, Action::Add, Side::Buy, t0);
        let b = RawOrderEvent::new(1, 1, Action::Add, Side::Buy, t1);
        assert_eq!(a.dedup_key(), b.dedup_key());

        let c = b.clone().with_price_quantity(Decimal::ONE, Decimal::ONE);
        assert_ne!(a.dedup_key(), c.dedup_key());
    }

    #[test]
    fn test_interval_well_formed() {
        let t0 = Utc.with_ymd_and_hms(2021, 1, 1, 10, 0, 0).unwrap();
        let mut interval = RawOrderEvent::new(1, 1, Action::Add, Side::Sell, t0).to_interval();
        assert!(interval.is_well_formed());
        interval.validity_time = Some(t0 - chrono::Duration::seconds(1));
        assert!(!interval.is_well_formed());
        assert_eq!(interval.transaction_date(), t0.date_naive());
    }
}

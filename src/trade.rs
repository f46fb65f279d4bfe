//! Core trade record and timestamp types
use super::error::{LedgerError, Result};
use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;
use std::fmt;

/// Externally supplied trade identifier. Never reused within a ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TradeId(pub u64);

impl TradeId {
    pub fn to_be_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for TradeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for TradeId {
    fn from(value: u64) -> Self {
        TradeId(value)
    }
}

#[derive(Debug, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

impl<T: TimeZone> PartialEq for TimeStamp<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl<T: TimeZone> Eq for TimeStamp<T> {}

impl<T: TimeZone> PartialOrd for TimeStamp<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: TimeZone> Ord for TimeStamp<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn new_with(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Result<Self> {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .single()
            .map(Self)
            .ok_or_else(|| {
                LedgerError::InvalidArgument(format!(
                    "{year}-{month}-{day} {hour}:{min}:{sec} is not a valid utc time"
                ))
            })
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
    pub fn unix_seconds(&self) -> i64 {
        self.0.timestamp()
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TimeStamp<Utc> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> std::result::Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(
        d: &mut minicbor::Decoder<'b>,
        _: &mut C,
    ) -> std::result::Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

impl<C> minicbor::Encode<C> for TradeId {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> std::result::Result<(), minicbor::encode::Error<W::Error>> {
        e.u64(self.0)?.ok()
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TradeId {
    fn decode(
        d: &mut minicbor::Decoder<'b>,
        _: &mut C,
    ) -> std::result::Result<Self, minicbor::decode::Error> {
        Ok(TradeId(d.u64()?))
    }
}

/// Source of acceptance timestamps. Ties are allowed; the ledger position is the
/// authoritative order.
pub trait Clock: Send + Sync {
    fn now(&self) -> TimeStamp<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> TimeStamp<Utc> {
        TimeStamp::new()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    current: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: TimeStamp<Utc>) -> Self {
        Self {
            current: Mutex::new(start.to_datetime_utc()),
        }
    }
    pub fn set(&self, to: TimeStamp<Utc>) {
        *self.current.lock() = to.to_datetime_utc();
    }
    pub fn advance(&self, by: Duration) {
        let mut current = self.current.lock();
        *current += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> TimeStamp<Utc> {
        TimeStamp(*self.current.lock())
    }
}

/// The caller-supplied half of a trade; the ledger adds the timestamp on acceptance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TradeDetails {
    pub trade_id: TradeId,
    pub symbol: String,
    pub price_cents: u64,
    pub quantity: u64,
    pub buy_order_id: u64,
    pub sell_order_id: u64,
}

impl TradeDetails {
    pub fn new(trade_id: impl Into<TradeId>) -> Self {
        Self {
            trade_id: trade_id.into(),
            ..Self::default()
        }
    }
    pub fn set_symbol(mut self, symbol: &str) -> Self {
        self.symbol = symbol.to_string();
        self
    }
    pub fn set_price_cents(mut self, cents: u64) -> Self {
        self.price_cents = cents;
        self
    }
    pub fn set_quantity(mut self, quantity: u64) -> Self {
        self.quantity = quantity;
        self
    }
    pub fn set_buy_order_id(mut self, id: u64) -> Self {
        self.buy_order_id = id;
        self
    }
    pub fn set_sell_order_id(mut self, id: u64) -> Self {
        self.sell_order_id = id;
        self
    }
    pub fn finalise(self, timestamp: TimeStamp<Utc>) -> Trade {
        Trade {
            trade_id: self.trade_id,
            symbol: self.symbol,
            price_cents: self.price_cents,
            quantity: self.quantity,
            buy_order_id: self.buy_order_id,
            sell_order_id: self.sell_order_id,
            timestamp,
        }
    }
}

/// An executed trade as accepted into the ledger. Fields follow the stored layout.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Trade {
    #[n(0)]
    pub trade_id: TradeId,
    #[n(1)]
    pub symbol: String,
    #[n(2)]
    pub price_cents: u64, // price scaled x100
    #[n(3)]
    pub quantity: u64,
    #[n(4)]
    pub buy_order_id: u64,
    #[n(5)]
    pub sell_order_id: u64,
    #[n(6)]
    pub timestamp: TimeStamp<Utc>, // assigned by the ledger on acceptance
}

impl Trade {
    /// Canonical CBOR encoding, used both for storage and the digest.
    pub fn encode(&self) -> Result<Vec<u8>> {
        minicbor::to_vec(self).map_err(|e| LedgerError::Encode(e.to_string()))
    }
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(minicbor::decode(bytes)?)
    }
    pub fn digest(&self) -> Result<String> {
        Ok(sha256::digest(&self.encode()?))
    }
}

/// What the caller gets back from a successful `record_trade`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeReceipt {
    pub position: u64,
    pub timestamp: TimeStamp<Utc>,
    pub digest: String,
}

//! Raw provider records, canonical collected records and the collection window.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start_ms: i64,
    /// Inclusive for returned records, exclusive as the cursor bound.
    pub end_ms: i64,
}

impl TimeWindow {
    pub const fn new(start_ms: i64, end_ms: i64) -> Self {
        Self { start_ms, end_ms }
    }

    pub fn is_empty(self) -> bool {
        self.start_ms >= self.end_ms
    }

    pub fn contains(self, timestamp_ms: i64) -> bool {
        timestamp_ms >= self.start_ms && timestamp_ms <= self.end_ms
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordKind {
    Ohlcv,
    Funding,
}

impl RecordKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ohlcv => "ohlcv",
            Self::Funding => "funding",
        }
    }
}

/// One candle as returned by a provider: `(timestamp, open, high, low, close, volume)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawCandle {
    pub timestamp_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFundingEvent {
    pub timestamp_ms: i64,
    pub funding_rate: f64,
    pub mark_price: Option<f64>,
    pub premium: Option<f64>,
    /// Untouched provider payload for fields without a canonical column.
    pub info: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRecord {
    pub timestamp_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub symbol: String,
    pub exchange: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundingRecord {
    pub timestamp_ms: i64,
    pub funding_rate: f64,
    pub symbol: String,
    pub exchange: String,
    pub mark_price: Option<f64>,
    pub premium: Option<f64>,
    pub info: serde_json::Value,
}

/// A provider-native record the collection engine can page over.
pub trait RawRecord {
    type Collected;

    fn timestamp_ms(&self) -> i64;

    /// Converts into the canonical shape, tagging provenance.
    fn into_collected(self, symbol: &str, exchange: &str) -> Self::Collected;
}

impl RawRecord for RawCandle {
    type Collected = PriceRecord;

    fn timestamp_ms(&self) -> i64 {
        self.timestamp_ms
    }

    fn into_collected(self, symbol: &str, exchange: &str) -> PriceRecord {
        PriceRecord {
            timestamp_ms: self.timestamp_ms,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
            symbol: symbol.to_string(),
            exchange: exchange.to_string(),
        }
    }
}

impl RawRecord for RawFundingEvent {
    type Collected = FundingRecord;

    fn timestamp_ms(&self) -> i64 {
        self.timestamp_ms
    }

    fn into_collected(self, symbol: &str, exchange: &str) -> FundingRecord {
        FundingRecord {
            timestamp_ms: self.timestamp_ms,
            funding_rate: self.funding_rate,
            symbol: symbol.to_string(),
            exchange: exchange.to_string(),
            mark_price: self.mark_price,
            premium: self.premium,
            info: self.info,
        }
    }
}

//! Exchange provider boundary: the paginated fetch primitives the engine consumes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::records::{RawCandle, RawFundingEvent};
use crate::timeframe::Timeframe;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExchangeId {
    BinanceFutures,
    BinanceSpot,
    Hyperliquid,
}

pub const ALL_EXCHANGES: [ExchangeId; 3] = [
    ExchangeId::BinanceFutures,
    ExchangeId::BinanceSpot,
    ExchangeId::Hyperliquid,
];

impl ExchangeId {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BinanceFutures => "binance_futures",
            Self::BinanceSpot => "binance_spot",
            Self::Hyperliquid => "hyperliquid",
        }
    }
}

impl fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExchangeId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "binance_futures" => Ok(Self::BinanceFutures),
            "binance_spot" => Ok(Self::BinanceSpot),
            "hyperliquid" => Ok(Self::Hyperliquid),
            other => Err(format!("unsupported exchange: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketInfo {
    pub symbol: String,
    pub base: String,
    pub quote: String,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("{0} is not supported by this exchange")]
    Unsupported(String),
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("HTTP request failed for {url}: status {status}: {body}")]
    HttpStatus {
        url: String,
        status: u16,
        body: String,
    },
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl ProviderError {
    /// Rate limits and network faults are expected to clear after a delay.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited(_) | Self::Network(_))
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedResponse(message.into())
    }
}

/// One exchange's paginated history endpoints.
///
/// Implementations must be safe to share between worker threads; any rate
/// limiting happens inside the implementation so every caller sharing one
/// instance shares one limiter.
pub trait MarketDataProvider: Send + Sync {
    fn exchange(&self) -> ExchangeId;

    fn list_markets(&self) -> Result<Vec<MarketInfo>, ProviderError>;

    /// Candles with `timestamp >= since_ms`, ascending, at most `limit`.
    fn fetch_ohlcv(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        since_ms: i64,
        limit: usize,
    ) -> Result<Vec<RawCandle>, ProviderError>;

    fn fetch_funding_history(
        &self,
        symbol: &str,
        since_ms: i64,
        limit: usize,
    ) -> Result<Vec<RawFundingEvent>, ProviderError> {
        let _ = (symbol, since_ms, limit);
        Err(ProviderError::Unsupported(
            "fetch_funding_history".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_rate_limit_and_network_errors_are_transient() {
        assert!(ProviderError::RateLimited("429".to_string()).is_transient());
        assert!(ProviderError::Network("reset".to_string()).is_transient());
        assert!(!ProviderError::Unsupported("x".to_string()).is_transient());
        assert!(!ProviderError::Authentication("x".to_string()).is_transient());
        assert!(!ProviderError::malformed("x").is_transient());
        assert!(!ProviderError::HttpStatus {
            url: "u".to_string(),
            status: 400,
            body: String::new(),
        }
        .is_transient());
    }

    #[test]
    fn exchange_ids_parse_case_insensitively() {
        for id in ALL_EXCHANGES {
            assert_eq!(id.as_str().parse::<ExchangeId>().unwrap(), id);
            assert_eq!(
                id.as_str().to_uppercase().parse::<ExchangeId>().unwrap(),
                id
            );
        }
        assert!("kraken".parse::<ExchangeId>().is_err());
    }
}

//! Run configuration for the collector binary, read from `MHC_*` variables.

use std::env;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::collector::CollectionPlan;
use crate::cursor::DEFAULT_PAGE_LIMIT;
use crate::http::HttpConfig;
use crate::provider::{ExchangeId, ALL_EXCHANGES};
use crate::records::TimeWindow;
use crate::timeframe::Timeframe;
use crate::timestamp::{normalize_timestamp, TimestampError};

const DAY_MS: i64 = 86_400_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {var}={value:?}: {reason}")]
    InvalidValue {
        var: &'static str,
        value: String,
        reason: String,
    },
    #[error("invalid collection bound: {0}")]
    Timestamp(#[from] TimestampError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub store_path: PathBuf,
    pub exchanges: Vec<ExchangeId>,
    pub timeframe: Timeframe,
    /// Raw window bounds: epoch milliseconds or anything [`normalize_timestamp`] accepts.
    pub start: Option<String>,
    pub end: Option<String>,
    pub lookback_days: u32,
    /// Applies to every exchange without its own `MHC_SYMBOLS_<EXCHANGE>` list.
    pub symbols: Option<Vec<String>>,
    pub exchange_symbols: Vec<(ExchangeId, Vec<String>)>,
    pub max_symbols: Option<usize>,
    pub concurrency: usize,
    pub page_limit: usize,
    pub http: HttpConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from("data/market_history.sqlite"),
            exchanges: ALL_EXCHANGES.to_vec(),
            timeframe: Timeframe::default(),
            start: None,
            end: None,
            lookback_days: 365,
            symbols: None,
            exchange_symbols: Vec::new(),
            max_symbols: None,
            concurrency: 1,
            page_limit: DEFAULT_PAGE_LIMIT,
            http: HttpConfig::default(),
        }
    }
}

impl RunConfig {
    /// Explicit symbols for `exchange`, or `None` to select from listed markets.
    pub fn explicit_symbols(&self, exchange: ExchangeId) -> Option<&[String]> {
        self.exchange_symbols
            .iter()
            .find(|(id, _)| *id == exchange)
            .map(|(_, symbols)| symbols.as_slice())
            .or(self.symbols.as_deref())
    }

    /// Resolves the window against `now`: the end defaults to `now` and the
    /// start to `lookback_days` before the end.
    pub fn collection_plan(&self, now: DateTime<Utc>) -> Result<CollectionPlan, ConfigError> {
        let end_ms = match self.end.as_deref() {
            Some(raw) => parse_bound(raw)?,
            None => now.timestamp_millis(),
        };
        let start_ms = match self.start.as_deref() {
            Some(raw) => parse_bound(raw)?,
            None => end_ms.saturating_sub(i64::from(self.lookback_days) * DAY_MS),
        };

        Ok(
            CollectionPlan::new(TimeWindow::new(start_ms, end_ms), self.timeframe)
                .with_page_limit(self.page_limit),
        )
    }
}

pub fn run_config_from_env() -> Result<RunConfig, ConfigError> {
    let mut config = RunConfig::default();

    if let Some(path) = non_empty_var("MHC_STORE_PATH") {
        config.store_path = PathBuf::from(path);
    }

    if let Some(raw) = non_empty_var("MHC_EXCHANGES") {
        let mut exchanges = Vec::new();
        for item in split_list(&raw) {
            let id = item.parse::<ExchangeId>().map_err(|reason| ConfigError::InvalidValue {
                var: "MHC_EXCHANGES",
                value: raw.clone(),
                reason,
            })?;
            if !exchanges.contains(&id) {
                exchanges.push(id);
            }
        }
        config.exchanges = exchanges;
    }

    if let Some(raw) = non_empty_var("MHC_TIMEFRAME") {
        config.timeframe = Timeframe::parse(&raw).map_err(|err| ConfigError::InvalidValue {
            var: "MHC_TIMEFRAME",
            value: raw.clone(),
            reason: err.to_string(),
        })?;
    }

    config.start = non_empty_var("MHC_START");
    config.end = non_empty_var("MHC_END");

    if let Some(days) = parse_number::<u32>("MHC_LOOKBACK_DAYS")? {
        config.lookback_days = days;
    }

    config.symbols = non_empty_var("MHC_SYMBOLS").map(|raw| split_list(&raw));
    for exchange in ALL_EXCHANGES {
        let var = format!("MHC_SYMBOLS_{}", exchange.as_str().to_ascii_uppercase());
        if let Some(raw) = non_empty_var(&var) {
            config.exchange_symbols.push((exchange, split_list(&raw)));
        }
    }

    config.max_symbols = parse_number::<usize>("MHC_MAX_SYMBOLS")?;

    if let Some(concurrency) = parse_number::<usize>("MHC_CONCURRENCY")? {
        config.concurrency = concurrency.max(1);
    }
    if let Some(limit) = parse_number::<usize>("MHC_PAGE_LIMIT")? {
        config.page_limit = limit.max(1);
    }
    if let Some(timeout_ms) = parse_number::<u64>("MHC_HTTP_TIMEOUT_MS")? {
        config.http.timeout_ms = timeout_ms;
    }
    if let Some(interval_ms) = parse_number::<u64>("MHC_MIN_REQUEST_INTERVAL_MS")? {
        config.http.min_request_interval_ms = interval_ms;
    }

    Ok(config)
}

/// Env values are text, so bare integers are taken as epoch milliseconds.
fn parse_bound(raw: &str) -> Result<i64, TimestampError> {
    match raw.trim().parse::<i64>() {
        Ok(ms) => normalize_timestamp(ms),
        Err(_) => normalize_timestamp(raw),
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_number<T>(var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match non_empty_var(var) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|err| ConfigError::InvalidValue {
                var,
                value: raw.clone(),
                reason: err.to_string(),
            }),
    }
}

//! MHC core crate: historical OHLCV and funding-rate collection.
//!
//! Current implemented scope:
//! - window normalization and timeframe parsing
//! - cursor-driven pagination with stall recovery and window clipping
//! - bounded retry with structured outcomes
//! - Binance spot, Binance USD-M futures and Hyperliquid providers
//! - idempotent SQLite persistence and per-exchange orchestration

mod assemble;
mod binance;
mod collector;
mod config;
mod cursor;
mod http;
mod hyperliquid;
mod observability;
mod provider;
mod records;
mod retry;
mod store;
mod timeframe;
mod timestamp;

pub use assemble::{assemble, CollectionResult};
pub use binance::{BinanceMarket, BinanceProvider};
pub use collector::{
    collect_exchange, collect_funding, collect_prices, select_symbols, CollectionPlan,
    ExchangeRunSummary, KindReport, SymbolReport, DEFAULT_QUOTES,
};
pub use config::{run_config_from_env, ConfigError, RunConfig};
pub use cursor::{CursorWalk, SeriesCadence, SeriesPolicy, Termination, DEFAULT_PAGE_LIMIT};
pub use http::{
    check_status, decode_json, HttpConfig, HttpResponse, HttpTransport, ReqwestTransport,
};
pub use hyperliquid::HyperliquidProvider;
pub use observability::{
    init_logging, log_app_start, log_exchange_summary, log_run_config, log_symbols_selected,
    logging_config_from_env, LogFormat, LoggingConfig, LoggingInitError,
};
pub use provider::{ExchangeId, MarketDataProvider, MarketInfo, ProviderError, ALL_EXCHANGES};
pub use records::{
    FundingRecord, PriceRecord, RawCandle, RawFundingEvent, RawRecord, RecordKind, TimeWindow,
};
pub use retry::{collect_series, CollectionOutcome, RetryPolicy, SeriesRequest};
pub use store::{RecordStore, SqliteRecordStore, StoreError};
pub use timeframe::{timeframe_duration_ms, Timeframe, TimeframeError, TimeframeUnit};
pub use timestamp::{normalize_timestamp, TimestampError, TimestampInput};

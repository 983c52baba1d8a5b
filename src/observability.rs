//! Logging setup for the collector plus the run-level events the binary emits.
//!
//! Library modules log their own `collect.*`, `run.*` and `store.*` events;
//! the helpers here cover what only the binary knows about.

use std::env;

use thiserror::Error;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::collector::{CollectionPlan, ExchangeRunSummary};
use crate::config::RunConfig;
use crate::provider::ExchangeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
    /// Single-line human output, for long unattended runs.
    Compact,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            include_target: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum LoggingInitError {
    #[error("logging already initialized: {0}")]
    AlreadyInitialized(#[from] tracing::subscriber::SetGlobalDefaultError),
}

pub fn logging_config_from_env() -> LoggingConfig {
    let mut config = LoggingConfig::default();

    if let Ok(level) = env::var("MHC_LOG_LEVEL") {
        let trimmed = level.trim();
        if !trimmed.is_empty() {
            config.level = trimmed.to_string();
        }
    }

    if let Ok(format) = env::var("MHC_LOG_FORMAT") {
        if let Some(parsed) = parse_log_format(&format) {
            config.format = parsed;
        }
    }

    if let Ok(include_target) = env::var("MHC_LOG_TARGET") {
        if let Some(parsed) = parse_bool(&include_target) {
            config.include_target = parsed;
        }
    }

    config
}

pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingInitError> {
    let env_filter =
        EnvFilter::try_new(config.level.clone()).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(config.include_target)
        .with_ansi(!matches!(config.format, LogFormat::Json));

    match config.format {
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish())?,
        LogFormat::Pretty => tracing::subscriber::set_global_default(builder.pretty().finish())?,
        LogFormat::Compact => {
            tracing::subscriber::set_global_default(builder.compact().finish())?
        }
    }

    Ok(())
}

pub fn log_app_start(config: &LoggingConfig) {
    info!(
        component = "mhc_collect",
        event = "app.start",
        log_level = %config.level,
        log_format = ?config.format,
        include_target = config.include_target
    );
}

pub fn log_run_config(config: &RunConfig, plan: &CollectionPlan) {
    let exchanges: Vec<&str> = config.exchanges.iter().map(|id| id.as_str()).collect();
    info!(
        component = "mhc_collect",
        event = "app.config",
        store_path = %config.store_path.display(),
        exchanges = %exchanges.join(","),
        timeframe = %plan.timeframe,
        start_ms = plan.window.start_ms,
        end_ms = plan.window.end_ms,
        page_limit = plan.page_limit,
        concurrency = config.concurrency,
        max_symbols = ?config.max_symbols
    );
}

/// `source` says where the symbol list came from: `explicit` or `markets`.
pub fn log_symbols_selected(exchange: ExchangeId, source: &str, symbols: &[String]) {
    if symbols.is_empty() {
        warn!(
            component = "mhc_collect",
            event = "symbols.selected",
            exchange = exchange.as_str(),
            source,
            count = 0,
            "no symbols to collect"
        );
    } else {
        info!(
            component = "mhc_collect",
            event = "symbols.selected",
            exchange = exchange.as_str(),
            source,
            count = symbols.len()
        );
    }
}

pub fn log_exchange_summary(summary: &ExchangeRunSummary) {
    let failed: Vec<String> = summary
        .symbols
        .iter()
        .flat_map(|report| {
            [("funding", &report.funding), ("ohlcv", &report.prices)]
                .into_iter()
                .filter(|(_, kind)| kind.is_failure())
                .map(move |(kind, outcome)| {
                    format!("{}:{kind}:{}", report.symbol, outcome.as_str())
                })
        })
        .collect();

    if failed.is_empty() {
        info!(
            component = "mhc_collect",
            event = "exchange.summary",
            exchange = summary.exchange.as_str(),
            symbols = summary.symbols.len(),
            stored_records = summary.stored_records()
        );
    } else {
        warn!(
            component = "mhc_collect",
            event = "exchange.summary",
            exchange = summary.exchange.as_str(),
            symbols = summary.symbols.len(),
            stored_records = summary.stored_records(),
            failures = failed.len(),
            failed = %failed.join(",")
        );
    }
}

fn parse_log_format(raw: &str) -> Option<LogFormat> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "json" => Some(LogFormat::Json),
        "pretty" => Some(LogFormat::Pretty),
        "compact" | "line" => Some(LogFormat::Compact),
        _ => None,
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

use std::sync::Mutex;

use chrono::Utc;
use mhc::{
    collect_exchange, init_logging, log_app_start, log_exchange_summary, log_run_config,
    log_symbols_selected, logging_config_from_env, run_config_from_env, select_symbols,
    BinanceMarket, BinanceProvider, ExchangeId, HttpConfig, HyperliquidProvider,
    MarketDataProvider, ProviderError, SqliteRecordStore, DEFAULT_QUOTES,
};
use tracing::error;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging = logging_config_from_env();
    init_logging(&logging)?;
    log_app_start(&logging);

    let config = run_config_from_env()?;
    let plan = config.collection_plan(Utc::now())?;
    log_run_config(&config, &plan);

    let store = Mutex::new(SqliteRecordStore::open(&config.store_path)?);

    for exchange in &config.exchanges {
        let provider = build_provider(*exchange, &config.http)?;

        let (source, symbols) = match config.explicit_symbols(*exchange) {
            Some(symbols) => (
                "explicit",
                symbols
                    .iter()
                    .take(config.max_symbols.unwrap_or(usize::MAX))
                    .cloned()
                    .collect::<Vec<_>>(),
            ),
            None => match provider.list_markets() {
                Ok(markets) => (
                    "markets",
                    select_symbols(&markets, &DEFAULT_QUOTES, config.max_symbols),
                ),
                Err(err) => {
                    // Skip this exchange; the remaining ones still run.
                    error!(
                        component = "mhc_collect",
                        event = "symbols.failed",
                        exchange = exchange.as_str(),
                        error = %err
                    );
                    continue;
                }
            },
        };
        log_symbols_selected(*exchange, source, &symbols);

        let summary = collect_exchange(
            provider.as_ref(),
            &store,
            &symbols,
            &plan,
            config.concurrency,
            std::thread::sleep,
        );
        log_exchange_summary(&summary);
    }

    Ok(())
}

fn build_provider(
    exchange: ExchangeId,
    http: &HttpConfig,
) -> Result<Box<dyn MarketDataProvider>, ProviderError> {
    Ok(match exchange {
        ExchangeId::BinanceFutures => {
            Box::new(BinanceProvider::new(BinanceMarket::UsdmFutures, http)?)
        }
        ExchangeId::BinanceSpot => Box::new(BinanceProvider::new(BinanceMarket::Spot, http)?),
        ExchangeId::Hyperliquid => Box::new(HyperliquidProvider::new(http)?),
    })
}

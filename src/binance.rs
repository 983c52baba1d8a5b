//! Binance spot and USD-M futures history endpoints.

use serde_json::Value;

use crate::http::{
    decode_json, json_f64, json_i64, json_opt_f64, HttpConfig, HttpTransport, ReqwestTransport,
};
use crate::provider::{ExchangeId, MarketDataProvider, MarketInfo, ProviderError};
use crate::records::{RawCandle, RawFundingEvent};
use crate::timeframe::Timeframe;

const SPOT_BASE_URL: &str = "https://api.binance.com/api/v3";
const FUTURES_BASE_URL: &str = "https://fapi.binance.com/fapi/v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinanceMarket {
    Spot,
    UsdmFutures,
}

impl BinanceMarket {
    fn base_url(self) -> &'static str {
        match self {
            Self::Spot => SPOT_BASE_URL,
            Self::UsdmFutures => FUTURES_BASE_URL,
        }
    }

    fn exchange(self) -> ExchangeId {
        match self {
            Self::Spot => ExchangeId::BinanceSpot,
            Self::UsdmFutures => ExchangeId::BinanceFutures,
        }
    }
}

pub struct BinanceProvider {
    market: BinanceMarket,
    base_url: String,
    transport: Box<dyn HttpTransport>,
}

impl BinanceProvider {
    pub fn new(market: BinanceMarket, cfg: &HttpConfig) -> Result<Self, ProviderError> {
        Ok(Self::with_transport(
            market,
            Box::new(ReqwestTransport::new(cfg)?),
        ))
    }

    pub fn with_transport(market: BinanceMarket, transport: Box<dyn HttpTransport>) -> Self {
        Self {
            market,
            base_url: market.base_url().to_string(),
            transport,
        }
    }

    fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value, ProviderError> {
        let url = format!("{}/{path}", self.base_url);
        let response = self.transport.get(&url, query)?;
        decode_json(&url, &response)
    }
}

impl MarketDataProvider for BinanceProvider {
    fn exchange(&self) -> ExchangeId {
        self.market.exchange()
    }

    fn list_markets(&self) -> Result<Vec<MarketInfo>, ProviderError> {
        let payload = self.get_json("exchangeInfo", &[])?;
        parse_exchange_info(&payload)
    }

    fn fetch_ohlcv(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        since_ms: i64,
        limit: usize,
    ) -> Result<Vec<RawCandle>, ProviderError> {
        let payload = self.get_json(
            "klines",
            &[
                ("symbol", symbol.to_string()),
                ("interval", timeframe.to_string()),
                ("startTime", since_ms.to_string()),
                ("limit", limit.to_string()),
            ],
        )?;
        parse_klines(&payload)
    }

    fn fetch_funding_history(
        &self,
        symbol: &str,
        since_ms: i64,
        limit: usize,
    ) -> Result<Vec<RawFundingEvent>, ProviderError> {
        if self.market == BinanceMarket::Spot {
            return Err(ProviderError::Unsupported(
                "fetch_funding_history on binance spot".to_string(),
            ));
        }

        let payload = self.get_json(
            "fundingRate",
            &[
                ("symbol", symbol.to_string()),
                ("startTime", since_ms.to_string()),
                ("limit", limit.to_string()),
            ],
        )?;
        parse_funding_rates(&payload)
    }
}

fn parse_klines(payload: &Value) -> Result<Vec<RawCandle>, ProviderError> {
    let rows = payload
        .as_array()
        .ok_or_else(|| ProviderError::malformed("klines: expected top-level array"))?;
    rows.iter().map(parse_kline_row).collect()
}

fn parse_kline_row(value: &Value) -> Result<RawCandle, ProviderError> {
    let row = value
        .as_array()
        .ok_or_else(|| ProviderError::malformed("kline row: expected array"))?;
    if row.len() < 6 {
        return Err(ProviderError::malformed(format!(
            "kline row has {} columns, expected at least 6",
            row.len()
        )));
    }

    Ok(RawCandle {
        timestamp_ms: json_i64(&row[0], "open_time")?,
        open: json_f64(&row[1], "open")?,
        high: json_f64(&row[2], "high")?,
        low: json_f64(&row[3], "low")?,
        close: json_f64(&row[4], "close")?,
        volume: json_f64(&row[5], "volume")?,
    })
}

fn parse_funding_rates(payload: &Value) -> Result<Vec<RawFundingEvent>, ProviderError> {
    let rows = payload
        .as_array()
        .ok_or_else(|| ProviderError::malformed("fundingRate: expected top-level array"))?;

    rows.iter()
        .map(|row| {
            let time = row
                .get("fundingTime")
                .ok_or_else(|| ProviderError::malformed("fundingRate row: missing fundingTime"))?;
            let rate = row
                .get("fundingRate")
                .ok_or_else(|| ProviderError::malformed("fundingRate row: missing fundingRate"))?;
            Ok(RawFundingEvent {
                timestamp_ms: json_i64(time, "fundingTime")?,
                funding_rate: json_f64(rate, "fundingRate")?,
                mark_price: json_opt_f64(row.get("markPrice"), "markPrice")?,
                premium: None,
                info: row.clone(),
            })
        })
        .collect()
}

fn parse_exchange_info(payload: &Value) -> Result<Vec<MarketInfo>, ProviderError> {
    let symbols = payload
        .get("symbols")
        .and_then(Value::as_array)
        .ok_or_else(|| ProviderError::malformed("exchangeInfo: missing symbols array"))?;

    let mut markets = Vec::with_capacity(symbols.len());
    for entry in symbols {
        let field = |name: &str| -> Result<String, ProviderError> {
            entry
                .get(name)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| {
                    ProviderError::malformed(format!("exchangeInfo symbol: missing {name}"))
                })
        };

        // Delivery contracts carry no funding; only perpetuals are collected on futures.
        let perpetual = entry
            .get("contractType")
            .and_then(Value::as_str)
            .map(|kind| kind == "PERPETUAL")
            .unwrap_or(true);

        markets.push(MarketInfo {
            symbol: field("symbol")?,
            base: field("baseAsset")?,
            quote: field("quoteAsset")?,
            active: perpetual && field("status")? == "TRADING",
        });
    }

    Ok(markets)
}

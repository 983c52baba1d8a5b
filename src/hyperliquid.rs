//! Hyperliquid perpetuals through the public `/info` endpoint.
//!
//! Every query is a JSON `POST` with a `type` discriminator. Symbols are bare
//! coin names (`BTC`, `ETH`); all perps settle in USDC.

use chrono::Utc;
use serde_json::{json, Value};
use tracing::debug;

use crate::http::{
    decode_json, json_f64, json_i64, json_opt_f64, HttpConfig, HttpTransport, ReqwestTransport,
};
use crate::provider::{ExchangeId, MarketDataProvider, MarketInfo, ProviderError};
use crate::records::{RawCandle, RawFundingEvent};
use crate::timeframe::Timeframe;

const INFO_URL: &str = "https://api.hyperliquid.xyz/info";
const SETTLEMENT_ASSET: &str = "USDC";

pub struct HyperliquidProvider {
    info_url: String,
    transport: Box<dyn HttpTransport>,
    clock: fn() -> i64,
}

impl HyperliquidProvider {
    pub fn new(cfg: &HttpConfig) -> Result<Self, ProviderError> {
        Ok(Self::with_transport(Box::new(ReqwestTransport::new(cfg)?)))
    }

    pub fn with_transport(transport: Box<dyn HttpTransport>) -> Self {
        Self {
            info_url: INFO_URL.to_string(),
            transport,
            clock: || Utc::now().timestamp_millis(),
        }
    }

    /// Replaces the wall clock that bounds the forward candle scan.
    pub fn with_clock(mut self, clock: fn() -> i64) -> Self {
        self.clock = clock;
        self
    }

    fn info(&self, body: Value) -> Result<Value, ProviderError> {
        let response = self.transport.post_json(&self.info_url, &body)?;
        decode_json(&self.info_url, &response)
    }

    fn candle_snapshot(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<RawCandle>, ProviderError> {
        let payload = self.info(json!({
            "type": "candleSnapshot",
            "req": {
                "coin": symbol,
                "interval": timeframe.to_string(),
                "startTime": start_ms,
                "endTime": end_ms,
            }
        }))?;
        parse_candles(&payload)
    }
}

impl MarketDataProvider for HyperliquidProvider {
    fn exchange(&self) -> ExchangeId {
        ExchangeId::Hyperliquid
    }

    fn list_markets(&self) -> Result<Vec<MarketInfo>, ProviderError> {
        let payload = self.info(json!({"type": "meta"}))?;
        parse_meta(&payload)
    }

    /// The endpoint takes a closed time range rather than a count. Each range
    /// is sized to the candles still missing; a range that comes back short
    /// (before listing, or across an outage) is followed by the next one until
    /// `limit` candles are in hand or the range reaches the present. A short
    /// page therefore only means the history really ends there.
    fn fetch_ohlcv(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        since_ms: i64,
        limit: usize,
    ) -> Result<Vec<RawCandle>, ProviderError> {
        let step = timeframe.duration_ms().max(1);
        let now = (self.clock)();
        let mut candles: Vec<RawCandle> = Vec::with_capacity(limit.min(5_000));
        let mut range_start = since_ms;

        while candles.len() < limit {
            let missing = i64::try_from(limit - candles.len()).unwrap_or(i64::MAX);
            let range_end = range_start.saturating_add(step.saturating_mul(missing));

            let before = candles.len();
            for candle in self.candle_snapshot(symbol, timeframe, range_start, range_end)? {
                let fresh = candle.timestamp_ms >= since_ms
                    && candles
                        .last()
                        .map_or(true, |prev| candle.timestamp_ms > prev.timestamp_ms);
                if fresh && candles.len() < limit {
                    candles.push(candle);
                }
            }

            if range_end >= now {
                break;
            }
            if candles.len() < limit {
                debug!(
                    component = "hyperliquid",
                    event = "candles.scan_forward",
                    symbol,
                    range_start,
                    range_end,
                    received = candles.len() - before
                );
            }
            range_start = range_end;
        }

        Ok(candles)
    }

    fn fetch_funding_history(
        &self,
        symbol: &str,
        since_ms: i64,
        limit: usize,
    ) -> Result<Vec<RawFundingEvent>, ProviderError> {
        let payload = self.info(json!({
            "type": "fundingHistory",
            "coin": symbol,
            "startTime": since_ms,
        }))?;

        let mut events = parse_funding_history(&payload)?;
        events.truncate(limit);
        Ok(events)
    }
}

fn field<'a>(row: &'a Value, name: &str, context: &str) -> Result<&'a Value, ProviderError> {
    row.get(name)
        .ok_or_else(|| ProviderError::malformed(format!("{context}: missing {name}")))
}

fn parse_candles(payload: &Value) -> Result<Vec<RawCandle>, ProviderError> {
    let rows = payload
        .as_array()
        .ok_or_else(|| ProviderError::malformed("candleSnapshot: expected top-level array"))?;

    rows.iter()
        .map(|row| {
            Ok(RawCandle {
                timestamp_ms: json_i64(field(row, "t", "candle")?, "t")?,
                open: json_f64(field(row, "o", "candle")?, "o")?,
                high: json_f64(field(row, "h", "candle")?, "h")?,
                low: json_f64(field(row, "l", "candle")?, "l")?,
                close: json_f64(field(row, "c", "candle")?, "c")?,
                volume: json_f64(field(row, "v", "candle")?, "v")?,
            })
        })
        .collect()
}

fn parse_funding_history(payload: &Value) -> Result<Vec<RawFundingEvent>, ProviderError> {
    let rows = payload
        .as_array()
        .ok_or_else(|| ProviderError::malformed("fundingHistory: expected top-level array"))?;

    rows.iter()
        .map(|row| {
            Ok(RawFundingEvent {
                timestamp_ms: json_i64(field(row, "time", "funding")?, "time")?,
                funding_rate: json_f64(field(row, "fundingRate", "funding")?, "fundingRate")?,
                mark_price: None,
                premium: json_opt_f64(row.get("premium"), "premium")?,
                info: row.clone(),
            })
        })
        .collect()
}

fn parse_meta(payload: &Value) -> Result<Vec<MarketInfo>, ProviderError> {
    let universe = payload
        .get("universe")
        .and_then(Value::as_array)
        .ok_or_else(|| ProviderError::malformed("meta: missing universe array"))?;

    universe
        .iter()
        .map(|asset| {
            let name = field(asset, "name", "meta asset")?
                .as_str()
                .ok_or_else(|| ProviderError::malformed("meta asset: name is not a string"))?;
            let delisted = asset
                .get("isDelisted")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            Ok(MarketInfo {
                symbol: name.to_string(),
                base: name.to_string(),
                quote: SETTLEMENT_ASSET.to_string(),
                active: !delisted,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::collector::{collect_prices, CollectionPlan};
    use crate::cursor::Termination;
    use crate::http::mock::{MockTransport, RecordedRequest};
    use crate::http::HttpResponse;
    use crate::records::TimeWindow;

    const HOUR: i64 = 3_600_000;

    fn candle_row(t: i64, close: &str) -> Value {
        json!({
            "t": t, "T": t + 3_599_999, "s": "BTC", "i": "1h",
            "o": "100.0", "c": close, "h": "101.5", "l": "99.0", "v": "12.75", "n": 42
        })
    }

    /// Answers `candleSnapshot` like the live endpoint: hourly candles from
    /// `listed_h` to `last_h` inside the requested closed range, minus `gap_h`.
    fn hourly_range_server(
        listed_h: i64,
        gap_h: std::ops::RangeInclusive<i64>,
        last_h: i64,
    ) -> impl Fn(&RecordedRequest) -> Result<HttpResponse, ProviderError> + Send + Sync + 'static
    {
        move |request: &RecordedRequest| {
            let req = &request.body.as_ref().unwrap()["req"];
            let start = req["startTime"].as_i64().unwrap();
            let end = req["endTime"].as_i64().unwrap();
            let rows: Vec<Value> = (listed_h..=last_h)
                .filter(|h| !gap_h.contains(h))
                .map(|h| h * HOUR)
                .filter(|t| *t >= start && *t <= end)
                .map(|t| candle_row(t, "1"))
                .collect();
            Ok(HttpResponse {
                status: 200,
                body: serde_json::to_vec(&rows).unwrap(),
            })
        }
    }

    fn range_starts(transport: &MockTransport) -> Vec<i64> {
        transport
            .recorded()
            .iter()
            .map(|r| r.body.as_ref().unwrap()["req"]["startTime"].as_i64().unwrap())
            .collect()
    }

    fn hours(candles: &[RawCandle]) -> Vec<i64> {
        candles.iter().map(|c| c.timestamp_ms / HOUR).collect()
    }

    #[test]
    fn late_listing_is_found_by_scanning_forward() {
        let transport = Arc::new(
            MockTransport::default().with_responder(hourly_range_server(10, 1..=0, 50)),
        );
        let provider = HyperliquidProvider::with_transport(Box::new(transport.clone()))
            .with_clock(|| 100 * HOUR);

        let candles = provider
            .fetch_ohlcv("BTC", Timeframe::default(), 0, 4)
            .unwrap();

        assert_eq!(hours(&candles), vec![10, 11, 12, 13]);
        assert_eq!(range_starts(&transport), vec![0, 4 * HOUR, 8 * HOUR, 12 * HOUR]);
    }

    #[test]
    fn outage_inside_a_page_is_bridged() {
        let transport = Arc::new(
            MockTransport::default().with_responder(hourly_range_server(0, 5..=14, 50)),
        );
        let provider = HyperliquidProvider::with_transport(Box::new(transport.clone()))
            .with_clock(|| 100 * HOUR);

        let candles = provider
            .fetch_ohlcv("BTC", Timeframe::default(), 0, 8)
            .unwrap();

        assert_eq!(hours(&candles), vec![0, 1, 2, 3, 4, 15, 16, 17]);
        assert_eq!(transport.recorded().len(), 4);
    }

    #[test]
    fn scan_stops_once_the_range_reaches_the_present() {
        let transport = Arc::new(
            MockTransport::default().with_responder(hourly_range_server(0, 1..=0, 3)),
        );
        let provider = HyperliquidProvider::with_transport(Box::new(transport.clone()))
            .with_clock(|| 5 * HOUR);

        let candles = provider
            .fetch_ohlcv("BTC", Timeframe::default(), 0, 10)
            .unwrap();

        assert_eq!(hours(&candles), vec![0, 1, 2, 3]);
        assert_eq!(transport.recorded().len(), 1);
    }

    #[test]
    fn price_collection_spans_late_listing_and_outage() {
        let transport =
            MockTransport::default().with_responder(hourly_range_server(10, 18..=21, 50));
        let provider =
            HyperliquidProvider::with_transport(Box::new(transport)).with_clock(|| 100 * HOUR);
        let plan = CollectionPlan::new(TimeWindow::new(0, 30 * HOUR), Timeframe::default())
            .with_page_limit(4);

        let result = collect_prices(&provider, "BTC", &plan, |_| {})
            .into_result()
            .unwrap();

        assert_eq!(result.terminated_reason, Termination::WindowComplete);
        let expected: Vec<i64> = (10..=30).filter(|h| !(18..=21).contains(h)).collect();
        assert_eq!(
            result
                .records
                .iter()
                .map(|r| r.timestamp_ms / HOUR)
                .collect::<Vec<_>>(),
            expected
        );
    }

    #[test]
    fn candle_request_window_is_sized_by_limit() {
        let transport = Arc::new(MockTransport::default().with_json(
            200,
            json!([candle_row(0, "100.5"), candle_row(3_600_000, "100.7")]),
        ));
        let provider = HyperliquidProvider::with_transport(Box::new(transport.clone()));

        let candles = provider
            .fetch_ohlcv("BTC", Timeframe::default(), 0, 2)
            .unwrap();

        assert_eq!(candles.len(), 2);
        assert_eq!(candles[1].timestamp_ms, 3_600_000);
        assert_eq!(candles[1].close, 100.7);
        assert_eq!(candles[0].volume, 12.75);

        let recorded = transport.recorded();
        assert_eq!(recorded[0].url, INFO_URL);
        let body = recorded[0].body.as_ref().unwrap();
        assert_eq!(body["type"], "candleSnapshot");
        assert_eq!(body["req"]["coin"], "BTC");
        assert_eq!(body["req"]["interval"], "1h");
        assert_eq!(body["req"]["startTime"], 0);
        assert_eq!(body["req"]["endTime"], 7_200_000);
    }

    #[test]
    fn replies_longer_than_limit_are_truncated() {
        let rows: Vec<Value> = (0..5).map(|i| candle_row(i * 3_600_000, "1")).collect();
        let transport = MockTransport::default().with_json(200, Value::Array(rows));
        let provider = HyperliquidProvider::with_transport(Box::new(transport));

        let candles = provider
            .fetch_ohlcv("BTC", Timeframe::default(), 0, 3)
            .unwrap();
        assert_eq!(candles.len(), 3);
        assert_eq!(candles[2].timestamp_ms, 7_200_000);
    }

    #[test]
    fn funding_history_carries_premium() {
        let transport = Arc::new(MockTransport::default().with_json(
            200,
            json!([
                {
                    "coin": "ETH",
                    "fundingRate": "0.0000125",
                    "premium": "-0.00021",
                    "time": 1_700_000_000_000_i64
                },
                {
                    "coin": "ETH",
                    "fundingRate": "-0.0000031",
                    "premium": "0.0004",
                    "time": 1_700_003_600_000_i64
                }
            ]),
        ));
        let provider = HyperliquidProvider::with_transport(Box::new(transport.clone()));

        let events = provider
            .fetch_funding_history("ETH", 1_700_000_000_000, 500)
            .unwrap();

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].funding_rate, 0.0000125);
        assert_eq!(events[0].premium, Some(-0.00021));
        assert_eq!(events[1].mark_price, None);
        assert_eq!(events[1].info["coin"], "ETH");

        let body = transport.recorded()[0].body.clone().unwrap();
        assert_eq!(
            body,
            json!({"type": "fundingHistory", "coin": "ETH", "startTime": 1_700_000_000_000_i64})
        );
    }

    #[test]
    fn meta_lists_usdc_perps_and_flags_delisted() {
        let transport = MockTransport::default().with_json(
            200,
            json!({"universe": [
                {"name": "BTC", "szDecimals": 5, "maxLeverage": 40},
                {"name": "LUNA", "szDecimals": 1, "maxLeverage": 3, "isDelisted": true}
            ]}),
        );
        let provider = HyperliquidProvider::with_transport(Box::new(transport));

        let markets = provider.list_markets().unwrap();
        assert_eq!(markets.len(), 2);
        assert_eq!(markets[0].quote, "USDC");
        assert!(markets[0].active);
        assert!(!markets[1].active);
    }

    #[test]
    fn candle_missing_fields_is_malformed() {
        let transport = MockTransport::default().with_json(200, json!([{"t": 0, "o": "1"}]));
        let provider = HyperliquidProvider::with_transport(Box::new(transport));
        assert!(matches!(
            provider.fetch_ohlcv("BTC", Timeframe::default(), 0, 10),
            Err(ProviderError::MalformedResponse(_))
        ));
    }

    #[test]
    fn server_errors_are_transient() {
        let transport = MockTransport::default().with_json(502, json!("bad gateway"));
        let provider = HyperliquidProvider::with_transport(Box::new(transport));
        let err = provider
            .fetch_funding_history("BTC", 0, 10)
            .unwrap_err();
        assert!(err.is_transient());
    }
}

//! Per-exchange orchestration: funding then prices for every symbol, each as an
//! independent retried collection, persisted with one upsert per (symbol, kind).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::cursor::{SeriesPolicy, Termination, DEFAULT_PAGE_LIMIT};
use crate::provider::{ExchangeId, MarketDataProvider, MarketInfo};
use crate::records::{FundingRecord, PriceRecord, RecordKind, TimeWindow};
use crate::retry::{collect_series, CollectionOutcome, RetryPolicy, SeriesRequest};
use crate::store::RecordStore;
use crate::timeframe::Timeframe;
use crate::timestamp::{normalize_timestamp, TimestampError, TimestampInput};

/// Quote assets collected when no explicit symbol list is given.
pub const DEFAULT_QUOTES: [&str; 2] = ["USDT", "USDC"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionPlan {
    pub window: TimeWindow,
    pub timeframe: Timeframe,
    pub page_limit: usize,
    pub retry: RetryPolicy,
}

impl CollectionPlan {
    pub fn new(window: TimeWindow, timeframe: Timeframe) -> Self {
        Self {
            window,
            timeframe,
            page_limit: DEFAULT_PAGE_LIMIT,
            retry: RetryPolicy::default(),
        }
    }

    /// Normalizes both bounds up front so a bad timestamp fails before any
    /// request is made.
    pub fn from_bounds(
        start: impl Into<TimestampInput>,
        end: impl Into<TimestampInput>,
        timeframe: Timeframe,
    ) -> Result<Self, TimestampError> {
        let start_ms = normalize_timestamp(start)?;
        let end_ms = normalize_timestamp(end)?;
        Ok(Self::new(TimeWindow::new(start_ms, end_ms), timeframe))
    }

    pub fn with_page_limit(mut self, page_limit: usize) -> Self {
        self.page_limit = page_limit.max(1);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

pub fn collect_prices<P, S>(
    provider: &P,
    symbol: &str,
    plan: &CollectionPlan,
    sleep: S,
) -> CollectionOutcome<PriceRecord>
where
    P: MarketDataProvider + ?Sized,
    S: FnMut(Duration),
{
    let exchange = provider.exchange();
    let request = SeriesRequest {
        symbol,
        exchange: exchange.as_str(),
        window: plan.window,
        policy: SeriesPolicy::fixed(plan.timeframe, plan.page_limit),
    };
    collect_series(
        &request,
        &plan.retry,
        |symbol, since, limit| provider.fetch_ohlcv(symbol, plan.timeframe, since, limit),
        sleep,
    )
}

pub fn collect_funding<P, S>(
    provider: &P,
    symbol: &str,
    plan: &CollectionPlan,
    sleep: S,
) -> CollectionOutcome<FundingRecord>
where
    P: MarketDataProvider + ?Sized,
    S: FnMut(Duration),
{
    let exchange = provider.exchange();
    let request = SeriesRequest {
        symbol,
        exchange: exchange.as_str(),
        window: plan.window,
        policy: SeriesPolicy::event(plan.page_limit),
    };
    collect_series(
        &request,
        &plan.retry,
        |symbol, since, limit| provider.fetch_funding_history(symbol, since, limit),
        sleep,
    )
}

/// Active markets quoted in one of `quotes`, sorted by symbol and optionally
/// capped at `max_symbols`.
pub fn select_symbols(
    markets: &[MarketInfo],
    quotes: &[&str],
    max_symbols: Option<usize>,
) -> Vec<String> {
    let mut symbols: Vec<String> = markets
        .iter()
        .filter(|market| market.active)
        .filter(|market| quotes.iter().any(|quote| market.quote.eq_ignore_ascii_case(quote)))
        .map(|market| market.symbol.clone())
        .collect();
    symbols.sort();
    symbols.dedup();
    if let Some(max) = max_symbols {
        symbols.truncate(max);
    }
    symbols
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum KindReport {
    Stored { records: usize, reason: Termination },
    Empty { reason: Termination },
    TransientExhausted { attempts: u32, error: String },
    Fatal { attempts: u32, error: String },
    StoreFailed { error: String },
}

impl KindReport {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stored { .. } => "stored",
            Self::Empty { .. } => "empty",
            Self::TransientExhausted { .. } => "failed_transient_exhausted",
            Self::Fatal { .. } => "failed_fatal",
            Self::StoreFailed { .. } => "store_failed",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::TransientExhausted { .. } | Self::Fatal { .. } | Self::StoreFailed { .. }
        )
    }

    pub fn stored_records(&self) -> usize {
        match self {
            Self::Stored { records, .. } => *records,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SymbolReport {
    pub symbol: String,
    pub funding: KindReport,
    pub prices: KindReport,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExchangeRunSummary {
    pub exchange: ExchangeId,
    pub symbols: Vec<SymbolReport>,
}

impl ExchangeRunSummary {
    pub fn stored_records(&self) -> usize {
        self.symbols
            .iter()
            .map(|report| report.funding.stored_records() + report.prices.stored_records())
            .sum()
    }

    /// Number of (symbol, kind) calls that ended in a failure.
    pub fn failures(&self) -> usize {
        self.symbols
            .iter()
            .map(|report| {
                usize::from(report.funding.is_failure()) + usize::from(report.prices.is_failure())
            })
            .sum()
    }

    pub fn report(&self, symbol: &str) -> Option<&SymbolReport> {
        self.symbols.iter().find(|report| report.symbol == symbol)
    }
}

/// Runs every symbol through funding then price collection, persisting each
/// successful non-empty result. Failures are recorded in the summary and never
/// stop the remaining symbols.
///
/// With `concurrency > 1`, symbols are spread over that many worker threads
/// sharing `provider` and `store`; the summary keeps the order of `symbols`.
pub fn collect_exchange<P, St, Z>(
    provider: &P,
    store: &Mutex<St>,
    symbols: &[String],
    plan: &CollectionPlan,
    concurrency: usize,
    sleep: Z,
) -> ExchangeRunSummary
where
    P: MarketDataProvider + ?Sized,
    St: RecordStore + Send,
    Z: Fn(Duration) + Sync,
{
    let exchange = provider.exchange();
    let workers = concurrency.clamp(1, symbols.len().max(1));
    info!(
        component = "collector",
        event = "run.start",
        exchange = exchange.as_str(),
        symbols = symbols.len(),
        start_ms = plan.window.start_ms,
        end_ms = plan.window.end_ms,
        timeframe = %plan.timeframe,
        workers
    );

    let sleep = &sleep;
    let reports: Vec<SymbolReport> = if workers == 1 {
        symbols
            .iter()
            .map(|symbol| collect_symbol(provider, store, symbol, plan, sleep))
            .collect()
    } else {
        let next = &AtomicUsize::new(0);
        let mut indexed: Vec<(usize, SymbolReport)> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..workers)
                .map(move |_| {
                    scope.spawn(move || {
                        let mut done = Vec::new();
                        loop {
                            let idx = next.fetch_add(1, Ordering::Relaxed);
                            let Some(symbol) = symbols.get(idx) else {
                                break;
                            };
                            done.push((idx, collect_symbol(provider, store, symbol, plan, sleep)));
                        }
                        done
                    })
                })
                .collect();

            handles
                .into_iter()
                .flat_map(|handle| match handle.join() {
                    Ok(done) => done,
                    Err(panic) => std::panic::resume_unwind(panic),
                })
                .collect()
        });
        indexed.sort_by_key(|(idx, _)| *idx);
        indexed.into_iter().map(|(_, report)| report).collect()
    };

    let summary = ExchangeRunSummary {
        exchange,
        symbols: reports,
    };
    info!(
        component = "collector",
        event = "run.finish",
        exchange = exchange.as_str(),
        symbols = summary.symbols.len(),
        stored_records = summary.stored_records(),
        failures = summary.failures()
    );
    summary
}

fn collect_symbol<P, St, Z>(
    provider: &P,
    store: &Mutex<St>,
    symbol: &str,
    plan: &CollectionPlan,
    sleep: &Z,
) -> SymbolReport
where
    P: MarketDataProvider + ?Sized,
    St: RecordStore,
    Z: Fn(Duration),
{
    let exchange = provider.exchange();
    info!(
        component = "collector",
        event = "run.symbol",
        exchange = exchange.as_str(),
        symbol
    );

    let funding = settle(
        collect_funding(provider, symbol, plan, |delay| sleep(delay)),
        exchange,
        symbol,
        RecordKind::Funding,
        |records| {
            let mut guard = store.lock().map_err(|_| "store lock poisoned".to_string())?;
            guard
                .upsert_funding(exchange.as_str(), records)
                .map_err(|err| err.to_string())
        },
    );

    let prices = settle(
        collect_prices(provider, symbol, plan, |delay| sleep(delay)),
        exchange,
        symbol,
        RecordKind::Ohlcv,
        |records| {
            let mut guard = store.lock().map_err(|_| "store lock poisoned".to_string())?;
            guard
                .upsert_prices(exchange.as_str(), plan.timeframe, records)
                .map_err(|err| err.to_string())
        },
    );

    SymbolReport {
        symbol: symbol.to_string(),
        funding,
        prices,
    }
}

fn settle<T>(
    outcome: CollectionOutcome<T>,
    exchange: ExchangeId,
    symbol: &str,
    kind: RecordKind,
    write: impl FnOnce(&[T]) -> Result<usize, String>,
) -> KindReport {
    let report = match outcome {
        CollectionOutcome::Succeeded(result) if result.is_empty() => {
            warn!(
                component = "collector",
                event = "run.kind.empty",
                exchange = exchange.as_str(),
                symbol,
                kind = kind.as_str(),
                reason = result.terminated_reason.as_str(),
                "no data found"
            );
            KindReport::Empty {
                reason: result.terminated_reason,
            }
        }
        CollectionOutcome::Succeeded(result) => match write(&result.records) {
            Ok(records) => KindReport::Stored {
                records,
                reason: result.terminated_reason,
            },
            Err(error) => KindReport::StoreFailed { error },
        },
        CollectionOutcome::TransientExhausted {
            attempts,
            last_error,
        } => KindReport::TransientExhausted {
            attempts,
            error: last_error.to_string(),
        },
        CollectionOutcome::Fatal { attempts, error } => KindReport::Fatal {
            attempts,
            error: error.to_string(),
        },
    };

    if report.is_failure() {
        warn!(
            component = "collector",
            event = "run.kind.outcome",
            exchange = exchange.as_str(),
            symbol,
            kind = kind.as_str(),
            outcome = report.as_str(),
            detail = ?report
        );
    } else {
        info!(
            component = "collector",
            event = "run.kind.outcome",
            exchange = exchange.as_str(),
            symbol,
            kind = kind.as_str(),
            outcome = report.as_str(),
            records = report.stored_records()
        );
    }
    report
}

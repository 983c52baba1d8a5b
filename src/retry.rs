//! Bounded retry around one (symbol, kind) collection call.

use std::time::Duration;

use tracing::{info, warn};

use crate::assemble::{assemble, CollectionResult};
use crate::cursor::{CursorWalk, SeriesPolicy};
use crate::provider::ProviderError;
use crate::records::{RawRecord, TimeWindow};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Linear backoff: the wait after failed attempt `n` (0-based) is `(n + 1) * base_delay`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt.saturating_add(1))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CollectionOutcome<T> {
    Succeeded(CollectionResult<T>),
    TransientExhausted {
        attempts: u32,
        last_error: ProviderError,
    },
    Fatal {
        attempts: u32,
        error: ProviderError,
    },
}

impl<T> CollectionOutcome<T> {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded(_) => "succeeded",
            Self::TransientExhausted { .. } => "failed_transient_exhausted",
            Self::Fatal { .. } => "failed_fatal",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }

    pub fn result(&self) -> Option<&CollectionResult<T>> {
        match self {
            Self::Succeeded(result) => Some(result),
            _ => None,
        }
    }

    pub fn into_result(self) -> Option<CollectionResult<T>> {
        match self {
            Self::Succeeded(result) => Some(result),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&ProviderError> {
        match self {
            Self::Succeeded(_) => None,
            Self::TransientExhausted { last_error, .. } => Some(last_error),
            Self::Fatal { error, .. } => Some(error),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeriesRequest<'a> {
    pub symbol: &'a str,
    pub exchange: &'a str,
    pub window: TimeWindow,
    pub policy: SeriesPolicy,
}

/// Walks `req.window` with `fetch`, retrying transient failures from the
/// current cursor and sleeping through `sleep` between attempts.
///
/// Never fails: every terminal state comes back as a [`CollectionOutcome`].
pub fn collect_series<R, F, S>(
    req: &SeriesRequest<'_>,
    retry: &RetryPolicy,
    mut fetch: F,
    mut sleep: S,
) -> CollectionOutcome<R::Collected>
where
    R: RawRecord,
    F: FnMut(&str, i64, usize) -> Result<Vec<R>, ProviderError>,
    S: FnMut(Duration),
{
    let max_attempts = retry.max_attempts.max(1);
    let mut walk = CursorWalk::new(req.symbol, req.window, req.policy);
    let mut attempt: u32 = 0;

    loop {
        match walk.run(&mut fetch) {
            Ok(termination) => {
                let pages = walk.pages_fetched();
                let result = assemble(
                    walk.into_batches(),
                    req.window,
                    req.symbol,
                    req.exchange,
                    termination,
                );
                info!(
                    component = "collector",
                    event = "collect.finish",
                    symbol = req.symbol,
                    exchange = req.exchange,
                    reason = termination.as_str(),
                    pages,
                    records = result.records.len(),
                    clipped = result.clipped,
                    attempts = attempt + 1
                );
                return CollectionOutcome::Succeeded(result);
            }
            Err(error) if !error.is_transient() => {
                warn!(
                    component = "collector",
                    event = "collect.failed",
                    symbol = req.symbol,
                    exchange = req.exchange,
                    outcome = "failed_fatal",
                    since = walk.since(),
                    error = %error
                );
                return CollectionOutcome::Fatal {
                    attempts: attempt + 1,
                    error,
                };
            }
            Err(error) if attempt + 1 >= max_attempts => {
                warn!(
                    component = "collector",
                    event = "collect.failed",
                    symbol = req.symbol,
                    exchange = req.exchange,
                    outcome = "failed_transient_exhausted",
                    since = walk.since(),
                    attempts = attempt + 1,
                    error = %error
                );
                return CollectionOutcome::TransientExhausted {
                    attempts: attempt + 1,
                    last_error: error,
                };
            }
            Err(error) => {
                let delay = retry.delay_after(attempt);
                warn!(
                    component = "collector",
                    event = "collect.retry",
                    symbol = req.symbol,
                    exchange = req.exchange,
                    since = walk.since(),
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %error
                );
                sleep(delay);
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::Termination;
    use crate::records::RawCandle;

    fn candle(ts: i64) -> RawCandle {
        RawCandle {
            timestamp_ms: ts,
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 1.0,
            volume: 1.0,
        }
    }

    fn request(window: TimeWindow, limit: usize) -> SeriesRequest<'static> {
        SeriesRequest {
            symbol: "BTCUSDT",
            exchange: "binance_spot",
            window,
            policy: SeriesPolicy::fixed_step(1_000, limit),
        }
    }

    #[test]
    fn default_policy_backs_off_ten_then_twenty_seconds() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay_after(0), Duration::from_secs(10));
        assert_eq!(policy.delay_after(1), Duration::from_secs(20));
    }

    #[test]
    fn transient_failures_exhaust_after_three_attempts() {
        let mut calls = 0u32;
        let mut sleeps = Vec::new();

        let outcome = collect_series::<RawCandle, _, _>(
            &request(TimeWindow::new(0, 10_000), 10),
            &RetryPolicy::default(),
            |_, _, _| {
                calls += 1;
                Err(ProviderError::RateLimited("429".to_string()))
            },
            |delay| sleeps.push(delay),
        );

        assert_eq!(calls, 3);
        assert_eq!(
            sleeps,
            vec![Duration::from_secs(10), Duration::from_secs(20)]
        );
        assert_eq!(outcome.as_str(), "failed_transient_exhausted");
        assert!(matches!(
            outcome,
            CollectionOutcome::TransientExhausted {
                attempts: 3,
                last_error: ProviderError::RateLimited(_)
            }
        ));
    }

    #[test]
    fn fatal_error_short_circuits_without_sleeping() {
        let mut calls = 0u32;
        let mut sleeps = Vec::new();

        let outcome = collect_series::<RawCandle, _, _>(
            &request(TimeWindow::new(0, 10_000), 10),
            &RetryPolicy::default(),
            |_, _, _| {
                calls += 1;
                Err(ProviderError::Unsupported("fetch_funding_history".to_string()))
            },
            |delay| sleeps.push(delay),
        );

        assert_eq!(calls, 1);
        assert!(sleeps.is_empty());
        assert!(matches!(
            outcome,
            CollectionOutcome::Fatal { attempts: 1, .. }
        ));
    }

    #[test]
    fn retry_resumes_from_cursor_and_recovers() {
        let mut calls = Vec::new();
        let mut failures_left = 1;

        let outcome = collect_series(
            &request(TimeWindow::new(0, 4_000), 2),
            &RetryPolicy::default(),
            |_, since, limit| {
                calls.push(since);
                if since > 0 && failures_left > 0 {
                    failures_left -= 1;
                    return Err(ProviderError::Network("timeout".to_string()));
                }
                Ok((0..=4)
                    .map(|i| i * 1_000)
                    .filter(|ts| *ts >= since)
                    .take(limit)
                    .map(candle)
                    .collect())
            },
            |_| {},
        );

        assert_eq!(calls, vec![0, 1_001, 1_001, 3_001]);
        let result = outcome.into_result().expect("should recover");
        assert_eq!(result.terminated_reason, Termination::WindowComplete);
        let times: Vec<i64> = result.records.iter().map(|r| r.timestamp_ms).collect();
        assert_eq!(times, vec![0, 1_000, 2_000, 3_000, 4_000]);
    }
}

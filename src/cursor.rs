//! Cursor advancement over a paginated history endpoint.
//!
//! A walk owns a single `since` cursor for one (symbol, kind, window) call and
//! moves it strictly forward: one millisecond past the last consumed timestamp,
//! or by one candle when a fixed-cadence provider stops making progress. The
//! walk survives a failed fetch untouched, so a retry resumes at the cursor
//! instead of the window start.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::provider::ProviderError;
use crate::records::{RawRecord, TimeWindow};
use crate::timeframe::Timeframe;

pub const DEFAULT_PAGE_LIMIT: usize = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SeriesCadence {
    /// Regular interval data (candles); stalls are stepped over.
    Fixed { step_ms: i64 },
    /// Irregular events (funding); a stall ends the walk.
    Event,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesPolicy {
    pub page_limit: usize,
    pub cadence: SeriesCadence,
}

impl SeriesPolicy {
    pub fn fixed(timeframe: Timeframe, page_limit: usize) -> Self {
        Self::fixed_step(timeframe.duration_ms(), page_limit)
    }

    pub fn fixed_step(step_ms: i64, page_limit: usize) -> Self {
        Self {
            page_limit: page_limit.max(1),
            cadence: SeriesCadence::Fixed {
                step_ms: step_ms.max(1),
            },
        }
    }

    pub fn event(page_limit: usize) -> Self {
        Self {
            page_limit: page_limit.max(1),
            cadence: SeriesCadence::Event,
        }
    }

    pub fn is_fixed_cadence(&self) -> bool {
        matches!(self.cadence, SeriesCadence::Fixed { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Termination {
    WindowComplete,
    Exhausted,
    Stalled,
}

impl Termination {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WindowComplete => "window_complete",
            Self::Exhausted => "exhausted",
            Self::Stalled => "stalled",
        }
    }
}

#[derive(Debug)]
pub struct CursorWalk<R> {
    symbol: String,
    window: TimeWindow,
    policy: SeriesPolicy,
    since: i64,
    last_consumed: Option<i64>,
    pages_fetched: usize,
    batches: Vec<Vec<R>>,
    termination: Option<Termination>,
}

impl<R: RawRecord> CursorWalk<R> {
    pub fn new(symbol: impl Into<String>, window: TimeWindow, policy: SeriesPolicy) -> Self {
        Self {
            symbol: symbol.into(),
            window,
            policy,
            since: window.start_ms,
            last_consumed: None,
            pages_fetched: 0,
            batches: Vec::new(),
            termination: None,
        }
    }

    pub fn since(&self) -> i64 {
        self.since
    }

    /// Newest timestamp consumed so far.
    pub fn last_consumed(&self) -> Option<i64> {
        self.last_consumed
    }

    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched
    }

    pub fn termination(&self) -> Option<Termination> {
        self.termination
    }

    pub fn window(&self) -> TimeWindow {
        self.window
    }

    /// Drives `fetch` until the walk terminates or a fetch fails.
    ///
    /// On error the cursor and every batch consumed so far are kept; calling
    /// `run` again continues from the same cursor.
    pub fn run<F>(&mut self, fetch: &mut F) -> Result<Termination, ProviderError>
    where
        F: FnMut(&str, i64, usize) -> Result<Vec<R>, ProviderError>,
    {
        loop {
            if let Some(done) = self.termination {
                return Ok(done);
            }
            if self.since >= self.window.end_ms {
                self.termination = Some(Termination::WindowComplete);
                continue;
            }

            let page = fetch(&self.symbol, self.since, self.policy.page_limit)?;
            self.termination = self.consume(page);
        }
    }

    pub fn into_batches(self) -> Vec<Vec<R>> {
        self.batches
    }

    fn consume(&mut self, page: Vec<R>) -> Option<Termination> {
        let requested_since = self.since;
        let Some(last_ts) = page.last().map(RawRecord::timestamp_ms) else {
            debug!(
                component = "cursor",
                event = "collect.page.empty",
                symbol = %self.symbol,
                since = requested_since
            );
            return Some(Termination::Exhausted);
        };
        let page_len = page.len();
        self.pages_fetched += 1;

        debug!(
            component = "cursor",
            event = "collect.page",
            symbol = %self.symbol,
            since = requested_since,
            records = page_len,
            last_ts
        );

        // Past the first page, anything before the cursor was already consumed.
        if requested_since > self.window.start_ms {
            let fresh: Vec<R> = page
                .into_iter()
                .filter(|record| record.timestamp_ms() >= requested_since)
                .collect();
            if !fresh.is_empty() {
                self.batches.push(fresh);
            }
        } else {
            self.batches.push(page);
        }

        // A stall is a page that adds nothing newer than what was already consumed.
        // A single record sitting exactly at the cursor is still progress.
        let advanced = last_ts >= requested_since
            && self.last_consumed.map_or(true, |consumed| last_ts > consumed);
        if !advanced {
            match self.policy.cadence {
                SeriesCadence::Fixed { step_ms } => {
                    self.since = requested_since.saturating_add(step_ms);
                    warn!(
                        component = "cursor",
                        event = "collect.stall",
                        symbol = %self.symbol,
                        since = requested_since,
                        last_ts,
                        forced_since = self.since
                    );
                }
                SeriesCadence::Event => {
                    warn!(
                        component = "cursor",
                        event = "collect.stall",
                        symbol = %self.symbol,
                        since = requested_since,
                        last_ts
                    );
                    return Some(Termination::Stalled);
                }
            }
        } else {
            self.last_consumed = Some(last_ts);
            self.since = last_ts.saturating_add(1);
        }

        if self.since >= self.window.end_ms {
            return Some(Termination::WindowComplete);
        }

        if self.policy.is_fixed_cadence() && page_len < self.policy.page_limit {
            return Some(Termination::Exhausted);
        }

        None
    }
}

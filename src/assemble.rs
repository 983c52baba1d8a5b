//! Flattening of consumed pages into a window-bounded, provenance-tagged result.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::cursor::Termination;
use crate::records::{RawRecord, TimeWindow};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionResult<T> {
    pub records: Vec<T>,
    pub terminated_reason: Termination,
    /// Records the provider returned outside the window.
    pub clipped: usize,
}

impl<T> CollectionResult<T> {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Flattens `raw_batches` in call order, clips to `[start_ms, end_ms]` and tags
/// every record with `symbol` and `exchange`.
///
/// Repeated or regressing timestamps are kept and reported through a
/// `assemble.non_monotonic` warning; the cursor walk is responsible for never
/// producing them.
pub fn assemble<R: RawRecord>(
    raw_batches: Vec<Vec<R>>,
    window: TimeWindow,
    symbol: &str,
    exchange: &str,
    terminated_reason: Termination,
) -> CollectionResult<R::Collected> {
    let total: usize = raw_batches.iter().map(Vec::len).sum();
    let mut records = Vec::with_capacity(total);
    let mut clipped = 0usize;
    let mut non_monotonic = 0usize;
    let mut previous_ts: Option<i64> = None;

    for record in raw_batches.into_iter().flatten() {
        let ts = record.timestamp_ms();
        if !window.contains(ts) {
            clipped += 1;
            continue;
        }
        if previous_ts.is_some_and(|prev| ts <= prev) {
            non_monotonic += 1;
        }
        previous_ts = Some(ts);
        records.push(record.into_collected(symbol, exchange));
    }

    if non_monotonic > 0 {
        warn!(
            component = "assemble",
            event = "assemble.non_monotonic",
            symbol,
            exchange,
            non_monotonic
        );
    }

    CollectionResult {
        records,
        terminated_reason,
        clipped,
    }
}

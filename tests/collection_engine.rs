use std::cell::RefCell;
use std::time::Duration;

use mhc::{
    collect_series, CollectionOutcome, PriceRecord, ProviderError, RawCandle, RawFundingEvent,
    RetryPolicy, SeriesPolicy, SeriesRequest, Termination, TimeWindow,
};

const STEP: i64 = 1_000;

fn candle(ts: i64) -> RawCandle {
    RawCandle {
        timestamp_ms: ts,
        open: ts as f64,
        high: ts as f64 + 1.0,
        low: ts as f64 - 1.0,
        close: ts as f64,
        volume: 1.0,
    }
}

fn funding(ts: i64) -> RawFundingEvent {
    RawFundingEvent {
        timestamp_ms: ts,
        funding_rate: 0.0001,
        mark_price: None,
        premium: None,
        info: serde_json::Value::Null,
    }
}

/// A well-behaved fixed-cadence source holding candles at every `STEP` in
/// `[first, last]`.
fn grid_source(
    first: i64,
    last: i64,
) -> impl FnMut(&str, i64, usize) -> Result<Vec<RawCandle>, ProviderError> {
    move |_, since, limit| {
        let start = since.max(first);
        let aligned = (start + STEP - 1).div_euclid(STEP) * STEP;
        Ok((0..limit as i64)
            .map(|i| aligned + i * STEP)
            .take_while(|ts| *ts <= last)
            .map(candle)
            .collect())
    }
}

fn request(window: TimeWindow, policy: SeriesPolicy) -> SeriesRequest<'static> {
    SeriesRequest {
        symbol: "BTCUSDT",
        exchange: "binance_spot",
        window,
        policy,
    }
}

fn timestamps(records: &[PriceRecord]) -> Vec<i64> {
    records.iter().map(|r| r.timestamp_ms).collect()
}

#[test]
fn page_size_two_scenario_walks_three_pages() {
    let calls = RefCell::new(Vec::new());
    let mut source = grid_source(0, 10_000);

    let outcome = collect_series(
        &request(TimeWindow::new(0, 5_000), SeriesPolicy::fixed_step(STEP, 2)),
        &RetryPolicy::default(),
        |symbol, since, limit| {
            calls.borrow_mut().push(since);
            source(symbol, since, limit)
        },
        |_| panic!("no retry expected"),
    );

    assert_eq!(calls.into_inner(), vec![0, 1_001, 3_001]);
    let result = outcome.into_result().expect("collection should succeed");
    assert_eq!(result.terminated_reason, Termination::WindowComplete);
    assert_eq!(
        timestamps(&result.records),
        vec![0, 1_000, 2_000, 3_000, 4_000, 5_000]
    );
}

#[test]
fn every_sub_window_is_gap_free_and_duplicate_free() {
    for limit in [1, 2, 3, 7, 1_000] {
        for (start, end) in [(0, 20_000), (2_500, 9_000), (4_000, 4_001), (9_999, 30_000)] {
            let outcome = collect_series(
                &request(TimeWindow::new(start, end), SeriesPolicy::fixed_step(STEP, limit)),
                &RetryPolicy::default(),
                grid_source(0, 25_000),
                |_| {},
            );

            let result = outcome.into_result().expect("collection should succeed");
            let expected: Vec<i64> = (0..=25_000)
                .step_by(STEP as usize)
                .filter(|ts| *ts >= start && *ts <= end)
                .collect();
            assert_eq!(
                timestamps(&result.records),
                expected,
                "limit={limit} window=[{start}, {end}]"
            );
        }
    }
}

#[test]
fn inverted_window_makes_no_requests() {
    let outcome = collect_series::<RawCandle, _, _>(
        &request(TimeWindow::new(5_000, 1_000), SeriesPolicy::fixed_step(STEP, 10)),
        &RetryPolicy::default(),
        |_, _, _| panic!("no fetch expected"),
        |_| {},
    );

    let result = outcome.into_result().expect("empty window still succeeds");
    assert!(result.is_empty());
    assert_eq!(result.terminated_reason, Termination::WindowComplete);
}

#[test]
fn records_outside_the_window_are_clipped() {
    // Provider ignores `since` and always answers with a fixed page.
    let outcome = collect_series(
        &request(TimeWindow::new(1_500, 3_500), SeriesPolicy::fixed_step(STEP, 10)),
        &RetryPolicy::default(),
        |_, _, _| Ok((0..6).map(|i| candle(i * STEP)).collect()),
        |_| {},
    );

    let result = outcome.into_result().expect("collection should succeed");
    assert_eq!(timestamps(&result.records), vec![2_000, 3_000]);
    assert_eq!(result.clipped, 4);
}

#[test]
fn fixed_cadence_stall_is_force_advanced_and_terminates() {
    let calls = RefCell::new(Vec::new());

    // A stuck provider that ignores `since` and keeps returning the same page.
    let outcome = collect_series(
        &request(TimeWindow::new(0, 5_000), SeriesPolicy::fixed_step(STEP, 2)),
        &RetryPolicy::default(),
        |_, since, _| {
            calls.borrow_mut().push(since);
            Ok(vec![candle(-1_000), candle(0)])
        },
        |_| {},
    );

    let result = outcome.into_result().expect("stall recovery should succeed");
    assert_eq!(result.terminated_reason, Termination::WindowComplete);
    // The first page consumes 0; every later page adds nothing and is stepped over.
    assert_eq!(calls.into_inner(), vec![0, 1, 1_001, 2_001, 3_001, 4_001]);
    assert_eq!(timestamps(&result.records), vec![0]);
}

#[test]
fn event_stall_returns_partial_result() {
    let outcome = collect_series(
        &request(TimeWindow::new(0, 100_000), SeriesPolicy::event(3)),
        &RetryPolicy::default(),
        |_, since, _| {
            if since == 0 {
                Ok(vec![funding(10_000), funding(20_000)])
            } else {
                Ok(vec![funding(20_000)])
            }
        },
        |_| {},
    );

    let result = outcome.into_result().expect("stall yields a partial result");
    assert_eq!(result.terminated_reason, Termination::Stalled);
    let times: Vec<i64> = result.records.iter().map(|r| r.timestamp_ms).collect();
    assert_eq!(times, vec![10_000, 20_000]);
}

#[test]
fn short_funding_pages_do_not_end_the_walk() {
    let calls = RefCell::new(Vec::new());

    let outcome = collect_series(
        &request(TimeWindow::new(0, 100_000), SeriesPolicy::event(1_000)),
        &RetryPolicy::default(),
        |_, since, _| {
            calls.borrow_mut().push(since);
            Ok([30_000, 60_000, 90_000]
                .into_iter()
                .filter(|ts| *ts >= since)
                .take(1)
                .map(funding)
                .collect())
        },
        |_| {},
    );

    let result = outcome.into_result().expect("collection should succeed");
    assert_eq!(result.records.len(), 3);
    assert_eq!(result.terminated_reason, Termination::Exhausted);
    assert_eq!(calls.into_inner(), vec![0, 30_001, 60_001, 90_001]);
}

#[test]
fn retry_exhaustion_reports_last_error_and_linear_delays() {
    let sleeps = RefCell::new(Vec::new());
    let calls = RefCell::new(0u32);

    let outcome = collect_series::<RawCandle, _, _>(
        &request(TimeWindow::new(0, 5_000), SeriesPolicy::fixed_step(STEP, 2)),
        &RetryPolicy::default(),
        |_, _, _| {
            *calls.borrow_mut() += 1;
            Err(ProviderError::Network(format!("timeout #{}", calls.borrow())))
        },
        |delay| sleeps.borrow_mut().push(delay),
    );

    assert_eq!(*calls.borrow(), 3);
    assert_eq!(
        sleeps.into_inner(),
        vec![Duration::from_secs(10), Duration::from_secs(20)]
    );
    match outcome {
        CollectionOutcome::TransientExhausted {
            attempts,
            last_error,
        } => {
            assert_eq!(attempts, 3);
            assert_eq!(last_error, ProviderError::Network("timeout #3".to_string()));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[test]
fn fatal_errors_are_not_retried() {
    for error in [
        ProviderError::Unsupported("fetch_funding_history".to_string()),
        ProviderError::Authentication("bad key".to_string()),
        ProviderError::MalformedResponse("truncated json".to_string()),
    ] {
        let calls = RefCell::new(0u32);
        let outcome = collect_series::<RawFundingEvent, _, _>(
            &request(TimeWindow::new(0, 5_000), SeriesPolicy::event(10)),
            &RetryPolicy::default(),
            |_, _, _| {
                *calls.borrow_mut() += 1;
                Err(error.clone())
            },
            |_| panic!("fatal errors never sleep"),
        );

        assert_eq!(*calls.borrow(), 1);
        assert_eq!(outcome.as_str(), "failed_fatal");
        assert_eq!(outcome.error(), Some(&error));
    }
}

#[test]
fn transient_failure_mid_walk_resumes_without_duplicates() {
    let failures_left = RefCell::new(2);
    let mut source = grid_source(0, 9_000);

    let outcome = collect_series(
        &request(TimeWindow::new(0, 9_000), SeriesPolicy::fixed_step(STEP, 3)),
        &RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
        },
        |symbol, since, limit| {
            if since > 3_000 && *failures_left.borrow() > 0 {
                *failures_left.borrow_mut() -= 1;
                return Err(ProviderError::RateLimited("429".to_string()));
            }
            source(symbol, since, limit)
        },
        |_| {},
    );

    let result = outcome.into_result().expect("should recover within budget");
    let expected: Vec<i64> = (0..=9).map(|i| i * STEP).collect();
    assert_eq!(timestamps(&result.records), expected);
}

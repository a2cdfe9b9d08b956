//! Integration tests for waterfall and header bidding.
//!
//! These tests verify the orchestration contracts:
//! - Waterfall contacts sources strictly in priority order and stops at the winner
//! - Header bidding is independent of lineup order and honors the timeout
//! - Yield comparison across both methods

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use rtb_common::types::DemandSource;
use rtb_engine::clock::{InstantClock, TokioClock};
use rtb_engine::demand::{run_header_bidding, run_waterfall, ResponseStatus, YieldComparison};
use rtb_engine::random::{ScriptedRandom, SeededRandom};
use rtb_engine::{AuctionEngine, DemandMethod};

fn lineup() -> Vec<DemandSource> {
    vec![
        DemandSource::new("pmp", 1, dec!(4.50), 180, 0.35),
        DemandSource::new("exchange-alpha", 2, dec!(3.20), 250, 0.60),
        DemandSource::new("exchange-beta", 3, dec!(2.80), 320, 0.70),
        DemandSource::new("remnant", 4, dec!(1.40), 120, 0.95),
        DemandSource::new("laggard", 5, dec!(6.00), 1500, 0.90),
    ]
}

// ============================================================================
// Waterfall Tests
// ============================================================================

#[tokio::test]
async fn test_waterfall_two_dry_sources_then_certain_fill() {
    let sources = vec![
        DemandSource::new("A", 1, dec!(4.00), 100, 0.0),
        DemandSource::new("B", 2, dec!(3.00), 100, 0.0),
        DemandSource::new("C", 3, dec!(2.00), 100, 1.0),
    ];
    let clock = InstantClock::new();
    let mut rng = ScriptedRandom::constant(0.5);

    let result = run_waterfall(&sources, dec!(1.00), &clock, &mut rng).await.unwrap();

    assert_eq!(result.method, DemandMethod::Waterfall);
    assert_eq!(result.winner.as_deref(), Some("C"));
    assert_eq!(result.response_for("A").unwrap().bid, None);
    assert_eq!(result.response_for("B").unwrap().bid, None);
    assert!(result.total_latency_ms >= 300);
}

#[tokio::test]
async fn test_waterfall_never_contacts_sources_after_winner() {
    let sources = lineup();
    let mut rng = SeededRandom::new(314);

    for _ in 0..100 {
        let clock = InstantClock::new();
        let result = run_waterfall(&sources, dec!(1.00), &clock, &mut rng).await.unwrap();

        assert_eq!(clock.wait_count(), result.sources_called);
        assert_eq!(
            result.total_latency_ms,
            clock.total_waited().as_millis() as u64
        );
        if result.winner.is_some() {
            // The winner is always the last source contacted.
            let last = result.all_bids.last().unwrap();
            assert_eq!(last.status, ResponseStatus::Won);
            assert_eq!(Some(&last.source), result.winner.as_ref());
        } else {
            assert_eq!(result.sources_called, sources.len());
        }

        let priorities: Vec<u32> = result.all_bids.iter().map(|r| r.priority).collect();
        assert!(priorities.windows(2).all(|w| w[0] <= w[1]));
    }
}

#[tokio::test]
async fn test_waterfall_same_seed_same_result() {
    let clock = InstantClock::new();
    let a = run_waterfall(&lineup(), dec!(1.00), &clock, &mut SeededRandom::new(8)).await.unwrap();
    let b = run_waterfall(&lineup(), dec!(1.00), &clock, &mut SeededRandom::new(8)).await.unwrap();
    assert_eq!(a, b);
}

// ============================================================================
// Header Bidding Tests
// ============================================================================

#[tokio::test]
async fn test_header_bidding_shuffle_independence() {
    let clock = InstantClock::new();
    let timeout = Duration::from_millis(400);

    for seed in 0..50u64 {
        let base = run_header_bidding(&lineup(), dec!(1.00), timeout, &clock, &mut SeededRandom::new(seed))
            .await
            .unwrap();

        let mut rotated = lineup();
        rotated.rotate_left((seed as usize % 4) + 1);
        let other = run_header_bidding(&rotated, dec!(1.00), timeout, &clock, &mut SeededRandom::new(seed))
            .await
            .unwrap();

        assert_eq!(base.winner, other.winner, "seed {}", seed);
        assert_eq!(base.winning_bid, other.winning_bid, "seed {}", seed);
        assert_eq!(base.total_latency_ms, other.total_latency_ms);
        for response in &base.all_bids {
            assert_eq!(Some(response), other.response_for(&response.source));
        }
    }
}

#[tokio::test]
async fn test_header_bidding_timed_out_sources_never_bid() {
    let clock = InstantClock::new();
    let mut rng = SeededRandom::new(99);

    for _ in 0..50 {
        let result = run_header_bidding(&lineup(), dec!(0.50), Duration::from_millis(300), &clock, &mut rng)
            .await
            .unwrap();

        for response in &result.all_bids {
            let source = lineup().into_iter().find(|s| s.name == response.source).unwrap();
            if source.latency_ms > 300 {
                assert_eq!(response.status, ResponseStatus::TimedOut);
                assert_eq!(response.bid, None);
            }
        }
        assert!(result.total_latency_ms <= 300);
        assert_ne!(result.winner.as_deref(), Some("laggard"));
    }
}

#[tokio::test]
async fn test_header_bidding_winner_is_highest_valid_bid() {
    let clock = InstantClock::new();
    let mut rng = SeededRandom::new(4242);

    for _ in 0..50 {
        let result = run_header_bidding(&lineup(), dec!(2.00), Duration::from_secs(2), &clock, &mut rng)
            .await
            .unwrap();

        let best = result
            .all_bids
            .iter()
            .filter_map(|r| r.bid)
            .filter(|b| *b >= dec!(2.00))
            .max();
        assert_eq!(result.winning_bid, best);
        assert_eq!(result.revenue_gained, best.unwrap_or(Decimal::ZERO));
        assert!(result.revenue_opportunity >= result.revenue_gained);
    }
}

#[tokio::test(start_paused = true)]
async fn test_header_bidding_bounded_by_timeout_in_real_time() {
    let start = tokio::time::Instant::now();
    let mut rng = SeededRandom::new(1);

    let result = run_header_bidding(&lineup(), dec!(1.00), Duration::from_millis(500), &TokioClock, &mut rng)
        .await
        .unwrap();

    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(500));
    assert!(elapsed < Duration::from_millis(600));
    assert_eq!(result.total_latency_ms, 500);
}

// ============================================================================
// Yield Comparison Tests
// ============================================================================

#[tokio::test]
async fn test_engine_compare_yield_report() {
    let mut engine = AuctionEngine::new(Box::new(SeededRandom::new(77)), Arc::new(InstantClock::new()));

    let report = engine
        .compare_yield(&lineup(), dec!(1.00), Duration::from_millis(400))
        .await
        .unwrap();

    assert_eq!(report.waterfall.method, DemandMethod::Waterfall);
    assert_eq!(report.header_bidding.method, DemandMethod::HeaderBidding);
    assert_eq!(
        report.comparison,
        YieldComparison::compare(&report.waterfall, &report.header_bidding)
    );
    assert!(report.header_bidding.total_latency_ms <= 400);
}

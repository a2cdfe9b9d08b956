//! Sequential (waterfall) demand orchestration.
//!
//! Sources are called one at a time in ascending `priority`. Each call waits
//! out the source's latency before its fill outcome is known. The first
//! fill at or above the floor wins and the loop stops: sources after the
//! winner are never contacted, even if they would have bid higher. That
//! lost demand is the point of the comparison with header bidding.

use std::time::Duration;

use rust_decimal::Decimal;
use tracing::{debug, info};

use rtb_common::types::DemandSource;

use super::{draw_source_bid, DemandMethod, DemandResult, ResponseStatus, SourceResponse};
use crate::clock::Clock;
use crate::random::{RandomSource, SeededRandom};
use crate::validate::{self, ValidationError};

/// Run a waterfall over `sources`.
///
/// Sources are stably sorted by priority, so equal priorities keep their
/// input order. `revenue_opportunity` is drawn from a separate stream after
/// the loop and never influences the winner.
///
/// # Errors
///
/// Negative floor/avg_bid, or a fill rate outside `[0, 1]`.
pub async fn run_waterfall(
    sources: &[DemandSource],
    floor_price: Decimal,
    clock: &dyn Clock,
    rng: &mut dyn RandomSource,
) -> Result<DemandResult, ValidationError> {
    validate::non_negative("floor_price", floor_price)?;
    validate::demand_sources(sources)?;

    if sources.is_empty() {
        return Ok(DemandResult::empty(DemandMethod::Waterfall, floor_price));
    }

    let mut ordered: Vec<&DemandSource> = sources.iter().collect();
    ordered.sort_by_key(|source| source.priority);

    let mut responses = Vec::with_capacity(ordered.len());
    let mut total_latency_ms = 0u64;
    let mut best_seen: Option<Decimal> = None;
    let mut winner: Option<(String, Decimal)> = None;

    for source in &ordered {
        clock.sleep(Duration::from_millis(source.latency_ms)).await;
        total_latency_ms = total_latency_ms.saturating_add(source.latency_ms);

        if !rng.chance(source.fill_rate) {
            debug!(source = %source.name, "Waterfall source did not fill");
            responses.push(response(source, None, ResponseStatus::NoFill));
            continue;
        }

        let bid = draw_source_bid(source, rng);
        let improves = best_seen.is_none_or(|best| bid > best);
        best_seen = Some(best_seen.map_or(bid, |best| best.max(bid)));

        if bid >= floor_price && improves {
            debug!(source = %source.name, bid = %bid, "Waterfall filled above floor");
            responses.push(response(source, Some(bid), ResponseStatus::Won));
            winner = Some((source.name.clone(), bid));
            break;
        }

        debug!(source = %source.name, bid = %bid, floor = %floor_price, "Waterfall bid below floor");
        responses.push(response(source, Some(bid), ResponseStatus::BelowFloor));
    }

    // What every source could have bid, from an independent stream.
    let mut what_if = SeededRandom::new(rng.next_u64());
    let best_possible = ordered
        .iter()
        .map(|source| draw_source_bid(source, &mut what_if))
        .max()
        .unwrap_or(Decimal::ZERO);

    let winning_bid = winner.as_ref().map(|(_, bid)| *bid);
    let revenue_gained = winning_bid.unwrap_or(Decimal::ZERO);

    let result = DemandResult {
        method: DemandMethod::Waterfall,
        winner: winner.map(|(name, _)| name),
        winning_bid,
        total_latency_ms,
        sources_called: responses.len(),
        all_bids: responses,
        floor_price,
        revenue_gained,
        revenue_opportunity: best_possible.max(revenue_gained),
    };

    info!(
        winner = result.winner.as_deref().unwrap_or("none"),
        revenue = %result.revenue_gained,
        opportunity = %result.revenue_opportunity,
        latency_ms = result.total_latency_ms,
        called = result.sources_called,
        of = ordered.len(),
        "Waterfall complete"
    );

    Ok(result)
}

fn response(source: &DemandSource, bid: Option<Decimal>, status: ResponseStatus) -> SourceResponse {
    SourceResponse {
        source: source.name.clone(),
        priority: source.priority,
        bid,
        latency_ms: source.latency_ms,
        status,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::InstantClock;
    use crate::random::ScriptedRandom;
    use rust_decimal_macros::dec;

    fn lineup() -> Vec<DemandSource> {
        vec![
            DemandSource::new("premium-deal", 1, dec!(4.00), 150, 0.0),
            DemandSource::new("exchange-a", 2, dec!(3.00), 200, 0.0),
            DemandSource::new("exchange-b", 3, dec!(2.50), 250, 1.0),
        ]
    }

    #[tokio::test]
    async fn test_waterfall_falls_through_to_third_source() {
        let clock = InstantClock::new();
        let mut rng = ScriptedRandom::constant(0.5);

        let result = run_waterfall(&lineup(), dec!(1.00), &clock, &mut rng).await.unwrap();

        assert_eq!(result.winner.as_deref(), Some("exchange-b"));
        assert_eq!(result.winning_bid, Some(dec!(2.50)));
        assert_eq!(result.all_bids[0].bid, None);
        assert_eq!(result.all_bids[1].bid, None);
        assert_eq!(result.all_bids[0].status, ResponseStatus::NoFill);
        assert_eq!(result.total_latency_ms, 600);
        assert_eq!(clock.wait_count(), 3);
    }

    #[tokio::test]
    async fn test_waterfall_stops_at_first_qualifying_fill() {
        let sources = vec![
            DemandSource::new("first", 1, dec!(2.00), 100, 1.0),
            DemandSource::new("second", 2, dec!(9.00), 100, 1.0),
            DemandSource::new("third", 3, dec!(9.00), 100, 1.0),
        ];
        let clock = InstantClock::new();
        let mut rng = ScriptedRandom::constant(0.5);

        let result = run_waterfall(&sources, dec!(1.00), &clock, &mut rng).await.unwrap();

        assert_eq!(result.winner.as_deref(), Some("first"));
        assert_eq!(result.sources_called, 1);
        assert_eq!(clock.wait_count(), 1);
        assert!(result.response_for("second").is_none());
        // Later sources would have paid more.
        assert!(result.revenue_opportunity > result.revenue_gained);
    }

    #[tokio::test]
    async fn test_waterfall_orders_by_priority() {
        let mut sources = lineup();
        sources.reverse();
        let clock = InstantClock::new();
        let mut rng = ScriptedRandom::constant(0.5);

        let result = run_waterfall(&sources, dec!(1.00), &clock, &mut rng).await.unwrap();

        let order: Vec<_> = result.all_bids.iter().map(|r| r.priority).collect();
        assert_eq!(order, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_waterfall_below_floor_continues() {
        let sources = vec![
            DemandSource::new("cheap", 1, dec!(1.00), 50, 1.0),
            DemandSource::new("solid", 2, dec!(5.00), 50, 1.0),
        ];
        let clock = InstantClock::new();
        let mut rng = ScriptedRandom::constant(0.5);

        let result = run_waterfall(&sources, dec!(2.00), &clock, &mut rng).await.unwrap();

        assert_eq!(result.all_bids[0].status, ResponseStatus::BelowFloor);
        assert_eq!(result.all_bids[0].bid, Some(dec!(1.00)));
        assert_eq!(result.winner.as_deref(), Some("solid"));
    }

    #[tokio::test]
    async fn test_waterfall_unfilled() {
        let sources = vec![DemandSource::new("dead", 1, dec!(3.00), 80, 0.0)];
        let clock = InstantClock::new();
        let mut rng = ScriptedRandom::constant(0.5);

        let result = run_waterfall(&sources, dec!(1.00), &clock, &mut rng).await.unwrap();

        assert!(!result.is_filled());
        assert_eq!(result.revenue_gained, Decimal::ZERO);
        assert_eq!(result.total_latency_ms, 80);
    }

    #[tokio::test]
    async fn test_waterfall_latency_saturates() {
        let sources = vec![
            DemandSource::new("stalled-a", 1, dec!(3.00), u64::MAX, 0.0),
            DemandSource::new("stalled-b", 2, dec!(3.00), u64::MAX, 0.0),
        ];
        let clock = InstantClock::new();
        let mut rng = ScriptedRandom::constant(0.5);

        let result = run_waterfall(&sources, dec!(1.00), &clock, &mut rng).await.unwrap();

        assert_eq!(result.total_latency_ms, u64::MAX);
        assert_eq!(result.sources_called, 2);
        assert!(!result.is_filled());
    }

    #[tokio::test]
    async fn test_waterfall_empty_lineup() {
        let clock = InstantClock::new();
        let mut rng = ScriptedRandom::constant(0.5);

        let result = run_waterfall(&[], dec!(1.00), &clock, &mut rng).await.unwrap();

        assert!(result.winner.is_none());
        assert_eq!(result.total_latency_ms, 0);
        assert_eq!(clock.wait_count(), 0);
    }

    #[tokio::test]
    async fn test_waterfall_rejects_invalid_input_before_waiting() {
        let clock = InstantClock::new();
        let mut rng = ScriptedRandom::constant(0.5);
        let mut sources = lineup();
        sources[2].fill_rate = f64::NAN;

        assert!(run_waterfall(&sources, dec!(1.00), &clock, &mut rng).await.is_err());
        assert!(run_waterfall(&lineup(), dec!(-1.00), &clock, &mut rng).await.is_err());
        assert_eq!(clock.wait_count(), 0);
    }
}

//! Parallel (header bidding) demand orchestration.
//!
//! Every source is asked at once and the run completes when the slowest
//! answer (or the shared timeout) arrives. The highest bid at or above the
//! floor wins; sources slower than the timeout never bid.
//!
//! Each source draws from its own stream keyed by the batch seed and the
//! source name, so the outcome for a given seed does not depend on the
//! order of the lineup.

use std::cmp::Ordering;
use std::time::Duration;

use futures::future::join_all;
use rust_decimal::Decimal;
use tracing::{debug, info};

use rtb_common::types::DemandSource;

use super::{draw_source_bid, DemandMethod, DemandResult, ResponseStatus, SourceResponse};
use crate::clock::Clock;
use crate::random::{RandomSource, SeededRandom};
use crate::validate::{self, ValidationError};

/// What a single source produced before the winner is picked.
struct Reply<'a> {
    source: &'a DemandSource,
    waited_ms: u64,
    timed_out: bool,
    filled: bool,
    /// Bid the source makes if it fills; also feeds `revenue_opportunity`.
    amount: Decimal,
}

impl Reply<'_> {
    fn qualifies(&self, floor_price: Decimal) -> bool {
        !self.timed_out && self.filled && self.amount >= floor_price
    }

    /// Higher bid first; on equal bids the faster answer, then the lower
    /// priority number, then the name. Never depends on lineup order.
    fn rank(&self, other: &Self) -> Ordering {
        self.amount
            .cmp(&other.amount)
            .then_with(|| other.waited_ms.cmp(&self.waited_ms))
            .then_with(|| other.source.priority.cmp(&self.source.priority))
            .then_with(|| other.source.name.cmp(&self.source.name))
    }
}

/// Run header bidding over `sources` with a shared `timeout`.
///
/// Takes one draw from `rng` to seed the batch; each source then uses its
/// own keyed stream. A source whose latency exceeds the timeout waits the
/// full timeout and is reported as `TimedOut` with no bid. Equal top bids
/// go to the source that answered first, then to the lower priority
/// number, then to the name that sorts first.
///
/// # Errors
///
/// Negative floor/avg_bid, a fill rate outside `[0, 1]`, or a zero timeout.
pub async fn run_header_bidding(
    sources: &[DemandSource],
    floor_price: Decimal,
    timeout: Duration,
    clock: &dyn Clock,
    rng: &mut dyn RandomSource,
) -> Result<DemandResult, ValidationError> {
    validate::non_negative("floor_price", floor_price)?;
    validate::demand_sources(sources)?;
    validate::positive_duration("timeout", timeout)?;

    if sources.is_empty() {
        return Ok(DemandResult::empty(DemandMethod::HeaderBidding, floor_price));
    }

    let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
    let batch_seed = rng.next_u64();

    let requests = sources.iter().map(|source| {
        let mut stream = SeededRandom::for_key(batch_seed, &source.name);
        async move {
            let timed_out = source.latency_ms > timeout_ms;
            let waited_ms = source.latency_ms.min(timeout_ms);
            clock.sleep(Duration::from_millis(waited_ms)).await;

            // Draw order is fixed so the stream layout never depends on the timeout.
            let filled = stream.chance(source.fill_rate);
            let amount = draw_source_bid(source, &mut stream);
            Reply {
                source,
                waited_ms,
                timed_out,
                filled,
                amount,
            }
        }
    });
    let replies = join_all(requests).await;

    let winner = replies
        .iter()
        .filter(|r| r.qualifies(floor_price))
        .max_by(|a, b| a.rank(b));
    let winner_name = winner.map(|r| r.source.name.clone());
    let winning_bid = winner.map(|r| r.amount);

    let all_bids: Vec<SourceResponse> = replies
        .iter()
        .enumerate()
        .map(|(index, reply)| {
            let is_winner = winner.is_some_and(|w| std::ptr::eq(w, reply));
            let (bid, status) = if reply.timed_out {
                (None, ResponseStatus::TimedOut)
            } else if !reply.filled {
                (None, ResponseStatus::NoFill)
            } else if is_winner {
                (Some(reply.amount), ResponseStatus::Won)
            } else if reply.amount >= floor_price {
                (Some(reply.amount), ResponseStatus::Bid)
            } else {
                (Some(reply.amount), ResponseStatus::BelowFloor)
            };
            debug!(
                index,
                source = %reply.source.name,
                waited_ms = reply.waited_ms,
                status = ?status,
                "Header bidding response"
            );
            SourceResponse {
                source: reply.source.name.clone(),
                priority: reply.source.priority,
                bid,
                latency_ms: reply.waited_ms,
                status,
            }
        })
        .collect();

    let total_latency_ms = replies.iter().map(|r| r.waited_ms).max().unwrap_or(0);
    let revenue_opportunity = replies
        .iter()
        .map(|r| r.amount)
        .max()
        .unwrap_or(Decimal::ZERO);
    let revenue_gained = winning_bid.unwrap_or(Decimal::ZERO);

    let result = DemandResult {
        method: DemandMethod::HeaderBidding,
        winner: winner_name,
        winning_bid,
        total_latency_ms,
        sources_called: all_bids.len(),
        all_bids,
        floor_price,
        revenue_gained,
        revenue_opportunity: revenue_opportunity.max(revenue_gained),
    };

    info!(
        winner = result.winner.as_deref().unwrap_or("none"),
        revenue = %result.revenue_gained,
        opportunity = %result.revenue_opportunity,
        latency_ms = result.total_latency_ms,
        timed_out = result.count_status(ResponseStatus::TimedOut),
        "Header bidding complete"
    );

    Ok(result)
}

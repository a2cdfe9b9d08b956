//! Synthetic competitor bids.
//!
//! Non-player bidders price an impression from its estimated value, their
//! own aggression and the inventory quality tier:
//!
//! ```text
//! base       = estimated_value × U(0.8, 1.2)
//! aggression = 0.7 + aggression × 0.6
//! bid        = clamp(base × aggression × quality, min_bid, max_bid)
//! bid        = max(bid, floor_price)
//! ```
//!
//! One random draw per bidder. The output never falls below the floor.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use rtb_common::types::{round_cents, Bid, BidRequest, BidderProfile};

use crate::random::RandomSource;

/// Lower bound of the value jitter.
const VALUE_JITTER_LOW: Decimal = dec!(0.8);
/// Upper bound of the value jitter.
const VALUE_JITTER_HIGH: Decimal = dec!(1.2);

/// Multiplier applied for a bidder's aggression (0.7 to 1.3).
#[inline]
pub fn aggression_multiplier(aggression: f64) -> Decimal {
    let aggression = Decimal::try_from(aggression.clamp(0.0, 1.0)).unwrap_or(Decimal::ZERO);
    dec!(0.7) + aggression * dec!(0.6)
}

/// Generate one competitor bid for a request, rounded to cents.
pub fn generate_bid(
    profile: &BidderProfile,
    request: &BidRequest,
    rng: &mut dyn RandomSource,
) -> Decimal {
    let base = request.estimated_value * rng.uniform_decimal(VALUE_JITTER_LOW, VALUE_JITTER_HIGH);
    let raw = base * aggression_multiplier(profile.aggression) * request.quality.bid_multiplier();

    let bounded = raw.max(profile.min_bid).min(profile.max_bid);
    round_cents(bounded.max(request.floor_price))
}

/// Generate one timestamped bid per profile.
///
/// Bids are stamped one millisecond apart after `placed_after`, in profile
/// order, so earlier profiles win exact ties at clearing.
pub fn generate_competitor_bids(
    profiles: &[BidderProfile],
    request: &BidRequest,
    placed_after: DateTime<Utc>,
    rng: &mut dyn RandomSource,
) -> Vec<Bid> {
    profiles
        .iter()
        .enumerate()
        .map(|(i, profile)| {
            let amount = generate_bid(profile, request, rng);
            let timestamp = placed_after + ChronoDuration::milliseconds(i as i64 + 1);
            Bid::new(profile.bidder_id.clone(), amount, timestamp)
        })
        .collect()
}

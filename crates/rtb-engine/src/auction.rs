//! Auction clearing.
//!
//! Determines the winner and clearing price of a sealed-bid auction.
//!
//! ## Clearing Rules
//!
//! 1. Bids below the floor are excluded from winner determination but kept
//!    in `all_bids` for display/audit.
//! 2. Valid bids are ranked by amount (descending), then by timestamp
//!    (earliest first), then by submission order.
//! 3. The top-ranked bid wins.
//!
//! | Auction      | Winner pays                                           |
//! |--------------|-------------------------------------------------------|
//! | First-price  | Their own bid, exactly                                |
//! | Second-price | Second-highest valid bid + $0.01 (floor + $0.01 alone)|
//!
//! An auction where nothing clears the floor is an ordinary "unsold"
//! result, not an error.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use rtb_common::types::{round_cents, AuctionType, Bid, BidRequest, BidderProfile, CENT};

use crate::competitor::generate_competitor_bids;
use crate::random::RandomSource;
use crate::validate::{self, ValidationError};

/// Bidder ID used for the human player in competitive rounds.
pub const PLAYER_ID: &str = "player";

/// Outcome of clearing one auction.
///
/// Derived, never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuctionResult {
    /// Winning bidder, or `None` when nothing cleared the floor.
    pub winner_id: Option<String>,
    /// Price the winner pays (0 when unsold).
    #[serde(with = "rust_decimal::serde::str")]
    pub win_amount: Decimal,
    pub auction_type: AuctionType,
    #[serde(with = "rust_decimal::serde::str")]
    pub floor_price: Decimal,
    /// Every submitted bid, including those below the floor.
    pub all_bids: Vec<Bid>,
}

impl AuctionResult {
    /// True when no bid met the floor.
    pub fn is_unsold(&self) -> bool {
        self.winner_id.is_none()
    }

    /// Winner ID for display ("none" when unsold).
    pub fn winner_label(&self) -> &str {
        self.winner_id.as_deref().unwrap_or("none")
    }

    /// The winning bid as submitted.
    pub fn winning_bid(&self) -> Option<&Bid> {
        let winner = self.winner_id.as_deref()?;
        self.ranked_valid_bids()
            .into_iter()
            .find(|bid| bid.bidder_id == winner)
    }

    /// Bids that met the floor, in clearing order.
    pub fn ranked_valid_bids(&self) -> Vec<&Bid> {
        rank_valid_bids(&self.all_bids, self.floor_price)
    }

    /// Bids that were excluded for being under the floor.
    pub fn below_floor_bids(&self) -> impl Iterator<Item = &Bid> {
        self.all_bids
            .iter()
            .filter(move |bid| bid.amount < self.floor_price)
    }
}

/// Rank bids at or above the floor: amount desc, timestamp asc, input order.
fn rank_valid_bids(bids: &[Bid], floor_price: Decimal) -> Vec<&Bid> {
    let mut valid: Vec<&Bid> = bids.iter().filter(|bid| bid.amount >= floor_price).collect();
    // Stable sort keeps submission order for full ties.
    valid.sort_by(|a, b| {
        b.amount
            .cmp(&a.amount)
            .then_with(|| a.timestamp.cmp(&b.timestamp))
    });
    valid
}

/// Clear an auction.
///
/// # Errors
///
/// Returns `ValidationError` if the floor or any bid amount is negative.
///
/// # Example
///
/// ```ignore
/// // floor 2.00, bids 2.50 (t=1), 3.00 (t=2), 3.00 (t=3), second-price
/// // => ai1 wins (earlier of the tied 3.00 bids) and pays 3.01
/// let result = clear_auction(bids, AuctionType::SecondPrice, dec!(2.00))?;
/// ```
pub fn clear_auction(
    bids: Vec<Bid>,
    auction_type: AuctionType,
    floor_price: Decimal,
) -> Result<AuctionResult, ValidationError> {
    validate::non_negative("floor_price", floor_price)?;
    for bid in &bids {
        validate::non_negative("bid amount", bid.amount)?;
    }

    let ranked = rank_valid_bids(&bids, floor_price);
    let (winner_id, win_amount) = match ranked.first() {
        None => (None, Decimal::ZERO),
        Some(winner) => {
            let price = match auction_type {
                AuctionType::FirstPrice => winner.amount,
                AuctionType::SecondPrice => {
                    let second = ranked.get(1).map(|bid| bid.amount).unwrap_or(floor_price);
                    round_cents(second + CENT)
                }
            };
            (Some(winner.bidder_id.clone()), price)
        }
    };

    debug!(
        auction_type = %auction_type,
        floor = %floor_price,
        bids = bids.len(),
        valid = ranked.len(),
        winner = winner_id.as_deref().unwrap_or("none"),
        price = %win_amount,
        "Auction cleared"
    );

    Ok(AuctionResult {
        winner_id,
        win_amount,
        auction_type,
        floor_price,
        all_bids: bids,
    })
}

/// Player-centric view of a competitive round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundOutcome {
    pub result: AuctionResult,
    /// The player's submitted bid, if they bid.
    pub player_bid: Option<Decimal>,
    pub player_won: bool,
    /// What the player pays (0 unless they won).
    #[serde(with = "rust_decimal::serde::str")]
    pub player_cost: Decimal,
    /// `estimated_value - cost` when the player won, else 0. Negative means overpaying.
    #[serde(with = "rust_decimal::serde::str")]
    pub player_surplus: Decimal,
}

/// Run one auction between the player and generated competitors.
///
/// The player's bid (if any) is stamped at `placed_at`; competitor bids
/// follow one millisecond apart, so a player matching the top competitor
/// bid wins the tie.
pub fn run_competitive_round(
    request: &BidRequest,
    player_bid: Option<Decimal>,
    competitors: &[BidderProfile],
    auction_type: AuctionType,
    placed_at: DateTime<Utc>,
    rng: &mut dyn RandomSource,
) -> Result<RoundOutcome, ValidationError> {
    validate::non_negative("estimated_value", request.estimated_value)?;
    for profile in competitors {
        validate::bidder_profile(profile)?;
    }

    let mut bids = Vec::with_capacity(competitors.len() + 1);
    if let Some(amount) = player_bid {
        bids.push(Bid::new(PLAYER_ID, amount, placed_at));
    }
    bids.extend(generate_competitor_bids(competitors, request, placed_at, rng));

    let result = clear_auction(bids, auction_type, request.floor_price)?;
    let player_won = result.winner_id.as_deref() == Some(PLAYER_ID);
    let player_cost = if player_won { result.win_amount } else { Decimal::ZERO };
    let player_surplus = if player_won {
        request.estimated_value - player_cost
    } else {
        Decimal::ZERO
    };

    Ok(RoundOutcome {
        result,
        player_bid,
        player_won,
        player_cost,
        player_surplus,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::ScriptedRandom;
    use rust_decimal_macros::dec;

    fn ts(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap()
    }

    fn bid(id: &str, amount: Decimal, t: i64) -> Bid {
        Bid::new(id, amount, ts(t))
    }

    // =========================================================================
    // Floor Handling Tests
    // =========================================================================

    #[test]
    fn test_single_bid_below_floor_is_unsold() {
        let result =
            clear_auction(vec![bid("player", dec!(1.50), 1)], AuctionType::SecondPrice, dec!(2.00))
                .unwrap();

        assert!(result.is_unsold());
        assert_eq!(result.winner_label(), "none");
        assert_eq!(result.win_amount, Decimal::ZERO);
        assert_eq!(result.all_bids.len(), 1);
    }

    #[test]
    fn test_empty_bid_set_is_unsold() {
        let result = clear_auction(Vec::new(), AuctionType::FirstPrice, dec!(0)).unwrap();
        assert!(result.is_unsold());
        assert_eq!(result.win_amount, Decimal::ZERO);
    }

    #[test]
    fn test_bid_equal_to_floor_is_valid() {
        let result =
            clear_auction(vec![bid("a", dec!(2.00), 1)], AuctionType::FirstPrice, dec!(2.00)).unwrap();
        assert_eq!(result.winner_id.as_deref(), Some("a"));
        assert_eq!(result.win_amount, dec!(2.00));
    }

    #[test]
    fn test_below_floor_bids_retained_but_excluded() {
        let bids = vec![bid("low", dec!(1.00), 1), bid("ok", dec!(6.00), 2)];
        let result = clear_auction(bids, AuctionType::FirstPrice, dec!(5.00)).unwrap();
        assert_eq!(result.winner_id.as_deref(), Some("ok"));
        assert_eq!(result.all_bids.len(), 2);
        assert_eq!(result.below_floor_bids().count(), 1);
        assert_eq!(result.ranked_valid_bids().len(), 1);
    }

    // =========================================================================
    // Pricing Rule Tests
    // =========================================================================

    #[test]
    fn test_second_price_tie_break_scenario() {
        let bids = vec![
            bid("player", dec!(2.50), 1),
            bid("ai1", dec!(3.00), 2),
            bid("ai2", dec!(3.00), 3),
        ];
        let result = clear_auction(bids, AuctionType::SecondPrice, dec!(2.00)).unwrap();

        assert_eq!(result.winner_id.as_deref(), Some("ai1"));
        assert_eq!(result.win_amount, dec!(3.01));
    }

    #[test]
    fn test_tie_break_ignores_submission_order() {
        let bids = vec![bid("late", dec!(3.00), 9), bid("early", dec!(3.00), 4)];
        let result = clear_auction(bids, AuctionType::FirstPrice, dec!(0)).unwrap();
        assert_eq!(result.winner_id.as_deref(), Some("early"));
    }

    #[test]
    fn test_second_price_single_valid_bid_pays_floor_plus_cent() {
        let bids = vec![bid("a", dec!(4.00), 1), bid("b", dec!(1.00), 2)];
        let result = clear_auction(bids, AuctionType::SecondPrice, dec!(2.00)).unwrap();
        assert_eq!(result.winner_id.as_deref(), Some("a"));
        assert_eq!(result.win_amount, dec!(2.01));
    }

    #[test]
    fn test_second_price_uses_second_valid_bid() {
        let bids = vec![
            bid("a", dec!(5.00), 1),
            bid("b", dec!(3.37), 2),
            bid("c", dec!(1.00), 3),
        ];
        let result = clear_auction(bids, AuctionType::SecondPrice, dec!(0.50)).unwrap();
        assert_eq!(result.win_amount, dec!(3.38));
    }

    #[test]
    fn test_first_price_pays_own_bid() {
        let bids = vec![bid("a", dec!(4.37), 1), bid("b", dec!(3.00), 2)];
        let result = clear_auction(bids, AuctionType::FirstPrice, dec!(1.00)).unwrap();
        assert_eq!(result.winner_id.as_deref(), Some("a"));
        assert_eq!(result.win_amount, dec!(4.37));
        assert_eq!(result.winning_bid().unwrap().amount, dec!(4.37));
    }

    #[test]
    fn test_negative_input_rejected() {
        assert!(clear_auction(vec![bid("a", dec!(-1), 1)], AuctionType::FirstPrice, dec!(0)).is_err());
        assert!(clear_auction(vec![bid("a", dec!(1), 1)], AuctionType::FirstPrice, dec!(-0.5)).is_err());
    }

    // =========================================================================
    // Competitive Round Tests
    // =========================================================================

    #[test]
    fn test_competitive_round_player_wins_tie() {
        // Competitor bids exactly 4.00 with a midpoint draw; player matches.
        let request = BidRequest::new(dec!(4.00), dec!(1.00));
        let competitors = vec![BidderProfile::new("ai1", dec!(0.5), dec!(10), 0.5)];
        let mut rng = ScriptedRandom::constant(0.5);

        let outcome = run_competitive_round(
            &request,
            Some(dec!(4.00)),
            &competitors,
            AuctionType::SecondPrice,
            ts(0),
            &mut rng,
        )
        .unwrap();

        assert!(outcome.player_won);
        assert_eq!(outcome.player_cost, dec!(4.01));
        assert_eq!(outcome.player_surplus, dec!(-0.01));
    }

    #[test]
    fn test_competitive_round_without_player() {
        let request = BidRequest::new(dec!(4.00), dec!(1.00));
        let competitors = vec![BidderProfile::new("ai1", dec!(0.5), dec!(10), 0.5)];
        let mut rng = ScriptedRandom::constant(0.5);

        let outcome =
            run_competitive_round(&request, None, &competitors, AuctionType::FirstPrice, ts(0), &mut rng)
                .unwrap();

        assert!(!outcome.player_won);
        assert_eq!(outcome.result.winner_id.as_deref(), Some("ai1"));
        assert_eq!(outcome.player_cost, Decimal::ZERO);
    }
}

//! Bid shading advisor.
//!
//! Recommends a bid below the buyer's estimated value so a first-price win
//! does not overpay, adjusted by competition and the buyer's own recent
//! win/loss record.
//!
//! ## Shading Strategy
//!
//! | Step | Rule |
//! |------|------|
//! | Base factor | `0.6 + competition × 0.3` (0.6 to 0.9) |
//! | Win rate < 30% | factor × 0.85 |
//! | Win rate > 70% | factor × 1.15 |
//! | Suggested bid | `value × factor`, cents, within `[floor + 0.01, max(value, floor + 0.01)]` |
//!
//! This is a heuristic. The only guarantee is determinism: the same inputs
//! and the same history always produce the same suggestion.
//!
//! History is an immutable `BidHistory` snapshot. Recording an outcome
//! builds a new snapshot, so windows holding an older snapshot are never
//! affected by later outcomes.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::debug;

use rtb_common::types::{round_cents, CENT};

use crate::validate::{self, ValidationError};

/// Default number of outcomes kept in the rolling history.
pub const DEFAULT_MAX_HISTORY: usize = 100;

/// Configuration for the shading advisor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShadingConfig {
    /// Maximum outcomes kept (oldest evicted first).
    pub max_history: usize,
    /// Bids within ± this amount count as "similar" for empirical win rates.
    pub similar_bid_window: Decimal,
    /// Similar bids required before trusting the empirical win rate.
    pub min_similar_samples: usize,
}

impl Default for ShadingConfig {
    fn default() -> Self {
        Self {
            max_history: DEFAULT_MAX_HISTORY,
            similar_bid_window: dec!(2.00),
            min_similar_samples: 5,
        }
    }
}

/// Risk of the suggested bid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// Bid close to value or well above floor; likely win.
    Low,
    Medium,
    /// Aggressive shading; likely loss.
    High,
}

impl RiskLevel {
    /// Classify a bid against value and floor.
    ///
    /// `ratio > 0.85 || margin > 50%` is low, `ratio > 0.65 || margin > 25%`
    /// is medium, anything else is high. A zero floor has unbounded margin.
    pub fn classify(bid: Decimal, estimated_value: Decimal, floor_price: Decimal) -> Self {
        let ratio = if estimated_value.is_zero() {
            Decimal::ZERO
        } else {
            bid / estimated_value
        };
        let margin = if floor_price.is_zero() {
            None
        } else {
            Some((bid - floor_price) / floor_price)
        };
        let margin_above = |threshold: Decimal| margin.is_none_or(|m| m > threshold);

        if ratio > dec!(0.85) || margin_above(dec!(0.50)) {
            RiskLevel::Low
        } else if ratio > dec!(0.65) || margin_above(dec!(0.25)) {
            RiskLevel::Medium
        } else {
            RiskLevel::High
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One recorded auction outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BidHistoryEntry {
    #[serde(with = "rust_decimal::serde::str")]
    pub estimated_value: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub bid_amount: Decimal,
    pub won: bool,
    #[serde(with = "rust_decimal::serde::str")]
    pub clearing_price: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Bounded, append-only snapshot of recent outcomes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BidHistory {
    entries: VecDeque<BidHistoryEntry>,
    max_entries: usize,
    /// Wins ever recorded (not bounded by the window).
    wins_recorded: u64,
    /// Losses ever recorded (not bounded by the window).
    losses_recorded: u64,
    #[serde(with = "rust_decimal::serde::str")]
    avg_winning_bid: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    avg_losing_bid: Decimal,
}

impl Default for BidHistory {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HISTORY)
    }
}

impl BidHistory {
    /// Create an empty history holding at most `max_entries` outcomes.
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(max_entries.min(1024)),
            max_entries: max_entries.max(1),
            wins_recorded: 0,
            losses_recorded: 0,
            avg_winning_bid: Decimal::ZERO,
            avg_losing_bid: Decimal::ZERO,
        }
    }

    /// Return a new snapshot with `entry` appended.
    ///
    /// Evicts the oldest entries beyond the cap and folds the bid into the
    /// running win/loss averages: `avg' = (avg × (n − 1) + x) / n`.
    pub fn with_entry(&self, entry: BidHistoryEntry) -> Self {
        let mut next = self.clone();

        if entry.won {
            next.wins_recorded += 1;
            next.avg_winning_bid =
                incremental_mean(next.avg_winning_bid, next.wins_recorded, entry.bid_amount);
        } else {
            next.losses_recorded += 1;
            next.avg_losing_bid =
                incremental_mean(next.avg_losing_bid, next.losses_recorded, entry.bid_amount);
        }

        next.entries.push_back(entry);
        while next.entries.len() > next.max_entries {
            next.entries.pop_front();
        }
        next
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Entries oldest first.
    pub fn entries(&self) -> impl Iterator<Item = &BidHistoryEntry> {
        self.entries.iter()
    }

    pub fn avg_winning_bid(&self) -> Decimal {
        self.avg_winning_bid
    }

    pub fn avg_losing_bid(&self) -> Decimal {
        self.avg_losing_bid
    }

    pub fn wins_recorded(&self) -> u64 {
        self.wins_recorded
    }

    pub fn losses_recorded(&self) -> u64 {
        self.losses_recorded
    }

    /// Win fraction over the current window, `None` when empty.
    pub fn win_rate(&self) -> Option<f64> {
        if self.entries.is_empty() {
            return None;
        }
        let wins = self.entries.iter().filter(|e| e.won).count();
        Some(wins as f64 / self.entries.len() as f64)
    }

    /// (similar bids, wins among them) for bids within ±`window` of `amount`.
    pub fn similar_bids(&self, amount: Decimal, window: Decimal) -> (usize, usize) {
        self.entries
            .iter()
            .filter(|e| (e.bid_amount - amount).abs() <= window)
            .fold((0, 0), |(n, wins), e| (n + 1, wins + usize::from(e.won)))
    }
}

fn incremental_mean(avg: Decimal, n: u64, x: Decimal) -> Decimal {
    let n = Decimal::from(n);
    (avg * (n - Decimal::ONE) + x) / n
}

/// Recommended bid for an impression.
///
/// Recomputed on every call; never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BidShadingSuggestion {
    #[serde(with = "rust_decimal::serde::str")]
    pub suggested_bid: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub min_bid: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub max_bid: Decimal,
    /// Grows with history depth, capped at 0.95.
    pub confidence: f64,
    pub risk_level: RiskLevel,
    pub rationale: String,
    pub predicted_win_prob: f64,
}

/// Compute a suggestion from a history snapshot.
///
/// # Errors
///
/// Negative value/floor or a competition level outside `[0, 1]`.
pub fn suggest_shaded_bid(
    config: &ShadingConfig,
    history: &BidHistory,
    estimated_value: Decimal,
    floor_price: Decimal,
    competition_level: f64,
) -> Result<BidShadingSuggestion, ValidationError> {
    validate::non_negative("estimated_value", estimated_value)?;
    validate::non_negative("floor_price", floor_price)?;
    let competition = validate::unit_interval("competition_level", competition_level)?;

    let competition_dec = Decimal::try_from(competition).unwrap_or(Decimal::ZERO);
    let base_factor = dec!(0.6) + competition_dec * dec!(0.3);

    let win_rate = history.win_rate();
    let (shading_factor, streak_note) = match win_rate {
        Some(rate) if rate < 0.3 => (base_factor * dec!(0.85), "win rate under 30%"),
        Some(rate) if rate > 0.7 => (base_factor * dec!(1.15), "win rate over 70%"),
        _ => (base_factor, "no streak adjustment"),
    };

    let min_bid = round_cents(floor_price + CENT);
    let max_bid = round_cents(estimated_value).max(min_bid);
    let suggested_bid = round_cents(estimated_value * shading_factor)
        .min(max_bid)
        .max(min_bid);

    let risk_level = RiskLevel::classify(suggested_bid, estimated_value, floor_price);
    let predicted_win_prob = predicted_win_probability(config, history, suggested_bid, competition);
    let confidence = (0.3 + 0.05 * history.len() as f64).min(0.95);

    let rationale = format!(
        "Bid {:.0}% of value ({:.0}% competition, {}); {} risk, {:.0}% predicted win",
        (shading_factor * dec!(100)).round(),
        competition * 100.0,
        streak_note,
        risk_level,
        predicted_win_prob * 100.0,
    );

    debug!(
        value = %estimated_value,
        floor = %floor_price,
        competition,
        factor = %shading_factor,
        suggested = %suggested_bid,
        risk = %risk_level,
        "Shaded bid suggested"
    );

    Ok(BidShadingSuggestion {
        suggested_bid,
        min_bid,
        max_bid,
        confidence,
        risk_level,
        rationale,
        predicted_win_prob,
    })
}

/// Empirical win rate of similar bids, or a formula fallback.
///
/// Fallback: `0.5 + min(0.3, 0.2 × bid / avg_winning_bid) − min(0.2, 0.3 × competition)`,
/// clamped to `[0.1, 0.95]`.
fn predicted_win_probability(
    config: &ShadingConfig,
    history: &BidHistory,
    bid: Decimal,
    competition: f64,
) -> f64 {
    let (similar, wins) = history.similar_bids(bid, config.similar_bid_window);
    if similar >= config.min_similar_samples && similar > 0 {
        return wins as f64 / similar as f64;
    }

    let avg_win = history.avg_winning_bid();
    let bonus = if avg_win > Decimal::ZERO {
        let relative = (bid / avg_win).to_f64().unwrap_or(0.0);
        (0.2 * relative).min(0.3)
    } else {
        0.0
    };
    let penalty = (0.3 * competition).min(0.2);

    (0.5 + bonus - penalty).clamp(0.1, 0.95)
}

/// Stateful advisor owning the rolling history.
#[derive(Debug, Clone, Default)]
pub struct BidShadingAdvisor {
    config: ShadingConfig,
    history: BidHistory,
}

impl BidShadingAdvisor {
    pub fn new(config: ShadingConfig) -> Self {
        let history = BidHistory::new(config.max_history);
        Self { config, history }
    }

    /// Resume from a caller-persisted history.
    pub fn with_history(config: ShadingConfig, history: BidHistory) -> Self {
        Self { config, history }
    }

    pub fn config(&self) -> &ShadingConfig {
        &self.config
    }

    /// Current history snapshot.
    pub fn history(&self) -> &BidHistory {
        &self.history
    }

    /// Recommend a bid using the current history.
    pub fn suggest(
        &self,
        estimated_value: Decimal,
        floor_price: Decimal,
        competition_level: f64,
    ) -> Result<BidShadingSuggestion, ValidationError> {
        suggest_shaded_bid(
            &self.config,
            &self.history,
            estimated_value,
            floor_price,
            competition_level,
        )
    }

    /// Record an auction outcome stamped with the current time.
    pub fn record_outcome(
        &mut self,
        estimated_value: Decimal,
        bid_amount: Decimal,
        won: bool,
        clearing_price: Decimal,
    ) -> Result<(), ValidationError> {
        self.record_outcome_at(estimated_value, bid_amount, won, clearing_price, Utc::now())
    }

    /// Record an auction outcome with an explicit timestamp.
    pub fn record_outcome_at(
        &mut self,
        estimated_value: Decimal,
        bid_amount: Decimal,
        won: bool,
        clearing_price: Decimal,
        timestamp: DateTime<Utc>,
    ) -> Result<(), ValidationError> {
        validate::non_negative("estimated_value", estimated_value)?;
        validate::non_negative("bid_amount", bid_amount)?;
        validate::non_negative("clearing_price", clearing_price)?;

        self.history = self.history.with_entry(BidHistoryEntry {
            estimated_value,
            bid_amount,
            won,
            clearing_price,
            timestamp,
        });

        debug!(
            bid = %bid_amount,
            won,
            clearing = %clearing_price,
            history_len = self.history.len(),
            "Bid outcome recorded"
        );
        Ok(())
    }
}

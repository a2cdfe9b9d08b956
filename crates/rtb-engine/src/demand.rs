//! Demand orchestration: waterfall vs header bidding.
//!
//! Both orchestrators ask a lineup of `DemandSource`s for a bid under
//! simulated latency and fill probability, and report a `DemandResult`.
//!
//! ## Protocols
//!
//! - `waterfall`: one source at a time in priority order; the first fill at
//!   or above the floor wins and later sources are never contacted.
//! - `header_bidding`: every source at once under a shared timeout; the
//!   highest qualifying bid wins.
//!
//! `YieldComparison` contrasts the two runs for the same lineup.

pub mod header_bidding;
pub mod waterfall;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use rtb_common::types::{round_cents, DemandSource};

use crate::random::RandomSource;

pub use header_bidding::run_header_bidding;
pub use waterfall::run_waterfall;

/// Orchestration protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DemandMethod {
    Waterfall,
    HeaderBidding,
}

impl DemandMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DemandMethod::Waterfall => "waterfall",
            DemandMethod::HeaderBidding => "header-bidding",
        }
    }
}

impl std::fmt::Display for DemandMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What happened when a source was asked for a bid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    /// Winning bid.
    Won,
    /// Valid bid that did not win.
    Bid,
    /// Filled below the floor.
    BelowFloor,
    /// Source declined to bid.
    NoFill,
    /// Source answered after the shared timeout.
    TimedOut,
}

/// One source's answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceResponse {
    pub source: String,
    pub priority: u32,
    /// `None` for no-fill and timed-out sources.
    #[serde(with = "rust_decimal::serde::str_option")]
    pub bid: Option<Decimal>,
    /// Time spent waiting on this source.
    pub latency_ms: u64,
    pub status: ResponseStatus,
}

/// Result of a waterfall or header-bidding run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DemandResult {
    pub method: DemandMethod,
    pub winner: Option<String>,
    #[serde(with = "rust_decimal::serde::str_option")]
    pub winning_bid: Option<Decimal>,
    /// Sum of waits (waterfall) or slowest wait (header bidding).
    pub total_latency_ms: u64,
    /// Responses from every contacted source, in contact order.
    pub all_bids: Vec<SourceResponse>,
    #[serde(with = "rust_decimal::serde::str")]
    pub floor_price: Decimal,
    /// Winning bid, or 0 when unfilled.
    #[serde(with = "rust_decimal::serde::str")]
    pub revenue_gained: Decimal,
    /// Best bid any source could have produced. Informational only.
    #[serde(with = "rust_decimal::serde::str")]
    pub revenue_opportunity: Decimal,
    /// Number of sources actually contacted.
    pub sources_called: usize,
}

impl DemandResult {
    /// Result for an empty lineup.
    pub(crate) fn empty(method: DemandMethod, floor_price: Decimal) -> Self {
        Self {
            method,
            winner: None,
            winning_bid: None,
            total_latency_ms: 0,
            all_bids: Vec::new(),
            floor_price,
            revenue_gained: Decimal::ZERO,
            revenue_opportunity: Decimal::ZERO,
            sources_called: 0,
        }
    }

    pub fn is_filled(&self) -> bool {
        self.winner.is_some()
    }

    /// The response recorded for `source`, if it was contacted.
    pub fn response_for(&self, source: &str) -> Option<&SourceResponse> {
        self.all_bids.iter().find(|r| r.source == source)
    }

    /// Count of responses with the given status.
    pub fn count_status(&self, status: ResponseStatus) -> usize {
        self.all_bids.iter().filter(|r| r.status == status).count()
    }

    /// `revenue_gained / revenue_opportunity` (0 when there was no opportunity).
    pub fn fill_efficiency(&self) -> f64 {
        if self.revenue_opportunity <= Decimal::ZERO {
            return 0.0;
        }
        (self.revenue_gained / self.revenue_opportunity)
            .to_f64()
            .unwrap_or(0.0)
    }
}

/// Side-by-side yield of the two protocols on the same lineup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YieldComparison {
    #[serde(with = "rust_decimal::serde::str")]
    pub waterfall_revenue: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub header_bidding_revenue: Decimal,
    /// Header bidding revenue minus waterfall revenue.
    #[serde(with = "rust_decimal::serde::str")]
    pub revenue_uplift: Decimal,
    pub waterfall_latency_ms: u64,
    pub header_bidding_latency_ms: u64,
    /// Waterfall latency minus header bidding latency (negative when slower).
    pub latency_saved_ms: i64,
    pub waterfall_efficiency: f64,
    pub header_bidding_efficiency: f64,
}

impl YieldComparison {
    pub fn compare(waterfall: &DemandResult, header_bidding: &DemandResult) -> Self {
        Self {
            waterfall_revenue: waterfall.revenue_gained,
            header_bidding_revenue: header_bidding.revenue_gained,
            revenue_uplift: header_bidding.revenue_gained - waterfall.revenue_gained,
            waterfall_latency_ms: waterfall.total_latency_ms,
            header_bidding_latency_ms: header_bidding.total_latency_ms,
            latency_saved_ms: signed_ms(waterfall.total_latency_ms)
                .saturating_sub(signed_ms(header_bidding.total_latency_ms)),
            waterfall_efficiency: waterfall.fill_efficiency(),
            header_bidding_efficiency: header_bidding.fill_efficiency(),
        }
    }

    /// Method that earned more (waterfall wins exact ties).
    pub fn higher_yield(&self) -> DemandMethod {
        if self.header_bidding_revenue > self.waterfall_revenue {
            DemandMethod::HeaderBidding
        } else {
            DemandMethod::Waterfall
        }
    }
}

fn signed_ms(ms: u64) -> i64 {
    i64::try_from(ms).unwrap_or(i64::MAX)
}

/// Bid a source makes when it fills: `avg_bid × U(0.7, 1.3)`, in cents.
pub(crate) fn draw_source_bid(source: &DemandSource, rng: &mut dyn RandomSource) -> Decimal {
    round_cents(source.avg_bid * rng.uniform_decimal(dec!(0.7), dec!(1.3)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::ScriptedRandom;

    fn result(method: DemandMethod, gained: Decimal, opportunity: Decimal, latency: u64) -> DemandResult {
        DemandResult {
            revenue_gained: gained,
            revenue_opportunity: opportunity,
            total_latency_ms: latency,
            ..DemandResult::empty(method, dec!(1.00))
        }
    }

    #[test]
    fn test_draw_source_bid_range() {
        let source = DemandSource::new("ssp", 1, dec!(2.00), 100, 1.0);
        assert_eq!(draw_source_bid(&source, &mut ScriptedRandom::constant(0.0)), dec!(1.40));
        assert_eq!(draw_source_bid(&source, &mut ScriptedRandom::constant(0.5)), dec!(2.00));
        assert!(draw_source_bid(&source, &mut ScriptedRandom::new([1.0])) <= dec!(2.60));
    }

    #[test]
    fn test_fill_efficiency() {
        let r = result(DemandMethod::Waterfall, dec!(1.50), dec!(3.00), 0);
        assert!((r.fill_efficiency() - 0.5).abs() < 1e-9);

        let none = result(DemandMethod::Waterfall, dec!(0), dec!(0), 0);
        assert_eq!(none.fill_efficiency(), 0.0);
    }

    #[test]
    fn test_yield_comparison() {
        let waterfall = result(DemandMethod::Waterfall, dec!(1.80), dec!(3.00), 900);
        let header = result(DemandMethod::HeaderBidding, dec!(2.70), dec!(3.00), 300);

        let cmp = YieldComparison::compare(&waterfall, &header);
        assert_eq!(cmp.revenue_uplift, dec!(0.90));
        assert_eq!(cmp.latency_saved_ms, 600);
        assert_eq!(cmp.higher_yield(), DemandMethod::HeaderBidding);
        assert!((cmp.header_bidding_efficiency - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_yield_comparison_extreme_latency() {
        let waterfall = result(DemandMethod::Waterfall, dec!(1.00), dec!(1.00), u64::MAX);
        let header = result(DemandMethod::HeaderBidding, dec!(1.00), dec!(1.00), 0);

        assert_eq!(YieldComparison::compare(&waterfall, &header).latency_saved_ms, i64::MAX);
        assert_eq!(YieldComparison::compare(&header, &waterfall).latency_saved_ms, -i64::MAX);
    }

    #[test]
    fn test_empty_result() {
        let r = DemandResult::empty(DemandMethod::HeaderBidding, dec!(2.00));
        assert!(!r.is_filled());
        assert_eq!(r.total_latency_ms, 0);
        assert_eq!(r.sources_called, 0);
        assert!(r.response_for("anything").is_none());
    }
}

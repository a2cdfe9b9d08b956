//! Shared types for the RTB auction simulation engine.
//!
//! CRITICAL: All prices and bid amounts use `rust_decimal::Decimal`.
//! NEVER use f64 for currency. Probabilities and ratios (fill rate,
//! aggression, viewability) are plain `f64` in `[0, 1]`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// One cent, the smallest currency increment used by every auction.
pub const CENT: Decimal = dec!(0.01);

/// Round a currency amount to cents, midpoints away from zero.
#[inline]
pub fn round_cents(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, rust_decimal::RoundingStrategy::MidpointAwayFromZero)
}

/// Auction pricing rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum AuctionType {
    /// Winner pays their own bid.
    FirstPrice,
    /// Winner pays the second-highest valid bid plus one cent.
    #[default]
    SecondPrice,
}

impl AuctionType {
    /// Returns the display name.
    pub fn as_str(&self) -> &'static str {
        match self {
            AuctionType::FirstPrice => "first-price",
            AuctionType::SecondPrice => "second-price",
        }
    }
}

impl std::fmt::Display for AuctionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for AuctionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "first-price" | "first" | "1st" => Ok(AuctionType::FirstPrice),
            "second-price" | "second" | "2nd" | "vickrey" => Ok(AuctionType::SecondPrice),
            _ => Err(format!("Unknown auction type: {}", s)),
        }
    }
}

/// Inventory quality tier of the slot being auctioned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    Premium,
    #[default]
    Standard,
    Remnant,
}

impl QualityTier {
    /// Bid multiplier competitors apply for this tier.
    pub fn bid_multiplier(&self) -> Decimal {
        match self {
            QualityTier::Premium => dec!(1.3),
            QualityTier::Standard => dec!(1.0),
            QualityTier::Remnant => dec!(0.7),
        }
    }

    /// Returns the display name.
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityTier::Premium => "premium",
            QualityTier::Standard => "standard",
            QualityTier::Remnant => "remnant",
        }
    }
}

impl std::fmt::Display for QualityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for QualityTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "premium" => Ok(QualityTier::Premium),
            "standard" => Ok(QualityTier::Standard),
            "remnant" => Ok(QualityTier::Remnant),
            _ => Err(format!("Unknown quality tier: {}", s)),
        }
    }
}

/// Device the impression will render on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Desktop,
    Mobile,
    Tablet,
    Ctv,
}

/// Placement of the slot on the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdPosition {
    AboveFold,
    BelowFold,
    Sidebar,
}

/// Optional user/context signals attached to a request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContextSignals {
    pub device: DeviceType,
    /// Probability the slot is viewable (0.0-1.0).
    pub viewability: f64,
    pub position: AdPosition,
}

/// A single bid placed into an auction.
///
/// Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bid {
    /// Bidder identifier ("player", "ai1", a demand source name, ...).
    pub bidder_id: String,
    /// Bid amount in dollars (cents precision).
    #[serde(with = "rust_decimal::serde::str")]
    pub amount: Decimal,
    /// When the bid was placed. Earlier bids win ties.
    pub timestamp: DateTime<Utc>,
}

impl Bid {
    pub fn new(bidder_id: impl Into<String>, amount: Decimal, timestamp: DateTime<Utc>) -> Self {
        Self {
            bidder_id: bidder_id.into(),
            amount,
            timestamp,
        }
    }
}

/// What is being auctioned.
///
/// Created once per auction invocation; read-only during clearing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BidRequest {
    pub request_id: String,
    /// Buyer's estimate of the impression's worth.
    #[serde(with = "rust_decimal::serde::str")]
    pub estimated_value: Decimal,
    /// Minimum acceptable bid.
    #[serde(with = "rust_decimal::serde::str")]
    pub floor_price: Decimal,
    pub quality: QualityTier,
    pub context: Option<ContextSignals>,
}

impl BidRequest {
    /// Create a standard-tier request with a generated request ID.
    pub fn new(estimated_value: Decimal, floor_price: Decimal) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            estimated_value,
            floor_price,
            quality: QualityTier::Standard,
            context: None,
        }
    }

    /// Set the request ID.
    pub fn with_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    /// Set the quality tier.
    pub fn with_quality(mut self, quality: QualityTier) -> Self {
        self.quality = quality;
        self
    }

    /// Attach context signals.
    pub fn with_context(mut self, context: ContextSignals) -> Self {
        self.context = Some(context);
        self
    }
}

/// Synthetic competing bidder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BidderProfile {
    pub bidder_id: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub min_bid: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub max_bid: Decimal,
    /// 0.0 = timid, 1.0 = aggressive.
    pub aggression: f64,
}

impl BidderProfile {
    pub fn new(bidder_id: impl Into<String>, min_bid: Decimal, max_bid: Decimal, aggression: f64) -> Self {
        Self {
            bidder_id: bidder_id.into(),
            min_bid,
            max_bid,
            aggression,
        }
    }
}

/// A named demand channel competing for the impression.
///
/// Static configuration; only the per-run outcome varies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemandSource {
    pub name: String,
    /// Waterfall ordering (lower is called first).
    pub priority: u32,
    /// Typical bid when the source fills.
    #[serde(with = "rust_decimal::serde::str")]
    pub avg_bid: Decimal,
    /// Simulated response latency.
    pub latency_ms: u64,
    /// Probability the source returns a bid at all (0.0-1.0).
    pub fill_rate: f64,
}

impl DemandSource {
    pub fn new(
        name: impl Into<String>,
        priority: u32,
        avg_bid: Decimal,
        latency_ms: u64,
        fill_rate: f64,
    ) -> Self {
        Self {
            name: name.into(),
            priority,
            avg_bid,
            latency_ms,
            fill_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_cents_half_up() {
        assert_eq!(round_cents(dec!(3.005)), dec!(3.01));
        assert_eq!(round_cents(dec!(3.004)), dec!(3.00));
        assert_eq!(round_cents(dec!(2.125)), dec!(2.13));
    }

    #[test]
    fn test_auction_type_from_str() {
        assert_eq!("first-price".parse::<AuctionType>(), Ok(AuctionType::FirstPrice));
        assert_eq!("SECOND_PRICE".parse::<AuctionType>(), Ok(AuctionType::SecondPrice));
        assert_eq!("vickrey".parse::<AuctionType>(), Ok(AuctionType::SecondPrice));
        assert!("dutch".parse::<AuctionType>().is_err());
    }

    #[test]
    fn test_auction_type_serde_kebab() {
        let json = serde_json::to_string(&AuctionType::FirstPrice).unwrap();
        assert_eq!(json, "\"first-price\"");
    }

    #[test]
    fn test_quality_multipliers() {
        assert_eq!(QualityTier::Premium.bid_multiplier(), dec!(1.3));
        assert_eq!(QualityTier::Standard.bid_multiplier(), dec!(1.0));
        assert_eq!(QualityTier::Remnant.bid_multiplier(), dec!(0.7));
        assert_eq!("Remnant".parse::<QualityTier>(), Ok(QualityTier::Remnant));
    }

    #[test]
    fn test_bid_request_builder() {
        let request = BidRequest::new(dec!(5.00), dec!(2.00))
            .with_id("req-1")
            .with_quality(QualityTier::Premium);

        assert_eq!(request.request_id, "req-1");
        assert_eq!(request.quality, QualityTier::Premium);
        assert!(request.context.is_none());
    }

    #[test]
    fn test_bid_amount_serializes_as_string() {
        let bid = Bid::new("ai1", dec!(3.00), DateTime::from_timestamp_millis(0).unwrap());
        let json = serde_json::to_string(&bid).unwrap();
        assert!(json.contains("\"amount\":\"3.00\""));
    }
}

//! Shared types for the RTB auction simulation engine.
//!
//! This crate contains:
//! - Auction inputs (Bid, BidRequest, BidderProfile, DemandSource)
//! - Pricing enums (AuctionType, QualityTier)
//! - Cents rounding helpers

pub mod types;

pub use types::*;

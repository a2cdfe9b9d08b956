//! Boundary validation for engine inputs.
//!
//! Negative currency, non-finite ratios and empty timeouts are rejected
//! here, before any simulation runs, so NaN never reaches ordering or
//! rounding logic.

use std::collections::HashSet;
use std::time::Duration;

use rust_decimal::Decimal;
use thiserror::Error;

use rtb_common::types::{BidderProfile, DemandSource};

/// Invalid input passed to the engine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{field} must be non-negative, got {value}")]
    NegativeAmount { field: &'static str, value: Decimal },

    #[error("{field} must be a finite value, got {value}")]
    NonFinite { field: &'static str, value: f64 },

    #[error("{field} must be within [0, 1], got {value}")]
    OutOfRange { field: &'static str, value: f64 },

    #[error("{field} must be greater than zero")]
    ZeroDuration { field: &'static str },

    #[error("bidder {bidder_id}: min_bid {min_bid} exceeds max_bid {max_bid}")]
    InvertedBidRange {
        bidder_id: String,
        min_bid: Decimal,
        max_bid: Decimal,
    },

    #[error("demand source {0} has an empty name")]
    UnnamedSource(u32),

    #[error("demand source name {0} is used more than once")]
    DuplicateSource(String),
}

/// Reject negative currency amounts.
pub fn non_negative(field: &'static str, value: Decimal) -> Result<Decimal, ValidationError> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(ValidationError::NegativeAmount { field, value });
    }
    Ok(value)
}

/// Reject NaN/infinite values and anything outside `[0, 1]`.
pub fn unit_interval(field: &'static str, value: f64) -> Result<f64, ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError::NonFinite { field, value });
    }
    if !(0.0..=1.0).contains(&value) {
        return Err(ValidationError::OutOfRange { field, value });
    }
    Ok(value)
}

/// Reject zero-length timeouts and countdowns.
pub fn positive_duration(field: &'static str, value: Duration) -> Result<Duration, ValidationError> {
    if value.is_zero() {
        return Err(ValidationError::ZeroDuration { field });
    }
    Ok(value)
}

/// Validate a competitor profile.
pub fn bidder_profile(profile: &BidderProfile) -> Result<(), ValidationError> {
    non_negative("min_bid", profile.min_bid)?;
    non_negative("max_bid", profile.max_bid)?;
    unit_interval("aggression", profile.aggression)?;
    if profile.min_bid > profile.max_bid {
        return Err(ValidationError::InvertedBidRange {
            bidder_id: profile.bidder_id.clone(),
            min_bid: profile.min_bid,
            max_bid: profile.max_bid,
        });
    }
    Ok(())
}

/// Validate every demand source in a lineup.
///
/// Names key each source's random stream and its response, so they must be
/// unique.
pub fn demand_sources(sources: &[DemandSource]) -> Result<(), ValidationError> {
    let mut seen = HashSet::with_capacity(sources.len());
    for source in sources {
        if source.name.trim().is_empty() {
            return Err(ValidationError::UnnamedSource(source.priority));
        }
        if !seen.insert(source.name.as_str()) {
            return Err(ValidationError::DuplicateSource(source.name.clone()));
        }
        non_negative("avg_bid", source.avg_bid)?;
        unit_interval("fill_rate", source.fill_rate)?;
    }
    Ok(())
}

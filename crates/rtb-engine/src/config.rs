//! Configuration for the RTB simulation engine.
//!
//! Supports loading from TOML file with environment variable overrides.
//! Currency values are written as floats in TOML and converted to cents
//! at load time.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;

use rtb_common::types::{round_cents, AuctionType, BidderProfile, DemandSource, QualityTier};

use crate::clock::LatencyMode;
use crate::decision::{DecisionConfig, DEFAULT_DECISION_WINDOW};
use crate::events::{EventConfig, DEFAULT_EVENT_CAPACITY};
use crate::shading::{ShadingConfig, DEFAULT_MAX_HISTORY};

/// Default header bidding timeout.
pub const DEFAULT_HEADER_TIMEOUT: Duration = Duration::from_millis(1000);

/// Top-level configuration for the engine and the `rtb-sim` binary.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// What `rtb-sim` runs.
    pub mode: SimMode,

    /// Seed for replayable runs; `None` draws one from entropy.
    pub seed: Option<u64>,

    /// Logging level.
    pub log_level: String,

    /// Real or instant source latency.
    pub latency_mode: LatencyMode,

    /// Auction parameters.
    pub auction: AuctionConfig,

    /// Shading advisor parameters.
    pub shading: ShadingConfig,

    /// Competition level fed to the advisor, in `[0, 1]`.
    pub competition_level: f64,

    /// Shared timeout for header bidding.
    pub header_bidding_timeout: Duration,

    /// Decision window parameters.
    pub decision: DecisionConfig,

    /// Notification channel parameters.
    pub events: EventConfig,

    /// Demand lineup for waterfall and header bidding.
    pub demand_sources: Vec<DemandSource>,

    /// Competitor profiles for auction rounds.
    pub competitors: Vec<BidderProfile>,
}

/// Simulation run by `rtb-sim`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimMode {
    /// Player vs generated competitors.
    Auction,
    /// Sequential demand only.
    Waterfall,
    /// Parallel demand only.
    HeaderBidding,
    /// Both orchestrators on the same lineup.
    Compare,
}

impl SimMode {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "auction" => Some(SimMode::Auction),
            "waterfall" => Some(SimMode::Waterfall),
            "header" | "header-bidding" | "header_bidding" => Some(SimMode::HeaderBidding),
            "compare" => Some(SimMode::Compare),
            _ => None,
        }
    }
}

impl std::fmt::Display for SimMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SimMode::Auction => write!(f, "auction"),
            SimMode::Waterfall => write!(f, "waterfall"),
            SimMode::HeaderBidding => write!(f, "header-bidding"),
            SimMode::Compare => write!(f, "compare"),
        }
    }
}

/// Auction parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct AuctionConfig {
    pub auction_type: AuctionType,
    pub floor_price: Decimal,
    /// The player's estimated value per impression.
    pub player_value: Decimal,
    pub quality: QualityTier,
}

impl Default for AuctionConfig {
    fn default() -> Self {
        Self {
            auction_type: AuctionType::SecondPrice,
            floor_price: dec!(1.00),
            player_value: dec!(5.00),
            quality: QualityTier::Standard,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from(TomlConfig::default())
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: TomlConfig = toml::from_str(content).context("Failed to parse TOML config")?;
        Ok(Self::from(file))
    }

    /// Apply environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(seed) = lookup("RTB_SEED")
            && let Ok(seed) = seed.trim().parse()
        {
            self.seed = Some(seed);
        }
        if let Some(level) = lookup("RTB_LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(ms) = lookup("RTB_TIMEOUT_MS")
            && let Ok(ms) = ms.trim().parse()
        {
            self.header_bidding_timeout = Duration::from_millis(ms);
        }
        if let Some(floor) = lookup("RTB_FLOOR_PRICE")
            && let Ok(floor) = floor.trim().parse::<Decimal>()
        {
            self.auction.floor_price = round_cents(floor);
        }
    }

    /// Apply CLI argument overrides.
    pub fn apply_cli_overrides(
        &mut self,
        mode: Option<String>,
        seed: Option<u64>,
        latency_mode: Option<LatencyMode>,
    ) {
        if let Some(mode_str) = mode
            && let Some(m) = SimMode::from_str(&mode_str)
        {
            self.mode = m;
        }

        if seed.is_some() {
            self.seed = seed;
        }

        if let Some(latency_mode) = latency_mode {
            self.latency_mode = latency_mode;
        }
    }

    /// Validate configuration and return errors for invalid values.
    pub fn validate(&self) -> Result<()> {
        if self.auction.floor_price < Decimal::ZERO {
            bail!("floor_price must be non-negative");
        }
        if self.auction.player_value < Decimal::ZERO {
            bail!("player_value must be non-negative");
        }

        if !(0.0..=1.0).contains(&self.competition_level) {
            bail!("competition_level must be between 0 and 1");
        }
        if self.shading.max_history == 0 {
            bail!("history_size must be at least 1");
        }
        if self.shading.similar_bid_window < Decimal::ZERO {
            bail!("similar_bid_window must be non-negative");
        }

        if self.header_bidding_timeout.is_zero() {
            bail!("header_bidding timeout_ms must be positive");
        }
        if self.decision.window.is_zero() {
            bail!("decision window_ms must be positive");
        }
        if self.events.channel_capacity == 0 {
            bail!("events channel_capacity must be at least 1");
        }

        let mut names = HashSet::new();
        for source in &self.demand_sources {
            if source.name.trim().is_empty() {
                bail!("demand source with priority {} has no name", source.priority);
            }
            if !names.insert(source.name.as_str()) {
                bail!("demand source {} is listed more than once", source.name);
            }
            if !(0.0..=1.0).contains(&source.fill_rate) {
                bail!("demand source {}: fill_rate must be between 0 and 1", source.name);
            }
            if source.avg_bid < Decimal::ZERO {
                bail!("demand source {}: avg_bid must be non-negative", source.name);
            }
        }

        for competitor in &self.competitors {
            if !(0.0..=1.0).contains(&competitor.aggression) {
                bail!("competitor {}: aggression must be between 0 and 1", competitor.bidder_id);
            }
            if competitor.min_bid < Decimal::ZERO || competitor.min_bid > competitor.max_bid {
                bail!(
                    "competitor {}: need 0 <= min_bid <= max_bid",
                    competitor.bidder_id
                );
            }
        }

        Ok(())
    }
}

// ============================================================================
// TOML deserialization structures
// ============================================================================

#[derive(Debug, Deserialize)]
struct TomlConfig {
    #[serde(default)]
    general: GeneralToml,
    #[serde(default)]
    auction: AuctionToml,
    #[serde(default)]
    shading: ShadingToml,
    #[serde(default)]
    header_bidding: HeaderBiddingToml,
    #[serde(default)]
    decision: DecisionToml,
    #[serde(default)]
    events: EventsToml,
    #[serde(default = "default_demand_sources")]
    demand_sources: Vec<DemandSourceToml>,
    #[serde(default = "default_competitors")]
    competitors: Vec<CompetitorToml>,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            general: GeneralToml::default(),
            auction: AuctionToml::default(),
            shading: ShadingToml::default(),
            header_bidding: HeaderBiddingToml::default(),
            decision: DecisionToml::default(),
            events: EventsToml::default(),
            demand_sources: default_demand_sources(),
            competitors: default_competitors(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct GeneralToml {
    mode: String,
    seed: Option<u64>,
    log_level: String,
    latency_mode: LatencyMode,
}

impl Default for GeneralToml {
    fn default() -> Self {
        Self {
            mode: "compare".to_string(),
            seed: None,
            log_level: "info".to_string(),
            latency_mode: LatencyMode::RealDelay,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct AuctionToml {
    auction_type: String,
    floor_price: f64,
    player_value: f64,
    quality: String,
}

impl Default for AuctionToml {
    fn default() -> Self {
        Self {
            auction_type: "second-price".to_string(),
            floor_price: 1.0,
            player_value: 5.0,
            quality: "standard".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct ShadingToml {
    history_size: usize,
    similar_bid_window: f64,
    min_similar_samples: usize,
    competition_level: f64,
}

impl Default for ShadingToml {
    fn default() -> Self {
        Self {
            history_size: DEFAULT_MAX_HISTORY,
            similar_bid_window: 2.0,
            min_similar_samples: 5,
            competition_level: 0.5,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct HeaderBiddingToml {
    timeout_ms: u64,
}

impl Default for HeaderBiddingToml {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_HEADER_TIMEOUT.as_millis() as u64,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct DecisionToml {
    window_ms: u64,
}

impl Default for DecisionToml {
    fn default() -> Self {
        Self {
            window_ms: DEFAULT_DECISION_WINDOW.as_millis() as u64,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct EventsToml {
    enabled: bool,
    channel_capacity: usize,
}

impl Default for EventsToml {
    fn default() -> Self {
        Self {
            enabled: true,
            channel_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

#[derive(Debug, Deserialize)]
struct DemandSourceToml {
    name: String,
    priority: u32,
    avg_bid: f64,
    latency_ms: u64,
    fill_rate: f64,
}

#[derive(Debug, Deserialize)]
struct CompetitorToml {
    id: String,
    min_bid: f64,
    max_bid: f64,
    #[serde(default = "default_aggression")]
    aggression: f64,
}

fn default_aggression() -> f64 {
    0.5
}

fn default_demand_sources() -> Vec<DemandSourceToml> {
    [
        ("private-marketplace", 1, 4.50, 180, 0.35),
        ("exchange-alpha", 2, 3.20, 250, 0.60),
        ("exchange-beta", 3, 2.80, 320, 0.70),
        ("remnant-network", 4, 1.40, 120, 0.95),
    ]
    .into_iter()
    .map(|(name, priority, avg_bid, latency_ms, fill_rate)| DemandSourceToml {
        name: name.to_string(),
        priority,
        avg_bid,
        latency_ms,
        fill_rate,
    })
    .collect()
}

fn default_competitors() -> Vec<CompetitorToml> {
    [
        ("ai1", 1.00, 6.00, 0.7),
        ("ai2", 0.50, 4.00, 0.4),
        ("ai3", 2.00, 8.00, 0.9),
    ]
    .into_iter()
    .map(|(id, min_bid, max_bid, aggression)| CompetitorToml {
        id: id.to_string(),
        min_bid,
        max_bid,
        aggression,
    })
    .collect()
}

/// Convert f64 currency to cents. Non-finite values become zero.
fn f64_to_money(val: f64) -> Decimal {
    round_cents(Decimal::try_from(val).unwrap_or(Decimal::ZERO))
}

impl From<TomlConfig> for EngineConfig {
    fn from(toml: TomlConfig) -> Self {
        Self {
            mode: SimMode::from_str(&toml.general.mode).unwrap_or(SimMode::Compare),
            seed: toml.general.seed,
            log_level: toml.general.log_level,
            latency_mode: toml.general.latency_mode,
            auction: AuctionConfig {
                auction_type: toml.auction.auction_type.parse().unwrap_or_default(),
                floor_price: f64_to_money(toml.auction.floor_price),
                player_value: f64_to_money(toml.auction.player_value),
                quality: toml.auction.quality.parse().unwrap_or_default(),
            },
            shading: ShadingConfig {
                max_history: toml.shading.history_size,
                similar_bid_window: f64_to_money(toml.shading.similar_bid_window),
                min_similar_samples: toml.shading.min_similar_samples,
            },
            competition_level: toml.shading.competition_level,
            header_bidding_timeout: Duration::from_millis(toml.header_bidding.timeout_ms),
            decision: DecisionConfig {
                window: Duration::from_millis(toml.decision.window_ms),
            },
            events: EventConfig {
                enabled: toml.events.enabled,
                channel_capacity: toml.events.channel_capacity,
            },
            demand_sources: toml
                .demand_sources
                .into_iter()
                .map(|s| {
                    DemandSource::new(s.name, s.priority, f64_to_money(s.avg_bid), s.latency_ms, s.fill_rate)
                })
                .collect(),
            competitors: toml
                .competitors
                .into_iter()
                .map(|c| {
                    BidderProfile::new(c.id, f64_to_money(c.min_bid), f64_to_money(c.max_bid), c.aggression)
                })
                .collect(),
        }
    }
}

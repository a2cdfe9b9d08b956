//! `AuctionEngine`: the single entry point for a presentation layer.
//!
//! Owns the random source, the latency clock, the shading advisor and the
//! event sink, and routes every operation through them. Results are
//! returned by value; the same results are also emitted as `EngineEvent`s
//! for subscribers.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::info;

use rtb_common::types::{AuctionType, Bid, BidRequest, BidderProfile, DemandSource};

use crate::auction::{self, AuctionResult, RoundOutcome};
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::decision::{DecisionConfig, DecisionError, DecisionWindow};
use crate::demand::{self, DemandResult, YieldComparison};
use crate::events::{EngineEvent, EventReceiver, EventSink};
use crate::random::{RandomSource, SeededRandom};
use crate::shading::{BidShadingAdvisor, BidShadingSuggestion};
use crate::validate::ValidationError;

/// Both orchestrators run over the same lineup.
#[derive(Debug, Clone, PartialEq)]
pub struct YieldReport {
    pub waterfall: DemandResult,
    pub header_bidding: DemandResult,
    pub comparison: YieldComparison,
}

/// Facade over clearing, orchestration, shading and decision windows.
pub struct AuctionEngine {
    rng: Box<dyn RandomSource>,
    clock: Arc<dyn Clock>,
    advisor: BidShadingAdvisor,
    events: EventSink,
    decision: DecisionConfig,
    competition_level: f64,
    competitors: Vec<BidderProfile>,
    seed: Option<u64>,
}

impl AuctionEngine {
    /// Engine with default advisor settings and no event channel.
    pub fn new(rng: Box<dyn RandomSource>, clock: Arc<dyn Clock>) -> Self {
        Self {
            rng,
            clock,
            advisor: BidShadingAdvisor::default(),
            events: EventSink::disabled(),
            decision: DecisionConfig::default(),
            competition_level: 0.5,
            competitors: Vec::new(),
            seed: None,
        }
    }

    /// Build from config. Returns the event receiver when events are enabled.
    pub fn from_config(config: &EngineConfig) -> (Self, Option<EventReceiver>) {
        let rng = match config.seed {
            Some(seed) => SeededRandom::new(seed),
            None => SeededRandom::from_entropy(),
        };
        let seed = rng.seed();
        let (events, receiver) = EventSink::from_config(&config.events);

        info!(seed, latency_mode = ?config.latency_mode, "Engine initialized");

        let engine = Self {
            rng: Box::new(rng),
            clock: config.latency_mode.clock(),
            advisor: BidShadingAdvisor::new(config.shading.clone()),
            events,
            decision: config.decision,
            competition_level: config.competition_level,
            competitors: config.competitors.clone(),
            seed: Some(seed),
        };
        (engine, receiver)
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn with_advisor(mut self, advisor: BidShadingAdvisor) -> Self {
        self.advisor = advisor;
        self
    }

    pub fn with_decision_config(mut self, decision: DecisionConfig) -> Self {
        self.decision = decision;
        self
    }

    pub fn with_competitors(mut self, competitors: Vec<BidderProfile>) -> Self {
        self.competitors = competitors;
        self
    }

    pub fn with_competition_level(mut self, competition_level: f64) -> Self {
        self.competition_level = competition_level;
        self
    }

    /// Seed of the engine's random source, when it was built from config.
    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    pub fn advisor(&self) -> &BidShadingAdvisor {
        &self.advisor
    }

    pub fn events(&self) -> &EventSink {
        &self.events
    }

    pub fn competitors(&self) -> &[BidderProfile] {
        &self.competitors
    }

    /// Clear a set of bids.
    pub fn clear_auction(
        &self,
        bids: Vec<Bid>,
        auction_type: AuctionType,
        floor_price: Decimal,
    ) -> Result<AuctionResult, ValidationError> {
        let result = auction::clear_auction(bids, auction_type, floor_price)?;
        self.events.emit(EngineEvent::AuctionComplete(result.clone()));
        Ok(result)
    }

    /// Player vs the configured competitors. A player bid is recorded in
    /// the shading history.
    pub fn run_competitive_round(
        &mut self,
        request: &BidRequest,
        player_bid: Option<Decimal>,
        auction_type: AuctionType,
    ) -> Result<RoundOutcome, ValidationError> {
        let outcome = auction::run_competitive_round(
            request,
            player_bid,
            &self.competitors,
            auction_type,
            Utc::now(),
            &mut *self.rng,
        )?;

        if let Some(amount) = player_bid {
            self.advisor.record_outcome(
                request.estimated_value,
                amount,
                outcome.player_won,
                outcome.result.win_amount,
            )?;
        }

        self.events.emit(EngineEvent::AuctionComplete(outcome.result.clone()));
        Ok(outcome)
    }

    pub async fn run_waterfall(
        &mut self,
        sources: &[DemandSource],
        floor_price: Decimal,
    ) -> Result<DemandResult, ValidationError> {
        let result = demand::run_waterfall(sources, floor_price, &*self.clock, &mut *self.rng).await?;
        self.events.emit(EngineEvent::WaterfallComplete(result.clone()));
        Ok(result)
    }

    pub async fn run_header_bidding(
        &mut self,
        sources: &[DemandSource],
        floor_price: Decimal,
        timeout: Duration,
    ) -> Result<DemandResult, ValidationError> {
        let result =
            demand::run_header_bidding(sources, floor_price, timeout, &*self.clock, &mut *self.rng)
                .await?;
        self.events.emit(EngineEvent::HeaderBiddingComplete(result.clone()));
        Ok(result)
    }

    /// Waterfall, then header bidding, on the same lineup.
    pub async fn compare_yield(
        &mut self,
        sources: &[DemandSource],
        floor_price: Decimal,
        timeout: Duration,
    ) -> Result<YieldReport, ValidationError> {
        let waterfall = self.run_waterfall(sources, floor_price).await?;
        let header_bidding = self.run_header_bidding(sources, floor_price, timeout).await?;
        let comparison = YieldComparison::compare(&waterfall, &header_bidding);

        info!(
            uplift = %comparison.revenue_uplift,
            latency_saved_ms = comparison.latency_saved_ms,
            "Yield comparison"
        );

        Ok(YieldReport {
            waterfall,
            header_bidding,
            comparison,
        })
    }

    pub fn suggest_shaded_bid(
        &self,
        estimated_value: Decimal,
        floor_price: Decimal,
        competition_level: f64,
    ) -> Result<BidShadingSuggestion, ValidationError> {
        self.advisor
            .suggest(estimated_value, floor_price, competition_level)
    }

    pub fn record_outcome(
        &mut self,
        estimated_value: Decimal,
        bid_amount: Decimal,
        won: bool,
        clearing_price: Decimal,
    ) -> Result<(), ValidationError> {
        self.advisor
            .record_outcome(estimated_value, bid_amount, won, clearing_price)
    }

    /// A fresh window sharing the engine's event sink.
    pub fn decision_window(&self) -> DecisionWindow {
        DecisionWindow::new(self.decision, self.events.clone())
    }

    /// Open a window and present `request` with the engine's advisor.
    ///
    /// Must be called from inside a tokio runtime.
    pub fn present(&self, request: &BidRequest) -> Result<DecisionWindow, DecisionError> {
        let window = self.decision_window();
        window.present(request, &self.advisor, self.competition_level)?;
        Ok(window)
    }
}

impl std::fmt::Debug for AuctionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuctionEngine")
            .field("seed", &self.seed)
            .field("history_len", &self.advisor.history().len())
            .field("events_enabled", &self.events.is_enabled())
            .field("competitors", &self.competitors.len())
            .finish()
    }
}

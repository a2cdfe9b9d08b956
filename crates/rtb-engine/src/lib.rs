//! Real-time bidding auction simulation engine.
//!
//! Models the buy and sell sides of a programmatic ad auction: clearing
//! sealed bids under first- and second-price rules, sourcing demand via a
//! sequential waterfall or parallel header bidding, recommending shaded
//! bids from past outcomes, and running a countdown-bound bid decision.
//!
//! ## Architecture
//!
//! - **Injectable randomness**: every draw goes through `RandomSource`, so a
//!   seed replays a whole session
//! - **Simulated latency**: orchestrators await a `Clock`, real or instant
//! - **Values out, events optional**: results are returned; an `EventSink`
//!   mirrors them to a subscriber without blocking
//!
//! ## Modules
//!
//! - `auction`: Sealed-bid clearing and competitive rounds
//! - `competitor`: Synthetic competitor bid generation
//! - `demand`: Waterfall and header bidding orchestration
//! - `shading`: Bid shading advisor and bounded history
//! - `decision`: Bid decision window state machine
//! - `engine`: `AuctionEngine` facade
//! - `config`: Configuration loading and validation

pub mod auction;
pub mod clock;
pub mod competitor;
pub mod config;
pub mod decision;
pub mod demand;
pub mod engine;
pub mod events;
pub mod random;
pub mod shading;
pub mod validate;

pub use auction::{clear_auction, run_competitive_round, AuctionResult, RoundOutcome, PLAYER_ID};
pub use clock::{Clock, InstantClock, LatencyMode, TokioClock};
pub use config::{AuctionConfig, EngineConfig, SimMode};
pub use decision::{
    Decision, DecisionConfig, DecisionError, DecisionOutcome, DecisionState, DecisionStats,
    DecisionWindow,
};
pub use demand::{
    run_header_bidding, run_waterfall, DemandMethod, DemandResult, ResponseStatus,
    SourceResponse, YieldComparison,
};
pub use engine::{AuctionEngine, YieldReport};
pub use events::{EngineEvent, EventConfig, EventReceiver, EventSink};
pub use random::{RandomSource, SeededRandom};
pub use shading::{
    suggest_shaded_bid, BidHistory, BidHistoryEntry, BidShadingAdvisor, BidShadingSuggestion,
    RiskLevel, ShadingConfig,
};
pub use validate::ValidationError;

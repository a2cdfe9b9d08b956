//! rtb-sim: run RTB auction simulations from the command line.
//!
//! Usage:
//!   rtb-sim [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>     Config file path (default: config/rtb.toml)
//!   -m, --mode <MODE>       auction, waterfall, header, compare
//!   -r, --rounds <N>        Number of rounds to simulate (default: 1)
//!   --seed <SEED>           Seed for a replayable run
//!   --instant               Skip simulated latency
//!   --json                  Print the summary as JSON

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use rtb_common::types::BidRequest;
use rtb_engine::config::{EngineConfig, SimMode};
use rtb_engine::decision::DecisionStats;
use rtb_engine::demand::DemandMethod;
use rtb_engine::{AuctionEngine, EventReceiver, LatencyMode};

/// CLI arguments for rtb-sim.
#[derive(Parser, Debug)]
#[command(name = "rtb-sim")]
#[command(about = "Real-time bidding auction simulator")]
#[command(version)]
struct Args {
    /// Config file path
    #[arg(short, long, default_value = "config/rtb.toml")]
    config: PathBuf,

    /// Simulation: auction, waterfall, header, compare
    #[arg(short, long)]
    mode: Option<String>,

    /// Number of rounds to simulate
    #[arg(short, long, default_value_t = 1)]
    rounds: u32,

    /// Seed for a replayable run (overrides config and RTB_SEED)
    #[arg(long)]
    seed: Option<u64>,

    /// Skip simulated source latency
    #[arg(long)]
    instant: bool,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    // Load environment variables from .env file (if present)
    if let Err(e) = dotenvy::dotenv() {
        if !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound) {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    let args = Args::parse();

    let config_found = args.config.exists();
    let mut config = if config_found {
        EngineConfig::from_file(&args.config)
            .with_context(|| format!("Failed to load config from {:?}", args.config))?
    } else {
        EngineConfig::default()
    };

    config.apply_env_overrides();
    config.apply_cli_overrides(
        args.mode.clone(),
        args.seed,
        args.instant.then_some(LatencyMode::Instant),
    );

    // Initialize logging
    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set global tracing subscriber")?;

    if !config_found {
        warn!("Config file not found at {:?}, using defaults", args.config);
    }

    config.validate().context("Configuration validation failed")?;

    info!("Starting rtb-sim");
    info!("Mode: {}", config.mode);
    info!("Rounds: {}", args.rounds);

    let (mut engine, receiver) = AuctionEngine::from_config(&config);
    if let Some(receiver) = receiver {
        tokio::spawn(log_events(receiver));
    }

    let rounds = args.rounds.max(1);
    let summary = match config.mode {
        SimMode::Auction => Summary::Auction(run_auction_rounds(&mut engine, &config, rounds)?),
        SimMode::Waterfall => Summary::Demand(
            run_demand_rounds(&mut engine, &config, rounds, DemandMethod::Waterfall).await?,
        ),
        SimMode::HeaderBidding => Summary::Demand(
            run_demand_rounds(&mut engine, &config, rounds, DemandMethod::HeaderBidding).await?,
        ),
        SimMode::Compare => Summary::Compare(run_compare_rounds(&mut engine, &config, rounds).await?),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        summary.print(engine.seed());
    }

    Ok(())
}

/// Drain engine events into the log.
async fn log_events(mut receiver: EventReceiver) {
    while let Some(event) = receiver.recv().await {
        debug!(event = event.name(), "Engine event");
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
enum Summary {
    Auction(AuctionSummary),
    Demand(DemandSummary),
    Compare(CompareSummary),
}

#[derive(Debug, Default, Serialize)]
struct AuctionSummary {
    rounds: u32,
    wins: u32,
    total_spend: Decimal,
    total_surplus: Decimal,
    decisions: DecisionStats,
}

#[derive(Debug, Serialize)]
struct DemandSummary {
    method: DemandMethod,
    rounds: u32,
    filled: u32,
    total_revenue: Decimal,
    total_latency_ms: u64,
}

#[derive(Debug, Default, Serialize)]
struct CompareSummary {
    rounds: u32,
    waterfall_revenue: Decimal,
    header_bidding_revenue: Decimal,
    waterfall_latency_ms: u64,
    header_bidding_latency_ms: u64,
    header_bidding_ahead: u32,
}

impl Summary {
    fn print(&self, seed: Option<u64>) {
        if let Some(seed) = seed {
            println!("seed: {}", seed);
        }
        match self {
            Summary::Auction(s) => {
                println!("auction rounds: {}", s.rounds);
                println!("  wins:          {}", s.wins);
                println!("  total spend:   ${}", s.total_spend);
                println!("  total surplus: ${}", s.total_surplus);
                if let Some(mean) = s.decisions.mean_response_time() {
                    println!("  mean decision: {}ms", mean.as_millis());
                }
            }
            Summary::Demand(s) => {
                println!("{} rounds: {}", s.method, s.rounds);
                println!("  filled:        {}", s.filled);
                println!("  total revenue: ${}", s.total_revenue);
                println!("  mean latency:  {}ms", s.total_latency_ms / u64::from(s.rounds.max(1)));
            }
            Summary::Compare(s) => {
                let rounds = u64::from(s.rounds.max(1));
                println!("compare rounds: {}", s.rounds);
                println!(
                    "  waterfall:      ${} ({}ms mean)",
                    s.waterfall_revenue,
                    s.waterfall_latency_ms / rounds
                );
                println!(
                    "  header bidding: ${} ({}ms mean)",
                    s.header_bidding_revenue,
                    s.header_bidding_latency_ms / rounds
                );
                println!("  header bidding ahead in {} rounds", s.header_bidding_ahead);
            }
        }
    }
}

/// The player takes the advisor's suggestion through a decision window.
fn run_auction_rounds(
    engine: &mut AuctionEngine,
    config: &EngineConfig,
    rounds: u32,
) -> Result<AuctionSummary> {
    let mut summary = AuctionSummary::default();

    for round in 1..=rounds {
        let request = BidRequest::new(config.auction.player_value, config.auction.floor_price)
            .with_quality(config.auction.quality);

        let window = engine.present(&request).context("Failed to present request")?;
        let suggested = window
            .suggestion()
            .map(|s| s.suggested_bid)
            .context("Window has no suggestion")?;
        let decision = window.submit(suggested).context("Failed to submit bid")?;
        summary.decisions.record(&decision);

        let outcome = engine
            .run_competitive_round(&request, decision.bid_amount(), config.auction.auction_type)
            .context("Auction round failed")?;

        info!(
            round,
            bid = %suggested,
            winner = outcome.result.winner_label(),
            price = %outcome.result.win_amount,
            "Round complete"
        );

        summary.rounds += 1;
        if outcome.player_won {
            summary.wins += 1;
            summary.total_spend += outcome.player_cost;
            summary.total_surplus += outcome.player_surplus;
        }
    }

    Ok(summary)
}

async fn run_demand_rounds(
    engine: &mut AuctionEngine,
    config: &EngineConfig,
    rounds: u32,
    method: DemandMethod,
) -> Result<DemandSummary> {
    let mut summary = DemandSummary {
        method,
        rounds: 0,
        filled: 0,
        total_revenue: Decimal::ZERO,
        total_latency_ms: 0,
    };

    for _ in 0..rounds {
        let result = match method {
            DemandMethod::Waterfall => {
                engine
                    .run_waterfall(&config.demand_sources, config.auction.floor_price)
                    .await
            }
            DemandMethod::HeaderBidding => {
                engine
                    .run_header_bidding(
                        &config.demand_sources,
                        config.auction.floor_price,
                        config.header_bidding_timeout,
                    )
                    .await
            }
        }
        .with_context(|| format!("{} run failed", method))?;

        summary.rounds += 1;
        if result.is_filled() {
            summary.filled += 1;
        }
        summary.total_revenue += result.revenue_gained;
        summary.total_latency_ms += result.total_latency_ms;
    }

    Ok(summary)
}

async fn run_compare_rounds(
    engine: &mut AuctionEngine,
    config: &EngineConfig,
    rounds: u32,
) -> Result<CompareSummary> {
    let mut summary = CompareSummary::default();

    for _ in 0..rounds {
        let report = engine
            .compare_yield(
                &config.demand_sources,
                config.auction.floor_price,
                config.header_bidding_timeout,
            )
            .await
            .context("Yield comparison failed")?;

        summary.rounds += 1;
        summary.waterfall_revenue += report.comparison.waterfall_revenue;
        summary.header_bidding_revenue += report.comparison.header_bidding_revenue;
        summary.waterfall_latency_ms += report.comparison.waterfall_latency_ms;
        summary.header_bidding_latency_ms += report.comparison.header_bidding_latency_ms;
        if report.comparison.revenue_uplift > Decimal::ZERO {
            summary.header_bidding_ahead += 1;
        }
    }

    Ok(summary)
}

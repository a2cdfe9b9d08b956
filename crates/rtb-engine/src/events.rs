//! Fire-and-forget notifications for the presentation layer.
//!
//! The engine returns every result by value. A presentation layer that wants
//! progress notifications subscribes to a bounded channel instead of the
//! engine calling into it.
//!
//! ```text
//! Engine                       Presentation
//! ──────                       ────────────
//! [AuctionEngine]              [UI / game loop]
//!     │                              ▲
//!     │ try_send()                   │ recv()
//!     ▼                              │
//! [Bounded Channel] ─────────────────┘
//! ```
//!
//! Emission never blocks: a full channel drops the event and counts the
//! drop; a closed channel disables the sink.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::auction::AuctionResult;
use crate::demand::DemandResult;

/// Default channel capacity for engine events.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Notification emitted by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum EngineEvent {
    AuctionComplete(AuctionResult),
    WaterfallComplete(DemandResult),
    HeaderBiddingComplete(DemandResult),
    BidSubmitted {
        request_id: String,
        #[serde(with = "rust_decimal::serde::str")]
        amount: Decimal,
        #[serde(with = "duration_ms")]
        response_time: Duration,
    },
    BidPassed {
        request_id: String,
        #[serde(with = "duration_ms")]
        response_time: Duration,
    },
    BidTimeout {
        request_id: String,
        #[serde(with = "duration_ms")]
        response_time: Duration,
    },
}

impl EngineEvent {
    /// Wire name of the event (`auction-complete`, `bid-timeout`, ...).
    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::AuctionComplete(_) => "auction-complete",
            EngineEvent::WaterfallComplete(_) => "waterfall-complete",
            EngineEvent::HeaderBiddingComplete(_) => "header-bidding-complete",
            EngineEvent::BidSubmitted { .. } => "bid-submitted",
            EngineEvent::BidPassed { .. } => "bid-passed",
            EngineEvent::BidTimeout { .. } => "bid-timeout",
        }
    }
}

/// Durations travel as whole milliseconds.
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Configuration for the event channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventConfig {
    pub enabled: bool,
    pub channel_capacity: usize,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            channel_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

/// Counters for emitted events.
#[derive(Debug, Default)]
pub struct EventStats {
    pub sent: AtomicU64,
    pub dropped: AtomicU64,
}

impl EventStats {
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Receiver half handed to the presentation layer.
pub type EventReceiver = mpsc::Receiver<EngineEvent>;

/// Non-blocking event emitter. Cheap to clone; clones share stats.
#[derive(Debug, Clone)]
pub struct EventSink {
    sender: Option<mpsc::Sender<EngineEvent>>,
    enabled: Arc<AtomicBool>,
    stats: Arc<EventStats>,
}

impl EventSink {
    /// Create a sink and its receiver.
    pub fn channel(capacity: usize) -> (Self, EventReceiver) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let sink = Self {
            sender: Some(sender),
            enabled: Arc::new(AtomicBool::new(true)),
            stats: Arc::new(EventStats::default()),
        };
        (sink, receiver)
    }

    /// Create from config; disabled configs get no receiver.
    pub fn from_config(config: &EventConfig) -> (Self, Option<EventReceiver>) {
        if !config.enabled {
            return (Self::disabled(), None);
        }
        let (sink, receiver) = Self::channel(config.channel_capacity);
        (sink, Some(receiver))
    }

    /// A sink that discards everything.
    pub fn disabled() -> Self {
        Self {
            sender: None,
            enabled: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(EventStats::default()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Emit an event without waiting.
    pub fn emit(&self, event: EngineEvent) {
        if !self.is_enabled() {
            return;
        }
        let Some(sender) = &self.sender else {
            return;
        };

        match sender.try_send(event) {
            Ok(()) => {
                self.stats.sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(mpsc::error::TrySendError::Full(event)) => {
                let dropped = self.stats.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(event = event.name(), dropped, "Event channel full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                // Subscriber went away
                self.enabled.store(false, Ordering::Release);
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn stats(&self) -> &EventStats {
        &self.stats
    }
}

impl Default for EventSink {
    fn default() -> Self {
        Self::disabled()
    }
}

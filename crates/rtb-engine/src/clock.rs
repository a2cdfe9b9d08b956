//! Latency clock abstraction.
//!
//! Demand-source "network latency" and the decision countdown are simulated
//! waits. Orchestrators await a `Clock` rather than a specific timer so the
//! same code runs with real delays or none at all.
//!
//! | Mode      | Clock         | Use                                   |
//! |-----------|---------------|---------------------------------------|
//! | RealDelay | `TokioClock`  | Interactive runs, paused-time tests   |
//! | Instant   | `InstantClock`| Batch simulation, call-order tests    |

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Something that can suspend for a simulated latency.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Wait for `duration` of (possibly simulated) time.
    async fn sleep(&self, duration: Duration);
}

/// Latency simulation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LatencyMode {
    /// Add real delay using tokio::time::sleep.
    #[default]
    RealDelay,
    /// No delay (instant execution).
    Instant,
}

impl LatencyMode {
    /// Build the clock for this mode.
    pub fn clock(&self) -> Arc<dyn Clock> {
        match self {
            LatencyMode::RealDelay => Arc::new(TokioClock),
            LatencyMode::Instant => Arc::new(InstantClock::new()),
        }
    }
}

/// Real delay via tokio timers.
///
/// Under `tokio::time::pause()` the waits auto-advance virtual time.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }
}

/// Clock that returns immediately and records every requested wait.
#[derive(Debug, Default)]
pub struct InstantClock {
    waits: Mutex<Vec<Duration>>,
}

impl InstantClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every wait requested so far, in call order.
    pub fn waits(&self) -> Vec<Duration> {
        self.waits.lock().clone()
    }

    /// Number of waits requested so far.
    pub fn wait_count(&self) -> usize {
        self.waits.lock().len()
    }

    /// Sum of all requested waits.
    pub fn total_waited(&self) -> Duration {
        self.waits.lock().iter().sum()
    }

    /// Forget recorded waits.
    pub fn reset(&self) {
        self.waits.lock().clear();
    }
}

#[async_trait]
impl Clock for InstantClock {
    async fn sleep(&self, duration: Duration) {
        self.waits.lock().push(duration);
    }
}

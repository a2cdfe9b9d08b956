//! Bid decision window.
//!
//! A time-boxed bid/pass decision for one request:
//!
//! ```text
//! Idle ──present──▶ Presented ──submit──▶ Submitted
//!                       │     ──pass────▶ Passed
//!                       └─────countdown─▶ TimedOut
//! ```
//!
//! `present` queries the shading advisor once and starts a countdown task.
//! Exactly one terminal transition happens: the state is checked and updated
//! under one lock, and `submit`/`pass` abort the countdown before releasing
//! it. A new request needs a new window.
//!
//! The countdown runs on tokio timers, so `present` must be called from
//! inside a runtime.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use rtb_common::types::BidRequest;

use crate::events::{duration_ms, EngineEvent, EventSink};
use crate::shading::{BidShadingAdvisor, BidShadingSuggestion};
use crate::validate::{self, ValidationError};

/// Default countdown length.
pub const DEFAULT_DECISION_WINDOW: Duration = Duration::from_secs(10);

/// Decision window configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecisionConfig {
    /// How long the buyer has to decide.
    pub window: Duration,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_DECISION_WINDOW,
        }
    }
}

/// Window lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionState {
    Idle,
    Presented,
    Submitted,
    Passed,
    TimedOut,
}

impl DecisionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DecisionState::Submitted | DecisionState::Passed | DecisionState::TimedOut
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionState::Idle => "idle",
            DecisionState::Presented => "presented",
            DecisionState::Submitted => "submitted",
            DecisionState::Passed => "passed",
            DecisionState::TimedOut => "timed_out",
        }
    }
}

impl std::fmt::Display for DecisionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The terminal decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    Submitted {
        #[serde(with = "rust_decimal::serde::str")]
        amount: Decimal,
    },
    Passed,
    /// Implicit pass when the countdown ran out.
    TimedOut,
}

impl Decision {
    fn state(&self) -> DecisionState {
        match self {
            Decision::Submitted { .. } => DecisionState::Submitted,
            Decision::Passed => DecisionState::Passed,
            Decision::TimedOut => DecisionState::TimedOut,
        }
    }
}

/// Outcome of a presented request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionOutcome {
    pub request_id: String,
    pub decision: Decision,
    /// Time from presentation to decision; the full window for timeouts.
    #[serde(with = "duration_ms")]
    pub response_time: Duration,
}

impl DecisionOutcome {
    /// Submitted amount, if the buyer bid.
    pub fn bid_amount(&self) -> Option<Decimal> {
        match self.decision {
            Decision::Submitted { amount } => Some(amount),
            _ => None,
        }
    }

    fn to_event(&self) -> EngineEvent {
        let request_id = self.request_id.clone();
        let response_time = self.response_time;
        match self.decision {
            Decision::Submitted { amount } => EngineEvent::BidSubmitted {
                request_id,
                amount,
                response_time,
            },
            Decision::Passed => EngineEvent::BidPassed {
                request_id,
                response_time,
            },
            Decision::TimedOut => EngineEvent::BidTimeout {
                request_id,
                response_time,
            },
        }
    }
}

/// Invalid use of a decision window.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecisionError {
    #[error("cannot {action} a window in the {from} state")]
    InvalidTransition {
        from: DecisionState,
        action: &'static str,
    },

    #[error("decision window expired after {0:?}")]
    Expired(Duration),

    #[error("nothing has been presented")]
    NotPresented,

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

#[derive(Debug)]
struct WindowState {
    state: DecisionState,
    request_id: Option<String>,
    suggestion: Option<BidShadingSuggestion>,
    presented_at: Option<Instant>,
    countdown: Option<JoinHandle<()>>,
}

/// State shared with the countdown task.
#[derive(Debug)]
struct Shared {
    window: Duration,
    state: Mutex<WindowState>,
    outcome: watch::Sender<Option<DecisionOutcome>>,
    events: EventSink,
}

impl Shared {
    /// Countdown expiry. No-op if a decision already landed.
    fn expire(&self) {
        let outcome = {
            let mut guard = self.state.lock();
            if guard.state != DecisionState::Presented {
                return;
            }
            guard.countdown = None;
            self.close(&mut guard, Decision::TimedOut, self.window)
        };
        self.publish(outcome);
    }

    /// Apply a terminal transition. Caller holds the lock.
    fn close(&self, guard: &mut WindowState, decision: Decision, response_time: Duration) -> DecisionOutcome {
        if let Some(countdown) = guard.countdown.take() {
            countdown.abort();
        }
        guard.state = decision.state();
        DecisionOutcome {
            request_id: guard.request_id.clone().unwrap_or_default(),
            decision,
            response_time,
        }
    }

    fn publish(&self, outcome: DecisionOutcome) {
        info!(
            request_id = %outcome.request_id,
            decision = outcome.decision.state().as_str(),
            response_ms = outcome.response_time.as_millis() as u64,
            "Decision recorded"
        );
        self.events.emit(outcome.to_event());
        self.outcome.send_replace(Some(outcome));
    }
}

/// Countdown-bound bid/pass decision for a single request.
#[derive(Debug)]
pub struct DecisionWindow {
    shared: Arc<Shared>,
}

impl DecisionWindow {
    pub fn new(config: DecisionConfig, events: EventSink) -> Self {
        let (outcome, _) = watch::channel(None);
        Self {
            shared: Arc::new(Shared {
                window: config.window,
                state: Mutex::new(WindowState {
                    state: DecisionState::Idle,
                    request_id: None,
                    suggestion: None,
                    presented_at: None,
                    countdown: None,
                }),
                outcome,
                events,
            }),
        }
    }

    /// Configured countdown length.
    pub fn window(&self) -> Duration {
        self.shared.window
    }

    pub fn state(&self) -> DecisionState {
        self.shared.state.lock().state
    }

    pub fn request_id(&self) -> Option<String> {
        self.shared.state.lock().request_id.clone()
    }

    /// Advisor suggestion captured at presentation.
    pub fn suggestion(&self) -> Option<BidShadingSuggestion> {
        self.shared.state.lock().suggestion.clone()
    }

    /// Time left on the countdown while presented.
    pub fn remaining(&self) -> Option<Duration> {
        let guard = self.shared.state.lock();
        if guard.state != DecisionState::Presented {
            return None;
        }
        let presented_at = guard.presented_at?;
        Some(self.shared.window.saturating_sub(presented_at.elapsed()))
    }

    /// Terminal outcome, once there is one.
    pub fn outcome(&self) -> Option<DecisionOutcome> {
        self.shared.outcome.borrow().clone()
    }

    /// Present a request: query the advisor once and start the countdown.
    pub fn present(
        &self,
        request: &BidRequest,
        advisor: &BidShadingAdvisor,
        competition_level: f64,
    ) -> Result<BidShadingSuggestion, DecisionError> {
        validate::positive_duration("decision_window", self.shared.window)?;

        let mut guard = self.shared.state.lock();
        if guard.state != DecisionState::Idle {
            return Err(DecisionError::InvalidTransition {
                from: guard.state,
                action: "present",
            });
        }

        let suggestion =
            advisor.suggest(request.estimated_value, request.floor_price, competition_level)?;

        let shared = Arc::clone(&self.shared);
        let window = self.shared.window;
        let countdown = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            shared.expire();
        });

        guard.state = DecisionState::Presented;
        guard.request_id = Some(request.request_id.clone());
        guard.suggestion = Some(suggestion.clone());
        guard.presented_at = Some(Instant::now());
        guard.countdown = Some(countdown);

        debug!(
            request_id = %request.request_id,
            suggested = %suggestion.suggested_bid,
            window_ms = window.as_millis() as u64,
            "Request presented"
        );
        Ok(suggestion)
    }

    /// Confirm a bid before the countdown runs out.
    pub fn submit(&self, amount: Decimal) -> Result<DecisionOutcome, DecisionError> {
        validate::non_negative("bid_amount", amount)?;
        self.decide(Decision::Submitted { amount }, "submit")
    }

    /// Decline to bid before the countdown runs out.
    pub fn pass(&self) -> Result<DecisionOutcome, DecisionError> {
        self.decide(Decision::Passed, "pass")
    }

    fn decide(&self, decision: Decision, action: &'static str) -> Result<DecisionOutcome, DecisionError> {
        let shared = &self.shared;
        let outcome = {
            let mut guard = shared.state.lock();
            if guard.state != DecisionState::Presented {
                return Err(DecisionError::InvalidTransition {
                    from: guard.state,
                    action,
                });
            }

            let elapsed = guard.presented_at.map(|at| at.elapsed()).unwrap_or_default();
            if elapsed >= shared.window {
                // Deadline passed but the countdown task has not run yet.
                let expired = shared.close(&mut guard, Decision::TimedOut, shared.window);
                drop(guard);
                shared.publish(expired);
                return Err(DecisionError::Expired(shared.window));
            }

            shared.close(&mut guard, decision, elapsed)
        };
        shared.publish(outcome.clone());
        Ok(outcome)
    }

    /// Wait for the terminal outcome.
    pub async fn wait(&self) -> Result<DecisionOutcome, DecisionError> {
        if self.state() == DecisionState::Idle {
            return Err(DecisionError::NotPresented);
        }
        let mut receiver = self.shared.outcome.subscribe();
        let outcome = receiver
            .wait_for(Option::is_some)
            .await
            .map_err(|_| DecisionError::NotPresented)?;
        outcome.clone().ok_or(DecisionError::NotPresented)
    }
}

impl Drop for DecisionWindow {
    fn drop(&mut self) {
        if let Some(countdown) = self.shared.state.lock().countdown.take() {
            countdown.abort();
        }
    }
}

/// Running tallies across decision windows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DecisionStats {
    pub submitted: u64,
    pub passed: u64,
    pub timed_out: u64,
    #[serde(with = "duration_ms")]
    pub total_response_time: Duration,
}

impl DecisionStats {
    pub fn record(&mut self, outcome: &DecisionOutcome) {
        match outcome.decision {
            Decision::Submitted { .. } => self.submitted += 1,
            Decision::Passed => self.passed += 1,
            Decision::TimedOut => self.timed_out += 1,
        }
        self.total_response_time += outcome.response_time;
    }

    pub fn total(&self) -> u64 {
        self.submitted + self.passed + self.timed_out
    }

    /// Mean response time, `None` before any decision.
    pub fn mean_response_time(&self) -> Option<Duration> {
        let total = u32::try_from(self.total()).ok().filter(|n| *n > 0)?;
        Some(self.total_response_time / total)
    }

    /// Fraction of windows that ran out.
    pub fn timeout_rate(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            n => self.timed_out as f64 / n as f64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn window(ms: u64) -> DecisionWindow {
        DecisionWindow::new(
            DecisionConfig {
                window: Duration::from_millis(ms),
            },
            EventSink::disabled(),
        )
    }

    fn request() -> BidRequest {
        BidRequest::new(dec!(5.00), dec!(1.00)).with_id("req-1")
    }

    // ===== Transition Tests =====

    #[tokio::test(start_paused = true)]
    async fn test_present_then_submit() {
        let window = window(5000);
        let advisor = BidShadingAdvisor::default();

        let suggestion = window.present(&request(), &advisor, 0.5).unwrap();
        assert_eq!(window.state(), DecisionState::Presented);
        assert_eq!(window.suggestion(), Some(suggestion));

        tokio::time::sleep(Duration::from_millis(1200)).await;
        let outcome = window.submit(dec!(3.40)).unwrap();

        assert_eq!(outcome.decision, Decision::Submitted { amount: dec!(3.40) });
        assert_eq!(outcome.request_id, "req-1");
        assert!(outcome.response_time >= Duration::from_millis(1200));
        assert!(outcome.response_time < Duration::from_millis(5000));
        assert_eq!(window.state(), DecisionState::Submitted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_expires_to_timeout() {
        let window = window(3000);
        window.present(&request(), &BidShadingAdvisor::default(), 0.5).unwrap();

        let outcome = window.wait().await.unwrap();

        assert_eq!(outcome.decision, Decision::TimedOut);
        assert_eq!(outcome.response_time, Duration::from_millis(3000));
        assert_eq!(window.state(), DecisionState::TimedOut);
        assert!(window.state().is_terminal());
        assert!(window.remaining().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pass_cancels_countdown() {
        let window = window(3000);
        window.present(&request(), &BidShadingAdvisor::default(), 0.5).unwrap();
        window.pass().unwrap();

        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(window.state(), DecisionState::Passed);
        assert_eq!(window.outcome().unwrap().decision, Decision::Passed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_state_rejects_transitions() {
        let window = window(3000);
        let advisor = BidShadingAdvisor::default();
        window.present(&request(), &advisor, 0.5).unwrap();
        window.pass().unwrap();

        assert_eq!(
            window.submit(dec!(2.00)),
            Err(DecisionError::InvalidTransition {
                from: DecisionState::Passed,
                action: "submit"
            })
        );
        assert!(window.pass().is_err());
        assert!(window.present(&request(), &advisor, 0.5).is_err());
    }

    #[tokio::test]
    async fn test_idle_window_rejects_decisions() {
        let window = window(3000);
        assert!(matches!(
            window.submit(dec!(1.00)),
            Err(DecisionError::InvalidTransition { from: DecisionState::Idle, .. })
        ));
        assert_eq!(window.wait().await, Err(DecisionError::NotPresented));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejects_negative_bid_without_closing() {
        let window = window(3000);
        window.present(&request(), &BidShadingAdvisor::default(), 0.5).unwrap();

        assert!(matches!(
            window.submit(dec!(-1.00)),
            Err(DecisionError::Validation(_))
        ));
        assert_eq!(window.state(), DecisionState::Presented);
    }

    #[tokio::test]
    async fn test_zero_window_rejected() {
        let window = window(0);
        let err = window.present(&request(), &BidShadingAdvisor::default(), 0.5);
        assert!(matches!(err, Err(DecisionError::Validation(_))));
        assert_eq!(window.state(), DecisionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_emitted_once() {
        let (sink, mut receiver) = EventSink::channel(8);
        let window = DecisionWindow::new(DecisionConfig::default(), sink);
        window.present(&request(), &BidShadingAdvisor::default(), 0.5).unwrap();
        window.submit(dec!(2.50)).unwrap();

        tokio::time::sleep(DEFAULT_DECISION_WINDOW * 2).await;

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.name(), "bid-submitted");
        assert!(receiver.try_recv().is_err());
    }

    // ===== Stats Tests =====

    #[test]
    fn test_stats_tally() {
        let mut stats = DecisionStats::default();
        assert_eq!(stats.mean_response_time(), None);

        for (decision, ms) in [
            (Decision::Submitted { amount: dec!(2.00) }, 1000),
            (Decision::Passed, 2000),
            (Decision::TimedOut, 6000),
        ] {
            stats.record(&DecisionOutcome {
                request_id: "r".into(),
                decision,
                response_time: Duration::from_millis(ms),
            });
        }

        assert_eq!(stats.total(), 3);
        assert_eq!(stats.mean_response_time(), Some(Duration::from_millis(3000)));
        assert!((stats.timeout_rate() - 1.0 / 3.0).abs() < 1e-9);
    }
}

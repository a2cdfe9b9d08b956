//! Injectable random source.
//!
//! Every component that needs randomness takes a `&mut dyn RandomSource`
//! instead of reaching for a thread-local generator. This keeps each
//! simulation replayable from its seed and lets tests script exact draws.
//!
//! ## Implementations
//!
//! - `SeededRandom`: PCG-64 generator seeded from a `u64` (production, replay)
//! - `ScriptedRandom`: returns a fixed sequence of draws (tests)

use std::collections::VecDeque;

use rand::{Rng, RngCore, SeedableRng};
use rand_pcg::Pcg64;
use rust_decimal::Decimal;

/// Resolution of decimal draws (six decimal places).
const DECIMAL_DRAW_SCALE: u32 = 6;

/// Source of uniform random draws.
pub trait RandomSource: Send {
    /// Uniform draw in `[0, 1)`.
    fn next_f64(&mut self) -> f64;

    /// Raw 64-bit draw, used to derive independent streams.
    fn next_u64(&mut self) -> u64;

    /// Uniform draw in `[low, high)`.
    fn uniform(&mut self, low: f64, high: f64) -> f64 {
        low + (high - low) * self.next_f64()
    }

    /// Returns true with the given probability.
    ///
    /// A probability of 1.0 always succeeds and 0.0 never does.
    fn chance(&mut self, probability: f64) -> bool {
        self.next_f64() < probability
    }

    /// Uniform decimal multiplier in `[low, high)` at micro precision.
    fn uniform_decimal(&mut self, low: Decimal, high: Decimal) -> Decimal {
        let steps = 10i64.pow(DECIMAL_DRAW_SCALE);
        let drawn = ((self.next_f64() * steps as f64) as i64).clamp(0, steps - 1);
        low + (high - low) * Decimal::new(drawn, DECIMAL_DRAW_SCALE)
    }
}

/// Seeded PCG-64 random source.
#[derive(Debug, Clone)]
pub struct SeededRandom {
    seed: u64,
    rng: Pcg64,
}

impl SeededRandom {
    /// Create a generator from a seed.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            rng: Pcg64::seed_from_u64(seed),
        }
    }

    /// Create a generator with a random seed. Log `seed()` to replay the run.
    pub fn from_entropy() -> Self {
        Self::new(rand::random())
    }

    /// Derive an independent stream for `key` from a batch seed.
    ///
    /// The same `(batch_seed, key)` pair always yields the same stream, so
    /// per-source outcomes do not depend on the order sources are visited.
    pub fn for_key(batch_seed: u64, key: &str) -> Self {
        Self::new(batch_seed ^ fnv1a(key))
    }

    /// The seed this generator was created from.
    pub fn seed(&self) -> u64 {
        self.seed
    }
}

impl RandomSource for SeededRandom {
    fn next_f64(&mut self) -> f64 {
        self.rng.random::<f64>()
    }

    fn next_u64(&mut self) -> u64 {
        self.rng.next_u64()
    }
}

/// FNV-1a hash, stable across platforms and releases.
fn fnv1a(key: &str) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0100_0000_01b3;
    key.bytes()
        .fold(OFFSET, |hash, byte| (hash ^ u64::from(byte)).wrapping_mul(PRIME))
}

/// Random source that replays a scripted sequence of draws.
///
/// Once the script is exhausted every draw returns `fallback`.
#[derive(Debug, Clone)]
pub struct ScriptedRandom {
    draws: VecDeque<f64>,
    fallback: f64,
    consumed: usize,
}

impl ScriptedRandom {
    /// Script the given draws; values are clamped into `[0, 1)`.
    pub fn new(draws: impl IntoIterator<Item = f64>) -> Self {
        Self {
            draws: draws.into_iter().map(clamp_unit).collect(),
            fallback: 0.5,
            consumed: 0,
        }
    }

    /// A source that always draws the same value.
    pub fn constant(value: f64) -> Self {
        Self::new(std::iter::empty()).with_fallback(value)
    }

    /// Set the value returned after the script runs out.
    pub fn with_fallback(mut self, fallback: f64) -> Self {
        self.fallback = clamp_unit(fallback);
        self
    }

    /// Number of draws taken so far.
    pub fn consumed(&self) -> usize {
        self.consumed
    }

    /// Number of scripted draws not yet taken.
    pub fn remaining(&self) -> usize {
        self.draws.len()
    }
}

impl RandomSource for ScriptedRandom {
    fn next_f64(&mut self) -> f64 {
        self.consumed += 1;
        self.draws.pop_front().unwrap_or(self.fallback)
    }

    fn next_u64(&mut self) -> u64 {
        (self.next_f64() * u64::MAX as f64) as u64
    }
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0 - f64::EPSILON)
    }
}

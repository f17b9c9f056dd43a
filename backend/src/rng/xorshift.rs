//! xorshift64* random number generator
//!
//! Small, fast and deterministic. Same seed → same incident schedule, which is
//! what makes a run with injected incidents replayable against the same
//! simulation scenario.

use serde::{Deserialize, Serialize};

/// Deterministic random number generator using xorshift64*
///
/// # Example
/// ```
/// use traffic_incident_core_rs::RngManager;
///
/// let mut rng = RngManager::new(12345);
/// let fires = rng.chance(0.25);
/// let duration = rng.range_inclusive(100, 300);
/// assert!((100..=300).contains(&duration));
/// # let _ = fires;
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RngManager {
    state: u64,
}

impl RngManager {
    /// Create a new RNG with given seed
    ///
    /// A zero seed is remapped to 1 (xorshift cannot leave the zero state).
    pub fn new(seed: u64) -> Self {
        let state = if seed == 0 { 1 } else { seed };
        Self { state }
    }

    /// Generate next random u64 value
    pub fn next(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545F4914F6CDD1D)
    }

    /// Uniform integer in `[min, max]`
    ///
    /// Degenerate ranges (`min >= max`) return `min` without advancing the
    /// generator.
    pub fn range_inclusive(&mut self, min: u64, max: u64) -> u64 {
        if min >= max {
            return min;
        }
        let span = max - min;
        if span == u64::MAX {
            return self.next();
        }
        min + self.next() % (span + 1)
    }

    /// Uniform index in `[0, len)`
    ///
    /// # Panics
    /// Panics if `len == 0`
    pub fn index(&mut self, len: usize) -> usize {
        assert!(len > 0, "cannot pick from an empty collection");
        (self.next() % len as u64) as usize
    }

    /// Get current RNG state (for replay)
    pub fn get_state(&self) -> u64 {
        self.state
    }

    /// Generate random f64 in range [0.0, 1.0)
    pub fn next_f64(&mut self) -> f64 {
        let value = self.next();
        (value >> 11) as f64 * (1.0 / ((1u64 << 53) as f64))
    }

    /// Uniform f64 in `[min, max)`
    pub fn uniform(&mut self, min: f64, max: f64) -> f64 {
        min + (max - min) * self.next_f64()
    }

    /// Bernoulli trial with success probability `p`
    ///
    /// `p <= 0.0` never succeeds and `p >= 1.0` always does. One draw is
    /// consumed either way so the sequence does not depend on `p`.
    pub fn chance(&mut self, p: f64) -> bool {
        self.next_f64() < p
    }

    /// Pick an index proportionally to `weights`
    ///
    /// Non-finite and negative weights count as zero. Returns `None` when the
    /// total weight is zero.
    pub fn weighted_index(&mut self, weights: &[f64]) -> Option<usize> {
        let clean = |w: f64| if w.is_finite() && w > 0.0 { w } else { 0.0 };
        let total: f64 = weights.iter().copied().map(clean).sum();
        if total <= 0.0 {
            return None;
        }

        let mut target = self.next_f64() * total;
        let mut last_positive = None;
        for (idx, w) in weights.iter().copied().map(clean).enumerate() {
            if w == 0.0 {
                continue;
            }
            last_positive = Some(idx);
            target -= w;
            if target < 0.0 {
                return Some(idx);
            }
        }

        // Rounding can leave a sliver of `target`; attribute it to the last bucket
        last_positive
    }
}

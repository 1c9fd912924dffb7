//! Jitter strategies to prevent synchronized retry storms
//!
//! When to use which strategy:
//! - `None`: deterministic retries for tests or tightly controlled workflows.
//! - `Proportional`: uniform in `[delay·(1−f), delay·(1+f)]`, spreading
//!   independent callers around the same backoff schedule.
//!
//! Notes:
//! - RNG: uses `rand`'s thread-local RNG by default; deterministic RNGs can
//!   be injected via `apply_with_rng`.
//! - Precision: millisecond conversions saturate to `u64::MAX` to avoid
//!   panics on very large durations.

use rand::{rng, Rng};
use std::time::Duration;

/// Jitter strategy for randomizing retry delays
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Jitter {
    /// No jitter - use the exact backoff delay
    None,
    /// Uniform in `[delay·(1−fraction), delay·(1+fraction)]`
    Proportional(f64),
}

impl Jitter {
    /// Create a proportional jitter strategy; `fraction` must be in `[0, 1]`.
    pub fn proportional(fraction: f64) -> Result<Self, &'static str> {
        if !fraction.is_finite() || !(0.0..=1.0).contains(&fraction) {
            return Err("proportional jitter: fraction must be within [0, 1]");
        }
        Ok(Jitter::Proportional(fraction))
    }

    /// Apply jitter to a delay duration
    pub fn apply(&self, delay: Duration) -> Duration {
        let mut rng = rng();
        self.apply_internal(delay, &mut rng)
    }

    /// Apply jitter with a custom RNG (for testing)
    pub fn apply_with_rng<R: Rng>(&self, delay: Duration, rng: &mut R) -> Duration {
        self.apply_internal(delay, rng)
    }

    fn as_millis_saturated(duration: Duration) -> u64 {
        duration.as_millis().try_into().unwrap_or(u64::MAX) // Saturate extremely large durations
    }

    fn apply_internal<R: Rng>(&self, delay: Duration, rng: &mut R) -> Duration {
        match self {
            Jitter::None => delay,
            Jitter::Proportional(fraction) => {
                let millis = Self::as_millis_saturated(delay);
                if millis == 0 {
                    return Duration::ZERO;
                }
                let span = (millis as f64 * fraction) as u64;
                let lower = millis.saturating_sub(span);
                let upper = millis.saturating_add(span);
                Duration::from_millis(rng.random_range(lower..=upper))
            }
        }
    }
}

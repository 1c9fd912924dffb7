//! Backoff schedules for retry delays.
//!
//! Attempt semantics: attempt index `0` represents the initial call (no
//! delay), and retries start at `attempt = 1`. Delays saturate at a
//! documented maximum to avoid overflow.
//!
//! Example
//! ```rust
//! use std::time::Duration;
//! use tollgate::Backoff;
//!
//! let backoff = Backoff::exponential(Duration::from_secs(1))
//!     .with_max(Duration::from_secs(60))
//!     .unwrap();
//! assert_eq!(backoff.delay(0), Duration::ZERO); // initial call
//! assert_eq!(backoff.delay(1), Duration::from_secs(1));
//! assert_eq!(backoff.delay(2), Duration::from_secs(2));
//! assert_eq!(backoff.delay(10), Duration::from_secs(60)); // capped
//! ```

use std::fmt;
use std::time::Duration;

/// Maximum delay used when calculations overflow (1 day).
pub const MAX_BACKOFF: Duration = Duration::from_secs(24 * 60 * 60);

/// Errors returned by backoff configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackoffError {
    #[error("with_max is only valid for exponential backoff")]
    ConstantDoesNotSupportMax,
    #[error("max must be greater than zero")]
    MaxMustBePositive,
    #[error("max ({max:?}) must be >= base ({base:?})")]
    MaxLessThanBase { base: Duration, max: Duration },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum BackoffKind {
    Constant { delay: Duration },
    Exponential { base: Duration, max: Option<Duration> },
}

/// Delay schedule for retry attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    kind: BackoffKind,
}

impl Backoff {
    /// Same delay before every retry.
    pub fn constant(delay: Duration) -> Self {
        Self { kind: BackoffKind::Constant { delay } }
    }

    /// `base * 2^(attempt-1)`, optionally capped via [`with_max`](Self::with_max).
    pub fn exponential(base: Duration) -> Self {
        Self { kind: BackoffKind::Exponential { base, max: None } }
    }

    /// Cap the delay. Errors if called on `constant`, if `max` is zero, or
    /// if `max < base`.
    pub fn with_max(mut self, max: Duration) -> Result<Self, BackoffError> {
        if max.is_zero() {
            return Err(BackoffError::MaxMustBePositive);
        }
        match &mut self.kind {
            BackoffKind::Exponential { base, max: existing } => {
                if max < *base {
                    return Err(BackoffError::MaxLessThanBase { base: *base, max });
                }
                *existing = Some(max);
                Ok(self)
            }
            BackoffKind::Constant { .. } => Err(BackoffError::ConstantDoesNotSupportMax),
        }
    }

    /// Delay for a given attempt number (0-based; 0 = initial call, no delay).
    pub fn delay(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        match &self.kind {
            BackoffKind::Constant { delay } => *delay,
            BackoffKind::Exponential { base, max } => {
                let exponent = attempt.saturating_sub(1).min(u32::MAX as usize) as u32;
                let multiplier = 2u128.saturating_pow(exponent);
                let base_nanos = base.as_nanos().saturating_mul(multiplier);
                let exp_delay = Duration::from_nanos(base_nanos.min(MAX_BACKOFF.as_nanos()) as u64);
                let capped = max.map(|m| exp_delay.min(m)).unwrap_or(exp_delay);
                capped.min(MAX_BACKOFF)
            }
        }
    }
}

impl fmt::Display for Backoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            BackoffKind::Constant { delay } => write!(f, "constant({delay:?})"),
            BackoffKind::Exponential { base, max: Some(max) } => {
                write!(f, "exponential({base:?}, max {max:?})")
            }
            BackoffKind::Exponential { base, max: None } => write!(f, "exponential({base:?})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_backoff_returns_same_delay() {
        let backoff = Backoff::constant(Duration::from_secs(1));
        assert_eq!(backoff.delay(0), Duration::ZERO);
        assert_eq!(backoff.delay(1), Duration::from_secs(1));
        assert_eq!(backoff.delay(2), Duration::from_secs(1));
        assert_eq!(backoff.delay(100), Duration::from_secs(1));
    }

    #[test]
    fn exponential_backoff_doubles_each_time() {
        let backoff = Backoff::exponential(Duration::from_millis(100));
        assert_eq!(backoff.delay(1), Duration::from_millis(100)); // 100 * 2^0
        assert_eq!(backoff.delay(2), Duration::from_millis(200)); // 100 * 2^1
        assert_eq!(backoff.delay(3), Duration::from_millis(400)); // 100 * 2^2
        assert_eq!(backoff.delay(4), Duration::from_millis(800)); // 100 * 2^3
    }

    #[test]
    fn delays_never_decrease_until_the_cap() {
        let backoff =
            Backoff::exponential(Duration::from_secs(1)).with_max(Duration::from_secs(60)).unwrap();
        let mut previous = Duration::ZERO;
        for attempt in 1..20 {
            let delay = backoff.delay(attempt);
            assert!(delay >= previous, "delay shrank at attempt {attempt}");
            previous = delay;
        }
        assert_eq!(previous, Duration::from_secs(60));
    }

    #[test]
    fn exponential_backoff_respects_max() {
        let backoff = Backoff::exponential(Duration::from_millis(100))
            .with_max(Duration::from_secs(1))
            .unwrap();

        assert_eq!(backoff.delay(4), Duration::from_millis(800));
        assert_eq!(backoff.delay(5), Duration::from_secs(1)); // Capped
        assert_eq!(backoff.delay(10), Duration::from_secs(1)); // Still capped
    }

    #[test]
    fn exponential_backoff_handles_overflow() {
        let backoff = Backoff::exponential(Duration::from_secs(1));
        let huge_attempt: usize = 1_000_000_000;
        assert_eq!(backoff.delay(huge_attempt), MAX_BACKOFF); // Saturated
    }

    #[test]
    fn with_max_on_constant_errors() {
        let err = Backoff::constant(Duration::from_secs(5)).with_max(Duration::from_secs(1));
        assert!(matches!(err, Err(BackoffError::ConstantDoesNotSupportMax)));
    }

    #[test]
    fn base_greater_than_max_is_rejected() {
        let err = Backoff::exponential(Duration::from_secs(100))
            .with_max(Duration::from_secs(50))
            .unwrap_err();
        assert!(matches!(err, BackoffError::MaxLessThanBase { .. }));
    }

    #[test]
    fn zero_max_is_rejected() {
        let err = Backoff::exponential(Duration::from_secs(1)).with_max(Duration::ZERO);
        assert!(matches!(err, Err(BackoffError::MaxMustBePositive)));
    }

    #[test]
    fn zero_base_behaves() {
        let backoff = Backoff::exponential(Duration::ZERO);
        assert_eq!(backoff.delay(3), Duration::ZERO);
    }

    #[test]
    fn very_large_attempt_clamps() {
        let backoff = Backoff::exponential(Duration::from_secs(2));
        assert_eq!(backoff.delay((u32::MAX as usize) + 10_000), MAX_BACKOFF);
    }
}

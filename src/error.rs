//! Error types for admission control and orchestration.
//!
//! Would-exceed-quota is deliberately *not* here: inside the tracker it is
//! the `Err` branch of `try_reserve` carrying per-dimension wait times
//! ([`WouldExceed`](crate::quota::WouldExceed)), and the blocking `reserve`
//! absorbs it entirely — callers only ever see the terminal taxonomy below.

use std::time::Duration;

use crate::classify::{classify, Disposition};
use crate::quota::{Dimension, EndpointId, ReservationId};

/// Errors from [`RateLimiter::reserve`](crate::limiter::RateLimiter::reserve).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReserveError {
    /// The endpoint was never configured.
    #[error("endpoint `{0}` is not configured")]
    UnknownEndpoint(EndpointId),
    /// The cost exceeds a dimension's whole capacity: waiting would never
    /// help, so the caller is told immediately.
    #[error("cost of {units} {dimension} can never fit capacity {capacity} on `{endpoint}`")]
    NeverAdmissible { endpoint: EndpointId, dimension: Dimension, units: u64, capacity: u64 },
}

/// Reservation lifecycle violation: a commit or release for an id the
/// tracker no longer knows.
///
/// Either the reservation was already resolved (a programming error — the
/// accounting has drifted) or the abandonment sweep reclaimed it (the grace
/// period is shorter than a live upstream call). Never expected in normal
/// operation; the limiter logs it at error level and propagates it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("reservation {id} on `{endpoint}` is unknown or already resolved")]
pub struct ReservationError {
    pub id: ReservationId,
    pub endpoint: EndpointId,
}

/// A failure reported by the generation service.
///
/// Constructed through [`classify`](Self::classify) so the string matching
/// that decides retryability stays in one place
/// ([`classify`](crate::classify)).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("upstream failure: {message}")]
pub struct UpstreamError {
    status: Option<u16>,
    message: String,
    disposition: Disposition,
}

impl UpstreamError {
    /// Classify a raw upstream failure into the retryable/fatal taxonomy.
    pub fn classify(status: Option<u16>, message: impl Into<String>) -> Self {
        let message = message.into();
        let disposition = classify(status, &message);
        Self { status, message, disposition }
    }

    /// Escape hatch for callers that already know the failure is transient.
    pub fn retryable(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self {
            status: None,
            message: message.into(),
            disposition: Disposition::Retryable { retry_after },
        }
    }

    /// Escape hatch for callers that already know the failure is permanent.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self { status: None, message: message.into(), disposition: Disposition::Fatal }
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn disposition(&self) -> Disposition {
        self.disposition
    }

    pub fn is_retryable(&self) -> bool {
        self.disposition.is_retryable()
    }

    /// Server-suggested delay, when the failure carried one.
    pub fn retry_after(&self) -> Option<Duration> {
        self.disposition.retry_after()
    }
}

/// Terminal outcome of a failed
/// [`Orchestrator::generate`](crate::orchestrator::Orchestrator::generate).
///
/// Retryable upstream errors and quota waits are fully absorbed by the
/// orchestrator; the caller sees exactly one of these after all internal
/// retrying.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerateError {
    /// Every attempt failed with a retryable error.
    #[error("generation failed after {attempts} attempts; last error: {last}")]
    Exhausted { attempts: usize, last: UpstreamError },
    /// The upstream rejected the call permanently; no retries were spent.
    #[error(transparent)]
    Fatal(UpstreamError),
    /// Admission was impossible (unknown endpoint, infeasible cost).
    #[error(transparent)]
    Reserve(#[from] ReserveError),
    /// Quota accounting drifted; see [`ReservationError`].
    #[error(transparent)]
    Accounting(#[from] ReservationError),
}

impl GenerateError {
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }

    /// Attempt count for exhausted retries, if applicable.
    pub fn attempts(&self) -> Option<usize> {
        match self {
            Self::Exhausted { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }

    /// The underlying upstream error, if one terminated the call.
    pub fn upstream(&self) -> Option<&UpstreamError> {
        match self {
            Self::Exhausted { last, .. } => Some(last),
            Self::Fatal(err) => Some(err),
            _ => None,
        }
    }
}

//! Per-endpoint quota tracking.
//!
//! An [`EndpointQuota`] owns one [`BudgetWindow`] per configured budget
//! dimension and the set of *pending reservations* — capacity handed out to
//! callers whose upstream calls have not resolved yet. Admission is the
//! conjunction of all dimensions over `committed + pending` load, which is
//! the contract that prevents over-committing quota to concurrent callers.
//!
//! The tracker is plain owned state: all synchronization lives in
//! [`RateLimiter`](crate::limiter::RateLimiter), which funnels every
//! mutation through `try_reserve`/`commit`/`release` behind one lock per
//! endpoint.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::config::EndpointLimits;
use crate::error::{ReservationError, ReserveError};
use crate::window::BudgetWindow;

pub(crate) const MINUTE_WINDOW: Duration = Duration::from_secs(60);
pub(crate) const DAY_WINDOW: Duration = Duration::from_secs(86_400);

/// One named, independently budgeted target of the generation service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EndpointId(String);

impl EndpointId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EndpointId {
    fn from(name: &str) -> Self {
        Self(name.to_owned())
    }
}

impl From<String> for EndpointId {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One countable resource being rate limited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Dimension {
    RequestsPerMinute,
    TokensPerMinute,
    RequestsPerDay,
}

impl Dimension {
    pub fn label(&self) -> &'static str {
        match self {
            Dimension::RequestsPerMinute => "requests/minute",
            Dimension::TokensPerMinute => "tokens/minute",
            Dimension::RequestsPerDay => "requests/day",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Cost of one upstream call, split across budget dimensions.
///
/// Requests count against the per-minute and per-day request windows;
/// tokens count against the per-minute token window. The usual shape is one
/// request plus an externally computed token estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cost {
    pub requests: u64,
    pub tokens: u64,
}

impl Cost {
    pub fn new(requests: u64, tokens: u64) -> Self {
        Self { requests, tokens }
    }

    /// One request carrying `estimated` tokens.
    pub fn tokens(estimated: u64) -> Self {
        Self { requests: 1, tokens: estimated }
    }

    fn for_dimension(&self, dimension: Dimension) -> u64 {
        match dimension {
            Dimension::RequestsPerMinute | Dimension::RequestsPerDay => self.requests,
            Dimension::TokensPerMinute => self.tokens,
        }
    }
}

/// Unique id for a reservation; process-wide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReservationId(u64);

static NEXT_RESERVATION_ID: AtomicU64 = AtomicU64::new(1);

impl ReservationId {
    fn next() -> Self {
        Self(NEXT_RESERVATION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ReservationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// A provisional claim against an endpoint's budget.
///
/// Move-only: resolved exactly once, by
/// [`RateLimiter::commit`](crate::limiter::RateLimiter::commit) or
/// [`RateLimiter::release`](crate::limiter::RateLimiter::release), so a
/// double resolution is unrepresentable in caller code.
#[derive(Debug)]
pub struct Reservation {
    pub(crate) id: ReservationId,
    pub(crate) endpoint: EndpointId,
    pub(crate) cost: Cost,
}

impl Reservation {
    pub fn id(&self) -> ReservationId {
        self.id
    }

    pub fn endpoint(&self) -> &EndpointId {
        &self.endpoint
    }

    /// The estimate this reservation was admitted with.
    pub fn cost(&self) -> Cost {
        self.cost
    }
}

#[derive(Debug)]
struct Pending {
    cost: Cost,
    created_at: u64,
}

/// Admission denial carrying how long each saturated dimension needs.
#[derive(Debug, Clone)]
pub struct WouldExceed {
    waits: Vec<(Dimension, Duration)>,
}

impl WouldExceed {
    /// Per-dimension wait estimates for every dimension that refused.
    pub fn waits(&self) -> &[(Dimension, Duration)] {
        &self.waits
    }

    /// The wait that satisfies every refusing dimension.
    pub fn max_wait(&self) -> Duration {
        self.waits.iter().map(|&(_, wait)| wait).max().unwrap_or(Duration::ZERO)
    }
}

/// Read-only view of one budget dimension, for status displays.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DimensionSnapshot {
    pub dimension: Dimension,
    pub capacity: u64,
    pub used: u64,
    pub pending: u64,
    /// Time until the oldest committed entry leaves the window; zero when
    /// nothing is recorded.
    pub next_free: Duration,
}

/// Read-only view of one endpoint's budgets.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct EndpointSnapshot {
    pub endpoint: EndpointId,
    pub dimensions: Vec<DimensionSnapshot>,
}

/// Budget tracker for one endpoint: windows per configured dimension plus
/// the pending-reservation set.
#[derive(Debug)]
pub struct EndpointQuota {
    endpoint: EndpointId,
    windows: Vec<(Dimension, BudgetWindow)>,
    pending: HashMap<ReservationId, Pending>,
    pending_requests: u64,
    pending_tokens: u64,
}

impl EndpointQuota {
    /// Build a tracker from configured limits. Dimensions without a limit
    /// get no window and never block.
    pub fn new(endpoint: EndpointId, limits: &EndpointLimits) -> Self {
        let mut windows = Vec::new();
        if let Some(rpm) = limits.requests_per_minute {
            windows.push((Dimension::RequestsPerMinute, BudgetWindow::new(rpm, MINUTE_WINDOW)));
        }
        if let Some(tpm) = limits.tokens_per_minute {
            windows.push((Dimension::TokensPerMinute, BudgetWindow::new(tpm, MINUTE_WINDOW)));
        }
        if let Some(rpd) = limits.requests_per_day {
            windows.push((Dimension::RequestsPerDay, BudgetWindow::new(rpd, DAY_WINDOW)));
        }
        Self {
            endpoint,
            windows,
            pending: HashMap::new(),
            pending_requests: 0,
            pending_tokens: 0,
        }
    }

    pub fn endpoint(&self) -> &EndpointId {
        &self.endpoint
    }

    /// A cost exceeding a dimension's whole capacity can never be admitted;
    /// callers fail fast instead of waiting forever.
    pub fn check_feasible(&self, cost: Cost) -> Result<(), ReserveError> {
        for (dimension, window) in &self.windows {
            let units = cost.for_dimension(*dimension);
            if units > window.capacity() {
                return Err(ReserveError::NeverAdmissible {
                    endpoint: self.endpoint.clone(),
                    dimension: *dimension,
                    units,
                    capacity: window.capacity(),
                });
            }
        }
        Ok(())
    }

    /// Admit `cost` against every dimension or report per-dimension waits.
    ///
    /// On success the estimate is held in the pending totals until the
    /// reservation is committed or released.
    pub fn try_reserve(&mut self, cost: Cost, now: u64) -> Result<Reservation, WouldExceed> {
        let mut waits = Vec::new();
        for (dimension, window) in &mut self.windows {
            let load = match *dimension {
                Dimension::RequestsPerMinute | Dimension::RequestsPerDay => self.pending_requests,
                Dimension::TokensPerMinute => self.pending_tokens,
            };
            let units = load.saturating_add(cost.for_dimension(*dimension));
            if !window.can_admit(units, now) {
                waits.push((*dimension, window.time_until_admit(units, now)));
            }
        }
        if !waits.is_empty() {
            return Err(WouldExceed { waits });
        }

        let id = ReservationId::next();
        self.pending.insert(id, Pending { cost, created_at: now });
        self.pending_requests = self.pending_requests.saturating_add(cost.requests);
        self.pending_tokens = self.pending_tokens.saturating_add(cost.tokens);
        Ok(Reservation { id, endpoint: self.endpoint.clone(), cost })
    }

    /// Resolve a reservation with the cost the call actually incurred.
    ///
    /// The actual cost may exceed the admitted estimate; the overage is
    /// simply recorded and shapes future admissions — it never retroactively
    /// fails the original admission decision.
    pub fn commit(
        &mut self,
        id: ReservationId,
        actual: Cost,
        now: u64,
    ) -> Result<(), ReservationError> {
        self.take_pending(id)?;
        for (dimension, window) in &mut self.windows {
            window.record(actual.for_dimension(*dimension), now);
        }
        Ok(())
    }

    /// Resolve a reservation with nothing recorded: the call never happened
    /// or was abandoned.
    pub fn release(&mut self, id: ReservationId) -> Result<(), ReservationError> {
        self.take_pending(id).map(|_| ())
    }

    fn take_pending(&mut self, id: ReservationId) -> Result<Pending, ReservationError> {
        let pending = self
            .pending
            .remove(&id)
            .ok_or_else(|| ReservationError { id, endpoint: self.endpoint.clone() })?;
        self.pending_requests = self.pending_requests.saturating_sub(pending.cost.requests);
        self.pending_tokens = self.pending_tokens.saturating_sub(pending.cost.tokens);
        Ok(pending)
    }

    /// How long a reservation of `cost` would currently wait, with pending
    /// load included. Pure query apart from lazy eviction.
    pub fn wait_time(&mut self, cost: Cost, now: u64) -> Duration {
        let mut wait = Duration::ZERO;
        let pending_requests = self.pending_requests;
        let pending_tokens = self.pending_tokens;
        for (dimension, window) in &mut self.windows {
            let load = match *dimension {
                Dimension::RequestsPerMinute | Dimension::RequestsPerDay => pending_requests,
                Dimension::TokensPerMinute => pending_tokens,
            };
            let units = load.saturating_add(cost.for_dimension(*dimension));
            wait = wait.max(window.time_until_admit(units, now));
        }
        wait
    }

    /// Force-release pending reservations older than `grace_millis`.
    ///
    /// Bounds the quota leaked by callers that crashed between reserve and
    /// resolve. Returns the reclaimed ids.
    pub fn sweep_abandoned(&mut self, grace_millis: u64, now: u64) -> Vec<ReservationId> {
        let abandoned: Vec<ReservationId> = self
            .pending
            .iter()
            .filter(|(_, p)| now.saturating_sub(p.created_at) >= grace_millis)
            .map(|(&id, _)| id)
            .collect();
        for &id in &abandoned {
            // take_pending cannot fail: the id was just read from the map.
            let _ = self.take_pending(id);
        }
        abandoned
    }

    /// Per-dimension capacity/used/pending view. Read-only apart from lazy
    /// eviction.
    pub fn snapshot(&mut self, now: u64) -> EndpointSnapshot {
        let pending_requests = self.pending_requests;
        let pending_tokens = self.pending_tokens;
        let dimensions = self
            .windows
            .iter_mut()
            .map(|(dimension, window)| DimensionSnapshot {
                dimension: *dimension,
                capacity: window.capacity(),
                used: window.used(now),
                pending: match *dimension {
                    Dimension::RequestsPerMinute | Dimension::RequestsPerDay => pending_requests,
                    Dimension::TokensPerMinute => pending_tokens,
                },
                next_free: window.next_expiry(now).unwrap_or(Duration::ZERO),
            })
            .collect();
        EndpointSnapshot { endpoint: self.endpoint.clone(), dimensions }
    }
}

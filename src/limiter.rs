//! The concurrency boundary: blocking admission, reservation lifecycle,
//! arrival-order fairness, and the abandonment sweep.
//!
//! One [`EndpointQuota`] per configured endpoint sits behind its own mutex;
//! critical sections never span an await point. A per-endpoint
//! [`Notify`] wakes blocked reservers whenever capacity may have freed
//! (commit, release, sweep, or another waiter giving up).
//!
//! Fairness: each blocked `reserve` holds a FIFO ticket and is admitted only
//! when its ticket is at the head of the queue *and* every dimension admits,
//! so waiters are admitted strictly in arrival order. Dropping a `reserve`
//! future removes its ticket via a drop guard — an interrupted reserve never
//! leaves a phantom pending reservation.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;

use crate::clock::{Clock, MonotonicClock};
use crate::config::Config;
use crate::error::{ReservationError, ReserveError};
use crate::quota::{Cost, EndpointId, EndpointQuota, EndpointSnapshot, Reservation};
use crate::sleeper::{Sleeper, TokioSleeper};

/// Floor for admission-wait sleeps; waiters also wake early on any notify.
const MIN_POLL: Duration = Duration::from_millis(50);

struct Gate {
    quota: EndpointQuota,
    queue: VecDeque<u64>,
    next_ticket: u64,
}

struct EndpointState {
    gate: Mutex<Gate>,
    notify: Notify,
}

/// Admission controller for every configured endpoint.
///
/// The limiter treats endpoints independently and has no cross-endpoint
/// logic; picking an endpoint is the orchestrator's job.
pub struct RateLimiter {
    endpoints: BTreeMap<EndpointId, Arc<EndpointState>>,
    grace_millis: u64,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("endpoints", &self.endpoints.keys().collect::<Vec<_>>())
            .field("grace_millis", &self.grace_millis)
            .finish()
    }
}

impl RateLimiter {
    /// Build one tracker per configured endpoint.
    pub fn new(config: &Config) -> Self {
        let endpoints = config
            .endpoints
            .iter()
            .map(|(endpoint, limits)| {
                let state = EndpointState {
                    gate: Mutex::new(Gate {
                        quota: EndpointQuota::new(endpoint.clone(), limits),
                        queue: VecDeque::new(),
                        next_ticket: 0,
                    }),
                    notify: Notify::new(),
                };
                (endpoint.clone(), Arc::new(state))
            })
            .collect();
        Self {
            endpoints,
            grace_millis: u64::try_from(config.grace_period.as_millis()).unwrap_or(u64::MAX),
            clock: Arc::new(MonotonicClock::default()),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Override the clock (useful for deterministic tests).
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Override the sleeper used for admission waits.
    pub fn with_sleeper<S: Sleeper + 'static>(mut self, sleeper: S) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }

    fn state(&self, endpoint: &EndpointId) -> Result<&Arc<EndpointState>, ReserveError> {
        self.endpoints
            .get(endpoint)
            .ok_or_else(|| ReserveError::UnknownEndpoint(endpoint.clone()))
    }

    /// Block until `cost` is admitted on `endpoint`, in arrival order.
    ///
    /// Fails fast only for an unknown endpoint or a cost that can never fit
    /// (`NeverAdmissible`); otherwise the caller is eventually admitted or
    /// cancels by dropping the future.
    pub async fn reserve(
        &self,
        endpoint: &EndpointId,
        cost: Cost,
    ) -> Result<Reservation, ReserveError> {
        let state = self.state(endpoint)?;

        let ticket = {
            let mut gate = state.gate.lock().unwrap();
            gate.quota.check_feasible(cost)?;
            let ticket = gate.next_ticket;
            gate.next_ticket += 1;
            gate.queue.push_back(ticket);
            ticket
        };
        let mut guard = TicketGuard { state: Arc::clone(state), ticket, armed: true };

        loop {
            // Created before the admission check so a notify issued between
            // dropping the lock and awaiting is not lost.
            let notified = state.notify.notified();

            let wait = {
                let mut gate = state.gate.lock().unwrap();
                if gate.queue.front() == Some(&ticket) {
                    let now = self.clock.now_millis();
                    match gate.quota.try_reserve(cost, now) {
                        Ok(reservation) => {
                            gate.queue.pop_front();
                            drop(gate);
                            guard.disarm();
                            // The next waiter may be admissible too.
                            state.notify.notify_waiters();
                            return Ok(reservation);
                        }
                        Err(denied) => Some(denied.max_wait().max(MIN_POLL)),
                    }
                } else {
                    // Not at the head: only a wake can change our situation.
                    None
                }
            };

            match wait {
                Some(duration) => {
                    let sleep = self.sleeper.sleep(duration);
                    tokio::select! {
                        _ = notified => {}
                        _ = sleep => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Resolve a reservation with the cost the call actually incurred,
    /// waking any blocked reservers.
    pub fn commit(&self, reservation: Reservation, actual: Cost) -> Result<(), ReservationError> {
        let state = self
            .endpoints
            .get(&reservation.endpoint)
            .ok_or_else(|| ReservationError {
                id: reservation.id,
                endpoint: reservation.endpoint.clone(),
            })?;
        let result = {
            let mut gate = state.gate.lock().unwrap();
            let now = self.clock.now_millis();
            gate.quota.commit(reservation.id, actual, now)
        };
        state.notify.notify_waiters();
        if let Err(err) = &result {
            tracing::error!(error = %err, "quota accounting drift on commit");
        }
        result
    }

    /// Resolve a reservation with nothing recorded, waking any blocked
    /// reservers.
    pub fn release(&self, reservation: Reservation) -> Result<(), ReservationError> {
        let state = self
            .endpoints
            .get(&reservation.endpoint)
            .ok_or_else(|| ReservationError {
                id: reservation.id,
                endpoint: reservation.endpoint.clone(),
            })?;
        let result = {
            let mut gate = state.gate.lock().unwrap();
            gate.quota.release(reservation.id)
        };
        state.notify.notify_waiters();
        if let Err(err) = &result {
            tracing::error!(error = %err, "quota accounting drift on release");
        }
        result
    }

    /// How long a reservation of `cost` against `endpoint` would currently
    /// wait, without registering anything.
    ///
    /// Speculative queries never perturb each other's admission odds, so
    /// orchestrators can compare endpoints before committing quota.
    pub fn wait_time(&self, endpoint: &EndpointId, cost: Cost) -> Result<Duration, ReserveError> {
        let state = self.state(endpoint)?;
        let mut gate = state.gate.lock().unwrap();
        let now = self.clock.now_millis();
        Ok(gate.quota.wait_time(cost, now))
    }

    /// Per-endpoint, per-dimension capacity/used/pending view. Mutates
    /// nothing beyond lazy eviction.
    pub fn snapshot(&self) -> Vec<EndpointSnapshot> {
        let now = self.clock.now_millis();
        self.endpoints
            .values()
            .map(|state| state.gate.lock().unwrap().quota.snapshot(now))
            .collect()
    }

    /// Force-release pending reservations older than the grace period.
    ///
    /// Returns how many were reclaimed. Bounds the worst-case quota leakage
    /// from callers that crashed between reserve and resolve.
    pub fn sweep_abandoned(&self) -> usize {
        let now = self.clock.now_millis();
        let mut total = 0;
        for (endpoint, state) in &self.endpoints {
            let swept = {
                let mut gate = state.gate.lock().unwrap();
                gate.quota.sweep_abandoned(self.grace_millis, now)
            };
            if !swept.is_empty() {
                tracing::warn!(
                    endpoint = %endpoint,
                    count = swept.len(),
                    "force-released abandoned reservations"
                );
                state.notify.notify_waiters();
                total += swept.len();
            }
        }
        total
    }

    /// Run [`sweep_abandoned`](Self::sweep_abandoned) every `interval` until
    /// the limiter is dropped.
    pub fn spawn_sweeper(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let limiter = Arc::downgrade(&self);
        drop(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                match limiter.upgrade() {
                    Some(limiter) => {
                        limiter.sweep_abandoned();
                    }
                    None => break,
                }
            }
        })
    }
}

struct TicketGuard {
    state: Arc<EndpointState>,
    ticket: u64,
    armed: bool,
}

impl TicketGuard {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TicketGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        // Poisoned lock means a panic is already unwinding; skip cleanup
        // rather than aborting on a double panic.
        if let Ok(mut gate) = self.state.gate.lock() {
            if let Some(position) = gate.queue.iter().position(|&t| t == self.ticket) {
                gate.queue.remove(position);
            }
        }
        self.state.notify.notify_waiters();
    }
}

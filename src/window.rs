//! Sliding budget windows.
//!
//! A [`BudgetWindow`] is one rolling counter ("N units in the last 60s").
//! Entries are `(timestamp, units)` pairs in chronological order; anything
//! older than the window duration is evicted lazily on every query, so the
//! counter is a strict sliding window rather than a fixed bucket — bursts at
//! a window boundary are still bounded by the rolling sum.
//!
//! Timestamps are `u64` milliseconds supplied by the caller (the owning
//! tracker reads them from its [`Clock`](crate::clock::Clock)), which keeps
//! every operation deterministic under test.
//!
//! Invariants:
//! - `used()` always equals the sum of entries younger than the window.
//! - `record` must only be called after a successful `can_admit` check by
//!   the same logical operation; concurrency control is the rate limiter's
//!   job, not the window's.

use std::collections::VecDeque;
use std::time::Duration;

/// A single rolling budget counter.
#[derive(Debug, Clone)]
pub struct BudgetWindow {
    capacity: u64,
    window_millis: u64,
    entries: VecDeque<(u64, u64)>,
    in_window: u64,
}

impl BudgetWindow {
    /// Create a window admitting at most `capacity` units per `window`.
    pub fn new(capacity: u64, window: Duration) -> Self {
        Self {
            capacity,
            window_millis: u64::try_from(window.as_millis()).unwrap_or(u64::MAX),
            entries: VecDeque::new(),
            in_window: 0,
        }
    }

    /// Maximum units admitted per window.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Window duration.
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_millis)
    }

    /// Units currently counted in the window, after eviction.
    pub fn used(&mut self, now: u64) -> u64 {
        self.evict(now);
        self.in_window
    }

    /// Whether `units` more would still fit within capacity.
    pub fn can_admit(&mut self, units: u64, now: u64) -> bool {
        self.evict(now);
        self.in_window.saturating_add(units) <= self.capacity
    }

    /// Count `units` against the window at time `now`.
    ///
    /// Callers pass monotonically non-decreasing timestamps; entries stay in
    /// chronological order.
    pub fn record(&mut self, units: u64, now: u64) {
        if units == 0 {
            return;
        }
        self.entries.push_back((now, units));
        self.in_window = self.in_window.saturating_add(units);
    }

    /// Minimum wait until `units` could be admitted; zero if admission is
    /// already possible.
    ///
    /// When even a fully drained window could not make room (the shortfall is
    /// not covered by recorded entries, e.g. pending load from concurrent
    /// reservations is folded into `units`), the full window duration is
    /// returned as an upper bound — callers re-check on wake rather than
    /// trusting the estimate.
    pub fn time_until_admit(&mut self, units: u64, now: u64) -> Duration {
        self.evict(now);
        let needed = self.in_window.saturating_add(units);
        if needed <= self.capacity {
            return Duration::ZERO;
        }
        let excess = needed - self.capacity;

        let mut freed = 0u64;
        for &(ts, entry_units) in &self.entries {
            freed = freed.saturating_add(entry_units);
            if freed >= excess {
                let expires_at = ts.saturating_add(self.window_millis);
                return Duration::from_millis(expires_at.saturating_sub(now));
            }
        }
        Duration::from_millis(self.window_millis)
    }

    /// Time until the oldest entry leaves the window; `None` when empty.
    pub fn next_expiry(&mut self, now: u64) -> Option<Duration> {
        self.evict(now);
        self.entries.front().map(|&(ts, _)| {
            Duration::from_millis(ts.saturating_add(self.window_millis).saturating_sub(now))
        })
    }

    fn evict(&mut self, now: u64) {
        while let Some(&(ts, units)) = self.entries.front() {
            if now.saturating_sub(ts) >= self.window_millis {
                self.entries.pop_front();
                self.in_window = self.in_window.saturating_sub(units);
            } else {
                break;
            }
        }
    }
}

//! Retry/fallback orchestration over the rate limiter.
//!
//! The orchestrator drives a bounded sequence of attempts against a primary
//! endpoint and, on the final attempt, a secondary endpoint. Quota is
//! reserved *before* every attempt — retries included — so a retry storm can
//! never exceed the budget a single well-behaved caller would respect. The
//! upstream call itself runs without any limiter lock held.
//!
//! Semantics:
//! - `max_attempts` counts total attempts (initial try + retries).
//! - Only retryable upstream errors re-enter the loop; fatal errors return
//!   immediately.
//! - Delays follow `min(base · 2^(attempt−1), max_delay)` with a
//!   ±`jitter_fraction` band and a 100 ms floor; a longer server-supplied
//!   retry hint wins over the computed delay.
//! - Failed attempts release their reservation before anything else, so no
//!   quota leaks on failure paths.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::backoff::{Backoff, BackoffError};
use crate::config::{Config, ConfigError, RetryConfig, Route};
use crate::error::{GenerateError, ReserveError, UpstreamError};
use crate::events::{EventSink, OrchestratorEvent, TracingSink};
use crate::jitter::Jitter;
use crate::limiter::RateLimiter;
use crate::quota::{Cost, EndpointId};
use crate::sleeper::{Sleeper, TokioSleeper};

/// Floor for backoff sleeps, so a tiny jittered delay still yields.
const MIN_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Response from the generation service: opaque content plus the token
/// count needed to commit accurate quota.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub tokens_used: u64,
}

/// Successful outcome of a `generate` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generated {
    pub completion: Completion,
    /// The endpoint that produced the completion.
    pub endpoint: EndpointId,
    /// How many attempts the call took.
    pub attempts: usize,
}

/// The single opaque operation the orchestrator performs against the
/// generation service.
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn invoke(
        &self,
        endpoint: &EndpointId,
        prompt: &str,
    ) -> Result<Completion, UpstreamError>;
}

/// Crude token estimate for prompt text: roughly four characters per token,
/// minimum one for non-empty input.
///
/// A convenience for callers building cost estimates — the orchestrator
/// itself never derives costs from prompts; it uses whatever estimate the
/// caller passes in.
pub fn estimate_tokens(text: &str) -> u64 {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return 0;
    }
    (trimmed.chars().count() as u64 / 4).max(1)
}

/// Drives `generate` calls through reservation, upstream invocation, retry,
/// and fallback.
pub struct Orchestrator<U> {
    upstream: U,
    limiter: Arc<RateLimiter>,
    retry: RetryConfig,
    route: Route,
    backoff: Backoff,
    jitter: Jitter,
    sleeper: Arc<dyn Sleeper>,
    sink: Arc<dyn EventSink>,
}

impl<U> std::fmt::Debug for Orchestrator<U> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("retry", &self.retry)
            .field("route", &self.route)
            .field("backoff", &self.backoff)
            .finish()
    }
}

impl<U: Upstream> Orchestrator<U> {
    /// Build an orchestrator from a validated configuration.
    pub fn new(
        upstream: U,
        limiter: Arc<RateLimiter>,
        config: &Config,
    ) -> Result<Self, ConfigError> {
        let retry = config.retry;
        let backoff =
            Backoff::exponential(retry.base_delay).with_max(retry.max_delay).map_err(
                |err| match err {
                    BackoffError::MaxMustBePositive | BackoffError::ConstantDoesNotSupportMax => {
                        ConfigError::InvalidBaseDelay
                    }
                    BackoffError::MaxLessThanBase { base, max } => {
                        ConfigError::DelayCapBelowBase { base, max }
                    }
                },
            )?;
        let jitter = Jitter::proportional(retry.jitter_fraction)
            .map_err(|_| ConfigError::InvalidJitterFraction(retry.jitter_fraction))?;
        Ok(Self {
            upstream,
            limiter,
            retry,
            route: config.route.clone(),
            backoff,
            jitter,
            sleeper: Arc::new(TokioSleeper),
            sink: Arc::new(TracingSink),
        })
    }

    /// Override the sleeper used for backoff waits (tests).
    pub fn with_sleeper<S: Sleeper + 'static>(mut self, sleeper: S) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }

    /// Override the jitter strategy (tests want `Jitter::None`).
    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    /// Subscribe a progress event sink.
    pub fn with_events<S: EventSink + 'static>(mut self, sink: S) -> Self {
        self.sink = Arc::new(sink);
        self
    }

    /// Generate a completion using the configured route.
    ///
    /// The caller receives a successful result or a single terminal error
    /// after all internal retrying; intermediate retry and backoff states
    /// surface only through the event sink.
    pub async fn generate(
        &self,
        prompt: &str,
        estimated_tokens: u64,
    ) -> Result<Generated, GenerateError> {
        self.generate_with_route(&self.route, prompt, estimated_tokens).await
    }

    /// Generate with an explicit endpoint preference instead of the
    /// configured route.
    pub async fn generate_with_route(
        &self,
        route: &Route,
        prompt: &str,
        estimated_tokens: u64,
    ) -> Result<Generated, GenerateError> {
        let cost = Cost::tokens(estimated_tokens);
        let max_attempts = self.retry.max_attempts;
        let mut last_tried: Option<EndpointId> = None;
        let mut last_error: Option<UpstreamError> = None;

        for attempt in 1..=max_attempts {
            let endpoint = self.choose_endpoint(route, attempt, last_tried.as_ref(), cost)?;
            self.sink
                .emit(OrchestratorEvent::AttemptStarted { attempt, endpoint: endpoint.clone() });
            if attempt > 1 {
                tracing::debug!(attempt, max_attempts, endpoint = %endpoint, "retrying generation");
            }

            let reservation = self.limiter.reserve(&endpoint, cost).await?;
            match self.upstream.invoke(&endpoint, prompt).await {
                Ok(completion) => {
                    self.limiter.commit(reservation, Cost::new(1, completion.tokens_used))?;
                    self.sink.emit(OrchestratorEvent::Succeeded {
                        attempts: attempt,
                        endpoint: endpoint.clone(),
                    });
                    if attempt > 1 {
                        tracing::info!(attempt, endpoint = %endpoint, "generation succeeded after retries");
                    }
                    return Ok(Generated { completion, endpoint, attempts: attempt });
                }
                Err(error) => {
                    // Refund the estimate before anything else: failed calls
                    // consume no quota.
                    self.limiter.release(reservation)?;
                    let retryable = error.is_retryable();
                    self.sink.emit(OrchestratorEvent::AttemptFailed {
                        attempt,
                        endpoint: endpoint.clone(),
                        retryable,
                    });
                    if !retryable {
                        tracing::warn!(endpoint = %endpoint, error = %error, "fatal upstream error");
                        return Err(GenerateError::Fatal(error));
                    }
                    tracing::debug!(attempt, endpoint = %endpoint, error = %error, "retryable upstream error");
                    last_tried = Some(endpoint);
                    if attempt < max_attempts {
                        let delay = self.retry_delay(attempt, error.retry_after());
                        self.sink.emit(OrchestratorEvent::BackingOff { attempt, delay });
                        self.sleeper.sleep(delay).await;
                    }
                    last_error = Some(error);
                }
            }
        }

        self.sink.emit(OrchestratorEvent::Exhausted { attempts: max_attempts });
        tracing::warn!(attempts = max_attempts, "generation attempts exhausted");
        let last = last_error.unwrap_or_else(|| {
            // max_attempts > 0 is enforced at config time, so every path to
            // this point recorded a retryable failure.
            debug_assert!(false, "exhausted without a recorded failure");
            UpstreamError::retryable("exhausted retry budget", None)
        });
        Err(GenerateError::Exhausted { attempts: max_attempts, last })
    }

    /// Pick the endpoint for one attempt.
    ///
    /// Before the last attempt the primary wins unless it has a nonzero
    /// wait and the secondary's is no worse. The final attempt always goes
    /// to the secondary when it has not just been tried, degrading
    /// gracefully under sustained primary saturation.
    fn choose_endpoint(
        &self,
        route: &Route,
        attempt: usize,
        last_tried: Option<&EndpointId>,
        cost: Cost,
    ) -> Result<EndpointId, ReserveError> {
        let primary = &route.primary;
        let Some(fallback) = route.fallback() else {
            return Ok(primary.clone());
        };

        if attempt == self.retry.max_attempts && attempt > 1 && last_tried != Some(fallback) {
            return Ok(fallback.clone());
        }

        let primary_wait = self.limiter.wait_time(primary, cost)?;
        if primary_wait.is_zero() {
            return Ok(primary.clone());
        }
        let fallback_wait = self.limiter.wait_time(fallback, cost)?;
        if fallback_wait <= primary_wait {
            self.sink.emit(OrchestratorEvent::FallbackSelected {
                attempt,
                from: primary.clone(),
                to: fallback.clone(),
                primary_wait,
                fallback_wait,
            });
            tracing::info!(
                from = %primary,
                to = %fallback,
                ?primary_wait,
                ?fallback_wait,
                "switching to fallback endpoint"
            );
            Ok(fallback.clone())
        } else {
            Ok(primary.clone())
        }
    }

    fn retry_delay(&self, attempt: usize, server_hint: Option<Duration>) -> Duration {
        let backed_off = self.backoff.delay(attempt);
        let jittered = self.jitter.apply(backed_off).max(MIN_RETRY_DELAY);
        match server_hint {
            Some(hint) if hint > jittered => hint,
            _ => jittered,
        }
    }
}

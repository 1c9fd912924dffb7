//! Immutable startup configuration.
//!
//! Built once at process start and passed by reference into the rate
//! limiter and orchestrator — there is no global mutable configuration.
//! Environment overrides follow the deployment convention
//! `<ENDPOINT>_RPM` / `<ENDPOINT>_TPM` / `<ENDPOINT>_RPD`, with the endpoint
//! name uppercased and punctuation mapped to underscores (so
//! `model-2.5-pro` reads `MODEL_2_5_PRO_RPM`).

use std::collections::BTreeMap;
use std::time::Duration;

use crate::quota::EndpointId;

/// Per-endpoint budget capacities. `None` means unlimited in that dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EndpointLimits {
    pub requests_per_minute: Option<u64>,
    pub tokens_per_minute: Option<u64>,
    pub requests_per_day: Option<u64>,
}

impl EndpointLimits {
    /// No limits in any dimension.
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn requests_per_minute(mut self, capacity: u64) -> Self {
        self.requests_per_minute = Some(capacity);
        self
    }

    pub fn tokens_per_minute(mut self, capacity: u64) -> Self {
        self.tokens_per_minute = Some(capacity);
        self
    }

    pub fn requests_per_day(mut self, capacity: u64) -> Self {
        self.requests_per_day = Some(capacity);
        self
    }

    /// Apply `<ENDPOINT>_RPM/_TPM/_RPD` environment overrides on top of
    /// these limits. A value of `0` lifts the limit entirely; unparsable
    /// values are logged and ignored.
    pub fn overridden_from_env(mut self, endpoint: &EndpointId) -> Self {
        let prefix: String = endpoint
            .as_str()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
            .collect();
        if let Some(value) = read_env_limit(&format!("{prefix}_RPM")) {
            self.requests_per_minute = value;
        }
        if let Some(value) = read_env_limit(&format!("{prefix}_TPM")) {
            self.tokens_per_minute = value;
        }
        if let Some(value) = read_env_limit(&format!("{prefix}_RPD")) {
            self.requests_per_day = value;
        }
        self
    }
}

/// Outer Option: was the variable set at all. Inner Option: the limit, with
/// `0` meaning unlimited, matching the deployment convention.
fn read_env_limit(key: &str) -> Option<Option<u64>> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse::<u64>() {
        Ok(0) => Some(None),
        Ok(value) => Some(Some(value)),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable rate limit override");
            None
        }
    }
}

/// Retry/backoff parameters for the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RetryConfig {
    /// Total attempts (initial try + retries).
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Uniform jitter band of `±fraction · delay`; must be within `[0, 1]`.
    pub jitter_fraction: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter_fraction: 0.1,
        }
    }
}

/// Ordered endpoint preference: the primary is tried first, the secondary
/// takes the final attempt when the primary keeps failing or stays
/// saturated.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Route {
    pub primary: EndpointId,
    pub secondary: EndpointId,
}

impl Route {
    pub fn new(primary: impl Into<EndpointId>, secondary: impl Into<EndpointId>) -> Self {
        Self { primary: primary.into(), secondary: secondary.into() }
    }

    /// The secondary, when it is a genuine alternative to the primary.
    pub fn fallback(&self) -> Option<&EndpointId> {
        (self.secondary != self.primary).then_some(&self.secondary)
    }
}

/// Errors rejected at configuration time.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("route references unconfigured endpoint `{0}`")]
    UnknownRouteEndpoint(EndpointId),
    #[error("max_attempts must be > 0")]
    InvalidMaxAttempts,
    #[error("jitter_fraction must be within [0, 1] (got {0})")]
    InvalidJitterFraction(f64),
    #[error("base_delay must be greater than zero")]
    InvalidBaseDelay,
    #[error("max_delay ({max:?}) must be >= base_delay ({base:?})")]
    DelayCapBelowBase { base: Duration, max: Duration },
}

/// The whole immutable configuration surface, read once at startup.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Config {
    pub endpoints: BTreeMap<EndpointId, EndpointLimits>,
    pub retry: RetryConfig,
    pub route: Route,
    /// Pending reservations older than this are force-released by the
    /// abandonment sweep. Must comfortably exceed the slowest expected
    /// upstream call.
    pub grace_period: Duration,
}

impl Config {
    pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(600);

    /// Validate and freeze a configuration.
    pub fn new(
        endpoints: BTreeMap<EndpointId, EndpointLimits>,
        retry: RetryConfig,
        route: Route,
    ) -> Result<Self, ConfigError> {
        if retry.max_attempts == 0 {
            return Err(ConfigError::InvalidMaxAttempts);
        }
        if !retry.jitter_fraction.is_finite() || !(0.0..=1.0).contains(&retry.jitter_fraction) {
            return Err(ConfigError::InvalidJitterFraction(retry.jitter_fraction));
        }
        if retry.base_delay.is_zero() {
            return Err(ConfigError::InvalidBaseDelay);
        }
        if retry.max_delay < retry.base_delay {
            return Err(ConfigError::DelayCapBelowBase {
                base: retry.base_delay,
                max: retry.max_delay,
            });
        }
        for endpoint in [&route.primary, &route.secondary] {
            if !endpoints.contains_key(endpoint) {
                return Err(ConfigError::UnknownRouteEndpoint(endpoint.clone()));
            }
        }
        Ok(Self { endpoints, retry, route, grace_period: Self::DEFAULT_GRACE_PERIOD })
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Advisory sanity check; returns human-readable warnings without
    /// rejecting the configuration.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        for (endpoint, limits) in &self.endpoints {
            if let Some(rpm) = limits.requests_per_minute {
                if rpm > 1_000 {
                    warnings.push(format!("{endpoint}: requests/minute unusually high ({rpm})"));
                }
            }
            if let Some(tpm) = limits.tokens_per_minute {
                if tpm < 100 {
                    warnings.push(format!("{endpoint}: tokens/minute too low ({tpm})"));
                } else if tpm > 10_000_000 {
                    warnings.push(format!("{endpoint}: tokens/minute unusually high ({tpm})"));
                }
            }
            if let Some(rpd) = limits.requests_per_day {
                if rpd < 10 {
                    warnings.push(format!("{endpoint}: requests/day too low ({rpd})"));
                } else if rpd > 100_000 {
                    warnings.push(format!("{endpoint}: requests/day unusually high ({rpd})"));
                }
            }
            if let (Some(rpm), Some(rpd)) = (limits.requests_per_minute, limits.requests_per_day) {
                // 1440 minutes in a day: a full-throttle minute budget that
                // exceeds the daily budget means the daily cap is the one
                // that actually binds.
                if rpm.saturating_mul(1_440) > rpd {
                    warnings.push(format!(
                        "{endpoint}: requests/minute x 1440 exceeds requests/day"
                    ));
                }
            }
        }
        if self.route.fallback().is_none() {
            warnings.push("route has no distinct fallback endpoint".to_owned());
        }
        warnings
    }
}

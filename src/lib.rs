#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # Tollgate
//!
//! Quota-aware admission control and retry/fallback orchestration for
//! rate-limited generation services.
//!
//! ## Features
//!
//! - **Sliding-window budgets** per endpoint and dimension (requests/minute,
//!   tokens/minute, requests/day)
//! - **Reservations**: capacity is claimed before every upstream call and
//!   committed with actual usage or released, so concurrent callers can
//!   never over-commit a budget
//! - **Blocking admission** with arrival-order fairness and cancellation
//!   safety
//! - **Speculative wait queries** for smart endpoint selection
//! - **Retry with exponential backoff, jitter, and endpoint fallback**
//! - **Abandonment sweep** bounding quota leakage from crashed callers
//!
//! ## Quick Start
//!
//! ```rust
//! use std::collections::BTreeMap;
//! use std::sync::Arc;
//! use tollgate::{
//!     Completion, Config, EndpointId, EndpointLimits, Orchestrator, RateLimiter, RetryConfig,
//!     Route, Upstream, UpstreamError,
//! };
//!
//! struct Echo;
//!
//! #[async_trait::async_trait]
//! impl Upstream for Echo {
//!     async fn invoke(
//!         &self,
//!         _endpoint: &EndpointId,
//!         prompt: &str,
//!     ) -> Result<Completion, UpstreamError> {
//!         Ok(Completion { text: prompt.to_uppercase(), tokens_used: 8 })
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut endpoints = BTreeMap::new();
//!     endpoints.insert(
//!         EndpointId::from("model-pro"),
//!         EndpointLimits::unlimited().requests_per_minute(5).tokens_per_minute(250_000),
//!     );
//!     endpoints.insert(EndpointId::from("model-flash"), EndpointLimits::unlimited());
//!     let config = Config::new(
//!         endpoints,
//!         RetryConfig::default(),
//!         Route::new("model-pro", "model-flash"),
//!     )
//!     .unwrap();
//!
//!     let limiter = Arc::new(RateLimiter::new(&config));
//!     let orchestrator = Orchestrator::new(Echo, limiter, &config).unwrap();
//!
//!     let generated = orchestrator.generate("hello", 2).await.unwrap();
//!     assert_eq!(generated.completion.text, "HELLO");
//! }
//! ```

pub mod backoff;
pub mod classify;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod jitter;
pub mod limiter;
pub mod orchestrator;
pub mod quota;
pub mod sleeper;
pub mod window;

// Re-exports
pub use backoff::Backoff;
pub use classify::Disposition;
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{Config, ConfigError, EndpointLimits, RetryConfig, Route};
pub use error::{GenerateError, ReservationError, ReserveError, UpstreamError};
pub use events::{CollectingSink, EventSink, OrchestratorEvent, TracingSink};
pub use jitter::Jitter;
pub use limiter::RateLimiter;
pub use orchestrator::{estimate_tokens, Completion, Generated, Orchestrator, Upstream};
pub use quota::{
    Cost, Dimension, DimensionSnapshot, EndpointId, EndpointQuota, EndpointSnapshot, Reservation,
    ReservationId, WouldExceed,
};
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use window::BudgetWindow;

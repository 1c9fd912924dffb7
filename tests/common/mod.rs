//! Shared helpers for integration tests.
#![allow(dead_code)] // not every test binary uses every helper

use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tollgate::{
    Completion, Config, EndpointId, EndpointLimits, ManualClock, RetryConfig, Route, Sleeper,
    Upstream, UpstreamError,
};

/// Two-endpoint config: a tight "pro" and a looser "flash".
pub fn two_endpoint_config(pro_rpm: u64, flash_rpm: u64, max_attempts: usize) -> Config {
    let mut endpoints = BTreeMap::new();
    endpoints.insert(
        EndpointId::from("pro"),
        EndpointLimits::unlimited().requests_per_minute(pro_rpm).tokens_per_minute(100_000),
    );
    endpoints.insert(
        EndpointId::from("flash"),
        EndpointLimits::unlimited().requests_per_minute(flash_rpm).tokens_per_minute(100_000),
    );
    let retry = RetryConfig { max_attempts, ..RetryConfig::default() };
    Config::new(endpoints, retry, Route::new("pro", "flash")).expect("valid config")
}

/// Upstream double that replays scripted outcomes and records which
/// endpoint each call hit. Clones share state.
#[derive(Clone, Default)]
pub struct ScriptedUpstream {
    outcomes: Arc<Mutex<VecDeque<Result<Completion, UpstreamError>>>>,
    calls: Arc<Mutex<Vec<EndpointId>>>,
}

impl ScriptedUpstream {
    pub fn completion(tokens_used: u64) -> Completion {
        Completion { text: "ok".to_owned(), tokens_used }
    }

    pub fn push(&self, outcome: Result<Completion, UpstreamError>) {
        self.outcomes.lock().unwrap().push_back(outcome);
    }

    pub fn push_overloaded(&self, times: usize) {
        for _ in 0..times {
            self.push(Err(UpstreamError::classify(Some(503), "the model is overloaded")));
        }
    }

    pub fn calls(&self) -> Vec<EndpointId> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Upstream for ScriptedUpstream {
    async fn invoke(
        &self,
        endpoint: &EndpointId,
        _prompt: &str,
    ) -> Result<Completion, UpstreamError> {
        self.calls.lock().unwrap().push(endpoint.clone());
        self.outcomes.lock().unwrap().pop_front().unwrap_or_else(|| Ok(Self::completion(5)))
    }
}

/// Sleeper that advances a [`ManualClock`] by the requested duration instead
/// of sleeping, so admission waits that depend on window expiry resolve
/// instantly and deterministically.
#[derive(Debug, Clone)]
pub struct AdvancingSleeper {
    clock: ManualClock,
}

impl AdvancingSleeper {
    pub fn new(clock: ManualClock) -> Self {
        Self { clock }
    }
}

impl Sleeper for AdvancingSleeper {
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        self.clock.advance(duration.as_millis().try_into().unwrap_or(u64::MAX));
        Box::pin(async {})
    }
}

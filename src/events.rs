//! Progress events emitted by the orchestrator.
//!
//! Callers never observe intermediate retry/backoff states through the
//! `generate` result — they get one success or one terminal error. A UI that
//! wants to show "retrying on fallback…" subscribes through an [`EventSink`]
//! instead. Consuming events is optional; the default sink forwards them to
//! `tracing`.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::quota::EndpointId;

/// Structured progress events for one `generate` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorEvent {
    /// An attempt is about to reserve quota and call upstream.
    AttemptStarted { attempt: usize, endpoint: EndpointId },
    /// The orchestrator picked the secondary endpoint over a saturated
    /// primary.
    FallbackSelected {
        attempt: usize,
        from: EndpointId,
        to: EndpointId,
        primary_wait: Duration,
        fallback_wait: Duration,
    },
    /// An attempt failed; `retryable` says whether the loop continues.
    AttemptFailed { attempt: usize, endpoint: EndpointId, retryable: bool },
    /// Sleeping before the next attempt.
    BackingOff { attempt: usize, delay: Duration },
    /// The call succeeded on attempt `attempts`.
    Succeeded { attempts: usize, endpoint: EndpointId },
    /// Every attempt failed; a terminal error is about to be returned.
    Exhausted { attempts: usize },
}

impl fmt::Display for OrchestratorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AttemptStarted { attempt, endpoint } => {
                write!(f, "attempt {attempt} on {endpoint}")
            }
            Self::FallbackSelected { attempt, from, to, primary_wait, fallback_wait } => write!(
                f,
                "attempt {attempt}: falling back {from} -> {to} (waits {primary_wait:?} vs {fallback_wait:?})"
            ),
            Self::AttemptFailed { attempt, endpoint, retryable } => {
                let kind = if *retryable { "retryable" } else { "fatal" };
                write!(f, "attempt {attempt} on {endpoint} failed ({kind})")
            }
            Self::BackingOff { attempt, delay } => {
                write!(f, "backing off {delay:?} after attempt {attempt}")
            }
            Self::Succeeded { attempts, endpoint } => {
                write!(f, "succeeded on {endpoint} after {attempts} attempt(s)")
            }
            Self::Exhausted { attempts } => write!(f, "exhausted after {attempts} attempt(s)"),
        }
    }
}

/// Consumer of orchestrator progress events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: OrchestratorEvent);
}

/// Default sink: forwards events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: OrchestratorEvent) {
        match &event {
            OrchestratorEvent::AttemptFailed { .. } | OrchestratorEvent::Exhausted { .. } => {
                tracing::warn!(event = %event, "generate_progress");
            }
            _ => tracing::info!(event = %event, "generate_progress"),
        }
    }
}

/// Sink that stores events for later inspection (tests, status displays).
#[derive(Debug, Default, Clone)]
pub struct CollectingSink {
    events: Arc<Mutex<Vec<OrchestratorEvent>>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<OrchestratorEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl EventSink for CollectingSink {
    fn emit(&self, event: OrchestratorEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collecting_sink_preserves_order() {
        let sink = CollectingSink::new();
        sink.emit(OrchestratorEvent::AttemptStarted {
            attempt: 1,
            endpoint: EndpointId::from("pro"),
        });
        sink.emit(OrchestratorEvent::BackingOff { attempt: 1, delay: Duration::from_secs(1) });
        sink.emit(OrchestratorEvent::Exhausted { attempts: 2 });

        let events = sink.events();
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], OrchestratorEvent::AttemptStarted { attempt: 1, .. }));
        assert!(matches!(events[2], OrchestratorEvent::Exhausted { attempts: 2 }));
    }

    #[test]
    fn display_is_compact_and_named() {
        let event = OrchestratorEvent::FallbackSelected {
            attempt: 2,
            from: EndpointId::from("pro"),
            to: EndpointId::from("flash"),
            primary_wait: Duration::from_secs(30),
            fallback_wait: Duration::ZERO,
        };
        let rendered = format!("{event}");
        assert!(rendered.contains("pro -> flash"));
        assert!(rendered.contains("attempt 2"));
    }

    #[test]
    fn tracing_sink_logs_without_panicking() {
        let subscriber = tracing_subscriber::fmt().with_test_writer().finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        TracingSink.emit(OrchestratorEvent::Succeeded {
            attempts: 1,
            endpoint: EndpointId::from("pro"),
        });
        TracingSink.emit(OrchestratorEvent::Exhausted { attempts: 3 });
    }
}

//! Circuit breaking around whole adapter calls.
//!
//! The server only relies on [`CircuitBreaker::call`]; the thresholds of
//! [`ConsecutiveFailureBreaker`] are an implementation detail.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::adapter::AdapterOutput;
use crate::error::{ErrorCategory, ToolError};

/// Result type of a guarded adapter call.
pub type CallResult = Result<AdapterOutput, ToolError>;

/// Circuit state for one adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open { opened_at: Instant },
    HalfOpen,
}

impl CircuitState {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open { .. } => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// Wraps one adapter call, keyed by adapter name. May fast-fail.
pub trait CircuitBreaker: Send + Sync {
    fn call<'a>(&'a self, name: &'a str, call: BoxFuture<'a, CallResult>) -> BoxFuture<'a, CallResult>;

    fn state(&self, name: &str) -> CircuitState;
}

/// Breaker that never opens.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBreaker;

impl CircuitBreaker for NoopBreaker {
    fn call<'a>(&'a self, _name: &'a str, call: BoxFuture<'a, CallResult>) -> BoxFuture<'a, CallResult> {
        call
    }

    fn state(&self, _name: &str) -> CircuitState {
        CircuitState::Closed
    }
}

#[derive(Debug)]
struct BreakerEntry {
    state: CircuitState,
    consecutive_failures: u32,
    half_open_successes: u32,
}

impl Default for BreakerEntry {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            half_open_successes: 0,
        }
    }
}

/// Opens after `failure_threshold` consecutive failures, probes again after
/// `cooldown`, and closes after `recovery_threshold` half-open successes.
///
/// Only failures whose category [trips the breaker](ErrorCategory::trips_breaker)
/// are counted; other failures leave the state untouched.
#[derive(Debug)]
pub struct ConsecutiveFailureBreaker {
    failure_threshold: u32,
    recovery_threshold: u32,
    cooldown: Duration,
    circuits: Mutex<HashMap<String, BreakerEntry>>,
}

impl ConsecutiveFailureBreaker {
    pub fn new(failure_threshold: u32, recovery_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            recovery_threshold: recovery_threshold.max(1),
            cooldown,
            circuits: Mutex::new(HashMap::new()),
        }
    }

    /// Admission check. Moves an expired open circuit to half-open.
    fn admit(&self, name: &str) -> Result<(), ToolError> {
        let mut circuits = self.circuits.lock();
        let entry = circuits.entry(name.to_string()).or_default();
        if let CircuitState::Open { opened_at } = entry.state {
            if opened_at.elapsed() < self.cooldown {
                return Err(ToolError::execution(
                    ErrorCategory::External,
                    format!("Circuit breaker open for '{name}'"),
                ));
            }
            entry.state = CircuitState::HalfOpen;
            entry.half_open_successes = 0;
            info!(tool = name, "circuit breaker half-open");
        }
        Ok(())
    }

    fn record_success(&self, name: &str) {
        let mut circuits = self.circuits.lock();
        let entry = circuits.entry(name.to_string()).or_default();
        match entry.state {
            CircuitState::HalfOpen => {
                entry.half_open_successes += 1;
                if entry.half_open_successes >= self.recovery_threshold {
                    entry.state = CircuitState::Closed;
                    entry.consecutive_failures = 0;
                    info!(tool = name, "circuit breaker closed");
                }
            }
            CircuitState::Closed => entry.consecutive_failures = 0,
            CircuitState::Open { .. } => {}
        }
    }

    fn record_failure(&self, name: &str, category: ErrorCategory) {
        let mut circuits = self.circuits.lock();
        let entry = circuits.entry(name.to_string()).or_default();
        entry.consecutive_failures += 1;
        let trip = match entry.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => entry.consecutive_failures >= self.failure_threshold,
            CircuitState::Open { .. } => false,
        };
        if trip {
            entry.state = CircuitState::Open {
                opened_at: Instant::now(),
            };
            warn!(
                tool = name,
                failures = entry.consecutive_failures,
                %category,
                "circuit breaker opened"
            );
        }
    }
}

impl Default for ConsecutiveFailureBreaker {
    fn default() -> Self {
        Self::new(5, 1, Duration::from_secs(30))
    }
}

impl CircuitBreaker for ConsecutiveFailureBreaker {
    fn call<'a>(&'a self, name: &'a str, call: BoxFuture<'a, CallResult>) -> BoxFuture<'a, CallResult> {
        Box::pin(async move {
            self.admit(name)?;
            let result = call.await;
            match &result {
                Ok(_) => self.record_success(name),
                Err(err) if err.category().trips_breaker() => {
                    self.record_failure(name, err.category())
                }
                Err(_) => {}
            }
            result
        })
    }

    fn state(&self, name: &str) -> CircuitState {
        self.circuits
            .lock()
            .get(name)
            .map(|entry| entry.state)
            .unwrap_or(CircuitState::Closed)
    }
}

//! Circuit Breaker State Machine
//!
//! One breaker guards one node definition for the lifetime of the process:
//! - Closed: calls are allowed; consecutive failures are counted
//! - Open: calls are rejected until the recovery timeout has elapsed
//! - Half-Open: a trial call is allowed; its outcome closes or re-opens
//!
//! There is no background timer. The Open to Half-Open transition happens
//! lazily on whichever read ([`CircuitBreaker::can_execute`],
//! [`CircuitBreaker::state`], [`CircuitBreaker::status`]) first observes the
//! elapsed timeout.
//!
//! All mutation happens under a synchronous lock that is never held across
//! an await point.

use chrono::Utc;
use noderun_kernel::runner::config::CircuitBreakerConfig;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation
    Closed,
    /// Calls are rejected
    Open,
    /// Probing whether the dependency recovered
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Point-in-time view of a breaker. Derived on request, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerStatus {
    pub state: CircuitState,
    pub failures: u32,
    /// Wall-clock time of the last recorded failure, epoch milliseconds
    pub last_failure_time: Option<i64>,
    /// Remaining cooldown; zero unless the state is [`CircuitState::Open`]
    pub time_until_recovery: Duration,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failures: u32,
    opened_at: Option<Instant>,
    last_failure_ms: Option<i64>,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            failures: 0,
            opened_at: None,
            last_failure_ms: None,
        }
    }
}

/// Per-node circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Whether a call may proceed. Moves Open to Half-Open once the recovery
    /// timeout has elapsed.
    pub fn can_execute(&self) -> bool {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        inner.state != CircuitState::Open
    }

    /// Record a successful call.
    ///
    /// Clears the failure count. A Half-Open breaker closes. A success
    /// reported while Open comes from a call admitted before the circuit
    /// opened and does not close it.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        match inner.state {
            CircuitState::Closed => inner.failures = 0,
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Closed;
                inner.failures = 0;
                inner.opened_at = None;
                info!(node = %self.name, "circuit breaker closed");
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        inner.failures = inner.failures.saturating_add(1);
        inner.last_failure_ms = Some(Utc::now().timestamp_millis());

        match inner.state {
            CircuitState::Closed if inner.failures >= self.config.failure_threshold => {
                self.open(&mut inner);
            }
            CircuitState::Closed => {}
            CircuitState::HalfOpen => self.open(&mut inner),
            // re-stamp so late failures extend the cooldown
            CircuitState::Open => inner.opened_at = Some(Instant::now()),
        }
    }

    /// Current state, after applying any due Open to Half-Open transition.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        inner.state
    }

    pub fn status(&self) -> CircuitBreakerStatus {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        let time_until_recovery = match (inner.state, inner.opened_at) {
            (CircuitState::Open, Some(opened_at)) => self
                .config
                .recovery_timeout()
                .saturating_sub(opened_at.elapsed()),
            _ => Duration::ZERO,
        };
        CircuitBreakerStatus {
            state: inner.state,
            failures: inner.failures,
            last_failure_time: inner.last_failure_ms,
            time_until_recovery,
        }
    }

    /// Force Closed with zero failures.
    pub fn reset(&self) {
        *self.inner.lock() = Inner::default();
        info!(node = %self.name, "circuit breaker reset");
    }

    /// Remaining cooldown in milliseconds, zero unless Open.
    pub fn retry_after_ms(&self) -> u64 {
        u64::try_from(self.status().time_until_recovery.as_millis()).unwrap_or(u64::MAX)
    }

    fn open(&self, inner: &mut Inner) {
        let from = inner.state;
        inner.state = CircuitState::Open;
        inner.opened_at = Some(Instant::now());
        warn!(
            node = %self.name,
            from = %from,
            failures = inner.failures,
            recovery_timeout_ms = self.config.recovery_timeout_ms,
            "circuit breaker opened"
        );
    }

    fn refresh(&self, inner: &mut Inner) {
        if inner.state != CircuitState::Open {
            return;
        }
        let due = inner
            .opened_at
            .is_none_or(|at| at.elapsed() >= self.config.recovery_timeout());
        if due {
            inner.state = CircuitState::HalfOpen;
            info!(node = %self.name, "circuit breaker half-open, allowing trial call");
        }
    }
}

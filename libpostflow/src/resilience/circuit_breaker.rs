//! Circuit breaker for platform calls
//!
//! `closed` lets everything through. After `failure_threshold` consecutive
//! failures the breaker opens and rejects calls without running them. Once
//! `open_timeout` has passed since the last failure the next call is let
//! through as a single trial (`half_open`): success closes the breaker,
//! failure opens it again.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::config::ResilienceConfig;
use crate::error::{PlatformError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    trial_in_flight: bool,
}

pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    open_timeout: Duration,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, failure_threshold: u32, open_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            failure_threshold: failure_threshold.max(1),
            open_timeout,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure: None,
                trial_in_flight: false,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    /// Run `operation` through the breaker
    ///
    /// Fails with `PlatformError::CircuitOpen` without invoking `operation`
    /// while the breaker is open (or a half-open trial is already running).
    /// Otherwise records the outcome and returns the operation's own result.
    pub async fn call<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut permit = self.acquire()?;
        let result = operation().await;
        match &result {
            Ok(_) => self.record_success(permit.trial),
            Err(_) => self.record_failure(permit.trial),
        }
        permit.settled = true;
        result
    }

    /// Force the breaker back to closed
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.trial_in_flight = false;
    }

    fn acquire(&self) -> Result<Permit<'_>> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Ok(Permit::new(self, false)),
            CircuitState::Open => {
                let elapsed = inner
                    .last_failure
                    .map(|at| at.elapsed())
                    .unwrap_or(self.open_timeout);
                if elapsed >= self.open_timeout {
                    inner.state = CircuitState::HalfOpen;
                    inner.trial_in_flight = true;
                    info!(circuit = %self.name, "Circuit open -> half_open");
                    Ok(Permit::new(self, true))
                } else {
                    warn!(circuit = %self.name, "Circuit open, rejecting call");
                    Err(PlatformError::CircuitOpen(self.name.clone()).into())
                }
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    warn!(circuit = %self.name, "Circuit half_open trial in flight, rejecting call");
                    Err(PlatformError::CircuitOpen(self.name.clone()).into())
                } else {
                    inner.trial_in_flight = true;
                    Ok(Permit::new(self, true))
                }
            }
        }
    }

    /// Only the half-open trial may close the breaker. A call admitted while
    /// closed that finishes after the breaker opened leaves it open.
    fn record_success(&self, trial: bool) {
        let mut inner = self.lock();
        if trial {
            info!(circuit = %self.name, "Circuit half_open -> closed");
            inner.state = CircuitState::Closed;
            inner.failure_count = 0;
            inner.trial_in_flight = false;
        } else if inner.state == CircuitState::Closed {
            inner.failure_count = 0;
        }
    }

    fn record_failure(&self, trial: bool) {
        let mut inner = self.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure = Some(Instant::now());

        if trial {
            inner.trial_in_flight = false;
            inner.state = CircuitState::Open;
            warn!(circuit = %self.name, "Circuit half_open -> open");
            return;
        }

        if inner.state == CircuitState::Closed && inner.failure_count >= self.failure_threshold {
            inner.state = CircuitState::Open;
            warn!(
                circuit = %self.name,
                failures = inner.failure_count,
                "Circuit closed -> open"
            );
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Releases a half-open trial slot if the call is dropped before it settles
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl<'a> Permit<'a> {
    fn new(breaker: &'a CircuitBreaker, trial: bool) -> Self {
        Self {
            breaker,
            trial,
            settled: false,
        }
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if self.trial && !self.settled {
            let mut inner = self.breaker.lock();
            inner.trial_in_flight = false;
            inner.state = CircuitState::Open;
        }
    }
}

/// One breaker per platform, created on first use
pub struct CircuitBreakerRegistry {
    failure_threshold: u32,
    open_timeout: Duration,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    pub fn new(failure_threshold: u32, open_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            open_timeout,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &ResilienceConfig) -> Self {
        Self::new(config.failure_threshold, config.open_timeout())
    }

    pub fn get(&self, platform: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self
            .breakers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        breakers
            .entry(platform.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    platform,
                    self.failure_threshold,
                    self.open_timeout,
                ))
            })
            .clone()
    }
}

//! Circuit breaker implementation

use parking_lot::Mutex;
use std::future::Future;
use tokio::time::Instant;

use super::types::{CircuitBreakerConfig, CircuitBreakerStats, CircuitState};
use crate::error::{StorageError, StorageResult};
use crate::recovery::counts_against_circuit;

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failure_count: u32,
    opened_at: Option<Instant>,
    last_failure: Option<Instant>,
    trial_in_flight: bool,
    total_calls: u64,
    total_failures: u64,
    rejected_calls: u64,
}

/// Circuit breaker guarding one backend
///
/// All transitions happen under one short synchronous lock, so the state,
/// counters and half-open trial slot always change together.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

/// Releases the half-open trial slot if the call is dropped before it reports
struct TrialPermit<'a> {
    breaker: &'a CircuitBreaker,
    settled: bool,
}

impl TrialPermit<'_> {
    fn settle(mut self, result: Result<(), &StorageError>) {
        self.settled = true;
        match result {
            Ok(()) => self.breaker.record_success(),
            Err(e) if counts_against_circuit(e) => self.breaker.record_failure(),
            Err(_) => self.breaker.record_neutral(),
        }
    }
}

impl Drop for TrialPermit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.release_trial();
        }
    }
}

impl CircuitBreaker {
    /// Create a new circuit breaker with default config
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, CircuitBreakerConfig::default())
    }

    /// Create a new circuit breaker with custom config
    pub fn with_config(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                opened_at: None,
                last_failure: None,
                trial_in_flight: false,
                total_calls: 0,
                total_failures: 0,
                rejected_calls: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state, moving Open to HalfOpen once the cooldown has elapsed
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        inner.state
    }

    /// Whether a call would currently be let through
    pub fn is_allowed(&self) -> bool {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => !inner.trial_in_flight,
        }
    }

    /// Ask permission for one call
    ///
    /// In half-open state the first caller takes the trial slot and every other
    /// caller is refused until that trial reports back.
    pub fn try_acquire(&self) -> bool {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                inner.rejected_calls += 1;
                false
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    inner.rejected_calls += 1;
                    false
                } else {
                    inner.trial_in_flight = true;
                    true
                }
            }
        }
    }

    /// Record a successful call
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.total_calls += 1;
        match inner.state {
            CircuitState::Closed => inner.failure_count = 0,
            CircuitState::HalfOpen => self.close(&mut inner),
            // A call admitted before the circuit opened; the open timer stands
            CircuitState::Open => {}
        }
    }

    /// Record an infrastructure failure
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        inner.total_calls += 1;
        inner.total_failures += 1;
        inner.last_failure = Some(now);

        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    self.open(&mut inner, now);
                }
            }
            CircuitState::HalfOpen => {
                inner.failure_count += 1;
                self.open(&mut inner, now);
            }
            CircuitState::Open => {}
        }
    }

    /// Record a call that failed for reasons unrelated to backend health
    ///
    /// Leaves the state untouched but frees the half-open trial slot.
    pub fn record_neutral(&self) {
        let mut inner = self.inner.lock();
        inner.total_calls += 1;
        inner.trial_in_flight = false;
    }

    fn release_trial(&self) {
        self.inner.lock().trial_in_flight = false;
    }

    /// Execute an operation with circuit breaker protection
    ///
    /// Returns `CircuitOpen` without running `operation` when the circuit refuses
    /// the call. Only errors for which [`counts_against_circuit`] holds are
    /// counted as failures.
    pub async fn call<T, F, Fut>(&self, operation: F) -> StorageResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = StorageResult<T>>,
    {
        if !self.try_acquire() {
            return Err(StorageError::circuit_open(self.name.clone()));
        }

        let permit = TrialPermit {
            breaker: self,
            settled: false,
        };
        let result = operation().await;
        permit.settle(result.as_ref().map(|_| ()));
        result
    }

    /// Get circuit breaker statistics
    pub fn stats(&self) -> CircuitBreakerStats {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        CircuitBreakerStats {
            state: inner.state,
            failure_count: inner.failure_count,
            total_calls: inner.total_calls,
            total_failures: inner.total_failures,
            rejected_calls: inner.rejected_calls,
            last_failure: inner.last_failure,
            opened_at: inner.opened_at,
        }
    }

    /// Force the circuit closed, e.g. after a successful health check
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        if inner.state != CircuitState::Closed || inner.failure_count > 0 {
            self.close(&mut inner);
        }
    }

    /// Force the circuit open
    pub fn trip(&self) {
        let mut inner = self.inner.lock();
        self.open(&mut inner, Instant::now());
    }

    fn refresh(&self, inner: &mut Inner) {
        if inner.state != CircuitState::Open {
            return;
        }
        let cooled = inner
            .opened_at
            .map(|at| at.elapsed() >= self.config.recovery_timeout)
            .unwrap_or(true);
        if cooled {
            inner.state = CircuitState::HalfOpen;
            inner.trial_in_flight = false;
            tracing::info!(circuit = %self.name, "circuit breaker half-open, allowing one trial call");
        }
    }

    fn open(&self, inner: &mut Inner, now: Instant) {
        inner.state = CircuitState::Open;
        inner.opened_at = Some(now);
        inner.trial_in_flight = false;
        tracing::warn!(
            circuit = %self.name,
            failures = inner.failure_count,
            "circuit breaker opened"
        );
    }

    fn close(&self, inner: &mut Inner) {
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.opened_at = None;
        inner.trial_in_flight = false;
        tracing::info!(circuit = %self.name, "circuit breaker closed");
    }
}

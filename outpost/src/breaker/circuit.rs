//! Per-service circuit breaker state machine.

use std::future::Future;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Configuration for a circuit breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures that trip the breaker open.
    pub failure_threshold: u32,
    /// How long the breaker rejects calls before admitting a trial.
    pub open_duration_ms: u64,
    /// Trial calls admitted while half-open; this many successes close it.
    pub half_open_trials: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration_ms: 60_000,
            half_open_trials: 1,
        }
    }
}

impl BreakerConfig {
    pub fn new(failure_threshold: u32, open_duration: Duration) -> Self {
        Self {
            failure_threshold,
            open_duration_ms: open_duration.as_millis().min(u64::MAX as u128) as u64,
            half_open_trials: 1,
        }
    }

    pub fn with_half_open_trials(mut self, trials: u32) -> Self {
        self.half_open_trials = trials;
        self
    }

    pub fn open_duration(&self) -> Duration {
        Duration::from_millis(self.open_duration_ms)
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.failure_threshold == 0 {
            return Err(crate::Error::config(
                "breaker failure_threshold must be at least 1",
            ));
        }
        if self.half_open_trials == 0 {
            return Err(crate::Error::config(
                "breaker half_open_trials must be at least 1",
            ));
        }
        Ok(())
    }
}

/// State of a circuit breaker.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CircuitState {
    /// Calls pass through.
    Closed,
    /// Calls are rejected without being attempted.
    Open,
    /// A limited number of trial calls probe whether the service recovered.
    HalfOpen,
}

/// Error returned by [`CircuitBreaker::call`].
#[derive(Debug, thiserror::Error)]
pub enum BreakerError<E> {
    /// The breaker rejected the call; the operation was not invoked.
    #[error("circuit breaker open for service '{service}' (retry in {retry_in:?})")]
    Open { service: String, retry_in: Duration },
    /// The operation ran and failed. The breaker recorded the failure.
    #[error("{0}")]
    Inner(E),
}

impl<E> BreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open { .. })
    }
}

/// Point-in-time view of a breaker for health displays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerSnapshot {
    pub service: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub opened_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Trial,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    /// Consecutive failures since the last success or reset.
    failure_count: u32,
    opened_at: Option<Instant>,
    opened_at_wall: Option<DateTime<Utc>>,
    trials_in_flight: u32,
    trial_successes: u32,
}

impl BreakerInner {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            opened_at: None,
            opened_at_wall: None,
            trials_in_flight: 0,
            trial_successes: 0,
        }
    }

    fn trip(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.opened_at_wall = Some(Utc::now());
        self.trials_in_flight = 0;
        self.trial_successes = 0;
    }
}

/// Circuit breaker guarding calls to one external service.
///
/// State is shared by every job that targets the service. Updates take a
/// short lock; the guarded operation itself runs outside of it.
#[derive(Debug)]
pub struct CircuitBreaker {
    service: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

/// Admission to run one guarded call.
///
/// Must be settled with [`Permit::success`] or [`Permit::failure`]. A permit
/// dropped unsettled (e.g. the call was cancelled) counts as a failure so a
/// half-open trial slot is never leaked.
#[must_use = "a permit must be settled with success() or failure()"]
pub struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    admission: Admission,
    settled: bool,
}

impl Permit<'_> {
    /// Whether this call is a half-open trial.
    pub fn is_trial(&self) -> bool {
        self.admission == Admission::Trial
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.on_success(self.admission);
    }

    pub fn failure(self) {
        self.failure_at(Instant::now());
    }

    pub fn failure_at(mut self, now: Instant) {
        self.settled = true;
        self.breaker.on_failure(self.admission, now);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.on_failure(self.admission, Instant::now());
        }
    }
}

impl CircuitBreaker {
    /// Create a new circuit breaker.
    pub fn new(service: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            service: service.into(),
            config,
            inner: Mutex::new(BreakerInner::closed()),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Current state.
    ///
    /// An open breaker whose timer has elapsed still reports `Open` until the
    /// next call is admitted as a trial.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock();
        BreakerSnapshot {
            service: self.service.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            opened_at: inner.opened_at_wall,
        }
    }

    /// Ask to run a call now. `Err` carries the time until a trial is allowed.
    pub fn try_acquire(&self) -> Result<Permit<'_>, Duration> {
        self.try_acquire_at(Instant::now())
    }

    /// [`Self::try_acquire`] with an explicit clock.
    pub fn try_acquire_at(&self, now: Instant) -> Result<Permit<'_>, Duration> {
        let mut inner = self.inner.lock();

        let admission = match inner.state {
            CircuitState::Closed => Admission::Normal,
            CircuitState::Open => {
                let opened_at = inner.opened_at.unwrap_or(now);
                let elapsed = now.saturating_duration_since(opened_at);
                let open_duration = self.config.open_duration();
                if elapsed < open_duration {
                    return Err(open_duration - elapsed);
                }

                inner.state = CircuitState::HalfOpen;
                inner.trials_in_flight = 1;
                inner.trial_successes = 0;
                debug!(service = %self.service, "Circuit breaker half-open, admitting trial call");
                Admission::Trial
            }
            CircuitState::HalfOpen => {
                if inner.trials_in_flight + inner.trial_successes >= self.config.half_open_trials {
                    return Err(Duration::ZERO);
                }
                inner.trials_in_flight += 1;
                Admission::Trial
            }
        };

        Ok(Permit {
            breaker: self,
            admission,
            settled: false,
        })
    }

    fn on_success(&self, admission: Admission) {
        let mut inner = self.inner.lock();

        match (inner.state, admission) {
            (CircuitState::Closed, _) => {
                inner.failure_count = 0;
            }
            (CircuitState::HalfOpen, Admission::Trial) => {
                inner.trials_in_flight = inner.trials_in_flight.saturating_sub(1);
                inner.trial_successes += 1;
                if inner.trial_successes >= self.config.half_open_trials {
                    *inner = BreakerInner::closed();
                    info!(service = %self.service, "Circuit breaker closed after successful recovery");
                }
            }
            // A call admitted before the breaker tripped finished late.
            (CircuitState::Open, _) | (CircuitState::HalfOpen, Admission::Normal) => {}
        }
    }

    fn on_failure(&self, admission: Admission, now: Instant) {
        let mut inner = self.inner.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);

        match (inner.state, admission) {
            (CircuitState::Closed, _) => {
                if inner.failure_count >= self.config.failure_threshold {
                    inner.trip(now);
                    warn!(
                        service = %self.service,
                        failures = inner.failure_count,
                        "Circuit breaker opened after consecutive failures"
                    );
                }
            }
            (CircuitState::HalfOpen, Admission::Trial) => {
                inner.trip(now);
                warn!(service = %self.service, "Circuit breaker reopened after failed trial call");
            }
            (CircuitState::Open, _) | (CircuitState::HalfOpen, Admission::Normal) => {}
        }
    }

    /// Reset the circuit breaker to closed state.
    pub fn reset(&self) {
        *self.inner.lock() = BreakerInner::closed();
        debug!(service = %self.service, "Circuit breaker reset to closed state");
    }

    /// Run `operation` through the breaker.
    ///
    /// While open, returns [`BreakerError::Open`] without invoking
    /// `operation`. Otherwise the outcome is recorded and an operation error
    /// is handed back unchanged inside [`BreakerError::Inner`].
    pub async fn call<T, E, F, Fut>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let permit = self.try_acquire().map_err(|retry_in| BreakerError::Open {
            service: self.service.clone(),
            retry_in,
        })?;

        match operation().await {
            Ok(value) => {
                permit.success();
                Ok(value)
            }
            Err(err) => {
                permit.failure();
                Err(BreakerError::Inner(err))
            }
        }
    }
}

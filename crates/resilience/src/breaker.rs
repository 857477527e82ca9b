//! A failure-counting circuit breaker.
//!
//! Closed → Open after `max_failures` consecutive failures. Open rejects
//! without invoking the wrapped call until `reset_timeout` has passed, then
//! admits trial calls in HalfOpen, one at a time: while a trial is in
//! flight other callers are rejected as if the breaker were open.
//! `half_open_max` consecutive successful trials close it again; any
//! HalfOpen failure reopens it.

use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

/// Tuning for one breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerConfig {
    pub max_failures: u32,
    pub reset_timeout: Duration,
    pub half_open_max: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            reset_timeout: Duration::from_secs(60),
            half_open_max: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by a breaker-wrapped call.
#[derive(Debug, thiserror::Error)]
pub enum BreakerError<E> {
    /// The breaker rejected the call; the wrapped function never ran.
    #[error("circuit breaker '{name}' is open")]
    Open { name: String },

    /// The wrapped function ran and failed.
    #[error("{0}")]
    Inner(E),
}

impl<E> BreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open { .. })
    }
}

/// Point-in-time view of a breaker, for status endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerStats {
    pub name: String,
    pub state: BreakerState,
    pub consecutive_failures: u32,
    pub half_open_successes: u32,
    pub total_requests: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    pub total_rejections: u64,
}

/// Called with `(breaker name, from, to)` on every state change.
pub type TransitionCallback = Arc<dyn Fn(&str, BreakerState, BreakerState) + Send + Sync>;

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    half_open_successes: u32,
    /// Generation of the HalfOpen trial in flight, if any
    trial: Option<u64>,
    trial_generation: u64,
    total_requests: u64,
    total_successes: u64,
    total_failures: u64,
    total_rejections: u64,
}

type Transition = Option<(BreakerState, BreakerState)>;

pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
    on_transition: Option<TransitionCallback>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                last_failure: None,
                half_open_successes: 0,
                trial: None,
                trial_generation: 0,
                total_requests: 0,
                total_successes: 0,
                total_failures: 0,
                total_rejections: 0,
            }),
            on_transition: None,
        }
    }

    pub fn with_callback(mut self, callback: TransitionCallback) -> Self {
        self.on_transition = Some(callback);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> BreakerConfig {
        self.config
    }

    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    pub fn stats(&self) -> BreakerStats {
        let inner = self.lock();
        BreakerStats {
            name: self.name.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            half_open_successes: inner.half_open_successes,
            total_requests: inner.total_requests,
            total_successes: inner.total_successes,
            total_failures: inner.total_failures,
            total_rejections: inner.total_rejections,
        }
    }

    /// Run `f` through the breaker. Every error counts as a failure.
    pub async fn call<T, E, F, Fut>(&self, f: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.call_classified(f, |_| true).await
    }

    /// Run `f` through the breaker, counting only errors for which
    /// `is_failure` holds. Other errors are passed back without touching
    /// the failure counters.
    pub async fn call_classified<T, E, F, Fut, C>(
        &self,
        f: F,
        is_failure: C,
    ) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: FnOnce(&E) -> bool,
    {
        let _permit = self.acquire::<E>()?;
        match f().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                if is_failure(&err) {
                    self.record_failure();
                }
                Err(BreakerError::Inner(err))
            }
        }
    }

    /// Like [`call`](Self::call), but a rejection or failure is handed to
    /// `fallback`, whose value is returned instead.
    pub async fn call_with_fallback<T, E, F, Fut, G, GFut>(&self, f: F, fallback: G) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        G: FnOnce(BreakerError<E>) -> GFut,
        GFut: Future<Output = T>,
    {
        match self.call(f).await {
            Ok(value) => value,
            Err(err) => fallback(err).await,
        }
    }

    /// Admit or reject one call.
    ///
    /// The caller reports the outcome with [`record_success`] or
    /// [`record_failure`] while holding the permit. A HalfOpen trial slot
    /// is released when the permit is dropped, so an abandoned call does
    /// not wedge the breaker.
    ///
    /// [`record_success`]: Self::record_success
    /// [`record_failure`]: Self::record_failure
    pub fn acquire<E>(&self) -> Result<Permit<'_>, BreakerError<E>> {
        let (admitted, transition) = {
            let mut inner = self.lock();
            inner.total_requests += 1;
            match inner.state {
                BreakerState::Closed => (Some(None), None),
                BreakerState::HalfOpen if inner.trial.is_none() => {
                    (Some(Some(Self::start_trial(&mut inner))), None)
                }
                BreakerState::HalfOpen => {
                    inner.total_rejections += 1;
                    (None, None)
                }
                BreakerState::Open => {
                    let expired = inner
                        .last_failure
                        .is_none_or(|at| at.elapsed() > self.config.reset_timeout);
                    if expired {
                        inner.half_open_successes = 0;
                        let trial = Self::start_trial(&mut inner);
                        (
                            Some(Some(trial)),
                            Self::transition(&mut inner, BreakerState::HalfOpen),
                        )
                    } else {
                        inner.total_rejections += 1;
                        (None, None)
                    }
                }
            }
        };
        self.notify(transition);
        match admitted {
            Some(trial) => Ok(Permit {
                breaker: self,
                trial,
            }),
            None => Err(BreakerError::Open {
                name: self.name.clone(),
            }),
        }
    }

    fn start_trial(inner: &mut MutexGuard<'_, Inner>) -> u64 {
        inner.trial_generation += 1;
        inner.trial = Some(inner.trial_generation);
        inner.trial_generation
    }

    fn end_trial(&self, generation: u64) {
        let mut inner = self.lock();
        if inner.trial == Some(generation) {
            inner.trial = None;
        }
    }

    pub fn record_success(&self) {
        let transition = {
            let mut inner = self.lock();
            inner.total_successes += 1;
            match inner.state {
                BreakerState::Closed => {
                    inner.consecutive_failures = 0;
                    None
                }
                BreakerState::HalfOpen => {
                    inner.half_open_successes += 1;
                    if inner.half_open_successes >= self.config.half_open_max {
                        inner.consecutive_failures = 0;
                        inner.half_open_successes = 0;
                        inner.last_failure = None;
                        Self::transition(&mut inner, BreakerState::Closed)
                    } else {
                        None
                    }
                }
                // A call admitted before the breaker tripped finished late
                BreakerState::Open => None,
            }
        };
        self.notify(transition);
    }

    pub fn record_failure(&self) {
        let transition = {
            let mut inner = self.lock();
            inner.total_failures += 1;
            inner.last_failure = Some(Instant::now());
            match inner.state {
                BreakerState::Closed => {
                    inner.consecutive_failures += 1;
                    if inner.consecutive_failures >= self.config.max_failures {
                        Self::transition(&mut inner, BreakerState::Open)
                    } else {
                        None
                    }
                }
                BreakerState::HalfOpen => {
                    inner.half_open_successes = 0;
                    Self::transition(&mut inner, BreakerState::Open)
                }
                BreakerState::Open => None,
            }
        };
        self.notify(transition);
    }

    fn transition(inner: &mut MutexGuard<'_, Inner>, to: BreakerState) -> Transition {
        let from = inner.state;
        inner.state = to;
        (from != to).then_some((from, to))
    }

    // Callbacks run after the state lock is released.
    fn notify(&self, transition: Transition) {
        if let (Some((from, to)), Some(callback)) = (transition, &self.on_transition) {
            callback(&self.name, from, to);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Admission granted by [`CircuitBreaker::acquire`].
#[must_use = "dropping the permit ends the admitted call"]
pub struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    trial: Option<u64>,
}

impl Permit<'_> {
    /// Whether this call is a HalfOpen trial.
    pub fn is_trial(&self) -> bool {
        self.trial.is_some()
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if let Some(generation) = self.trial {
            self.breaker.end_trial(generation);
        }
    }
}

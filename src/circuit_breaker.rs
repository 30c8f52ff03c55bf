//! Circuit breaker guarding a single outbound dependency.
//!
//! ```text
//! Closed   --ready_to_trip(counts)------>  Open
//! Open     --timeout elapsed------------>  HalfOpen
//! HalfOpen --max_requests successes----->  Closed
//! HalfOpen --any failure---------------->  Open
//! ```
//!
//! Counts belong to a generation. A new generation starts on every state
//! change and whenever the Closed rolling window expires; outcomes of calls
//! admitted in an older generation are dropped when they complete.

use parking_lot::Mutex;
use serde::Serialize;
use std::{fmt, future::Future, sync::Arc, time::Duration};
use tokio::time::Instant;
use tracing::{debug, info, warn};

const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request outcomes observed in the current generation.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Counts {
    pub requests: u32,
    pub total_successes: u32,
    pub total_failures: u32,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
}

impl Counts {
    fn on_request(&mut self) {
        self.requests = self.requests.saturating_add(1);
    }

    fn on_success(&mut self) {
        self.total_successes = self.total_successes.saturating_add(1);
        self.consecutive_successes = self.consecutive_successes.saturating_add(1);
        self.consecutive_failures = 0;
    }

    fn on_failure(&mut self) {
        self.total_failures = self.total_failures.saturating_add(1);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_successes = 0;
    }

    pub fn failure_ratio(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.total_failures as f64 / self.requests as f64
        }
    }
}

pub type TripFn = Arc<dyn Fn(&Counts) -> bool + Send + Sync>;
/// Called as `(name, from, to)` on the thread whose call caused the
/// transition, after the breaker lock is released. Keep it cheap: the
/// triggering caller does not get its result until the observer returns.
/// Hand the event to a channel if real work is needed.
pub type StateObserver = Arc<dyn Fn(&str, CircuitState, CircuitState) + Send + Sync>;

/// Failure-ratio trip rule with a minimum sample size.
///
/// `min_requests` below 2 is raised to 2 so that one failed call can never
/// trip the breaker on its own.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TripPolicy {
    pub min_requests: u32,
    pub failure_ratio: f64,
}

impl Default for TripPolicy {
    fn default() -> Self {
        Self { min_requests: 3, failure_ratio: 0.6 }
    }
}

impl TripPolicy {
    pub fn should_trip(&self, counts: &Counts) -> bool {
        counts.requests >= self.min_requests.max(2) && counts.failure_ratio() >= self.failure_ratio
    }

    pub fn into_trip_fn(self) -> TripFn {
        Arc::new(move |counts: &Counts| self.should_trip(counts))
    }
}

/// Construction-time settings. Immutable once handed to [`CircuitBreaker::new`].
#[derive(Clone)]
pub struct BreakerSettings {
    pub name: String,
    /// Probes admitted per Half-Open period, and successes needed to close.
    pub max_requests: u32,
    /// Closed-state rolling window. Zero keeps counts until the next transition.
    pub interval: Duration,
    /// Time spent Open before probing.
    pub timeout: Duration,
    pub ready_to_trip: TripFn,
    pub on_state_change: Option<StateObserver>,
}

impl BreakerSettings {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_requests: 1,
            interval: Duration::ZERO,
            timeout: DEFAULT_OPEN_TIMEOUT,
            ready_to_trip: Arc::new(|counts: &Counts| counts.consecutive_failures > 5),
            on_state_change: None,
        }
    }

    pub fn max_requests(mut self, n: u32) -> Self {
        self.max_requests = n;
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn trip_policy(mut self, policy: TripPolicy) -> Self {
        self.ready_to_trip = policy.into_trip_fn();
        self
    }

    pub fn ready_to_trip<F>(mut self, f: F) -> Self
    where
        F: Fn(&Counts) -> bool + Send + Sync + 'static,
    {
        self.ready_to_trip = Arc::new(f);
        self
    }

    /// See [`StateObserver`] for when and where `f` runs.
    pub fn on_state_change<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, CircuitState, CircuitState) + Send + Sync + 'static,
    {
        self.on_state_change = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for BreakerSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BreakerSettings")
            .field("name", &self.name)
            .field("max_requests", &self.max_requests)
            .field("interval", &self.interval)
            .field("timeout", &self.timeout)
            .field("on_state_change", &self.on_state_change.is_some())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BreakerError<E> {
    /// Admission denied; the work was never started.
    #[error("circuit breaker '{name}' is open")]
    Open { name: String },
    /// The work ran and returned an error.
    #[error("guarded call failed: {0}")]
    Inner(E),
}

impl<E> BreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, BreakerError::Open { .. })
    }

    pub fn into_inner(self) -> Option<E> {
        match self {
            BreakerError::Inner(e) => Some(e),
            BreakerError::Open { .. } => None,
        }
    }
}

/// Point-in-time view for status endpoints.
#[derive(Clone, Debug, Serialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub counts: Counts,
    pub max_requests: u32,
    /// Milliseconds until an Open breaker starts probing.
    pub retry_in_ms: Option<u64>,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    generation: u64,
    counts: Counts,
    expiry: Option<Instant>,
}

type Transition = (CircuitState, CircuitState);

pub struct CircuitBreaker {
    name: String,
    max_requests: u32,
    interval: Duration,
    timeout: Duration,
    ready_to_trip: TripFn,
    on_state_change: Option<StateObserver>,
    inner: Mutex<Inner>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("max_requests", &self.max_requests)
            .field("interval", &self.interval)
            .field("timeout", &self.timeout)
            .field("inner", &*self.inner.lock())
            .finish_non_exhaustive()
    }
}

impl CircuitBreaker {
    pub fn new(settings: BreakerSettings) -> Self {
        let timeout = if settings.timeout.is_zero() {
            warn!(
                breaker = %settings.name,
                timeout_ms = DEFAULT_OPEN_TIMEOUT.as_millis() as u64,
                "zero open timeout requested, using default"
            );
            DEFAULT_OPEN_TIMEOUT
        } else {
            settings.timeout
        };
        let breaker = Self {
            name: settings.name,
            max_requests: settings.max_requests.max(1),
            interval: settings.interval,
            timeout,
            ready_to_trip: settings.ready_to_trip,
            on_state_change: settings.on_state_change,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                generation: 0,
                counts: Counts::default(),
                expiry: None,
            }),
        };
        {
            let mut inner = breaker.inner.lock();
            breaker.new_generation(&mut inner, Instant::now());
        }
        info!(
            breaker = %breaker.name,
            max_requests = breaker.max_requests,
            interval_ms = breaker.interval.as_millis() as u64,
            timeout_ms = breaker.timeout.as_millis() as u64,
            "circuit breaker initialized"
        );
        breaker
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        let mut fired = Vec::new();
        let state = {
            let mut inner = self.inner.lock();
            self.refresh(&mut inner, Instant::now(), &mut fired);
            inner.state
        };
        self.notify(&fired);
        state
    }

    pub fn counts(&self) -> Counts {
        let mut fired = Vec::new();
        let counts = {
            let mut inner = self.inner.lock();
            self.refresh(&mut inner, Instant::now(), &mut fired);
            inner.counts
        };
        self.notify(&fired);
        counts
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let mut fired = Vec::new();
        let snapshot = {
            let mut inner = self.inner.lock();
            let now = Instant::now();
            self.refresh(&mut inner, now, &mut fired);
            let retry_in_ms = match (inner.state, inner.expiry) {
                (CircuitState::Open, Some(exp)) => Some(exp.saturating_duration_since(now).as_millis() as u64),
                _ => None,
            };
            BreakerSnapshot {
                name: self.name.clone(),
                state: inner.state,
                counts: inner.counts,
                max_requests: self.max_requests,
                retry_in_ms,
            }
        };
        self.notify(&fired);
        snapshot
    }

    /// Runs blocking `work` if the breaker admits it.
    pub fn execute<T, E, F>(&self, work: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let Some(ticket) = self.admit() else {
            return Err(self.rejected());
        };
        let result = work();
        ticket.settle(result.is_ok());
        result.map_err(BreakerError::Inner)
    }

    /// Async flavour of [`execute`](Self::execute). A call dropped before it
    /// completes is recorded as a failure.
    pub async fn call<T, E, F, Fut>(&self, work: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let Some(ticket) = self.admit() else {
            return Err(self.rejected());
        };
        let result = work().await;
        ticket.settle(result.is_ok());
        result.map_err(BreakerError::Inner)
    }

    fn rejected<E>(&self) -> BreakerError<E> {
        debug!(breaker = %self.name, "call short-circuited");
        BreakerError::Open { name: self.name.clone() }
    }

    fn admit(&self) -> Option<Ticket<'_>> {
        let mut fired = Vec::new();
        let generation = {
            let mut inner = self.inner.lock();
            self.refresh(&mut inner, Instant::now(), &mut fired);
            match inner.state {
                CircuitState::Open => None,
                CircuitState::HalfOpen if inner.counts.requests >= self.max_requests => None,
                CircuitState::Closed | CircuitState::HalfOpen => {
                    inner.counts.on_request();
                    Some(inner.generation)
                }
            }
        };
        self.notify(&fired);
        generation.map(|generation| Ticket { breaker: self, generation, settled: false })
    }

    fn record(&self, generation: u64, success: bool) {
        let mut fired = Vec::new();
        {
            let mut inner = self.inner.lock();
            let now = Instant::now();
            self.refresh(&mut inner, now, &mut fired);
            if inner.generation != generation {
                debug!(breaker = %self.name, success, "discarding outcome from a previous generation");
            } else if success {
                self.on_success(&mut inner, now, &mut fired);
            } else {
                self.on_failure(&mut inner, now, &mut fired);
            }
        }
        self.notify(&fired);
    }

    fn on_success(&self, inner: &mut Inner, now: Instant, fired: &mut Vec<Transition>) {
        match inner.state {
            CircuitState::Closed => {
                inner.counts.on_success();
                if (self.ready_to_trip)(&inner.counts) {
                    self.set_state(inner, CircuitState::Open, now, fired);
                }
            }
            CircuitState::HalfOpen => {
                inner.counts.on_success();
                if inner.counts.consecutive_successes >= self.max_requests {
                    self.set_state(inner, CircuitState::Closed, now, fired);
                }
            }
            CircuitState::Open => {}
        }
    }

    fn on_failure(&self, inner: &mut Inner, now: Instant, fired: &mut Vec<Transition>) {
        match inner.state {
            CircuitState::Closed => {
                inner.counts.on_failure();
                if (self.ready_to_trip)(&inner.counts) {
                    self.set_state(inner, CircuitState::Open, now, fired);
                }
            }
            CircuitState::HalfOpen => self.set_state(inner, CircuitState::Open, now, fired),
            CircuitState::Open => {}
        }
    }

    /// Applies time-driven changes: window expiry while Closed, probing once
    /// the open timeout has passed.
    fn refresh(&self, inner: &mut Inner, now: Instant, fired: &mut Vec<Transition>) {
        let expired = inner.expiry.is_some_and(|exp| exp <= now);
        match inner.state {
            CircuitState::Closed if expired => self.new_generation(inner, now),
            CircuitState::Open if expired => self.set_state(inner, CircuitState::HalfOpen, now, fired),
            _ => {}
        }
    }

    fn set_state(&self, inner: &mut Inner, to: CircuitState, now: Instant, fired: &mut Vec<Transition>) {
        if inner.state == to {
            return;
        }
        let from = inner.state;
        inner.state = to;
        self.new_generation(inner, now);
        fired.push((from, to));
    }

    fn new_generation(&self, inner: &mut Inner, now: Instant) {
        inner.generation = inner.generation.wrapping_add(1);
        inner.counts = Counts::default();
        inner.expiry = match inner.state {
            CircuitState::Closed => (!self.interval.is_zero()).then(|| now + self.interval),
            CircuitState::Open => Some(now + self.timeout),
            CircuitState::HalfOpen => None,
        };
    }

    // Called with the lock released, on the caller's thread.
    fn notify(&self, fired: &[Transition]) {
        for &(from, to) in fired {
            info!(breaker = %self.name, from = %from, to = %to, "circuit breaker state changed");
            if let Some(observer) = &self.on_state_change {
                observer(&self.name, from, to);
            }
        }
    }
}

/// Admission for one call. Settles as a failure if dropped unsettled.
struct Ticket<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    settled: bool,
}

impl Ticket<'_> {
    fn settle(mut self, success: bool) {
        self.settled = true;
        self.breaker.record(self.generation, success);
    }
}

impl Drop for Ticket<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.record(self.generation, false);
        }
    }
}

use super::guard::Outcome;
use super::window::RollingWindow;
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

const DEFAULT_TIMEOUT_MS: u64 = 1_000;
const DEFAULT_MAX_CONCURRENT: u32 = 10;
const DEFAULT_VOLUME_THRESHOLD: u64 = 20;
const DEFAULT_SLEEP_WINDOW_MS: u64 = 5_000;
const DEFAULT_ERROR_PERCENT: u32 = 50;
const DEFAULT_ROLLING_WINDOW_MS: u64 = 10_000;
const WINDOW_BUCKETS: usize = 10;

/// Breaker tuning.
///
/// A zero numeric field means "use the default": timeout 1000 ms, 10 concurrent
/// calls, volume threshold 20, sleep window 5000 ms, 50 percent errors and a
/// 10 s statistics window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    pub name: String,
    #[serde(alias = "timeout")]
    pub timeout_ms: u64,
    #[serde(alias = "max_concurrent_requests")]
    pub max_concurrent: u32,
    #[serde(alias = "request_volume_threshold")]
    pub volume_threshold: u64,
    #[serde(alias = "sleep_window")]
    pub sleep_window_ms: u64,
    pub error_percent_threshold: u32,
    pub rolling_window_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            volume_threshold: DEFAULT_VOLUME_THRESHOLD,
            sleep_window_ms: DEFAULT_SLEEP_WINDOW_MS,
            error_percent_threshold: DEFAULT_ERROR_PERCENT,
            rolling_window_ms: DEFAULT_ROLLING_WINDOW_MS,
        }
    }
}

impl BreakerConfig {
    /// Create a config with default tuning.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_max_concurrent(mut self, limit: u32) -> Self {
        self.max_concurrent = limit;
        self
    }

    pub fn with_volume_threshold(mut self, volume: u64) -> Self {
        self.volume_threshold = volume;
        self
    }

    pub fn with_sleep_window(mut self, window: Duration) -> Self {
        self.sleep_window_ms = window.as_millis() as u64;
        self
    }

    pub fn with_error_percent_threshold(mut self, percent: u32) -> Self {
        self.error_percent_threshold = percent;
        self
    }

    /// Length of the window the error percentage is computed over.
    pub fn with_rolling_window(mut self, window: Duration) -> Self {
        self.rolling_window_ms = window.as_millis() as u64;
        self
    }

    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();
        if self.name.trim().is_empty() {
            problems.push("name: breaker name not defined".to_string());
        }
        if self.error_percent_threshold > 100 {
            problems.push(format!(
                "error_percent_threshold: {} is not within 0..=100",
                self.error_percent_threshold
            ));
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::configuration_with_context(
                "invalid circuit breaker config",
                ErrorContext::new()
                    .with_field_path("breaker")
                    .with_details(problems.join("; "))
                    .with_source("breaker_config"),
            ))
        }
    }

    /// Copy with zero fields replaced by their defaults.
    pub fn resolved(&self) -> Self {
        fn or<T: PartialEq + Default>(value: T, default: T) -> T {
            if value == T::default() {
                default
            } else {
                value
            }
        }
        Self {
            name: self.name.clone(),
            timeout_ms: or(self.timeout_ms, DEFAULT_TIMEOUT_MS),
            max_concurrent: or(self.max_concurrent, DEFAULT_MAX_CONCURRENT),
            volume_threshold: or(self.volume_threshold, DEFAULT_VOLUME_THRESHOLD),
            sleep_window_ms: or(self.sleep_window_ms, DEFAULT_SLEEP_WINDOW_MS),
            error_percent_threshold: or(self.error_percent_threshold, DEFAULT_ERROR_PERCENT),
            rolling_window_ms: or(self.rolling_window_ms, DEFAULT_ROLLING_WINDOW_MS),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Why a guarded call did not run to completion.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BreakerError {
    #[error("circuit '{name}' is open")]
    Open { name: String },

    #[error("circuit '{name}' reached its limit of {limit} concurrent calls")]
    MaxConcurrency { name: String, limit: u32 },

    #[error("circuit '{name}' call timed out after {timeout_ms}ms")]
    Timeout { name: String, timeout_ms: u64 },

    #[error("circuit '{name}' call cancelled")]
    Cancelled { name: String },
}

impl BreakerError {
    /// True when the call was refused admission and never started.
    pub fn is_denial(&self) -> bool {
        matches!(
            self,
            BreakerError::Open { .. } | BreakerError::MaxConcurrency { .. }
        )
    }
}

/// Admission granted by [`Breaker::acquire`]; hand it back through
/// [`Breaker::record`]. Dropping it releases the concurrency slot. The guard
/// functions record a ticket dropped mid-call as a failure.
#[derive(Debug)]
pub struct Ticket {
    trial: bool,
    _permit: Option<OwnedSemaphorePermit>,
}

impl Ticket {
    pub fn new(trial: bool, permit: Option<OwnedSemaphorePermit>) -> Self {
        Self {
            trial,
            _permit: permit,
        }
    }

    /// Whether this call is the single half-open trial.
    pub fn is_trial(&self) -> bool {
        self.trial
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: BreakerState,
    pub total: u64,
    pub failures: u64,
    pub error_percent: u64,
    pub in_flight: u32,
    /// Remaining open time in ms, if currently open.
    pub open_remaining_ms: Option<u64>,
}

/// Admission control plus outcome bookkeeping.
///
/// [`guard::call`](super::guard::call) drives an implementation; the
/// dispatcher only needs `is_open` and the guard.
pub trait Breaker: Send + Sync {
    fn name(&self) -> &str;

    /// Upper bound for one guarded run.
    fn timeout(&self) -> Duration;

    /// Whether calls are currently being denied. Never changes state.
    fn is_open(&self) -> bool;

    fn acquire(&self) -> std::result::Result<Ticket, BreakerError>;

    fn record(&self, ticket: Ticket, outcome: Outcome);

    fn snapshot(&self) -> BreakerSnapshot;

    fn from_config(config: BreakerConfig) -> Result<Self>
    where
        Self: Sized;
}

#[derive(Debug)]
struct State {
    state: BreakerState,
    window: RollingWindow,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

/// Rolling-window circuit breaker.
///
/// - Closed: calls pass, outcomes are counted per bucket
/// - Open: calls fail fast until the sleep window elapses
/// - Half-open: one trial call decides between Closed and Open
pub struct CircuitBreaker {
    cfg: BreakerConfig,
    state: Mutex<State>,
    permits: Arc<Semaphore>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.cfg.name)
            .field("state", &self.state())
            .finish()
    }
}

impl CircuitBreaker {
    pub fn new(cfg: BreakerConfig) -> Result<Self> {
        cfg.validate()?;
        let cfg = cfg.resolved();
        let window = RollingWindow::new(
            Duration::from_millis(cfg.rolling_window_ms),
            WINDOW_BUCKETS,
        );
        Ok(Self {
            permits: Arc::new(Semaphore::new(cfg.max_concurrent as usize)),
            state: Mutex::new(State {
                state: BreakerState::Closed,
                window,
                opened_at: None,
                trial_in_flight: false,
            }),
            cfg,
        })
    }

    /// Effective configuration, defaults applied.
    pub fn config(&self) -> &BreakerConfig {
        &self.cfg
    }

    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    fn sleep_window(&self) -> Duration {
        Duration::from_millis(self.cfg.sleep_window_ms)
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn open_error(&self) -> BreakerError {
        BreakerError::Open {
            name: self.cfg.name.clone(),
        }
    }

    fn trip(&self, st: &mut State, now: Instant) {
        st.state = BreakerState::Open;
        st.opened_at = Some(now);
        st.trial_in_flight = false;
    }

    pub(crate) fn is_open_at(&self, now: Instant) -> bool {
        let st = self.lock();
        match st.state {
            BreakerState::Closed => false,
            BreakerState::Open => st
                .opened_at
                .map(|at| now.saturating_duration_since(at) < self.sleep_window())
                .unwrap_or(true),
            BreakerState::HalfOpen => st.trial_in_flight,
        }
    }

    pub(crate) fn acquire_at(&self, now: Instant) -> std::result::Result<Ticket, BreakerError> {
        let mut st = self.lock();

        if st.state == BreakerState::Open {
            let elapsed = st
                .opened_at
                .map(|at| now.saturating_duration_since(at))
                .unwrap_or_default();
            if elapsed < self.sleep_window() {
                return Err(self.open_error());
            }
            st.state = BreakerState::HalfOpen;
            st.trial_in_flight = false;
            tracing::info!(breaker = %self.cfg.name, "circuit half-open, admitting trial call");
        }

        let trial = match st.state {
            BreakerState::HalfOpen if st.trial_in_flight => return Err(self.open_error()),
            BreakerState::HalfOpen => true,
            _ => false,
        };

        let permit = Arc::clone(&self.permits).try_acquire_owned().map_err(|_| {
            BreakerError::MaxConcurrency {
                name: self.cfg.name.clone(),
                limit: self.cfg.max_concurrent,
            }
        })?;

        if trial {
            st.trial_in_flight = true;
        }
        Ok(Ticket::new(trial, Some(permit)))
    }

    pub(crate) fn record_at(&self, ticket: Ticket, outcome: Outcome, now: Instant) {
        let mut st = self.lock();

        if ticket.trial {
            if st.state != BreakerState::HalfOpen {
                return;
            }
            match outcome {
                Outcome::Success => {
                    st.state = BreakerState::Closed;
                    st.opened_at = None;
                    st.trial_in_flight = false;
                    st.window.reset(now);
                    tracing::info!(breaker = %self.cfg.name, "trial call succeeded, circuit closed");
                }
                Outcome::Failure => {
                    self.trip(&mut st, now);
                    tracing::warn!(breaker = %self.cfg.name, "trial call failed, circuit re-opened");
                }
            }
            return;
        }

        // Outcomes of calls admitted before a trip do not count toward the next cycle.
        if st.state != BreakerState::Closed {
            return;
        }

        st.window.record(now, outcome);
        let counts = st.window.counts(now);
        if counts.total >= self.cfg.volume_threshold
            && counts.failures * 100 >= self.cfg.error_percent_threshold as u64 * counts.total
        {
            self.trip(&mut st, now);
            tracing::warn!(
                breaker = %self.cfg.name,
                total = counts.total,
                failures = counts.failures,
                error_percent = counts.error_percent(),
                "circuit opened"
            );
        }
    }

    pub(crate) fn snapshot_at(&self, now: Instant) -> BreakerSnapshot {
        let st = self.lock();
        let counts = st.window.counts(now);
        let open_remaining_ms = match (st.state, st.opened_at) {
            (BreakerState::Open, Some(at)) => {
                let until = at + self.sleep_window();
                if until > now {
                    Some((until - now).as_millis() as u64)
                } else {
                    None
                }
            }
            _ => None,
        };
        BreakerSnapshot {
            name: self.cfg.name.clone(),
            state: st.state,
            total: counts.total,
            failures: counts.failures,
            error_percent: counts.error_percent(),
            in_flight: self
                .cfg
                .max_concurrent
                .saturating_sub(self.permits.available_permits() as u32),
            open_remaining_ms,
        }
    }
}

impl Breaker for CircuitBreaker {
    fn name(&self) -> &str {
        &self.cfg.name
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.cfg.timeout_ms)
    }

    fn is_open(&self) -> bool {
        self.is_open_at(Instant::now())
    }

    fn acquire(&self) -> std::result::Result<Ticket, BreakerError> {
        self.acquire_at(Instant::now())
    }

    fn record(&self, ticket: Ticket, outcome: Outcome) {
        self.record_at(ticket, outcome, Instant::now())
    }

    fn snapshot(&self) -> BreakerSnapshot {
        self.snapshot_at(Instant::now())
    }

    fn from_config(config: BreakerConfig) -> Result<Self> {
        Self::new(config)
    }
}

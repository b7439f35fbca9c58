//! Circuit Breaker
//!
//! One breaker is shared by every caller of an adapter instance. All state
//! lives in atomics and every transition is a compare-and-swap, so concurrent
//! callers never observe a half-applied transition.
//!
//! ```text
//! +--------+   N consecutive failures   +------+    cooldown elapsed    +-----------+
//! | Closed | -------------------------> | Open | ---------------------> | Half-Open |
//! +--------+                            +------+   (exactly one trial)  +-----------+
//!     ^                                     ^                                 |
//!     |            trial succeeds           |        trial fails              |
//!     +-------------------------------------+---------------------------------+
//! ```

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;

use super::error::ServiceError;

const CLOSED: u32 = 0;
const OPEN: u32 = 1;
const HALF_OPEN: u32 = 2;

/// Circuit breaker state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CircuitState {
    /// Normal operation, calls allowed
    #[default]
    Closed,

    /// Tripped, calls rejected without a network attempt
    Open,

    /// One trial call is in flight
    HalfOpen,
}

/// Breaker thresholds
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Consecutive failures that trip the breaker
    pub failure_threshold: u32,

    /// How long the breaker stays open before allowing a trial
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

/// Permission to make one call, returned by [`CircuitBreaker::try_acquire`]
///
/// Settle it with [`Permit::success`] or [`Permit::failure`]. A permit that
/// is dropped unsettled (the call was abandoned or failed for a reason that
/// says nothing about the service) leaves the failure count unchanged; an
/// unsettled trial puts the breaker back to Open so the next caller may try.
///
/// Only the trial permit can move the breaker out of Half-Open. Permits
/// granted while Closed that finish after the breaker tripped update the
/// failure count but never close it.
#[must_use = "an unsettled permit records nothing"]
#[derive(Debug)]
pub struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl Permit<'_> {
    /// Whether this permit is the half-open trial
    #[must_use]
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    /// Record a successful call
    pub fn success(mut self) {
        self.settled = true;
        self.breaker.record_success(self.trial);
    }

    /// Record a failed call
    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.record_failure(self.trial);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.trial {
            self.breaker.abandon_trial();
        }
    }
}

/// Atomic circuit breaker for one adapter
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    state: AtomicU32,
    consecutive_failures: AtomicU32,
    /// Millis since `epoch` (+1) when the breaker last opened; 0 = never
    opened_at: AtomicU64,
    epoch: Instant,
}

impl CircuitBreaker {
    /// Create a closed breaker
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: AtomicU32::new(CLOSED),
            consecutive_failures: AtomicU32::new(0),
            opened_at: AtomicU64::new(0),
            epoch: Instant::now(),
        }
    }

    /// Adapter name used in logs and errors
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> CircuitState {
        match self.state.load(Ordering::Acquire) {
            OPEN => CircuitState::Open,
            HALF_OPEN => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }

    /// Consecutive failures since the last success
    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    /// Ask to make a call
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::CircuitOpen`] while the breaker is open and
    /// cooling down, or while another caller holds the half-open trial.
    pub fn try_acquire(&self) -> Result<Permit<'_>, ServiceError> {
        match self.state.load(Ordering::Acquire) {
            CLOSED => Ok(self.permit(false)),
            OPEN if self.cooldown_elapsed() => {
                if self
                    .state
                    .compare_exchange(OPEN, HALF_OPEN, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    tracing::info!(service = %self.name, "Circuit breaker half-open, allowing trial call");
                    Ok(self.permit(true))
                } else {
                    Err(self.open_error())
                }
            }
            _ => Err(self.open_error()),
        }
    }

    fn permit(&self, trial: bool) -> Permit<'_> {
        Permit {
            breaker: self,
            trial,
            settled: false,
        }
    }

    fn open_error(&self) -> ServiceError {
        ServiceError::CircuitOpen {
            service: self.name.clone(),
        }
    }

    fn cooldown_elapsed(&self) -> bool {
        let opened_at = self.opened_at.load(Ordering::Acquire);
        let cooldown_ms = u64::try_from(self.config.cooldown.as_millis()).unwrap_or(u64::MAX);
        self.now_millis().saturating_sub(opened_at) >= cooldown_ms
    }

    fn record_success(&self, trial: bool) {
        if trial {
            self.consecutive_failures.store(0, Ordering::Release);
            if self
                .state
                .compare_exchange(HALF_OPEN, CLOSED, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                tracing::info!(service = %self.name, "Circuit breaker closed - service recovered");
            }
            return;
        }

        self.consecutive_failures.store(0, Ordering::Release);
        if self.state.load(Ordering::Acquire) != CLOSED {
            tracing::debug!(service = %self.name, "Late success from before the breaker opened, state unchanged");
        }
    }

    fn record_failure(&self, trial: bool) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;

        match self.state.load(Ordering::Acquire) {
            HALF_OPEN if trial => {
                self.opened_at.store(self.now_millis(), Ordering::Release);
                if self
                    .state
                    .compare_exchange(HALF_OPEN, OPEN, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    tracing::warn!(service = %self.name, "Trial call failed, circuit breaker reopened");
                }
            }
            CLOSED if failures >= self.config.failure_threshold => {
                self.opened_at.store(self.now_millis(), Ordering::Release);
                if self
                    .state
                    .compare_exchange(CLOSED, OPEN, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    tracing::warn!(
                        service = %self.name,
                        consecutive_failures = failures,
                        cooldown_ms = self.config.cooldown.as_millis(),
                        "Circuit breaker opened"
                    );
                }
            }
            _ => {}
        }
    }

    fn abandon_trial(&self) {
        if self
            .state
            .compare_exchange(HALF_OPEN, OPEN, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            tracing::debug!(service = %self.name, "Trial call abandoned, breaker back to open");
        }
    }

    /// Force the breaker closed and clear counters
    pub fn reset(&self) {
        self.consecutive_failures.store(0, Ordering::Release);
        self.opened_at.store(0, Ordering::Release);
        self.state.store(CLOSED, Ordering::Release);
    }

    /// Remaining cooldown while open
    #[must_use]
    pub fn remaining_cooldown(&self) -> Option<Duration> {
        if self.state() != CircuitState::Open {
            return None;
        }
        let elapsed = self
            .now_millis()
            .saturating_sub(self.opened_at.load(Ordering::Acquire));
        Some(
            self.config
                .cooldown
                .saturating_sub(Duration::from_millis(elapsed)),
        )
    }

    /// Point-in-time view for status reporting
    #[must_use]
    pub fn snapshot(&self) -> BreakerSnapshot {
        BreakerSnapshot {
            service: self.name.clone(),
            state: self.state(),
            consecutive_failures: self.consecutive_failures(),
            remaining_cooldown: self.remaining_cooldown(),
        }
    }

    /// Returns at least 1 so 0 can mean "never opened"
    fn now_millis(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX - 1) + 1
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("consecutive_failures", &self.consecutive_failures())
            .finish()
    }
}

/// Immutable snapshot of a breaker
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BreakerSnapshot {
    /// Adapter name
    pub service: String,
    /// Breaker state
    pub state: CircuitState,
    /// Consecutive failures since last success
    pub consecutive_failures: u32,
    /// Time until a trial is allowed, while open
    pub remaining_cooldown: Option<Duration>,
}

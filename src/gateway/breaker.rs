//! Per-destination circuit breaker.
//!
//! Closed → Open after `failure_threshold` consecutive failures inside the
//! rolling window. Open → HalfOpen once `reset_timeout_ms` has elapsed, which
//! admits exactly one trial call. The trial's outcome closes or reopens it.
//!
//! Time is passed in by the caller so the state machine stays synchronous.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    /// A failure streak older than this starts over.
    pub failure_window_ms: u64,
    pub reset_timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_window_ms: 60_000,
            reset_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        })
    }
}

/// Read-only copy of a breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub opened_at: Option<Instant>,
}

/// How a call was let through. Outcomes are only counted against the
/// breaker state that admitted them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    generation: u64,
    trial: bool,
}

impl Admission {
    /// Whether this is the single HalfOpen trial call.
    pub fn is_trial(&self) -> bool {
        self.trial
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: CircuitState,
    /// Bumped on every state transition.
    generation: u64,
    consecutive_failures: u32,
    streak_started_at: Option<Instant>,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: CircuitState::Closed,
            generation: 0,
            consecutive_failures: 0,
            streak_started_at: None,
            opened_at: None,
            trial_in_flight: false,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        CircuitSnapshot {
            state: self.state,
            consecutive_failures: self.consecutive_failures,
            opened_at: self.opened_at,
        }
    }

    /// Ask to place a call. `Err` carries the retry-after hint in ms.
    pub fn try_acquire(&mut self, now: Instant) -> Result<Admission, u64> {
        match self.state {
            CircuitState::Closed => Ok(self.admission(false)),
            CircuitState::Open => {
                let reopen_at = self.reopen_at();
                if now >= reopen_at {
                    self.transition(CircuitState::HalfOpen);
                    self.trial_in_flight = true;
                    tracing::info!("Circuit half-open, admitting trial call");
                    Ok(self.admission(true))
                } else {
                    Err(reopen_at.duration_since(now).as_millis() as u64)
                }
            }
            CircuitState::HalfOpen if self.trial_in_flight => Err(0),
            CircuitState::HalfOpen => {
                self.trial_in_flight = true;
                Ok(self.admission(true))
            }
        }
    }

    /// A success closes the circuit only when it is the current HalfOpen
    /// trial. In Closed it ends the failure streak. Outcomes admitted under an
    /// earlier state are ignored.
    pub fn record_success(&mut self, admission: Admission) {
        if !self.is_current(admission) {
            tracing::debug!(state = %self.state, "Ignoring stale success");
            return;
        }
        match self.state {
            CircuitState::HalfOpen => {
                tracing::info!("Trial call succeeded, circuit closed");
                self.transition(CircuitState::Closed);
                self.opened_at = None;
                self.trial_in_flight = false;
                self.reset_streak();
            }
            CircuitState::Closed => self.reset_streak(),
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&mut self, admission: Admission, now: Instant) {
        if !self.is_current(admission) {
            tracing::debug!(state = %self.state, "Ignoring stale failure");
            return;
        }
        match self.state {
            CircuitState::HalfOpen => {
                tracing::warn!("Trial call failed, circuit re-opened");
                self.open(now);
            }
            CircuitState::Open => {}
            CircuitState::Closed => {
                let window = Duration::from_millis(self.config.failure_window_ms);
                let expired = self
                    .streak_started_at
                    .is_some_and(|start| now.duration_since(start) > window);
                if expired || self.streak_started_at.is_none() {
                    self.consecutive_failures = 0;
                    self.streak_started_at = Some(now);
                }
                self.consecutive_failures += 1;
                if self.consecutive_failures >= self.config.failure_threshold {
                    tracing::warn!(
                        failures = self.consecutive_failures,
                        reset_timeout_ms = self.config.reset_timeout_ms,
                        "Circuit opened"
                    );
                    self.open(now);
                }
            }
        }
    }

    /// The trial call ended without an outcome (caller gave up).
    pub fn abandon_trial(&mut self, admission: Admission) {
        if self.state == CircuitState::HalfOpen && self.is_current(admission) {
            self.trial_in_flight = false;
        }
    }

    fn admission(&self, trial: bool) -> Admission {
        Admission {
            generation: self.generation,
            trial,
        }
    }

    fn is_current(&self, admission: Admission) -> bool {
        if admission.generation != self.generation {
            return false;
        }
        match self.state {
            CircuitState::Closed => !admission.trial,
            CircuitState::HalfOpen => admission.trial,
            CircuitState::Open => false,
        }
    }

    fn transition(&mut self, state: CircuitState) {
        self.state = state;
        self.generation += 1;
    }

    fn reset_streak(&mut self) {
        self.consecutive_failures = 0;
        self.streak_started_at = None;
    }

    fn open(&mut self, now: Instant) {
        self.transition(CircuitState::Open);
        self.opened_at = Some(now);
        self.trial_in_flight = false;
    }

    fn reopen_at(&self) -> Instant {
        let reset = Duration::from_millis(self.config.reset_timeout_ms);
        self.opened_at.map_or_else(Instant::now, |at| at + reset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 3,
            failure_window_ms: 10_000,
            reset_timeout_ms: 5_000,
        })
    }

    fn fail(b: &mut CircuitBreaker, now: Instant) {
        let admission = b.try_acquire(now).unwrap();
        b.record_failure(admission, now);
    }

    fn tripped(now: Instant) -> CircuitBreaker {
        let mut b = breaker();
        for _ in 0..3 {
            fail(&mut b, now);
        }
        assert_eq!(b.state(), CircuitState::Open);
        b
    }

    #[test]
    fn test_opens_after_threshold() {
        let now = Instant::now();
        let mut b = breaker();
        fail(&mut b, now);
        fail(&mut b, now);
        assert!(!b.try_acquire(now).unwrap().is_trial());
        fail(&mut b, now);
        assert_eq!(b.state(), CircuitState::Open);
        assert_eq!(b.try_acquire(now + Duration::from_secs(1)), Err(4_000));
    }

    #[test]
    fn test_success_resets_streak() {
        let now = Instant::now();
        let mut b = breaker();
        fail(&mut b, now);
        fail(&mut b, now);
        let admission = b.try_acquire(now).unwrap();
        b.record_success(admission);
        fail(&mut b, now);
        assert_eq!(b.snapshot().consecutive_failures, 1);
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[test]
    fn test_streak_outside_window_starts_over() {
        let now = Instant::now();
        let mut b = breaker();
        fail(&mut b, now);
        fail(&mut b, now);
        fail(&mut b, now + Duration::from_secs(11));
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.snapshot().consecutive_failures, 1);
    }

    #[test]
    fn test_half_open_admits_single_trial() {
        let now = Instant::now();
        let mut b = tripped(now);
        let later = now + Duration::from_secs(5);
        let trial = b.try_acquire(later).unwrap();
        assert!(trial.is_trial());
        assert_eq!(b.state(), CircuitState::HalfOpen);
        assert_eq!(b.try_acquire(later), Err(0));

        b.record_success(trial);
        assert_eq!(b.state(), CircuitState::Closed);
        assert!(!b.try_acquire(later).unwrap().is_trial());
    }

    #[test]
    fn test_failed_trial_reopens() {
        let now = Instant::now();
        let mut b = tripped(now);
        let later = now + Duration::from_secs(6);
        let trial = b.try_acquire(later).unwrap();
        b.record_failure(trial, later);
        assert_eq!(b.state(), CircuitState::Open);
        assert_eq!(b.snapshot().opened_at, Some(later));
        assert!(b.try_acquire(later + Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_abandoned_trial_frees_slot() {
        let now = Instant::now();
        let mut b = tripped(now);
        let later = now + Duration::from_secs(5);
        let trial = b.try_acquire(later).unwrap();
        b.abandon_trial(trial);
        assert!(b.try_acquire(later).unwrap().is_trial());
    }

    #[test]
    fn test_late_success_from_before_opening_is_ignored() {
        let now = Instant::now();
        let mut b = breaker();
        let slow = b.try_acquire(now).unwrap();
        for _ in 0..3 {
            fail(&mut b, now);
        }

        b.record_success(slow);
        assert_eq!(b.state(), CircuitState::Open);
        assert_eq!(b.try_acquire(now + Duration::from_secs(1)), Err(4_000));
    }

    #[test]
    fn test_only_the_trial_settles_half_open() {
        let now = Instant::now();
        let mut b = breaker();
        let slow = b.try_acquire(now).unwrap();
        for _ in 0..3 {
            fail(&mut b, now);
        }
        let later = now + Duration::from_secs(5);
        let trial = b.try_acquire(later).unwrap();

        b.record_success(slow);
        b.record_failure(slow, later);
        assert_eq!(b.state(), CircuitState::HalfOpen);
        b.abandon_trial(slow);
        assert_eq!(b.try_acquire(later), Err(0));

        b.record_success(trial);
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[test]
    fn test_outcome_from_earlier_closed_period_is_ignored() {
        let now = Instant::now();
        let mut b = breaker();
        let slow = b.try_acquire(now).unwrap();
        for _ in 0..3 {
            fail(&mut b, now);
        }
        let later = now + Duration::from_secs(5);
        let trial = b.try_acquire(later).unwrap();
        b.record_success(trial);

        b.record_failure(slow, later);
        assert_eq!(b.snapshot().consecutive_failures, 0);
    }
}

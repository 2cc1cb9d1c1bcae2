//! Per-target circuit breakers with a bounded registry
//!
//! Three states per target key. Closed counts failures inside a sliding
//! window; enough of them opens the circuit. An open circuit rejects calls
//! until the reset timeout, then admits a bounded number of half-open
//! trials. One trial success closes the circuit; one trial failure reopens
//! it.

use std::num::NonZeroUsize;

use lru::LruCache;
use tracing::{debug, info, warn};

use common::{CircuitOpenError, Clock, SharedClock};

/// Policy constants for a circuit breaker.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Failures within the window that trip the circuit.
    pub failure_threshold: usize,
    /// Sliding window over which failures are counted.
    pub failure_window_ms: u64,
    /// Time an open circuit waits before admitting trials.
    pub reset_timeout_ms: u64,
    /// Trial calls allowed while half-open.
    pub half_open_max_attempts: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_window_ms: 60_000,
            reset_timeout_ms: 30_000,
            half_open_max_attempts: 1,
        }
    }
}

/// Breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half-open",
        }
    }
}

/// A single target's circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    key: String,
    config: BreakerConfig,
    state: BreakerState,
    failures: Vec<u64>,
    last_state_change: u64,
    half_open_attempts: u32,
}

impl CircuitBreaker {
    pub fn new(key: impl Into<String>, config: BreakerConfig, now: u64) -> Self {
        Self {
            key: key.into(),
            config,
            state: BreakerState::Closed,
            failures: Vec::new(),
            last_state_change: now,
            half_open_attempts: 0,
        }
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    /// Gate a call through the breaker.
    ///
    /// Closed always passes. Open passes once the reset timeout elapsed,
    /// transitioning to half-open and consuming one trial slot. Half-open
    /// passes while trial slots remain.
    pub fn can_execute(&mut self, now: u64) -> Result<(), CircuitOpenError> {
        match self.state {
            BreakerState::Closed => Ok(()),
            BreakerState::Open => {
                if now.saturating_sub(self.last_state_change) >= self.config.reset_timeout_ms {
                    self.state = BreakerState::HalfOpen;
                    self.last_state_change = now;
                    self.half_open_attempts = 1;
                    debug!(key = %self.key, "circuit half-open, admitting trial call");
                    Ok(())
                } else {
                    let retry_in = self
                        .config
                        .reset_timeout_ms
                        .saturating_sub(now.saturating_sub(self.last_state_change));
                    Err(CircuitOpenError {
                        key: self.key.clone(),
                        message: format!(
                            "circuit open for {}; next trial in {retry_in}ms",
                            self.key
                        ),
                        saturated: false,
                    })
                }
            }
            BreakerState::HalfOpen => {
                if self.half_open_attempts < self.config.half_open_max_attempts {
                    self.half_open_attempts += 1;
                    Ok(())
                } else {
                    Err(CircuitOpenError {
                        key: self.key.clone(),
                        message: format!(
                            "circuit half-open for {} and trial budget is spent",
                            self.key
                        ),
                        saturated: true,
                    })
                }
            }
        }
    }

    /// Report a successful call.
    ///
    /// A half-open success closes the circuit. A closed success prunes
    /// stale failures but never clears fresh ones.
    pub fn record_success(&mut self, now: u64) {
        match self.state {
            BreakerState::HalfOpen => {
                info!(key = %self.key, "circuit closed after successful trial");
                self.state = BreakerState::Closed;
                self.last_state_change = now;
                self.failures.clear();
                self.half_open_attempts = 0;
            }
            BreakerState::Closed => {
                self.prune(now);
            }
            BreakerState::Open => {}
        }
    }

    /// Report a failed call.
    ///
    /// A half-open failure reopens immediately. A closed failure counts
    /// toward the threshold within the sliding window.
    pub fn record_failure(&mut self, now: u64) {
        match self.state {
            BreakerState::HalfOpen => {
                warn!(key = %self.key, "trial call failed, circuit reopened");
                self.state = BreakerState::Open;
                self.last_state_change = now;
                self.half_open_attempts = 0;
                self.failures.push(now);
            }
            BreakerState::Closed => {
                self.failures.push(now);
                self.prune(now);
                if self.failures.len() >= self.config.failure_threshold {
                    warn!(
                        key = %self.key,
                        failures = self.failures.len(),
                        "failure threshold reached, circuit opened"
                    );
                    self.state = BreakerState::Open;
                    self.last_state_change = now;
                    metrics::counter!("breaker_opens_total").increment(1);
                }
            }
            BreakerState::Open => {
                self.failures.push(now);
                self.prune(now);
            }
        }
    }

    /// Force the breaker closed and forget all history.
    pub fn reset(&mut self, now: u64) {
        self.state = BreakerState::Closed;
        self.failures.clear();
        self.last_state_change = now;
        self.half_open_attempts = 0;
    }

    fn prune(&mut self, now: u64) {
        let window = self.config.failure_window_ms;
        self.failures
            .retain(|at| now.saturating_sub(*at) < window);
    }
}

/// Breaker registry keyed by target, bounded by an LRU so dead targets
/// eventually fall out.
pub struct BreakerRegistry {
    config: BreakerConfig,
    clock: SharedClock,
    breakers: LruCache<String, CircuitBreaker>,
}

impl BreakerRegistry {
    /// Default registry capacity.
    pub const DEFAULT_CAPACITY: usize = 100;

    pub fn new(config: BreakerConfig, clock: SharedClock, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity)
            .unwrap_or_else(|| NonZeroUsize::new(Self::DEFAULT_CAPACITY).expect("nonzero"));
        Self {
            config,
            clock,
            breakers: LruCache::new(capacity),
        }
    }

    pub fn can_execute(&mut self, key: &str) -> Result<(), CircuitOpenError> {
        let now = self.clock.now_ms();
        self.breaker(key).can_execute(now)
    }

    pub fn record_success(&mut self, key: &str) {
        let now = self.clock.now_ms();
        self.breaker(key).record_success(now);
    }

    pub fn record_failure(&mut self, key: &str) {
        let now = self.clock.now_ms();
        self.breaker(key).record_failure(now);
    }

    pub fn reset(&mut self, key: &str) {
        let now = self.clock.now_ms();
        self.breaker(key).reset(now);
    }

    /// Current state of every tracked breaker, most recently used first.
    pub fn snapshot(&self) -> Vec<(String, BreakerState)> {
        self.breakers
            .iter()
            .map(|(key, breaker)| (key.clone(), breaker.state()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }

    fn breaker(&mut self, key: &str) -> &mut CircuitBreaker {
        if !self.breakers.contains(key) {
            let breaker = CircuitBreaker::new(key, self.config.clone(), self.clock.now_ms());
            self.breakers.put(key.to_string(), breaker);
        }
        self.breakers.get_mut(key).expect("just inserted")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::ManualClock;
    use std::sync::Arc;

    fn test_config() -> BreakerConfig {
        BreakerConfig {
            failure_threshold: 3,
            failure_window_ms: 60_000,
            reset_timeout_ms: 30_000,
            half_open_max_attempts: 1,
        }
    }

    #[test]
    fn closed_allows_calls() {
        let mut breaker = CircuitBreaker::new("account:a", test_config(), 0);
        assert!(breaker.can_execute(0).is_ok());
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn opens_at_threshold_then_half_opens_then_closes() {
        // Lifecycle scenario: 3 failures at t=0 open the circuit; the trial
        // at t=30001 half-opens it; a second probe is refused; success
        // closes it.
        let mut breaker = CircuitBreaker::new("account:a", test_config(), 0);
        breaker.record_failure(0);
        breaker.record_failure(0);
        assert_eq!(breaker.state(), BreakerState::Closed);
        breaker.record_failure(0);
        assert_eq!(breaker.state(), BreakerState::Open);

        let err = breaker.can_execute(10_000).unwrap_err();
        assert!(!err.saturated);
        assert!(err.message.contains("circuit open"), "{}", err.message);

        assert!(breaker.can_execute(30_001).is_ok());
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        let err = breaker.can_execute(30_002).unwrap_err();
        assert!(err.saturated);
        assert!(err.message.contains("trial budget"), "{}", err.message);

        breaker.record_success(30_100);
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert!(breaker.can_execute(30_101).is_ok());
    }

    #[test]
    fn half_open_failure_reopens() {
        let mut breaker = CircuitBreaker::new("account:a", test_config(), 0);
        for _ in 0..3 {
            breaker.record_failure(0);
        }
        assert!(breaker.can_execute(30_001).is_ok());
        breaker.record_failure(30_050);
        assert_eq!(breaker.state(), BreakerState::Open);

        // the reopen restarts the reset timeout
        assert!(breaker.can_execute(45_000).is_err());
        assert!(breaker.can_execute(60_051).is_ok());
    }

    #[test]
    fn failures_outside_window_do_not_trip() {
        let mut breaker = CircuitBreaker::new("account:a", test_config(), 0);
        breaker.record_failure(0);
        breaker.record_failure(1_000);
        // third failure arrives after the first two left the window
        breaker.record_failure(70_000);
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn success_prunes_but_does_not_clear_fresh_failures() {
        let mut breaker = CircuitBreaker::new("account:a", test_config(), 0);
        breaker.record_failure(0);
        breaker.record_failure(100);
        breaker.record_success(200);
        // both failures still inside the window: one more trips the circuit
        breaker.record_failure(300);
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[test]
    fn multiple_half_open_attempts_when_configured() {
        let mut config = test_config();
        config.half_open_max_attempts = 2;
        let mut breaker = CircuitBreaker::new("account:a", config, 0);
        for _ in 0..3 {
            breaker.record_failure(0);
        }
        assert!(breaker.can_execute(30_001).is_ok());
        assert!(breaker.can_execute(30_002).is_ok());
        assert!(breaker.can_execute(30_003).is_err());
    }

    #[test]
    fn reset_forces_closed() {
        let mut breaker = CircuitBreaker::new("account:a", test_config(), 0);
        for _ in 0..3 {
            breaker.record_failure(0);
        }
        assert_eq!(breaker.state(), BreakerState::Open);
        breaker.reset(1_000);
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert!(breaker.can_execute(1_001).is_ok());
        // history is gone: it takes a full threshold to trip again
        breaker.record_failure(1_002);
        breaker.record_failure(1_003);
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn registry_tracks_per_key_state() {
        let clock = ManualClock::starting_at(0);
        let mut registry = BreakerRegistry::new(test_config(), clock.clone(), 100);

        for _ in 0..3 {
            registry.record_failure("account:a");
        }
        assert!(registry.can_execute("account:a").is_err());
        assert!(registry.can_execute("account:b").is_ok());

        let snapshot = registry.snapshot();
        let state_of = |key: &str| {
            snapshot
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, state)| *state)
        };
        assert_eq!(state_of("account:a"), Some(BreakerState::Open));
        assert_eq!(state_of("account:b"), Some(BreakerState::Closed));
    }

    #[test]
    fn registry_reset_clears_target() {
        let clock = ManualClock::starting_at(0);
        let mut registry = BreakerRegistry::new(test_config(), clock, 100);
        for _ in 0..3 {
            registry.record_failure("account:a");
        }
        registry.reset("account:a");
        assert!(registry.can_execute("account:a").is_ok());
    }

    #[test]
    fn registry_evicts_least_recently_used() {
        let clock: Arc<ManualClock> = ManualClock::starting_at(0);
        let mut registry = BreakerRegistry::new(test_config(), clock, 2);

        for _ in 0..3 {
            registry.record_failure("account:a");
        }
        registry.record_failure("account:b");
        // touching a keeps it warm; inserting c evicts b
        assert!(registry.can_execute("account:a").is_err());
        registry.record_failure("account:c");
        assert_eq!(registry.len(), 2);

        let snapshot = registry.snapshot();
        assert!(snapshot.iter().any(|(k, _)| k == "account:a"));
        assert!(!snapshot.iter().any(|(k, _)| k == "account:b"));

        // b comes back fresh, its single failure evicted with it
        assert!(registry.can_execute("account:b").is_ok());
    }
}

//! Sliding-window limiter for login attempts
//!
//! OAuth logins hit the authorization server with user-visible side
//! effects (emails, device prompts), so attempts per account key are
//! capped inside a sliding window. Keys are normalized (trimmed,
//! lowercased) so `User@Example.com` and `user@example.com` share a
//! budget.

use std::collections::HashMap;

use tracing::debug;

use common::{AuthRateLimitError, Clock, SharedClock};

/// Policy constants for the login limiter.
#[derive(Debug, Clone)]
pub struct AuthRateLimitConfig {
    pub max_attempts: u32,
    pub window_ms: u64,
}

impl Default for AuthRateLimitConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            window_ms: 60_000,
        }
    }
}

/// Login attempt limiter. Not internally synchronized; the owner
/// serializes access.
pub struct AuthRateLimiter {
    config: AuthRateLimitConfig,
    clock: SharedClock,
    attempts: HashMap<String, Vec<u64>>,
}

impl AuthRateLimiter {
    pub fn new(config: AuthRateLimitConfig, clock: SharedClock) -> Self {
        Self {
            config,
            clock,
            attempts: HashMap::new(),
        }
    }

    /// Replace the policy. Existing attempt history is kept and
    /// re-evaluated under the new window.
    pub fn configure(&mut self, config: AuthRateLimitConfig) {
        self.config = config;
    }

    /// Whether another attempt is allowed right now.
    pub fn can_attempt(&mut self, key: &str) -> bool {
        self.attempts_remaining(key) > 0
    }

    /// Record an attempt against the key.
    pub fn record_attempt(&mut self, key: &str) {
        let now = self.clock.now_ms();
        let key = normalize_key(key);
        let window = self.config.window_ms;
        let attempts = self.attempts.entry(key.clone()).or_default();
        attempts.retain(|at| now.saturating_sub(*at) < window);
        attempts.push(now);
        debug!(key = %key, attempts = attempts.len(), "login attempt recorded");
    }

    /// Attempts left inside the current window.
    pub fn attempts_remaining(&mut self, key: &str) -> u32 {
        let now = self.clock.now_ms();
        let key = normalize_key(key);
        let window = self.config.window_ms;
        match self.attempts.get_mut(&key) {
            Some(attempts) => {
                attempts.retain(|at| now.saturating_sub(*at) < window);
                self.config.max_attempts.saturating_sub(attempts.len() as u32)
            }
            None => self.config.max_attempts,
        }
    }

    /// Milliseconds until the oldest in-window attempt leaves the window.
    /// Zero when no attempts are recorded.
    pub fn time_until_reset(&mut self, key: &str) -> u64 {
        let now = self.clock.now_ms();
        let key = normalize_key(key);
        let window = self.config.window_ms;
        match self.attempts.get_mut(&key) {
            Some(attempts) => {
                attempts.retain(|at| now.saturating_sub(*at) < window);
                attempts
                    .iter()
                    .min()
                    .map(|oldest| (oldest + window).saturating_sub(now))
                    .unwrap_or(0)
            }
            None => 0,
        }
    }

    /// Forget one key's history.
    pub fn reset(&mut self, key: &str) {
        self.attempts.remove(&normalize_key(key));
    }

    /// Forget everything.
    pub fn reset_all(&mut self) {
        self.attempts.clear();
    }

    /// Gate a login: error when the key's budget is spent.
    pub fn check(&mut self, key: &str) -> Result<(), AuthRateLimitError> {
        if self.can_attempt(key) {
            return Ok(());
        }
        Err(AuthRateLimitError {
            key: normalize_key(key),
            attempts_remaining: self.attempts_remaining(key),
            reset_after_ms: self.time_until_reset(key),
        })
    }
}

fn normalize_key(key: &str) -> String {
    key.trim().to_lowercase()
}

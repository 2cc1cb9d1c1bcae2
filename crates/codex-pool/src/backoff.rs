//! Rate-limit backoff with dedup and reason weighting
//!
//! Each (account index, quota key) pair carries an attempt counter. A burst
//! of 429s inside the dedup window counts as one event; a quiet period
//! resets the counter. The delay doubles per attempt, scaled by how bad the
//! upstream reason is: exhausted quota backs off hard, a concurrency limit
//! barely at all.

use std::collections::HashMap;

use common::{Clock, SharedClock};

/// Why the upstream rate limited us, parsed from its error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitReason {
    Quota,
    Tokens,
    Concurrent,
    Unknown,
}

impl RateLimitReason {
    /// Delay multiplier applied on top of the exponential schedule.
    pub fn multiplier(&self) -> f64 {
        match self {
            RateLimitReason::Quota => 3.0,
            RateLimitReason::Tokens => 1.5,
            RateLimitReason::Concurrent => 0.5,
            RateLimitReason::Unknown => 1.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RateLimitReason::Quota => "quota",
            RateLimitReason::Tokens => "tokens",
            RateLimitReason::Concurrent => "concurrent",
            RateLimitReason::Unknown => "unknown",
        }
    }
}

/// Map an upstream error code to a backoff reason.
pub fn parse_rate_limit_reason(code: Option<&str>) -> RateLimitReason {
    let Some(code) = code else {
        return RateLimitReason::Unknown;
    };
    let lower = code.to_lowercase();
    if lower.contains("quota") || lower.contains("usage_limit") {
        RateLimitReason::Quota
    } else if lower.contains("token") || lower.contains("tpm") || lower.contains("rpm") {
        RateLimitReason::Tokens
    } else if lower.contains("concurrent") || lower.contains("parallel") {
        RateLimitReason::Concurrent
    } else {
        RateLimitReason::Unknown
    }
}

/// Policy constants for the backoff tracker.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// A second 429 inside this window is the same event.
    pub dedup_window_ms: u64,
    /// Quiet time after which the attempt counter restarts at 1.
    pub quiet_period_ms: u64,
    /// Base delay when the server supplied no usable retry-after.
    pub fallback_retry_after_ms: u64,
    /// Hard cap on the computed delay.
    pub max_backoff_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            dedup_window_ms: 2_000,
            quiet_period_ms: 120_000,
            fallback_retry_after_ms: 1_000,
            max_backoff_ms: 300_000,
        }
    }
}

/// What the caller should do about a 429.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffDecision {
    pub attempt: u32,
    pub delay_ms: u64,
    pub is_duplicate: bool,
}

#[derive(Debug)]
struct BackoffRecord {
    attempt: u32,
    first_at: u64,
    last_at: u64,
    last_delay_ms: u64,
}

/// Rate-limit backoff tracker. Not internally synchronized; the owner
/// serializes access.
pub struct RateLimitBackoff {
    config: BackoffConfig,
    clock: SharedClock,
    records: HashMap<(usize, String), BackoffRecord>,
}

impl RateLimitBackoff {
    pub fn new(config: BackoffConfig, clock: SharedClock) -> Self {
        Self {
            config,
            clock,
            records: HashMap::new(),
        }
    }

    /// Register a 429 and compute the delay before the next attempt.
    ///
    /// `server_retry_after_ms` is the server-provided hint; non-finite,
    /// missing, or non-positive values fall back to the configured base.
    pub fn get_backoff(
        &mut self,
        index: usize,
        quota_key: &str,
        server_retry_after_ms: Option<f64>,
        reason: RateLimitReason,
    ) -> BackoffDecision {
        let now = self.clock.now_ms();
        let key = (index, quota_key.to_string());

        if let Some(record) = self.records.get(&key)
            && now.saturating_sub(record.last_at) < self.config.dedup_window_ms
        {
            return BackoffDecision {
                attempt: record.attempt,
                delay_ms: record.last_delay_ms,
                is_duplicate: true,
            };
        }

        let (attempt, first_at) = match self.records.get(&key) {
            Some(record) if now.saturating_sub(record.last_at) < self.config.quiet_period_ms => {
                (record.attempt + 1, record.first_at)
            }
            // quiet period elapsed (or first sighting): restart the schedule
            _ => (1, now),
        };

        let base = normalize_retry_after(server_retry_after_ms, self.config.fallback_retry_after_ms);
        let exponent = attempt.saturating_sub(1).min(32);
        let raw = base as f64 * 2f64.powi(exponent as i32) * reason.multiplier();
        let delay_ms = raw.min(self.config.max_backoff_ms as f64) as u64;

        self.records.insert(
            key,
            BackoffRecord {
                attempt,
                first_at,
                last_at: now,
                last_delay_ms: delay_ms,
            },
        );

        BackoffDecision {
            attempt,
            delay_ms,
            is_duplicate: false,
        }
    }

    pub fn reset(&mut self, index: usize, quota_key: &str) {
        self.records.remove(&(index, quota_key.to_string()));
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

fn normalize_retry_after(server_ms: Option<f64>, fallback_ms: u64) -> u64 {
    match server_ms {
        Some(ms) if ms.is_finite() && ms > 0.0 => ms as u64,
        _ => fallback_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::ManualClock;
    use std::sync::Arc;

    fn tracker() -> (RateLimitBackoff, Arc<ManualClock>) {
        let clock = ManualClock::starting_at(0);
        (
            RateLimitBackoff::new(BackoffConfig::default(), clock.clone()),
            clock,
        )
    }

    #[test]
    fn parse_reason_buckets() {
        assert_eq!(
            parse_rate_limit_reason(Some("usage_limit_reached")),
            RateLimitReason::Quota
        );
        assert_eq!(
            parse_rate_limit_reason(Some("QUOTA_EXCEEDED")),
            RateLimitReason::Quota
        );
        assert_eq!(
            parse_rate_limit_reason(Some("tokens_per_minute")),
            RateLimitReason::Tokens
        );
        assert_eq!(parse_rate_limit_reason(Some("tpm_limit")), RateLimitReason::Tokens);
        assert_eq!(parse_rate_limit_reason(Some("rpm")), RateLimitReason::Tokens);
        assert_eq!(
            parse_rate_limit_reason(Some("too_many_concurrent_requests")),
            RateLimitReason::Concurrent
        );
        assert_eq!(
            parse_rate_limit_reason(Some("parallel_request_cap")),
            RateLimitReason::Concurrent
        );
        assert_eq!(parse_rate_limit_reason(Some("slow_down")), RateLimitReason::Unknown);
        assert_eq!(parse_rate_limit_reason(None), RateLimitReason::Unknown);
    }

    #[test]
    fn dedup_then_escalation() {
        // Timing scenario: 429 at t=0, duplicate at t=1000, escalation at
        // t=2500
        let (mut backoff, clock) = tracker();

        let first = backoff.get_backoff(0, "codex", Some(1000.0), RateLimitReason::Unknown);
        assert_eq!(
            first,
            BackoffDecision {
                attempt: 1,
                delay_ms: 1000,
                is_duplicate: false
            }
        );

        clock.set(1000);
        let dup = backoff.get_backoff(0, "codex", Some(1000.0), RateLimitReason::Unknown);
        assert_eq!(
            dup,
            BackoffDecision {
                attempt: 1,
                delay_ms: 1000,
                is_duplicate: true
            }
        );

        clock.set(2500);
        let second = backoff.get_backoff(0, "codex", Some(1000.0), RateLimitReason::Unknown);
        assert_eq!(
            second,
            BackoffDecision {
                attempt: 2,
                delay_ms: 2000,
                is_duplicate: false
            }
        );
    }

    #[test]
    fn quota_reason_triples_delay() {
        let (mut backoff, clock) = tracker();
        backoff.get_backoff(0, "codex", Some(1000.0), RateLimitReason::Quota);
        clock.set(2500);
        let second = backoff.get_backoff(0, "codex", Some(1000.0), RateLimitReason::Quota);
        assert_eq!(second.attempt, 2);
        assert_eq!(second.delay_ms, 6000);
    }

    #[test]
    fn concurrent_reason_halves_delay() {
        let (mut backoff, _) = tracker();
        let first = backoff.get_backoff(0, "codex", Some(1000.0), RateLimitReason::Concurrent);
        assert_eq!(first.delay_ms, 500);
    }

    #[test]
    fn missing_or_bogus_retry_after_uses_fallback() {
        let (mut backoff, clock) = tracker();
        let first = backoff.get_backoff(0, "codex", None, RateLimitReason::Unknown);
        assert_eq!(first.delay_ms, 1000);

        clock.set(10_000);
        let second = backoff.get_backoff(0, "codex", Some(f64::NAN), RateLimitReason::Unknown);
        assert_eq!(second.delay_ms, 2000);

        clock.set(20_000);
        let third = backoff.get_backoff(0, "codex", Some(-5.0), RateLimitReason::Unknown);
        assert_eq!(third.delay_ms, 4000);

        clock.set(30_000);
        let fourth = backoff.get_backoff(0, "codex", Some(f64::INFINITY), RateLimitReason::Unknown);
        assert_eq!(fourth.delay_ms, 8000);
    }

    #[test]
    fn delay_caps_at_max_backoff() {
        let (mut backoff, clock) = tracker();
        let mut t = 0;
        for _ in 0..12 {
            t += 10_000;
            clock.set(t);
            let decision = backoff.get_backoff(0, "codex", Some(1000.0), RateLimitReason::Quota);
            assert!(decision.delay_ms <= 300_000, "delay {}", decision.delay_ms);
        }
        clock.set(t + 10_000);
        let capped = backoff.get_backoff(0, "codex", Some(1000.0), RateLimitReason::Quota);
        assert_eq!(capped.delay_ms, 300_000);
    }

    #[test]
    fn quiet_period_resets_attempt() {
        let (mut backoff, clock) = tracker();
        backoff.get_backoff(0, "codex", Some(1000.0), RateLimitReason::Unknown);
        clock.set(5_000);
        let second = backoff.get_backoff(0, "codex", Some(1000.0), RateLimitReason::Unknown);
        assert_eq!(second.attempt, 2);

        clock.set(5_000 + 120_000);
        let fresh = backoff.get_backoff(0, "codex", Some(1000.0), RateLimitReason::Unknown);
        assert_eq!(fresh.attempt, 1);
        assert_eq!(fresh.delay_ms, 1000);
    }

    #[test]
    fn duplicates_do_not_extend_the_window() {
        // The dedup window is anchored at the last escalation, not at the
        // last duplicate sighting.
        let (mut backoff, clock) = tracker();
        backoff.get_backoff(0, "codex", Some(1000.0), RateLimitReason::Unknown);
        clock.set(1_500);
        assert!(
            backoff
                .get_backoff(0, "codex", Some(1000.0), RateLimitReason::Unknown)
                .is_duplicate
        );
        clock.set(2_500);
        // 2500 - 0 >= 2000, so this escalates even though the duplicate was
        // only a second ago
        let second = backoff.get_backoff(0, "codex", Some(1000.0), RateLimitReason::Unknown);
        assert!(!second.is_duplicate);
        assert_eq!(second.attempt, 2);
    }

    #[test]
    fn quota_keys_are_isolated() {
        // family and family:model keep separate schedules
        let (mut backoff, clock) = tracker();
        backoff.get_backoff(0, "codex", Some(1000.0), RateLimitReason::Unknown);
        clock.set(2_500);
        backoff.get_backoff(0, "codex", Some(1000.0), RateLimitReason::Unknown);

        let fresh = backoff.get_backoff(0, "codex:codex-mini", Some(1000.0), RateLimitReason::Unknown);
        assert_eq!(fresh.attempt, 1);
    }

    #[test]
    fn reset_forgets_history() {
        let (mut backoff, clock) = tracker();
        backoff.get_backoff(0, "codex", Some(1000.0), RateLimitReason::Unknown);
        clock.set(2_500);
        backoff.get_backoff(0, "codex", Some(1000.0), RateLimitReason::Unknown);
        backoff.reset(0, "codex");
        clock.set(3_000);
        let fresh = backoff.get_backoff(0, "codex", Some(1000.0), RateLimitReason::Unknown);
        assert_eq!(fresh.attempt, 1);
    }
}

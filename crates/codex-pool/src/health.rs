//! Per-account health scoring with passive recovery
//!
//! A score in [0, 100] per (account index, quota key). Successes nudge it
//! up, failures and rate limits push it down, and elapsed time slowly
//! recovers it toward the maximum so a once-bad account is retried
//! eventually. Distinct quota keys are fully isolated.

use std::collections::HashMap;

use common::{Clock, SharedClock};

/// Policy constants for the health tracker.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    pub min_score: f64,
    pub max_score: f64,
    pub success_delta: f64,
    pub rate_limit_delta: f64,
    pub failure_delta: f64,
    pub passive_recovery_per_hour: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            min_score: 0.0,
            max_score: 100.0,
            success_delta: 5.0,
            rate_limit_delta: -20.0,
            failure_delta: -10.0,
            passive_recovery_per_hour: 10.0,
        }
    }
}

#[derive(Debug, Clone)]
struct HealthRecord {
    score: f64,
    consecutive_failures: u32,
    last_update: u64,
}

/// Health score tracker. Not internally synchronized; the owner serializes
/// access.
pub struct HealthTracker {
    config: HealthConfig,
    clock: SharedClock,
    records: HashMap<(usize, String), HealthRecord>,
}

impl HealthTracker {
    pub fn new(config: HealthConfig, clock: SharedClock) -> Self {
        Self {
            config,
            clock,
            records: HashMap::new(),
        }
    }

    /// Current score after passive recovery. Reads refresh `last_update`,
    /// so recovered points are banked at read time.
    pub fn get_score(&mut self, index: usize, quota_key: &str) -> f64 {
        let now = self.clock.now_ms();
        let record = record_mut(&mut self.records, &self.config, index, quota_key, now);
        apply_recovery(&self.config, record, now);
        record.score
    }

    /// Score without mutating tracker state. Used by pure ranking paths.
    pub fn peek_score(&self, index: usize, quota_key: &str) -> f64 {
        let now = self.clock.now_ms();
        match self.records.get(&(index, quota_key.to_string())) {
            Some(record) => {
                let hours = (now.saturating_sub(record.last_update)) as f64 / 3_600_000.0;
                (record.score + self.config.passive_recovery_per_hour * hours)
                    .clamp(self.config.min_score, self.config.max_score)
            }
            None => self.config.max_score,
        }
    }

    pub fn record_success(&mut self, index: usize, quota_key: &str) {
        let now = self.clock.now_ms();
        let record = record_mut(&mut self.records, &self.config, index, quota_key, now);
        apply_recovery(&self.config, record, now);
        record.score = (record.score + self.config.success_delta)
            .clamp(self.config.min_score, self.config.max_score);
        record.consecutive_failures = 0;
    }

    pub fn record_rate_limit(&mut self, index: usize, quota_key: &str) {
        let delta = self.config.rate_limit_delta;
        self.record_negative(index, quota_key, delta);
    }

    pub fn record_failure(&mut self, index: usize, quota_key: &str) {
        let delta = self.config.failure_delta;
        self.record_negative(index, quota_key, delta);
    }

    pub fn consecutive_failures(&self, index: usize, quota_key: &str) -> u32 {
        self.records
            .get(&(index, quota_key.to_string()))
            .map(|record| record.consecutive_failures)
            .unwrap_or(0)
    }

    pub fn reset(&mut self, index: usize, quota_key: &str) {
        self.records.remove(&(index, quota_key.to_string()));
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    fn record_negative(&mut self, index: usize, quota_key: &str, delta: f64) {
        let now = self.clock.now_ms();
        let record = record_mut(&mut self.records, &self.config, index, quota_key, now);
        apply_recovery(&self.config, record, now);
        record.score = (record.score + delta).clamp(self.config.min_score, self.config.max_score);
        record.consecutive_failures += 1;
    }
}

fn record_mut<'a>(
    records: &'a mut HashMap<(usize, String), HealthRecord>,
    config: &HealthConfig,
    index: usize,
    quota_key: &str,
    now: u64,
) -> &'a mut HealthRecord {
    records
        .entry((index, quota_key.to_string()))
        .or_insert_with(|| HealthRecord {
            score: config.max_score,
            consecutive_failures: 0,
            last_update: now,
        })
}

fn apply_recovery(config: &HealthConfig, record: &mut HealthRecord, now: u64) {
    let hours = (now.saturating_sub(record.last_update)) as f64 / 3_600_000.0;
    record.score = (record.score + config.passive_recovery_per_hour * hours)
        .clamp(config.min_score, config.max_score);
    record.last_update = now;
}

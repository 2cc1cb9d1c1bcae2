//! Per-account token buckets with a refund window
//!
//! A leaky bucket per (account index, quota key): capacity `max_tokens`,
//! refilling continuously at `tokens_per_minute`. Consumptions are recorded
//! so that a request abandoned shortly after dispatch can refund its token.

use std::collections::VecDeque;
use std::collections::HashMap;

use common::{Clock, SharedClock};

/// Policy constants for the token bucket tracker.
#[derive(Debug, Clone)]
pub struct BucketConfig {
    pub max_tokens: f64,
    pub tokens_per_minute: f64,
    pub refund_window_ms: u64,
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            max_tokens: 10.0,
            tokens_per_minute: 1.0,
            refund_window_ms: 30_000,
        }
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: u64,
    consumptions: VecDeque<(u64, u32)>,
}

/// Token bucket tracker. Not internally synchronized; the owner serializes
/// access.
pub struct TokenBucketTracker {
    config: BucketConfig,
    clock: SharedClock,
    buckets: HashMap<(usize, String), Bucket>,
}

impl TokenBucketTracker {
    pub fn new(config: BucketConfig, clock: SharedClock) -> Self {
        Self {
            config,
            clock,
            buckets: HashMap::new(),
        }
    }

    /// Whole tokens currently available. A fresh bucket is full.
    pub fn get_tokens(&mut self, index: usize, quota_key: &str) -> u32 {
        let now = self.clock.now_ms();
        let config = &self.config;
        let bucket = bucket_mut(&mut self.buckets, config, index, quota_key, now);
        refill(config, bucket, now);
        bucket.tokens.floor() as u32
    }

    /// Whole tokens available without mutating tracker state.
    pub fn peek_tokens(&self, index: usize, quota_key: &str) -> u32 {
        match self.buckets.get(&(index, quota_key.to_string())) {
            Some(bucket) => {
                let now = self.clock.now_ms();
                let minutes = (now.saturating_sub(bucket.last_refill)) as f64 / 60_000.0;
                (bucket.tokens + minutes * self.config.tokens_per_minute)
                    .min(self.config.max_tokens)
                    .floor() as u32
            }
            None => self.config.max_tokens.floor() as u32,
        }
    }

    /// Consume one token. Returns false when the bucket is empty; tokens
    /// never go negative.
    pub fn try_consume(&mut self, index: usize, quota_key: &str) -> bool {
        let now = self.clock.now_ms();
        let config = &self.config;
        let bucket = bucket_mut(&mut self.buckets, config, index, quota_key, now);
        refill(config, bucket, now);
        prune_consumptions(bucket, config.refund_window_ms, now);
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            bucket.consumptions.push_back((now, 1));
            true
        } else {
            false
        }
    }

    /// Refund the most recent consumption if it happened inside the refund
    /// window. Returns false when there is nothing to refund.
    pub fn refund_token(&mut self, index: usize, quota_key: &str) -> bool {
        let now = self.clock.now_ms();
        let window = self.config.refund_window_ms;
        let Some(bucket) = self.buckets.get_mut(&(index, quota_key.to_string())) else {
            return false;
        };
        prune_consumptions(bucket, window, now);
        match bucket.consumptions.back() {
            Some((at, _)) if now.saturating_sub(*at) <= window => {
                bucket.consumptions.pop_back();
                bucket.tokens = (bucket.tokens + 1.0).min(self.config.max_tokens);
                true
            }
            _ => false,
        }
    }

    /// Subtract `n` tokens, clamping at zero. A missing record starts from
    /// a full bucket.
    pub fn drain(&mut self, index: usize, quota_key: &str, n: f64) {
        let now = self.clock.now_ms();
        let config = &self.config;
        let bucket = bucket_mut(&mut self.buckets, config, index, quota_key, now);
        refill(config, bucket, now);
        bucket.tokens = (bucket.tokens - n).max(0.0);
    }

    pub fn reset(&mut self, index: usize, quota_key: &str) {
        self.buckets.remove(&(index, quota_key.to_string()));
    }

    pub fn clear(&mut self) {
        self.buckets.clear();
    }
}

fn bucket_mut<'a>(
    buckets: &'a mut HashMap<(usize, String), Bucket>,
    config: &BucketConfig,
    index: usize,
    quota_key: &str,
    now: u64,
) -> &'a mut Bucket {
    buckets
        .entry((index, quota_key.to_string()))
        .or_insert_with(|| Bucket {
            tokens: config.max_tokens,
            last_refill: now,
            consumptions: VecDeque::new(),
        })
}

fn refill(config: &BucketConfig, bucket: &mut Bucket, now: u64) {
    let minutes = (now.saturating_sub(bucket.last_refill)) as f64 / 60_000.0;
    bucket.tokens = (bucket.tokens + minutes * config.tokens_per_minute).min(config.max_tokens);
    bucket.last_refill = now;
}

/// Consumptions older than the refund window can never be refunded; drop
/// them so the deque stays bounded.
fn prune_consumptions(bucket: &mut Bucket, window_ms: u64, now: u64) {
    while let Some((at, _)) = bucket.consumptions.front() {
        if now.saturating_sub(*at) > window_ms {
            bucket.consumptions.pop_front();
        } else {
            break;
        }
    }
}

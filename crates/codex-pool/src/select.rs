//! Hybrid account selection
//!
//! Ranks the available accounts of a pool snapshot by a weighted blend of
//! health score, remaining tokens, and time since last use. Rate-limited
//! and cooling-down accounts are filtered out first; when nothing is
//! available the engine points at the least-recently-used account as a
//! fallback signal without claiming it is usable.

use codex_store::{StoredAccount, quota_key};
use tracing::debug;

use crate::bucket::TokenBucketTracker;
use crate::health::HealthTracker;

/// Scoring weights. Defaults are the tuned production constants.
#[derive(Debug, Clone)]
pub struct SelectionWeights {
    pub health: f64,
    pub tokens: f64,
    pub recency_per_hour: f64,
}

impl Default for SelectionWeights {
    fn default() -> Self {
        Self {
            health: 2.0,
            tokens: 5.0,
            recency_per_hour: 2.0,
        }
    }
}

/// Outcome of a single-pick selection.
///
/// `Fallback` is a selection decision, not a usability claim: it names the
/// least-recently-used account so the caller can decide whether to try it
/// anyway or refuse the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// Pool is empty.
    None,
    /// Nothing is available; this is the least-recently-used index.
    Fallback(usize),
    /// Best available account.
    Available(usize),
}

/// The selection engine. Pure over its inputs: same snapshot and tracker
/// state produce the same winner.
pub struct SelectionEngine {
    weights: SelectionWeights,
}

impl Default for SelectionEngine {
    fn default() -> Self {
        Self::new(SelectionWeights::default())
    }
}

impl SelectionEngine {
    pub fn new(weights: SelectionWeights) -> Self {
        Self { weights }
    }

    /// Pick the single best account for `family` (and optional pinned
    /// model). Expires stale rate-limit entries in the snapshot as a side
    /// effect so the caller can persist the cleanup.
    pub fn select_hybrid(
        &self,
        accounts: &mut [StoredAccount],
        family: &str,
        model: Option<&str>,
        health: &HealthTracker,
        buckets: &TokenBucketTracker,
        now: u64,
    ) -> Selection {
        for account in accounts.iter_mut() {
            account.expire_stale_rate_limits(now);
        }
        self.pick(accounts, family, model, health, buckets, now)
    }

    /// Top `n` available accounts, best first. Pure: mutates neither the
    /// snapshot nor the trackers.
    pub fn top_candidates(
        &self,
        accounts: &[StoredAccount],
        family: &str,
        model: Option<&str>,
        n: usize,
        health: &HealthTracker,
        buckets: &TokenBucketTracker,
        now: u64,
    ) -> Vec<usize> {
        let key = quota_key(family, model);
        let mut scored: Vec<(usize, f64)> = accounts
            .iter()
            .enumerate()
            .filter(|(_, account)| is_available(account, family, model, now))
            .map(|(index, account)| (index, self.score(index, account, &key, health, buckets, now)))
            .collect();
        // descending score, ties by lower index
        scored.sort_by(|(ia, sa), (ib, sb)| {
            sb.partial_cmp(sa)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(ia.cmp(ib))
        });
        scored.truncate(n);
        scored.into_iter().map(|(index, _)| index).collect()
    }

    fn pick(
        &self,
        accounts: &[StoredAccount],
        family: &str,
        model: Option<&str>,
        health: &HealthTracker,
        buckets: &TokenBucketTracker,
        now: u64,
    ) -> Selection {
        if accounts.is_empty() {
            return Selection::None;
        }

        let key = quota_key(family, model);
        let mut best: Option<(usize, f64)> = None;
        for (index, account) in accounts.iter().enumerate() {
            if !is_available(account, family, model, now) {
                continue;
            }
            let score = self.score(index, account, &key, health, buckets, now);
            match best {
                Some((_, best_score)) if score <= best_score => {}
                _ => best = Some((index, score)),
            }
        }

        match best {
            Some((index, score)) => {
                debug!(index, score, quota_key = %key, "selected account");
                metrics::counter!("selections_total", "kind" => "available").increment(1);
                Selection::Available(index)
            }
            None => {
                // Least-recently-used fallback; ties go to the lower index.
                let lru = accounts
                    .iter()
                    .enumerate()
                    .min_by_key(|(index, account)| (account.last_used, *index))
                    .map(|(index, _)| index)
                    .unwrap_or(0);
                debug!(index = lru, quota_key = %key, "no account available, falling back to LRU");
                metrics::counter!("selections_total", "kind" => "fallback").increment(1);
                Selection::Fallback(lru)
            }
        }
    }

    fn score(
        &self,
        index: usize,
        account: &StoredAccount,
        quota_key: &str,
        health: &HealthTracker,
        buckets: &TokenBucketTracker,
        now: u64,
    ) -> f64 {
        let hours_idle = now.saturating_sub(account.last_used) as f64 / 3_600_000.0;
        self.weights.health * health.peek_score(index, quota_key)
            + self.weights.tokens * f64::from(buckets.peek_tokens(index, quota_key))
            + self.weights.recency_per_hour * hours_idle
    }
}

fn is_available(account: &StoredAccount, family: &str, model: Option<&str>, now: u64) -> bool {
    !account.is_rate_limited(family, model, now) && !account.is_cooling_down(now)
}

//! Gateway service: pool mirror plus trackers
//!
//! Owns the in-memory mirror of the durable pool and every tracker keyed
//! off it. All state sits behind one mutex, which is the serialization
//! the trackers rely on. Durable mutations write through the store; the
//! mirror is the single source the selection engine reads.
//!
//! Post-call reporting drives the failure-isolation machinery:
//! - success feeds the health tracker and closes half-open breakers
//! - a 429 computes a reason-weighted backoff and stamps the account's
//!   quota-key reset time
//! - other failures feed the breaker and may start a cooldown

use std::sync::Arc;
use std::time::Instant;

use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use codex_pool::{
    BackoffConfig, BackoffDecision, BreakerConfig, BreakerRegistry, BucketConfig, HealthConfig,
    HealthTracker, ProbeCandidate, RateLimitBackoff, Selection, SelectionEngine, SelectionWeights,
    TokenBucketTracker, parse_rate_limit_reason,
};
use codex_store::{
    AccountStorage, AccountStore, CooldownReason, KNOWN_FAMILIES, MAX_ACCOUNTS, StoredAccount,
    SwitchReason, quota_key,
};
use codex_auth::AccountMetadata;
use codex_pool::{ProbeWinner, race};
use common::{Clock, Error, Result, SharedClock, system_clock};
use provider::{ProbeResponse, Upstream};

/// Cooldown after a non-retryable auth failure.
const AUTH_COOLDOWN_MS: u64 = 300_000;

/// Cooldown after a transport failure.
const NETWORK_COOLDOWN_MS: u64 = 60_000;

/// An account handed out for a request.
#[derive(Debug, Clone)]
pub struct AcquiredAccount {
    pub index: usize,
    pub account: StoredAccount,
}

struct GatewayState {
    pool: AccountStorage,
    health: HealthTracker,
    buckets: TokenBucketTracker,
    backoff: RateLimitBackoff,
    breakers: BreakerRegistry,
}

/// The coordination core: durable pool + selection + failure isolation.
pub struct Gateway {
    store: AccountStore,
    engine: SelectionEngine,
    clock: SharedClock,
    state: Mutex<GatewayState>,
}

impl Gateway {
    /// Load the pool from the store and build fresh trackers.
    pub async fn load(store: AccountStore) -> Self {
        Self::load_with_clock(store, system_clock()).await
    }

    pub async fn load_with_clock(store: AccountStore, clock: SharedClock) -> Self {
        let pool = store.load().await.unwrap_or_else(AccountStorage::empty);
        info!(accounts = pool.accounts.len(), "gateway initialized");
        let state = GatewayState {
            pool,
            health: HealthTracker::new(HealthConfig::default(), clock.clone()),
            buckets: TokenBucketTracker::new(BucketConfig::default(), clock.clone()),
            backoff: RateLimitBackoff::new(BackoffConfig::default(), clock.clone()),
            breakers: BreakerRegistry::new(
                BreakerConfig::default(),
                clock.clone(),
                BreakerRegistry::DEFAULT_CAPACITY,
            ),
        };
        Self {
            store,
            engine: SelectionEngine::new(SelectionWeights::default()),
            clock,
            state: Mutex::new(state),
        }
    }

    /// Pick the best usable account for a request and mark it used.
    ///
    /// Walks the ranked candidates, skipping accounts whose breaker is
    /// open or whose token bucket is empty. Returns `None` when nothing is
    /// usable, in which case the caller refuses the request; the LRU fallback
    /// is deliberately not handed out here.
    pub async fn acquire(&self, family: &str, model: Option<&str>) -> Result<Option<AcquiredAccount>> {
        let now = self.clock.now_ms();
        let key = quota_key(family, model);
        let mut state = self.state.lock().await;
        let state = &mut *state;

        // Expire stale rate-limit entries in the mirror first.
        let selection = self.engine.select_hybrid(
            &mut state.pool.accounts,
            family,
            model,
            &state.health,
            &state.buckets,
            now,
        );
        if matches!(selection, Selection::None) {
            return Ok(None);
        }
        if let Selection::Fallback(index) = selection {
            debug!(index, family, "no usable account; refusing request");
            return Ok(None);
        }

        let ranked = self.engine.top_candidates(
            &state.pool.accounts,
            family,
            model,
            state.pool.accounts.len(),
            &state.health,
            &state.buckets,
            now,
        );
        for index in ranked {
            let breaker_key = breaker_key(&state.pool.accounts[index]);
            if let Err(err) = state.breakers.can_execute(&breaker_key) {
                debug!(index, error = %err, "breaker refused candidate");
                continue;
            }
            if !state.buckets.try_consume(index, &key) {
                debug!(index, quota_key = %key, "candidate out of tokens");
                continue;
            }

            let previous = state.pool.active_index_for(family);
            state.pool.accounts[index].last_used = now;
            if state.pool.active_index_by_family.get(family).is_none() {
                state.pool.accounts[index].last_switch_reason = Some(SwitchReason::Initial);
            } else if previous != index {
                state.pool.accounts[index].last_switch_reason = Some(SwitchReason::Rotation);
            }
            state
                .pool
                .active_index_by_family
                .insert(family.to_string(), index);

            self.store.save(&state.pool).await?;
            return Ok(Some(AcquiredAccount {
                index,
                account: state.pool.accounts[index].clone(),
            }));
        }

        debug!(family, "every candidate was refused by breaker or bucket");
        Ok(None)
    }

    /// Top-N candidates for a parallel probe, each with a fresh
    /// cancellation handle. Candidates whose breaker refuses are skipped.
    pub async fn probe_candidates(
        &self,
        family: &str,
        model: Option<&str>,
        n: usize,
    ) -> Vec<ProbeCandidate> {
        let now = self.clock.now_ms();
        let mut state = self.state.lock().await;
        let state = &mut *state;

        let ranked = self.engine.top_candidates(
            &state.pool.accounts,
            family,
            model,
            state.pool.accounts.len(),
            &state.health,
            &state.buckets,
            now,
        );
        let mut candidates = Vec::new();
        for index in ranked {
            if candidates.len() == n {
                break;
            }
            let breaker_key = breaker_key(&state.pool.accounts[index]);
            if state.breakers.can_execute(&breaker_key).is_err() {
                continue;
            }
            candidates.push(ProbeCandidate::new(index, state.pool.accounts[index].clone()));
        }
        candidates
    }

    /// Race the top `n` candidates against the upstream; first success
    /// wins and is reported into the trackers. Losers' cancellation
    /// handles are signalled by the race itself.
    pub async fn probe_race(
        &self,
        upstream: Arc<dyn Upstream>,
        family: &str,
        model: Option<&str>,
        n: usize,
    ) -> Option<ProbeWinner<ProbeResponse>> {
        let candidates = self.probe_candidates(family, model, n).await;
        if candidates.is_empty() {
            return None;
        }
        let started = Instant::now();
        let winner = race(candidates, move |account, cancel| {
            let upstream = upstream.clone();
            async move { upstream.probe(&account, cancel).await }
        })
        .await;

        let elapsed = started.elapsed().as_secs_f64();
        match &winner {
            Some(win) => {
                crate::metrics::record_probe("success", elapsed);
                self.report_success(win.index, family, model).await;
            }
            None => crate::metrics::record_probe("no_winner", elapsed),
        }
        winner
    }

    /// Report a successful call.
    pub async fn report_success(&self, index: usize, family: &str, model: Option<&str>) {
        let key = quota_key(family, model);
        let mut state = self.state.lock().await;
        let state = &mut *state;
        state.health.record_success(index, &key);
        if let Some(account) = state.pool.accounts.get(index) {
            let breaker_key = breaker_key(account);
            state.breakers.record_success(&breaker_key);
        }
    }

    /// Report a 429. Computes the reason-weighted backoff, stamps the
    /// account's reset time, and persists the pool.
    pub async fn report_rate_limit(
        &self,
        index: usize,
        family: &str,
        model: Option<&str>,
        retry_after_ms: Option<f64>,
        code: Option<&str>,
    ) -> Result<BackoffDecision> {
        let now = self.clock.now_ms();
        let key = quota_key(family, model);
        let reason = parse_rate_limit_reason(code);
        let mut state = self.state.lock().await;
        let state = &mut *state;

        let decision = state.backoff.get_backoff(index, &key, retry_after_ms, reason);
        if decision.is_duplicate {
            return Ok(decision);
        }

        state.health.record_rate_limit(index, &key);
        if let Some(account) = state.pool.accounts.get_mut(index) {
            account
                .rate_limit_reset_times
                .insert(key.clone(), now + decision.delay_ms);
            account.last_switch_reason = Some(SwitchReason::RateLimit);
            warn!(
                index,
                quota_key = %key,
                reason = reason.as_str(),
                delay_ms = decision.delay_ms,
                attempt = decision.attempt,
                "account rate limited"
            );
        }
        self.store.save(&state.pool).await?;
        Ok(decision)
    }

    /// Report a non-429 failure. Feeds the breaker and, for auth or
    /// transport failures, starts a cooldown.
    pub async fn report_failure(
        &self,
        index: usize,
        family: &str,
        model: Option<&str>,
        error: &Error,
    ) -> Result<()> {
        let now = self.clock.now_ms();
        let key = quota_key(family, model);
        let mut state = self.state.lock().await;
        let state = &mut *state;

        state.health.record_failure(index, &key);
        let cooldown = match error {
            Error::Auth { retryable: false, .. } => {
                Some((CooldownReason::AuthFailure, AUTH_COOLDOWN_MS))
            }
            Error::Network { .. } | Error::Timeout { .. } => {
                Some((CooldownReason::NetworkError, NETWORK_COOLDOWN_MS))
            }
            _ => None,
        };

        if let Some(account) = state.pool.accounts.get_mut(index) {
            let breaker_key = breaker_key(account);
            state.breakers.record_failure(&breaker_key);
            if let Some((reason, duration_ms)) = cooldown {
                account.cooling_down_until = Some(now + duration_ms);
                account.cooldown_reason = Some(reason);
                warn!(index, reason = ?reason, duration_ms, "account cooling down");
                self.store.save(&state.pool).await?;
            }
        }
        Ok(())
    }

    /// Refresh every account's credential through the auth collaborator.
    ///
    /// Tokens rotate in place; an account whose refresh token is rejected
    /// outright goes into an auth-failure cooldown. Transient failures are
    /// left for the next cycle. Returns the number of refreshed accounts.
    pub async fn refresh_credentials(&self, flow: &dyn codex_auth::AuthFlow) -> usize {
        let now = self.clock.now_ms();
        let targets: Vec<(usize, String)> = {
            let state = self.state.lock().await;
            state
                .pool
                .accounts
                .iter()
                .enumerate()
                .filter(|(_, account)| !account.is_cooling_down(now))
                .map(|(index, account)| (index, account.refresh_token.clone()))
                .collect()
        };

        let mut refreshed = 0;
        for (index, token) in targets {
            match flow.refresh(&token).await {
                Ok(metadata) => {
                    let mut state = self.state.lock().await;
                    let state = &mut *state;
                    let Some(account) = state.pool.accounts.get_mut(index) else {
                        continue;
                    };
                    // The pool may have been edited mid-cycle; only apply
                    // the rotation to the account we actually refreshed.
                    if account.refresh_token != token {
                        continue;
                    }
                    account.refresh_token = metadata.refresh_token;
                    if account.account_id.is_none() {
                        account.account_id = metadata.account_id;
                        account.account_id_source = metadata.account_id_source;
                    }
                    if account.email.is_none() {
                        account.email = metadata.email;
                    }
                    if let Err(err) = self.store.save(&state.pool).await {
                        warn!(index, error = %err, "failed to persist rotated credential");
                    } else {
                        info!(index, "credential refreshed");
                        refreshed += 1;
                    }
                }
                Err(Error::Auth {
                    retryable: false,
                    message,
                    ..
                }) => {
                    warn!(index, %message, "refresh token rejected, cooling account down");
                    let mut state = self.state.lock().await;
                    let state = &mut *state;
                    if let Some(account) = state.pool.accounts.get_mut(index) {
                        account.cooling_down_until = Some(now + AUTH_COOLDOWN_MS);
                        account.cooldown_reason = Some(CooldownReason::AuthFailure);
                        if let Err(err) = self.store.save(&state.pool).await {
                            warn!(index, error = %err, "failed to persist cooldown");
                        }
                    }
                }
                Err(err) => {
                    debug!(index, error = %err, "transient refresh failure, will retry next cycle");
                }
            }
        }
        refreshed
    }

    /// Refund the token consumed at acquire time (request abandoned before
    /// dispatch).
    pub async fn refund(&self, index: usize, family: &str, model: Option<&str>) -> bool {
        let key = quota_key(family, model);
        let mut state = self.state.lock().await;
        state.buckets.refund_token(index, &key)
    }

    /// Append a freshly authenticated account to the pool.
    ///
    /// Duplicate identities collapse through the regular dedup pass; the
    /// newest entry (this one) wins.
    pub async fn add_account(&self, metadata: AccountMetadata) -> Result<usize> {
        let refresh_token = metadata.refresh_token.trim().to_string();
        if refresh_token.is_empty() {
            return Err(Error::Validation {
                field: "refreshToken".into(),
                expected: "non-empty string".into(),
            });
        }

        let now = self.clock.now_ms();
        let mut state = self.state.lock().await;
        let state = &mut *state;

        let account = StoredAccount {
            account_id: metadata.account_id,
            email: metadata.email,
            account_label: None,
            account_id_source: metadata.account_id_source,
            refresh_token,
            added_at: now,
            last_used: now,
            last_switch_reason: Some(SwitchReason::Initial),
            rate_limit_reset_times: Default::default(),
            cooling_down_until: None,
            cooldown_reason: None,
        };
        let key = account.key().to_string();

        let mut merged = state.pool.clone();
        merged.accounts.push(account);
        let merged = codex_store::normalize_storage(merged, now);
        if merged.accounts.len() > MAX_ACCOUNTS {
            return Err(Error::Validation {
                field: "accounts".into(),
                expected: format!("at most {MAX_ACCOUNTS} accounts"),
            });
        }

        self.store.save(&merged).await?;
        state.pool = merged;
        let index = state
            .pool
            .accounts
            .iter()
            .position(|account| account.key() == key)
            .unwrap_or(0);
        info!(index, "account added to pool");
        Ok(index)
    }

    /// Remove an account by index, account id, or email.
    pub async fn remove_account(&self, selector: &str) -> Result<StoredAccount> {
        let now = self.clock.now_ms();
        let mut state = self.state.lock().await;
        let state = &mut *state;

        let index = find_account(&state.pool.accounts, selector).ok_or_else(|| {
            Error::Validation {
                field: "selector".into(),
                expected: format!("an index, account id, or email matching a pool account (got {selector:?})"),
            }
        })?;

        let mut updated = state.pool.clone();
        let removed = updated.accounts.remove(index);
        let updated = codex_store::normalize_storage(updated, now);
        self.store.save(&updated).await?;
        state.pool = updated;
        // Index-keyed tracker state no longer lines up with the pool.
        state.health.clear();
        state.buckets.clear();
        state.backoff.clear();
        info!(account = removed.display_name(), "account removed from pool");
        Ok(removed)
    }

    /// Set an account's display label.
    pub async fn rename_account(&self, selector: &str, label: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let state = &mut *state;
        let index = find_account(&state.pool.accounts, selector).ok_or_else(|| {
            Error::Validation {
                field: "selector".into(),
                expected: format!("a pool account (got {selector:?})"),
            }
        })?;
        state.pool.accounts[index].account_label = if label.trim().is_empty() {
            None
        } else {
            Some(label.trim().to_string())
        };
        self.store.save(&state.pool).await?;
        Ok(())
    }

    /// Make `index` the default active account.
    pub async fn switch_account(&self, index: usize) -> Result<()> {
        let mut state = self.state.lock().await;
        let state = &mut *state;
        if index >= state.pool.accounts.len() {
            return Err(Error::Validation {
                field: "index".into(),
                expected: format!("0..{}", state.pool.accounts.len()),
            });
        }
        state.pool.active_index = index;
        self.store.save(&state.pool).await?;
        info!(index, "active account switched");
        Ok(())
    }

    /// Snapshot of the pool for listings.
    pub async fn accounts(&self) -> Vec<StoredAccount> {
        self.state.lock().await.pool.accounts.clone()
    }

    /// Location of the durable pool file.
    pub fn storage_path(&self) -> &std::path::Path {
        self.store.path()
    }

    pub async fn active_index(&self) -> usize {
        self.state.lock().await.pool.active_index
    }

    /// Export the pool to a backup file.
    pub async fn export(&self, dest: &std::path::Path, force: bool) -> Result<usize> {
        Ok(self.store.export(dest, force).await?)
    }

    /// Import accounts from a backup file and refresh the mirror.
    pub async fn import(&self, src: &std::path::Path) -> Result<codex_store::ImportOutcome> {
        let outcome = self.store.import(src).await?;
        let mut state = self.state.lock().await;
        state.pool = self.store.load().await.unwrap_or_else(AccountStorage::empty);
        Ok(outcome)
    }

    /// Aggregated health report: pool counts, per-account status with
    /// health scores per family, and breaker states. Never exposes tokens.
    pub async fn health_report(&self) -> serde_json::Value {
        let now = self.clock.now_ms();
        let state = self.state.lock().await;

        let mut available = 0usize;
        let mut rate_limited = 0usize;
        let mut cooling = 0usize;
        let accounts: Vec<serde_json::Value> = state
            .pool
            .accounts
            .iter()
            .enumerate()
            .map(|(index, account)| {
                let limited = KNOWN_FAMILIES
                    .iter()
                    .any(|family| account.is_rate_limited(family, None, now));
                let cooling_down = account.is_cooling_down(now);
                if cooling_down {
                    cooling += 1;
                } else if limited {
                    rate_limited += 1;
                } else {
                    available += 1;
                }

                let scores: serde_json::Map<String, serde_json::Value> = KNOWN_FAMILIES
                    .iter()
                    .map(|family| {
                        (
                            (*family).to_string(),
                            json!({
                                "health": state.health.peek_score(index, family),
                                "tokens": state.buckets.peek_tokens(index, family),
                            }),
                        )
                    })
                    .collect();

                json!({
                    "index": index,
                    "label": account.display_name(),
                    "status": if cooling_down {
                        "cooling_down"
                    } else if limited {
                        "rate_limited"
                    } else {
                        "available"
                    },
                    "lastUsed": account.last_used,
                    "families": scores,
                })
            })
            .collect();

        let total = state.pool.accounts.len();
        let status = if total == 0 || available == 0 {
            "unhealthy"
        } else if available == total {
            "healthy"
        } else {
            "degraded"
        };

        let breakers: Vec<serde_json::Value> = state
            .breakers
            .snapshot()
            .into_iter()
            .map(|(key, breaker_state)| json!({"key": key, "state": breaker_state.as_str()}))
            .collect();

        json!({
            "status": status,
            "accounts_total": total,
            "accounts_available": available,
            "accounts_rate_limited": rate_limited,
            "accounts_cooling_down": cooling,
            "active_index": state.pool.active_index,
            "accounts": accounts,
            "breakers": breakers,
        })
    }
}

/// Breaker registry key for an account.
fn breaker_key(account: &StoredAccount) -> String {
    format!("account:{}", account.key())
}

/// Resolve a user-supplied selector to a pool index.
fn find_account(accounts: &[StoredAccount], selector: &str) -> Option<usize> {
    if let Ok(index) = selector.parse::<usize>() {
        return (index < accounts.len()).then_some(index);
    }
    let trimmed = selector.trim();
    accounts.iter().position(|account| {
        account.account_id.as_deref() == Some(trimmed)
            || account
                .trimmed_email()
                .is_some_and(|email| email.eq_ignore_ascii_case(trimmed))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::ManualClock;
    use std::sync::Arc;

    const NOW: u64 = 10_000_000;

    fn metadata(id: &str, email: &str) -> AccountMetadata {
        AccountMetadata {
            account_id: Some(id.into()),
            email: Some(email.into()),
            account_id_source: Some("id-token".into()),
            refresh_token: format!("rt_{id}"),
        }
    }

    async fn gateway(dir: &tempfile::TempDir) -> (Gateway, Arc<ManualClock>) {
        let clock = ManualClock::starting_at(NOW);
        let store = AccountStore::with_clock(
            dir.path().join("openai-codex-accounts.json"),
            clock.clone(),
        );
        (Gateway::load_with_clock(store, clock.clone()).await, clock)
    }

    #[tokio::test]
    async fn empty_pool_acquires_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (gateway, _) = gateway(&dir).await;
        assert!(gateway.acquire("codex", None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn add_acquire_and_persist() {
        let dir = tempfile::tempdir().unwrap();
        let (gateway, _) = gateway(&dir).await;
        gateway.add_account(metadata("A", "a@x.co")).await.unwrap();
        gateway.add_account(metadata("B", "b@x.co")).await.unwrap();

        let acquired = gateway.acquire("codex", None).await.unwrap().unwrap();
        assert_eq!(acquired.account.last_used, NOW);

        // the durable file reflects the acquire
        let on_disk = gateway.store.load().await.unwrap();
        assert_eq!(on_disk.active_index_for("codex"), acquired.index);
    }

    #[tokio::test]
    async fn add_account_dedups_by_identity() {
        let dir = tempfile::tempdir().unwrap();
        let (gateway, _) = gateway(&dir).await;
        gateway.add_account(metadata("A", "a@x.co")).await.unwrap();
        gateway.add_account(metadata("A", "a@x.co")).await.unwrap();
        assert_eq!(gateway.accounts().await.len(), 1);
    }

    #[tokio::test]
    async fn add_account_rejects_blank_token() {
        let dir = tempfile::tempdir().unwrap();
        let (gateway, _) = gateway(&dir).await;
        let mut bad = metadata("A", "a@x.co");
        bad.refresh_token = "   ".into();
        assert!(gateway.add_account(bad).await.is_err());
    }

    #[tokio::test]
    async fn pool_cap_is_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let (gateway, _) = gateway(&dir).await;
        for i in 0..MAX_ACCOUNTS {
            gateway
                .add_account(metadata(&format!("A{i}"), &format!("a{i}@x.co")))
                .await
                .unwrap();
        }
        let err = gateway
            .add_account(metadata("overflow", "overflow@x.co"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[tokio::test]
    async fn rate_limit_report_stamps_reset_time() {
        let dir = tempfile::tempdir().unwrap();
        let (gateway, _) = gateway(&dir).await;
        gateway.add_account(metadata("A", "a@x.co")).await.unwrap();

        let decision = gateway
            .report_rate_limit(0, "codex", None, Some(1000.0), Some("usage_limit_reached"))
            .await
            .unwrap();
        assert_eq!(decision.attempt, 1);
        // quota reason: 1000 * 2^0 * 3.0
        assert_eq!(decision.delay_ms, 3000);

        let accounts = gateway.accounts().await;
        assert_eq!(
            accounts[0].rate_limit_reset_times.get("codex"),
            Some(&(NOW + 3000))
        );
        assert_eq!(
            accounts[0].last_switch_reason,
            Some(SwitchReason::RateLimit)
        );

        // the rate-limited account is no longer acquirable for the family
        assert!(gateway.acquire("codex", None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_rate_limit_does_not_restamp() {
        let dir = tempfile::tempdir().unwrap();
        let (gateway, clock) = gateway(&dir).await;
        gateway.add_account(metadata("A", "a@x.co")).await.unwrap();

        gateway
            .report_rate_limit(0, "codex", None, Some(1000.0), None)
            .await
            .unwrap();
        clock.advance(500);
        let dup = gateway
            .report_rate_limit(0, "codex", None, Some(1000.0), None)
            .await
            .unwrap();
        assert!(dup.is_duplicate);
        let accounts = gateway.accounts().await;
        // still the original stamp
        assert_eq!(
            accounts[0].rate_limit_reset_times.get("codex"),
            Some(&(NOW + 1000))
        );
    }

    #[tokio::test]
    async fn model_limit_leaves_family_usable() {
        let dir = tempfile::tempdir().unwrap();
        let (gateway, _) = gateway(&dir).await;
        gateway.add_account(metadata("A", "a@x.co")).await.unwrap();

        gateway
            .report_rate_limit(0, "codex", Some("codex-mini"), Some(1000.0), None)
            .await
            .unwrap();

        assert!(
            gateway
                .acquire("codex", Some("codex-mini"))
                .await
                .unwrap()
                .is_none()
        );
        assert!(gateway.acquire("codex", None).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn auth_failure_starts_cooldown() {
        let dir = tempfile::tempdir().unwrap();
        let (gateway, _) = gateway(&dir).await;
        gateway.add_account(metadata("A", "a@x.co")).await.unwrap();

        let err = Error::Auth {
            message: "refresh token rejected".into(),
            account_id: Some("A".into()),
            retryable: false,
        };
        gateway.report_failure(0, "codex", None, &err).await.unwrap();

        let accounts = gateway.accounts().await;
        assert_eq!(accounts[0].cooldown_reason, Some(CooldownReason::AuthFailure));
        assert_eq!(accounts[0].cooling_down_until, Some(NOW + AUTH_COOLDOWN_MS));
        assert!(gateway.acquire("codex", None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn network_failure_cooldown_expires() {
        let dir = tempfile::tempdir().unwrap();
        let (gateway, clock) = gateway(&dir).await;
        gateway.add_account(metadata("A", "a@x.co")).await.unwrap();

        gateway
            .report_failure(0, "codex", None, &Error::network("reset"))
            .await
            .unwrap();
        assert!(gateway.acquire("codex", None).await.unwrap().is_none());

        clock.advance(NETWORK_COOLDOWN_MS + 1);
        assert!(gateway.acquire("codex", None).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn repeated_failures_open_breaker_and_block_acquire() {
        let dir = tempfile::tempdir().unwrap();
        let (gateway, _) = gateway(&dir).await;
        gateway.add_account(metadata("A", "a@x.co")).await.unwrap();

        // Api errors carry no cooldown, so only the breaker isolates the
        // account.
        let err = Error::Api {
            status: 500,
            message: "boom".into(),
            headers: Default::default(),
        };
        for _ in 0..5 {
            gateway.report_failure(0, "codex", None, &err).await.unwrap();
        }
        assert!(gateway.acquire("codex", None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn probe_candidates_ranked_and_capped() {
        let dir = tempfile::tempdir().unwrap();
        let (gateway, _) = gateway(&dir).await;
        for i in 0..3 {
            gateway
                .add_account(metadata(&format!("A{i}"), &format!("a{i}@x.co")))
                .await
                .unwrap();
        }
        let candidates = gateway.probe_candidates("codex", None, 2).await;
        assert_eq!(candidates.len(), 2);
        assert_ne!(candidates[0].index, candidates[1].index);
    }

    #[tokio::test]
    async fn remove_account_by_each_selector_kind() {
        let dir = tempfile::tempdir().unwrap();
        let (gateway, _) = gateway(&dir).await;
        for i in 0..3 {
            gateway
                .add_account(metadata(&format!("A{i}"), &format!("a{i}@x.co")))
                .await
                .unwrap();
        }

        gateway.remove_account("0").await.unwrap();
        gateway.remove_account("A1").await.unwrap();
        gateway.remove_account("A2@X.CO").await.unwrap();
        assert!(gateway.accounts().await.is_empty());

        let err = gateway.remove_account("missing").await.unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[tokio::test]
    async fn rename_and_switch() {
        let dir = tempfile::tempdir().unwrap();
        let (gateway, _) = gateway(&dir).await;
        gateway.add_account(metadata("A", "a@x.co")).await.unwrap();
        gateway.add_account(metadata("B", "b@x.co")).await.unwrap();

        gateway.rename_account("A", "work").await.unwrap();
        assert_eq!(gateway.accounts().await[0].display_name(), "work");

        gateway.switch_account(1).await.unwrap();
        assert_eq!(gateway.active_index().await, 1);
        assert!(gateway.switch_account(5).await.is_err());
    }

    #[tokio::test]
    async fn health_report_counts_states() {
        let dir = tempfile::tempdir().unwrap();
        let (gateway, _) = gateway(&dir).await;
        for i in 0..3 {
            gateway
                .add_account(metadata(&format!("A{i}"), &format!("a{i}@x.co")))
                .await
                .unwrap();
        }
        gateway
            .report_rate_limit(0, "codex", None, Some(60_000.0), None)
            .await
            .unwrap();
        gateway
            .report_failure(1, "codex", None, &Error::network("reset"))
            .await
            .unwrap();

        let report = gateway.health_report().await;
        assert_eq!(report["status"], "degraded");
        assert_eq!(report["accounts_total"], 3);
        assert_eq!(report["accounts_available"], 1);
        assert_eq!(report["accounts_rate_limited"], 1);
        assert_eq!(report["accounts_cooling_down"], 1);
        // tokens never leak into the report
        let text = report.to_string();
        assert!(!text.contains("rt_A0"), "{text}");
    }

    #[tokio::test]
    async fn success_report_recovers_health() {
        let dir = tempfile::tempdir().unwrap();
        let (gateway, _) = gateway(&dir).await;
        gateway.add_account(metadata("A", "a@x.co")).await.unwrap();

        let err = Error::Api {
            status: 500,
            message: "boom".into(),
            headers: Default::default(),
        };
        gateway.report_failure(0, "codex", None, &err).await.unwrap();
        gateway.report_success(0, "codex", None).await;

        let report = gateway.health_report().await;
        assert_eq!(report["accounts"][0]["families"]["codex"]["health"], 95.0);
    }

    struct RotatingFlow;

    impl codex_auth::AuthFlow for RotatingFlow {
        fn login(
            &self,
        ) -> std::pin::Pin<
            Box<dyn std::future::Future<Output = Result<AccountMetadata>> + Send + '_>,
        > {
            Box::pin(async { Err(Error::timeout("not used here")) })
        }

        fn refresh<'a>(
            &'a self,
            refresh_token: &'a str,
        ) -> std::pin::Pin<
            Box<dyn std::future::Future<Output = Result<AccountMetadata>> + Send + 'a>,
        > {
            Box::pin(async move {
                if refresh_token == "rt_bad" {
                    return Err(Error::Auth {
                        message: "refresh token rejected".into(),
                        account_id: None,
                        retryable: false,
                    });
                }
                Ok(AccountMetadata {
                    account_id: None,
                    email: None,
                    account_id_source: None,
                    refresh_token: format!("{refresh_token}.rotated"),
                })
            })
        }
    }

    #[tokio::test]
    async fn refresh_rotates_tokens_and_cools_rejected_accounts() {
        let dir = tempfile::tempdir().unwrap();
        let (gateway, _) = gateway(&dir).await;
        gateway.add_account(metadata("A", "a@x.co")).await.unwrap();
        let mut bad = metadata("B", "b@x.co");
        bad.refresh_token = "rt_bad".into();
        gateway.add_account(bad).await.unwrap();

        let refreshed = gateway.refresh_credentials(&RotatingFlow).await;
        assert_eq!(refreshed, 1);

        let accounts = gateway.accounts().await;
        assert_eq!(accounts[0].refresh_token, "rt_A.rotated");
        assert_eq!(
            accounts[1].cooldown_reason,
            Some(CooldownReason::AuthFailure)
        );
        assert_eq!(
            accounts[1].cooling_down_until,
            Some(NOW + AUTH_COOLDOWN_MS)
        );

        // cooling accounts are skipped by the next cycle
        let refreshed = gateway.refresh_credentials(&RotatingFlow).await;
        assert_eq!(refreshed, 1);
        assert_eq!(
            gateway.accounts().await[0].refresh_token,
            "rt_A.rotated.rotated"
        );
    }

    struct FirstAccountWins;

    impl Upstream for FirstAccountWins {
        fn id(&self) -> &str {
            "test"
        }

        fn probe<'a>(
            &'a self,
            account: &'a StoredAccount,
            _cancel: tokio_util::sync::CancellationToken,
        ) -> std::pin::Pin<
            Box<dyn std::future::Future<Output = Result<ProbeResponse>> + Send + 'a>,
        > {
            Box::pin(async move {
                if account.account_id.as_deref() == Some("A0") {
                    Ok(ProbeResponse {
                        status: 200,
                        body: serde_json::json!({"ok": true}),
                    })
                } else {
                    Err(Error::network("refused"))
                }
            })
        }
    }

    #[tokio::test]
    async fn probe_race_returns_first_success() {
        let dir = tempfile::tempdir().unwrap();
        let (gateway, _) = gateway(&dir).await;
        for i in 0..3 {
            gateway
                .add_account(metadata(&format!("A{i}"), &format!("a{i}@x.co")))
                .await
                .unwrap();
        }

        let winner = gateway
            .probe_race(Arc::new(FirstAccountWins), "codex", None, 3)
            .await
            .unwrap();
        assert_eq!(winner.value.status, 200);
        assert_eq!(
            gateway.accounts().await[winner.index].account_id.as_deref(),
            Some("A0")
        );
    }

    #[tokio::test]
    async fn probe_race_with_empty_pool_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let (gateway, _) = gateway(&dir).await;
        assert!(
            gateway
                .probe_race(Arc::new(FirstAccountWins), "codex", None, 3)
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn refund_returns_acquire_token() {
        let dir = tempfile::tempdir().unwrap();
        let (gateway, _) = gateway(&dir).await;
        gateway.add_account(metadata("A", "a@x.co")).await.unwrap();

        let acquired = gateway.acquire("codex", None).await.unwrap().unwrap();
        assert!(gateway.refund(acquired.index, "codex", None).await);
        assert!(!gateway.refund(acquired.index, "codex", None).await);
    }
}

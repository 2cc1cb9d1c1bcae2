//! Pool schema types matching the durable file format

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Current schema version of the storage file.
pub const STORAGE_VERSION: u64 = 3;

/// Maximum number of accounts a pool may hold.
pub const MAX_ACCOUNTS: usize = 10;

/// Model families with shared quota semantics. The v1 migration replicates
/// a still-future reset time to each of these, and normalization fills the
/// per-family active index map for all of them.
pub const KNOWN_FAMILIES: &[&str] = &["codex", "gpt-5", "gpt-5-codex"];

/// Why the active account last changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SwitchReason {
    RateLimit,
    Initial,
    Rotation,
}

/// Why an account is temporarily banned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CooldownReason {
    AuthFailure,
    NetworkError,
}

/// Quota key for rate-limit and health tracking: `family` alone, or
/// `family:model` when a specific model is pinned.
pub fn quota_key(family: &str, model: Option<&str>) -> String {
    match model {
        Some(model) => format!("{family}:{model}"),
        None => family.to_string(),
    }
}

/// A usable upstream identity, as persisted in the pool file.
///
/// Timestamps are unix milliseconds. `rate_limit_reset_times` maps quota
/// keys to the instant the limit lifts; entries are considered expired once
/// now reaches the value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredAccount {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id_source: Option<String>,
    pub refresh_token: String,
    #[serde(default)]
    pub added_at: u64,
    #[serde(default)]
    pub last_used: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_switch_reason: Option<SwitchReason>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub rate_limit_reset_times: BTreeMap<String, u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooling_down_until: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_reason: Option<CooldownReason>,
}

impl StoredAccount {
    /// Dedup identity: `account_id` when present and non-empty, else the
    /// refresh token.
    pub fn key(&self) -> &str {
        match &self.account_id {
            Some(id) if !id.is_empty() => id,
            _ => &self.refresh_token,
        }
    }

    /// Trimmed email, or `None` when missing or blank.
    pub fn trimmed_email(&self) -> Option<&str> {
        self.email
            .as_deref()
            .map(str::trim)
            .filter(|email| !email.is_empty())
    }

    /// Drop rate-limit entries whose reset instant has passed.
    pub fn expire_stale_rate_limits(&mut self, now: u64) {
        self.rate_limit_reset_times.retain(|_, reset| *reset > now);
    }

    /// Whether the account is rate limited for this family (and, when a
    /// model is pinned, for that model's quota key). A family-level limit
    /// disables all of the family's models.
    pub fn is_rate_limited(&self, family: &str, model: Option<&str>, now: u64) -> bool {
        let active = |key: &str| {
            self.rate_limit_reset_times
                .get(key)
                .is_some_and(|reset| *reset > now)
        };
        if let Some(model) = model
            && active(&quota_key(family, Some(model)))
        {
            return true;
        }
        active(family)
    }

    /// Whether the account is in a cooldown window.
    pub fn is_cooling_down(&self, now: u64) -> bool {
        self.cooling_down_until.is_some_and(|until| until > now)
    }

    /// Label for user-facing listings: label, else email, else account id,
    /// else a placeholder.
    pub fn display_name(&self) -> &str {
        self.account_label
            .as_deref()
            .filter(|label| !label.is_empty())
            .or(self.trimmed_email())
            .or_else(|| {
                self.account_id
                    .as_deref()
                    .filter(|id| !id.is_empty())
            })
            .unwrap_or("(unnamed account)")
    }
}

/// The on-disk pool, schema v3.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountStorage {
    pub version: u64,
    pub accounts: Vec<StoredAccount>,
    pub active_index: usize,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub active_index_by_family: BTreeMap<String, usize>,
}

impl AccountStorage {
    /// A valid empty pool.
    pub fn empty() -> Self {
        Self {
            version: STORAGE_VERSION,
            accounts: Vec::new(),
            active_index: 0,
            active_index_by_family: BTreeMap::new(),
        }
    }

    /// Active index for a family, falling back to the pool default.
    pub fn active_index_for(&self, family: &str) -> usize {
        self.active_index_by_family
            .get(family)
            .copied()
            .unwrap_or(self.active_index)
    }
}

//! Total normalization of raw pool JSON
//!
//! Any parsed JSON value either yields a valid v3 pool or nothing; callers
//! never see partially valid state. The pass migrates v1 files, drops
//! malformed entries (collecting warnings), collapses duplicates keeping
//! the newest entry, and remaps the active indexes so they keep pointing at
//! the same logical accounts they referenced before dedup.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::schema::{AccountStorage, KNOWN_FAMILIES, STORAGE_VERSION, StoredAccount};

/// Result of a successful normalization pass.
#[derive(Debug)]
pub struct NormalizeOutcome {
    pub storage: AccountStorage,
    /// Non-fatal problems found in the raw data (dropped entries).
    pub warnings: Vec<String>,
    /// Whether the input was a v1 file that was migrated.
    pub migrated: bool,
}

/// Normalize raw parsed JSON into a v3 pool.
///
/// Returns `None` when the input is not an object, has an unknown version,
/// or has a non-array `accounts` field. Everything else is recoverable:
/// malformed entries are dropped with a warning.
pub fn normalize_account_storage(raw: &Value, now: u64) -> Option<NormalizeOutcome> {
    let obj = raw.as_object()?;
    let version = obj.get("version").and_then(Value::as_u64)?;
    if version != 1 && version != STORAGE_VERSION {
        return None;
    }
    let raw_accounts = obj.get("accounts")?.as_array()?;

    let raw_len = raw_accounts.len();
    let raw_active = obj
        .get("activeIndex")
        .and_then(Value::as_u64)
        .unwrap_or(0) as usize;
    let clamped_active = clamp_index(raw_active, raw_len);
    // Captured before dedup so the remap can follow the logical account.
    // When the entry has no accountId this falls back to the refresh token,
    // so rotating a token and reloading loses the remap; long-standing
    // behavior, kept as-is.
    let active_key = raw_accounts.get(clamped_active).and_then(raw_entry_key);

    let migrated = version == 1;
    let mut warnings = Vec::new();
    let mut parsed: Vec<StoredAccount> = Vec::new();
    for (idx, entry) in raw_accounts.iter().enumerate() {
        if !entry.is_object() {
            warnings.push(format!("account {idx}: not an object, dropped"));
            continue;
        }
        let mut entry = entry.clone();
        if migrated {
            migrate_v1_entry(&mut entry, now);
        }
        match serde_json::from_value::<StoredAccount>(entry) {
            Ok(acct) if acct.refresh_token.trim().is_empty() => {
                warnings.push(format!("account {idx}: empty refreshToken, dropped"));
            }
            Ok(acct) => parsed.push(acct),
            Err(err) => {
                warnings.push(format!("account {idx}: invalid shape ({err}), dropped"));
            }
        }
    }

    // Dedup by account key, then by trimmed email. Survivors keep the
    // position of the first occurrence; the newest duplicate's data wins.
    let mut survivors: Vec<StoredAccount> = Vec::new();
    for acct in parsed {
        match survivors.iter().position(|s| s.key() == acct.key()) {
            Some(pos) => {
                if replaces(&acct, &survivors[pos]) {
                    survivors[pos] = acct;
                }
            }
            None => survivors.push(acct),
        }
    }

    let mut accounts: Vec<StoredAccount> = Vec::new();
    for acct in survivors {
        let email = acct.trimmed_email().map(str::to_string);
        match email {
            Some(email) => {
                match accounts
                    .iter()
                    .position(|s| s.trimmed_email() == Some(email.as_str()))
                {
                    Some(pos) => {
                        if replaces(&acct, &accounts[pos]) {
                            accounts[pos] = acct;
                        }
                    }
                    None => accounts.push(acct),
                }
            }
            None => accounts.push(acct),
        }
    }

    let active_index = remap_index(&accounts, active_key.as_deref(), clamped_active);

    let mut active_index_by_family: BTreeMap<String, usize> = BTreeMap::new();
    if let Some(families) = obj.get("activeIndexByFamily").and_then(Value::as_object) {
        for (family, idx_val) in families {
            let Some(raw_idx) = idx_val.as_u64().map(|v| v as usize) else {
                continue;
            };
            let key = raw_accounts.get(raw_idx).and_then(raw_entry_key);
            let mapped = remap_index(&accounts, key.as_deref(), raw_idx);
            active_index_by_family.insert(family.clone(), mapped);
        }
    }
    if !accounts.is_empty() {
        for family in KNOWN_FAMILIES {
            active_index_by_family
                .entry((*family).to_string())
                .or_insert(active_index);
        }
    }

    Some(NormalizeOutcome {
        storage: AccountStorage {
            version: STORAGE_VERSION,
            accounts,
            active_index,
            active_index_by_family,
        },
        warnings,
        migrated,
    })
}

/// Normalize an already-typed pool (dedup + index remap). Used when merging
/// imported accounts into the current pool.
pub fn normalize_storage(storage: AccountStorage, now: u64) -> AccountStorage {
    match serde_json::to_value(&storage) {
        Ok(raw) => normalize_account_storage(&raw, now)
            .map(|outcome| outcome.storage)
            .unwrap_or_else(AccountStorage::empty),
        Err(_) => AccountStorage::empty(),
    }
}

/// Whether `candidate` (appearing at a later index) replaces `survivor`.
/// Newest wins: greater lastUsed, then greater addedAt, then later index.
fn replaces(candidate: &StoredAccount, survivor: &StoredAccount) -> bool {
    (candidate.last_used, candidate.added_at) >= (survivor.last_used, survivor.added_at)
}

fn clamp_index(index: usize, len: usize) -> usize {
    if len == 0 { 0 } else { index.min(len - 1) }
}

/// Find the survivor carrying `key`, falling back to clamping the raw index.
fn remap_index(accounts: &[StoredAccount], key: Option<&str>, raw_index: usize) -> usize {
    key.and_then(|key| accounts.iter().position(|a| a.key() == key))
        .unwrap_or_else(|| clamp_index(raw_index, accounts.len()))
}

/// Dedup identity of a raw (unvalidated) entry.
fn raw_entry_key(entry: &Value) -> Option<String> {
    let obj = entry.as_object()?;
    if let Some(id) = obj.get("accountId").and_then(Value::as_str)
        && !id.is_empty()
    {
        return Some(id.to_string());
    }
    obj.get("refreshToken")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Replace a v1 scalar `rateLimitResetTime` with the per-family mapping,
/// populated for every known family iff the scalar is still in the future.
fn migrate_v1_entry(entry: &mut Value, now: u64) {
    let Some(obj) = entry.as_object_mut() else {
        return;
    };
    let Some(reset) = obj.remove("rateLimitResetTime") else {
        return;
    };
    let reset_ms = reset.as_u64().or_else(|| {
        reset
            .as_f64()
            .filter(|f| f.is_finite() && *f >= 0.0)
            .map(|f| f as u64)
    });
    if let Some(reset_ms) = reset_ms
        && reset_ms > now
    {
        let map: serde_json::Map<String, Value> = KNOWN_FAMILIES
            .iter()
            .map(|family| ((*family).to_string(), Value::from(reset_ms)))
            .collect();
        obj.insert("rateLimitResetTimes".into(), Value::Object(map));
    }
}

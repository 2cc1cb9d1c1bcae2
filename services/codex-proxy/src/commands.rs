//! CLI command implementations
//!
//! Human-readable output on stdout, non-zero exit via the error return.
//! All pool mutations go through the gateway so the durable file stays
//! consistent.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use codex_auth::{AuthRateLimitConfig, AuthRateLimiter};
use common::system_clock;

use crate::gateway::Gateway;
use crate::login::InteractiveFlow;

/// `auth login`: run OAuth under the login rate limiter and append the
/// account.
pub async fn login(gateway: &Arc<Gateway>) -> Result<()> {
    let mut limiter = AuthRateLimiter::new(AuthRateLimitConfig::default(), system_clock());
    // Attempts are budgeted per identity; until the login completes we only
    // know the machine-local default key.
    let key = "interactive-login";
    limiter.check(key)?;
    limiter.record_attempt(key);

    let flow = InteractiveFlow::new();
    let metadata = codex_auth::AuthFlow::login(&flow)
        .await
        .context("OAuth login failed")?;

    let label = metadata
        .email
        .clone()
        .or_else(|| metadata.account_id.clone())
        .unwrap_or_else(|| "new account".to_string());
    let index = gateway.add_account(metadata).await?;
    println!("Added {label} as account #{index}.");
    Ok(())
}

/// `accounts list`
pub async fn list(gateway: &Arc<Gateway>) -> Result<()> {
    let accounts = gateway.accounts().await;
    if accounts.is_empty() {
        println!("No accounts. Run `codex-proxy auth login` to add one.");
        return Ok(());
    }
    let active = gateway.active_index().await;
    for (index, account) in accounts.iter().enumerate() {
        let marker = if index == active { "*" } else { " " };
        let email = account.trimmed_email().unwrap_or("-");
        println!("{marker} {index}  {}  {email}", account.display_name());
    }
    Ok(())
}

/// `accounts remove <idx|id|email>`
pub async fn remove(gateway: &Arc<Gateway>, selector: &str) -> Result<()> {
    let removed = gateway.remove_account(selector).await?;
    println!("Removed {}.", removed.display_name());
    Ok(())
}

/// `accounts rename <idx|id|email> <label>`
pub async fn rename(gateway: &Arc<Gateway>, selector: &str, label: &str) -> Result<()> {
    gateway.rename_account(selector, label).await?;
    println!("Renamed {selector} to {label:?}.");
    Ok(())
}

/// `accounts switch <idx>`
pub async fn switch(gateway: &Arc<Gateway>, index: usize) -> Result<()> {
    gateway.switch_account(index).await?;
    println!("Account #{index} is now active.");
    Ok(())
}

/// `accounts export <path> [--force]`
pub async fn export(gateway: &Arc<Gateway>, path: &str, force: bool) -> Result<()> {
    let path = codex_store::paths::expand_tilde(path);
    let count = gateway.export(&path, force).await?;
    println!("Exported {count} account(s) to {}.", path.display());
    Ok(())
}

/// `accounts import <path>`
pub async fn import(gateway: &Arc<Gateway>, path: &str) -> Result<()> {
    let path = codex_store::paths::expand_tilde(path);
    if !path.exists() {
        bail!("{} does not exist", path.display());
    }
    let outcome = gateway.import(&path).await?;
    println!(
        "Imported {} account(s), skipped {} duplicate(s); pool now holds {}.",
        outcome.imported, outcome.skipped, outcome.total
    );
    Ok(())
}

/// `accounts recover`: scan known storage locations for stray pools and
/// merge them into the active one.
pub async fn recover(gateway: &Arc<Gateway>) -> Result<()> {
    let active = gateway.storage_path().to_path_buf();
    let candidates: Vec<_> = codex_store::discover_recovery_paths()
        .into_iter()
        .filter(|path| *path != active)
        .collect();
    if candidates.is_empty() {
        println!("No stray account files found.");
        return Ok(());
    }

    let mut recovered = 0;
    for path in candidates {
        match gateway.import(&path).await {
            Ok(outcome) => {
                println!(
                    "Merged {} account(s) from {}.",
                    outcome.imported,
                    path.display()
                );
                recovered += outcome.imported;
            }
            Err(err) => println!("Skipping {}: {err}", path.display()),
        }
    }
    println!("Recovered {recovered} account(s).");
    Ok(())
}

/// `accounts health`
pub async fn health(gateway: &Arc<Gateway>) -> Result<()> {
    let report = gateway.health_report().await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

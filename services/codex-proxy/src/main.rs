//! Codex gateway binary
//!
//! CLI surface over the account pool (login, list, remove, rename, switch,
//! export, import, health) plus a `serve` mode that exposes the pool
//! health and Prometheus metrics over a local admin listener.

mod admin;
mod cli;
mod commands;
mod config;
mod gateway;
mod login;
mod metrics;
mod prompt_cache;
mod refresh;
mod shutdown;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use codex_store::AccountStore;

use crate::cli::{AccountsCommand, AuthCommand, Cli, Command};
use crate::config::Settings;
use crate::gateway::Gateway;

#[tokio::main]
async fn main() -> Result<()> {
    common::logging::init_tracing();

    let cli = Cli::parse();
    let settings = Settings::from_env(cli.global).context("failed to resolve settings")?;
    info!(storage = %settings.storage_path.display(), "using account storage");

    let store = AccountStore::new(settings.storage_path.clone());
    let gateway = Arc::new(Gateway::load(store).await);

    match cli.command {
        Command::Auth { command } => match command {
            AuthCommand::Login => commands::login(&gateway).await,
        },
        Command::Accounts { command } => match command {
            AccountsCommand::List => commands::list(&gateway).await,
            AccountsCommand::Remove { selector } => commands::remove(&gateway, &selector).await,
            AccountsCommand::Rename { selector, label } => {
                commands::rename(&gateway, &selector, &label).await
            }
            AccountsCommand::Switch { index } => commands::switch(&gateway, index).await,
            AccountsCommand::Export { path, force } => {
                commands::export(&gateway, &path, force).await
            }
            AccountsCommand::Import { path } => commands::import(&gateway, &path).await,
            AccountsCommand::Recover => commands::recover(&gateway).await,
            AccountsCommand::Health => commands::health(&gateway).await,
        },
        Command::Serve { listen } => admin::serve(gateway, listen, &settings).await,
    }
}

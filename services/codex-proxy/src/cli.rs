//! Command-line surface

use std::net::SocketAddr;

use clap::{Parser, Subcommand};

/// Multi-account gateway for the ChatGPT/Codex backend.
#[derive(Debug, Parser)]
#[command(name = "codex-proxy", version, about)]
pub struct Cli {
    /// Use the global account pool even inside a project checkout.
    #[arg(long, global = true)]
    pub global: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Authentication commands.
    Auth {
        #[command(subcommand)]
        command: AuthCommand,
    },
    /// Account pool management.
    Accounts {
        #[command(subcommand)]
        command: AccountsCommand,
    },
    /// Run the admin/health listener.
    Serve {
        /// Address for the admin listener.
        #[arg(long, default_value = "127.0.0.1:9090")]
        listen: SocketAddr,
    },
}

#[derive(Debug, Subcommand)]
pub enum AuthCommand {
    /// Add an account via the OAuth login flow.
    Login,
}

#[derive(Debug, Subcommand)]
pub enum AccountsCommand {
    /// List pool accounts with status.
    List,
    /// Remove an account by index, account id, or email.
    Remove { selector: String },
    /// Set an account's display label.
    Rename { selector: String, label: String },
    /// Make an account the default active one.
    Switch { index: usize },
    /// Write the pool to a backup file. `~` expands to the home directory.
    Export {
        path: String,
        /// Overwrite an existing destination.
        #[arg(long)]
        force: bool,
    },
    /// Merge accounts from a backup file into the pool.
    Import { path: String },
    /// Scan known storage locations for stray account files and merge
    /// them.
    Recover,
    /// Show the health report.
    Health,
}

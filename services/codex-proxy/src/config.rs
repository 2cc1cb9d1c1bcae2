//! Environment-derived settings
//!
//! The gateway has no config file; everything comes from the environment
//! and the working directory. Project checkouts get a project-local pool,
//! everything else shares the global one under the home directory.

use std::path::PathBuf;

use anyhow::{Context, Result};

/// Resolved runtime settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Durable pool location.
    pub storage_path: PathBuf,
    /// Override for the prompt cache source URL.
    pub prompt_url_override: Option<String>,
    /// Whether per-request file logging is enabled.
    pub request_logging: bool,
}

impl Settings {
    /// Resolve settings from the environment and working directory.
    ///
    /// `force_global` skips project detection and uses the home-directory
    /// pool.
    pub fn from_env(force_global: bool) -> Result<Self> {
        let project_dir = if force_global {
            None
        } else {
            std::env::current_dir().ok()
        };
        let storage_path = codex_store::resolve_storage_path(project_dir.as_deref())
            .context("resolving storage path")?;

        Ok(Self {
            storage_path,
            prompt_url_override: std::env::var("OPENCODE_CODEX_PROMPT_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
            request_logging: std::env::var("ENABLE_PLUGIN_REQUEST_LOGGING").ok().as_deref()
                == Some("1"),
        })
    }
}

//! Remote prompt cache with conditional refresh
//!
//! The upstream prompt template is fetched over HTTP and cached in memory
//! with a disk mirror. Within the TTL the snapshot is served as-is. After
//! the TTL the stale value is still served while a background refresh
//! revalidates with `If-None-Match`; a 304 keeps the body and refreshes
//! the metadata. Sources are tried in order, and any total failure falls
//! back to the last good value.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use common::{Clock, Error, Result, SharedClock};

/// Default prompt sources, tried in order.
const DEFAULT_SOURCES: &[&str] = &[
    "https://raw.githubusercontent.com/openai/codex/main/codex-rs/core/prompt.md",
    "https://raw.githubusercontent.com/openai/codex/main/codex-cli/prompt.md",
];

/// Snapshot TTL before revalidation.
const TTL_MS: u64 = 15 * 60 * 1000;

/// Outcome of fetching one source.
#[derive(Debug)]
pub enum FetchOutcome {
    /// 200 with a new body (and possibly a new etag).
    Fresh { body: String, etag: Option<String> },
    /// 304; the cached body is still current.
    NotModified,
}

/// Fetch seam so the cache logic is testable without a network.
pub trait PromptFetcher: Send + Sync {
    fn fetch<'a>(
        &'a self,
        url: &'a str,
        etag: Option<&'a str>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<FetchOutcome>> + Send + 'a>>;
}

/// Production fetcher over reqwest.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
        }
    }
}

impl PromptFetcher for HttpFetcher {
    fn fetch<'a>(
        &'a self,
        url: &'a str,
        etag: Option<&'a str>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<FetchOutcome>> + Send + 'a>>
    {
        Box::pin(async move {
            let mut request = self.client.get(url);
            if let Some(etag) = etag {
                request = request.header("if-none-match", etag);
            }
            let response = request
                .send()
                .await
                .map_err(|err| Error::network(format!("prompt fetch failed: {err}")))?;

            if response.status().as_u16() == 304 {
                return Ok(FetchOutcome::NotModified);
            }
            if !response.status().is_success() {
                return Err(Error::Api {
                    status: response.status().as_u16(),
                    message: format!("prompt source returned {}", response.status()),
                    headers: Default::default(),
                });
            }
            let etag = response
                .headers()
                .get("etag")
                .and_then(|value| value.to_str().ok())
                .map(str::to_string);
            let body = response
                .text()
                .await
                .map_err(|err| Error::network(format!("prompt body read failed: {err}")))?;
            Ok(FetchOutcome::Fresh { body, etag })
        })
    }
}

#[derive(Debug, Default, Clone)]
struct CacheState {
    body: Option<String>,
    etag: Option<String>,
    fetched_at: u64,
}

/// In-memory prompt snapshot with disk mirror.
pub struct PromptCache {
    sources: Vec<String>,
    mirror_path: Option<PathBuf>,
    fetcher: Arc<dyn PromptFetcher>,
    clock: SharedClock,
    state: Mutex<CacheState>,
}

impl PromptCache {
    pub fn new(
        override_url: Option<String>,
        mirror_path: Option<PathBuf>,
        fetcher: Arc<dyn PromptFetcher>,
        clock: SharedClock,
    ) -> Self {
        let mut sources: Vec<String> = Vec::new();
        if let Some(url) = override_url {
            sources.push(url);
        }
        sources.extend(DEFAULT_SOURCES.iter().map(|s| s.to_string()));
        Self {
            sources,
            mirror_path,
            fetcher,
            clock,
            state: Mutex::new(CacheState::default()),
        }
    }

    /// Seed the in-memory snapshot from the disk mirror, if present.
    pub async fn load_mirror(&self) {
        let Some(path) = &self.mirror_path else {
            return;
        };
        match tokio::fs::read_to_string(path).await {
            Ok(body) if !body.is_empty() => {
                let mut state = self.state.lock().await;
                if state.body.is_none() {
                    debug!(path = %path.display(), "prompt mirror loaded");
                    // Mirror content is stale by definition; leave
                    // fetched_at at zero so the first get revalidates.
                    state.body = Some(body);
                }
            }
            _ => {}
        }
    }

    /// Current prompt. Fresh snapshots are returned directly; stale ones
    /// are refreshed inline (the caller is about to use the result, and a
    /// failed refresh still returns the last good value).
    pub async fn get(&self) -> Option<String> {
        let now = self.clock.now_ms();
        {
            let state = self.state.lock().await;
            if let Some(body) = &state.body
                && now.saturating_sub(state.fetched_at) < TTL_MS
            {
                return Some(body.clone());
            }
        }
        self.refresh().await;
        self.state.lock().await.body.clone()
    }

    /// Try each source in order; first success wins. Failure everywhere
    /// keeps the last good value.
    pub async fn refresh(&self) {
        let etag = self.state.lock().await.etag.clone();
        for url in &self.sources {
            match self.fetcher.fetch(url, etag.as_deref()).await {
                Ok(FetchOutcome::NotModified) => {
                    let mut state = self.state.lock().await;
                    state.fetched_at = self.clock.now_ms();
                    debug!(url, "prompt not modified");
                    return;
                }
                Ok(FetchOutcome::Fresh { body, etag }) => {
                    {
                        let mut state = self.state.lock().await;
                        state.body = Some(body.clone());
                        state.etag = etag;
                        state.fetched_at = self.clock.now_ms();
                    }
                    self.write_mirror(&body).await;
                    debug!(url, bytes = body.len(), "prompt refreshed");
                    return;
                }
                Err(err) => {
                    warn!(url, error = %err, "prompt source failed, trying next");
                }
            }
        }
        warn!("all prompt sources failed; serving last good value");
    }

    async fn write_mirror(&self, body: &str) {
        let Some(path) = &self.mirror_path else {
            return;
        };
        if let Some(parent) = path.parent()
            && let Err(err) = tokio::fs::create_dir_all(parent).await
        {
            warn!(error = %err, "failed to create prompt mirror directory");
            return;
        }
        if let Err(err) = tokio::fs::write(path, body).await {
            warn!(path = %path.display(), error = %err, "failed to write prompt mirror");
        }
    }
}

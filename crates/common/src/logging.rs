//! Tracing subscriber setup and bounded operation timers
//!
//! Level resolution honors the plugin environment variables:
//! `DEBUG_CODEX_PLUGIN=1` forces debug, otherwise `CODEX_PLUGIN_LOG_LEVEL`
//! picks one of debug/info/warn/error (anything else falls back to info).
//! The structured JSON layer is always installed; `CODEX_CONSOLE_LOG=1`
//! adds a human-readable console sideline.

use std::num::NonZeroUsize;
use std::time::Instant;

use lru::LruCache;
use tracing::debug;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Valid log levels for `CODEX_PLUGIN_LOG_LEVEL`.
const LEVELS: &[&str] = &["debug", "info", "warn", "error"];

/// Maximum number of concurrently tracked timers.
const TIMER_CAP: usize = 100;

/// Resolve the effective log level from the raw env values.
///
/// `debug_flag` is the value of `DEBUG_CODEX_PLUGIN`, `level` the value of
/// `CODEX_PLUGIN_LOG_LEVEL`. Invalid levels fall back to info.
pub fn resolve_log_level(debug_flag: Option<&str>, level: Option<&str>) -> &'static str {
    if debug_flag == Some("1") {
        return "debug";
    }
    match level {
        Some(raw) => {
            let lower = raw.trim().to_lowercase();
            LEVELS
                .iter()
                .find(|l| **l == lower)
                .copied()
                .unwrap_or("info")
        }
        None => "info",
    }
}

/// Install the global tracing subscriber.
///
/// Reads the plugin env variables for level and console sideline. `RUST_LOG`
/// wins over both when set, so operators keep the usual escape hatch.
pub fn init_tracing() {
    let level = resolve_log_level(
        std::env::var("DEBUG_CODEX_PLUGIN").ok().as_deref(),
        std::env::var("CODEX_PLUGIN_LOG_LEVEL").ok().as_deref(),
    );
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let console = std::env::var("CODEX_CONSOLE_LOG").ok().as_deref() == Some("1");

    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().json());

    if console {
        registry
            .with(tracing_subscriber::fmt::layer().compact().with_target(false))
            .init();
    } else {
        registry.init();
    }
}

/// Named operation timers with a bounded LRU so abandoned timers cannot
/// accumulate. Starting a timer past the cap evicts the oldest entry.
pub struct Timers {
    entries: LruCache<String, Instant>,
}

impl Default for Timers {
    fn default() -> Self {
        Self::new()
    }
}

impl Timers {
    pub fn new() -> Self {
        Self {
            entries: LruCache::new(NonZeroUsize::new(TIMER_CAP).expect("nonzero cap")),
        }
    }

    /// Start (or restart) a timer under `label`.
    pub fn start(&mut self, label: impl Into<String>) {
        self.entries.put(label.into(), Instant::now());
    }

    /// Stop a timer and return its elapsed milliseconds.
    ///
    /// Returns `None` when the timer was never started or already evicted.
    pub fn stop(&mut self, label: &str) -> Option<u64> {
        let started = self.entries.pop(label)?;
        let elapsed = started.elapsed().as_millis() as u64;
        debug!(timer = label, elapsed_ms = elapsed, "timer stopped");
        Some(elapsed)
    }

    /// Number of timers currently tracked.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no timers are tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

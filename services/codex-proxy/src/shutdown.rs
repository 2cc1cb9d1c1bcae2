//! Shutdown coordinator
//!
//! Components register cleanup callbacks in order; SIGINT/SIGTERM run them
//! all and exit 0. A cleanup that fails is logged and never blocks the
//! rest of the list. Signal handlers are installed at most once per
//! process.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Mutex;
use tracing::{info, warn};

type CleanupFuture = Pin<Box<dyn Future<Output = common::Result<()>> + Send>>;
type CleanupFn = Box<dyn FnOnce() -> CleanupFuture + Send>;

/// Ordered registry of cleanup callbacks.
#[derive(Default)]
pub struct ShutdownCoordinator {
    callbacks: Mutex<Vec<(String, CleanupFn)>>,
    handlers_installed: AtomicBool,
    cleanup_ran: AtomicBool,
}

impl ShutdownCoordinator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a cleanup callback. Callbacks run in registration order.
    pub async fn register<F, Fut>(&self, name: impl Into<String>, callback: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = common::Result<()>> + Send + 'static,
    {
        let mut callbacks = self.callbacks.lock().await;
        callbacks.push((name.into(), Box::new(move || Box::pin(callback()))));
    }

    /// Drain and run every registered callback, swallowing individual
    /// failures. Safe to call more than once; later calls only see
    /// callbacks registered since the previous drain.
    pub async fn run_cleanup(&self) {
        self.cleanup_ran.store(true, Ordering::SeqCst);
        let callbacks = {
            let mut callbacks = self.callbacks.lock().await;
            std::mem::take(&mut *callbacks)
        };
        for (name, callback) in callbacks {
            match callback().await {
                Ok(()) => info!(step = %name, "cleanup finished"),
                Err(err) => warn!(step = %name, error = %err, "cleanup failed, continuing"),
            }
        }
    }

    /// Whether a cleanup pass has run.
    pub fn cleanup_ran(&self) -> bool {
        self.cleanup_ran.load(Ordering::SeqCst)
    }

    /// Install one-shot SIGINT/SIGTERM handlers that run cleanup and exit
    /// with code 0. Subsequent calls are no-ops.
    pub fn install_signal_handlers(self: &Arc<Self>) {
        if self.handlers_installed.swap(true, Ordering::SeqCst) {
            return;
        }
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            wait_for_signal().await;
            coordinator.run_cleanup().await;
            std::process::exit(0);
        });
    }
}

/// Resolve on SIGINT or SIGTERM.
pub async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}

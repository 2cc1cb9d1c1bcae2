//! Admin/health listener
//!
//! Local-only axum server for operators:
//! - `GET /health`: aggregated pool/tracker/breaker report
//! - `GET /metrics`: Prometheus exposition
//! - `GET /admin/accounts`: account listing without credentials
//!
//! Runs until SIGINT/SIGTERM, then drains the shutdown coordinator.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tracing::info;

use crate::config::Settings;
use crate::gateway::Gateway;
use crate::prompt_cache::{HttpFetcher, PromptCache};
use crate::shutdown::{ShutdownCoordinator, wait_for_signal};

#[derive(Clone)]
struct AdminState {
    gateway: Arc<Gateway>,
    metrics: PrometheusHandle,
    started_at: Instant,
}

/// Run the admin listener until a shutdown signal arrives.
pub async fn serve(gateway: Arc<Gateway>, listen: SocketAddr, settings: &Settings) -> Result<()> {
    let metrics = crate::metrics::install_recorder();

    // Warm the prompt cache alongside the listener; the plugin host reads
    // it through this process.
    let prompt_cache = Arc::new(PromptCache::new(
        settings.prompt_url_override.clone(),
        settings
            .storage_path
            .parent()
            .map(|dir| dir.join("prompt-cache.md")),
        Arc::new(HttpFetcher::new()),
        common::system_clock(),
    ));
    prompt_cache.load_mirror().await;
    {
        let prompt_cache = prompt_cache.clone();
        tokio::spawn(async move {
            prompt_cache.get().await;
        });
    }

    // Proactive credential refresh, aborted through the shutdown
    // coordinator.
    let refresh_handle = crate::refresh::spawn_refresh_task(
        gateway.clone(),
        Arc::new(crate::login::InteractiveFlow::new()),
        std::time::Duration::from_secs(900),
    );

    let coordinator = ShutdownCoordinator::new();
    coordinator
        .register("stop-credential-refresh", move || async move {
            refresh_handle.abort();
            Ok(())
        })
        .await;
    coordinator
        .register("log-shutdown", || async {
            info!("admin listener stopped");
            Ok(())
        })
        .await;

    let state = AdminState {
        gateway,
        metrics,
        started_at: Instant::now(),
    };
    let mut app = Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/admin/accounts", get(accounts_handler))
        .layer(tower::limit::ConcurrencyLimitLayer::new(64))
        .with_state(state);
    if settings.request_logging {
        app = app.layer(axum::middleware::from_fn(log_request));
    }

    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("failed to bind to {listen}"))?;
    info!(addr = %listen, "admin listener ready");

    let shutdown = {
        let coordinator = coordinator.clone();
        async move {
            wait_for_signal().await;
            coordinator.run_cleanup().await;
        }
    };
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("admin server error")?;

    info!("shutdown complete");
    Ok(())
}

/// Per-request log line with a correlation ID held for the request's
/// duration. Enabled by `ENABLE_PLUGIN_REQUEST_LOGGING=1`.
async fn log_request(
    request: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let correlation_id = common::new_correlation_id();
    common::set_correlation_id(correlation_id.clone());
    let method = request.method().clone();
    let uri = request.uri().clone();

    let response = next.run(request).await;

    info!(
        correlation_id = %correlation_id,
        method = %method,
        uri = %uri,
        status = response.status().as_u16(),
        "request served"
    );
    common::clear_correlation_id();
    response
}

/// Health report plus process uptime.
async fn health_handler(State(state): State<AdminState>) -> impl IntoResponse {
    let mut report = state.gateway.health_report().await;
    if let Some(object) = report.as_object_mut() {
        object.insert(
            "uptime_seconds".into(),
            state.started_at.elapsed().as_secs().into(),
        );
    }
    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        report.to_string(),
    )
}

/// Prometheus text exposition.
async fn metrics_handler(State(state): State<AdminState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

/// Account listing. Never exposes tokens; the health report is already
/// redaction-safe.
async fn accounts_handler(State(state): State<AdminState>) -> impl IntoResponse {
    let report = state.gateway.health_report().await;
    let accounts = report
        .get("accounts")
        .cloned()
        .unwrap_or(serde_json::json!([]));
    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        serde_json::json!({ "accounts": accounts }).to_string(),
    )
}

//! HTTP gateway
//!
//! Read-mostly surface composed on top of the cluster adapter; it never
//! drives the sentinel state machine:
//! - `GET /pg/alive`, `/pg/inrecovery`, `/pg/version`, `/pg/masterinfo` (JSON)
//! - `POST /pg/stop`, `/pg/start`, `/pg/promote`
//! - `GET /metrics` (Prometheus exposition, when enabled)

pub mod handlers;
pub mod metrics;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

use crate::error::Result;
use crate::pg::Cluster;

/// Bound on handling time for any single request; slow probes answer with
/// 408 instead of holding the connection.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Bound on accepted request body size.
pub const MAX_REQUEST_BODY_BYTES: usize = 1 << 20;

/// Shared state passed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub cluster: Arc<dyn Cluster>,
    pub hostname: String,
    pub prometheus_handle: Option<PrometheusHandle>,
}

/// Build the gateway router. `/metrics` is mounted only when a Prometheus
/// recorder was installed.
pub fn router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/pg/alive", get(handlers::alive))
        .route("/pg/inrecovery", get(handlers::in_recovery))
        .route("/pg/version", get(handlers::version))
        .route("/pg/masterinfo", get(handlers::master_info))
        .route("/pg/stop", post(handlers::stop))
        .route("/pg/start", post(handlers::start))
        .route("/pg/promote", post(handlers::promote));

    if state.prometheus_handle.is_some() {
        router = router.route("/metrics", get(handlers::metrics_endpoint));
    }

    router
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(RequestBodyLimitLayer::new(MAX_REQUEST_BODY_BYTES))
        .with_state(state)
}

/// Serve the gateway until `shutdown` is cancelled.
pub async fn serve(addr: &str, state: AppState, shutdown: CancellationToken) -> Result<()> {
    let app = router(state);
    let listener = TcpListener::bind(addr).await?;
    log::info!("serving http on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    log::info!("http stopped");
    Ok(())
}

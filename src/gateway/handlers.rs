//! HTTP request handlers.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use super::AppState;
use super::metrics;
use crate::hostinfo::HostInfo;

/// Handler-level error: every failed cluster call maps to a 500 with the
/// error message in the body.
#[derive(Debug)]
pub struct ApiError(crate::Error);

impl From<crate::Error> for ApiError {
    fn from(e: crate::Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Internal Server Error: {}", self.0),
        )
            .into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct AliveResponse {
    pub alive: bool,
}

#[derive(Debug, Serialize)]
pub struct InRecoveryResponse {
    pub inrecovery: bool,
}

#[derive(Debug, Serialize)]
pub struct VersionResponse {
    pub major: u32,
    pub minor: u32,
}

/// `GET /pg/alive`
pub async fn alive(State(state): State<AppState>) -> Result<Json<AliveResponse>, ApiError> {
    let alive = state.cluster.alive().await?;
    Ok(Json(AliveResponse { alive }))
}

/// `GET /pg/inrecovery`
pub async fn in_recovery(
    State(state): State<AppState>,
) -> Result<Json<InRecoveryResponse>, ApiError> {
    let inrecovery = state.cluster.in_recovery().await?;
    Ok(Json(InRecoveryResponse { inrecovery }))
}

/// `GET /pg/version`
pub async fn version(State(state): State<AppState>) -> Result<Json<VersionResponse>, ApiError> {
    let (major, minor) = state.cluster.version().await?;
    Ok(Json(VersionResponse { major, minor }))
}

/// `GET /pg/masterinfo` — `null` when the instance is not streaming.
pub async fn master_info(
    State(state): State<AppState>,
) -> Result<Json<Option<HostInfo>>, ApiError> {
    let info = state.cluster.master_info().await?;
    Ok(Json(info))
}

/// `POST /pg/stop`
pub async fn stop(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state.cluster.stop().await?;
    Ok(StatusCode::OK)
}

/// `POST /pg/start`
pub async fn start(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state.cluster.start().await?;
    Ok(StatusCode::OK)
}

/// `POST /pg/promote`
pub async fn promote(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state.cluster.promote().await?;
    Ok(StatusCode::OK)
}

/// `GET /metrics` — probe gauges are refreshed before rendering so every
/// scrape reflects a live probe.
pub async fn metrics_endpoint(State(state): State<AppState>) -> String {
    metrics::refresh_probes(&state.cluster, &state.hostname).await;
    match &state.prometheus_handle {
        Some(handle) => handle.render(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use crate::pg::Cluster;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct StubCluster {
        alive: bool,
        in_recovery: bool,
        master: Option<HostInfo>,
    }

    #[async_trait]
    impl Cluster for StubCluster {
        async fn version(&self) -> Result<(u32, u32)> {
            Ok((16, 2))
        }
        async fn alive(&self) -> Result<bool> {
            Ok(self.alive)
        }
        async fn in_recovery(&self) -> Result<bool> {
            Ok(self.in_recovery)
        }
        async fn master_info(&self) -> Result<Option<HostInfo>> {
            Ok(self.master.clone())
        }
        async fn stop(&self) -> Result<()> {
            Ok(())
        }
        async fn start(&self) -> Result<()> {
            Ok(())
        }
        async fn promote(&self) -> Result<()> {
            Err(Error::NotInRecovery)
        }
        async fn backup(&self, _host: &str, _port: u16) -> Result<()> {
            Ok(())
        }
    }

    fn state(cluster: StubCluster) -> AppState {
        AppState {
            cluster: Arc::new(cluster),
            hostname: "test".to_string(),
            prometheus_handle: None,
        }
    }

    #[tokio::test]
    async fn test_alive_shape() {
        let state = state(StubCluster {
            alive: true,
            in_recovery: false,
            master: None,
        });
        let Json(body) = alive(State(state)).await.unwrap();
        assert_eq!(serde_json::to_string(&body).unwrap(), r#"{"alive":true}"#);
    }

    #[tokio::test]
    async fn test_version_shape() {
        let state = state(StubCluster {
            alive: true,
            in_recovery: false,
            master: None,
        });
        let Json(body) = version(State(state)).await.unwrap();
        assert_eq!(
            serde_json::to_string(&body).unwrap(),
            r#"{"major":16,"minor":2}"#
        );
    }

    #[tokio::test]
    async fn test_master_info_shapes() {
        let streaming = state(StubCluster {
            alive: true,
            in_recovery: true,
            master: Some(HostInfo::new("m", 5432)),
        });
        let Json(body) = master_info(State(streaming)).await.unwrap();
        assert_eq!(
            serde_json::to_string(&body).unwrap(),
            r#"{"host":"m","port":5432}"#
        );

        let detached = state(StubCluster {
            alive: true,
            in_recovery: false,
            master: None,
        });
        let Json(body) = master_info(State(detached)).await.unwrap();
        assert_eq!(serde_json::to_string(&body).unwrap(), "null");
    }

    #[tokio::test]
    async fn test_promote_failure_maps_to_500() {
        let state = state(StubCluster {
            alive: true,
            in_recovery: false,
            master: None,
        });
        let err = promote(State(state)).await.unwrap_err();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}

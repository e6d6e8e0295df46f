use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
};
use serde::Serialize;
use tracing::warn;

use crate::{app_state::AppState, db::bootstrap};

#[derive(Serialize)]
struct HealthResponse<'a> {
    status: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    websocket_connections: Option<usize>,
}

fn record(endpoint: &'static str, status: &'static str) {
    metrics::counter!("health_checks_total", "endpoint" => endpoint, "status" => status)
        .increment(1);
}

/// Liveness: the process is up and serving.
async fn healthz() -> impl IntoResponse {
    record("healthz", "ok");
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok",
            websocket_connections: None,
        }),
    )
}

/// Readiness: the database answers the health procedure.
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let Some(pool) = state.pool.as_ref() else {
        record("readyz", "error");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "no_db",
                websocket_connections: None,
            }),
        );
    };

    match bootstrap::ensure_readiness(pool).await {
        Ok(()) => {
            record("readyz", "ok");
            let connections = state.hub.stats().await.connections;
            (
                StatusCode::OK,
                Json(HealthResponse {
                    status: "ready",
                    websocket_connections: Some(connections),
                }),
            )
        }
        Err(err) => {
            warn!(error = %err, "readiness probe failed");
            record("readyz", "error");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "degraded",
                    websocket_connections: None,
                }),
            )
        }
    }
}

pub fn create_health_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
}

use super::server::ServerState;
use axum::{
    extract::{Query, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Liveness: 200 for as long as the process can answer
pub async fn healthz_handler(State(state): State<ServerState>) -> impl IntoResponse {
    let coordinator = &state.coordinator;

    let body = serde_json::json!({
        "status": "alive",
        "state": coordinator.state().as_str(),
        "in_flight": coordinator.tracker().outstanding(),
    });

    (StatusCode::OK, Json(body))
}

/// Readiness: 200 while accepting work, 503 from the moment shutdown is requested
pub async fn readyz_handler(State(state): State<ServerState>) -> impl IntoResponse {
    let coordinator = &state.coordinator;
    let ready = coordinator.is_ready();

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let body = serde_json::json!({
        "ready": ready,
        "state": coordinator.state().as_str(),
        "in_flight": coordinator.tracker().outstanding(),
    });

    (status, Json(body))
}

/// Hold a connection guard for the lifetime of every request
pub async fn track_connections(
    State(state): State<ServerState>,
    request: Request,
    next: Next,
) -> Response {
    let guard = state.coordinator.connection_guard();
    debug!(connection = %guard.id(), path = %request.uri().path(), "Request started");

    next.run(request).await
}

#[derive(Debug, Deserialize)]
pub struct WorkParams {
    #[serde(default)]
    pub ms: u64,
}

/// Simulated unit of work taking `ms` milliseconds
pub async fn work_handler(Query(params): Query<WorkParams>) -> impl IntoResponse {
    tokio::time::sleep(Duration::from_millis(params.ms)).await;

    Json(serde_json::json!({
        "worked_ms": params.ms,
    }))
}

//! Health check handler

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};

use crate::interfaces::http::state::ApiState;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub broker: ComponentHealth,
    pub pending_requests: usize,
    pub active_subscriptions: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: String,
    pub connected: bool,
}

/// `GET /health`: 200 while the broker connection is up, 503 otherwise.
pub async fn health_check(State(state): State<ApiState>) -> (StatusCode, Json<HealthResponse>) {
    let connected = state.commands.is_connected();
    let (status, http_status) = if connected {
        ("ok", StatusCode::OK)
    } else {
        ("degraded", StatusCode::SERVICE_UNAVAILABLE)
    };

    let body = HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        broker: ComponentHealth {
            status: if connected { "ok" } else { "disconnected" }.to_string(),
            connected,
        },
        pending_requests: state.commands.pending_requests(),
        active_subscriptions: state.subscriptions.count(),
    };

    (http_status, Json(body))
}

//! Health check route.

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;

use crate::api::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub live_channels: usize,
    pub viewers: usize,
    pub active_flags: usize,
}

/// Create the health router.
pub fn router() -> Router<AppState> {
    Router::new().route("/", get(health_check))
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let service = &state.service;
    let status = if service.is_shutting_down() {
        "shutting_down"
    } else {
        "healthy"
    };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: service.uptime().as_secs(),
        live_channels: service.supervisor.running_channels().len(),
        viewers: service.registry.total_viewers(),
        active_flags: service.registry.active_flags(),
    })
}

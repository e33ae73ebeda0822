//! Service status endpoints.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use super::super::AppState;
use crate::analysis::GpuStatus;

/// Endpoint overview.
pub async fn index() -> impl IntoResponse {
    Json(json!({
        "service": "docsift",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": [
            "POST /tasks",
            "POST /process",
            "GET /tasks",
            "GET /tasks/:id",
            "DELETE /tasks/:id",
            "GET /tasks/:id/artifacts",
            "GET /tasks/:id/artifacts/:name",
            "GET /health",
            "GET /gpu_status",
        ],
    }))
}

/// Read-only snapshot of pool saturation and task counts.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let controller = &state.controller;
    let counts = controller.counts();
    let analyzer = controller.analyzer();
    let gpu = state.gpu.get_or_init(GpuStatus::probe).await;

    Json(json!({
        "status": "healthy",
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "pool": controller.pool_stats(),
        "tasks": counts,
        "active_tasks": counts.running,
        "analyzer": {
            "name": analyzer.name(),
            "available": state.analyzer_available,
        },
        "gpu_available": gpu.available,
        "timestamp": chrono::Utc::now(),
    }))
}

pub async fn gpu_status() -> impl IntoResponse {
    Json(GpuStatus::probe().await)
}

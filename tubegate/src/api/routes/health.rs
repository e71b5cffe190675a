//! Health check routes.

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};

use crate::api::models::{ComponentHealth, HealthResponse};
use crate::api::server::AppState;

/// Create the health router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/live", get(liveness_check))
}

/// The transformer only matters while external muxing is allowed.
fn is_ready(state: &AppState) -> bool {
    !state.config.allow_external_mux || state.transformer.is_available()
}

/// Health check endpoint.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let transformer_ok = state.transformer.is_available();
    let components = vec![
        ComponentHealth {
            name: state.extractor.name().to_string(),
            status: "healthy".to_string(),
            message: None,
        },
        ComponentHealth {
            name: state.transformer.name().to_string(),
            status: if transformer_ok { "healthy" } else { "unavailable" }.to_string(),
            message: (!transformer_ok).then(|| {
                if state.config.allow_external_mux {
                    "binary not found; muxing and re-encoding will fail".to_string()
                } else {
                    "binary not found; external muxing disabled".to_string()
                }
            }),
        },
    ];

    Json(HealthResponse {
        status: if is_ready(&state) { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        components,
    })
}

/// Readiness check: HTTP 200 when requests can be fully served, 503 otherwise.
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    if is_ready(&state) {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}

/// Liveness check.
async fn liveness_check(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = state.start_time.elapsed().as_secs();
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "alive",
            "uptime_secs": uptime
        })),
    )
}

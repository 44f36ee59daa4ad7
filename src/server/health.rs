//! Liveness, readiness and metrics endpoints.

use std::sync::Arc;

use axum::{
    Json,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::warn;

use super::AppState;

/// Health check response.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub(crate) struct HealthResponse {
    status: String,
}

/// Readiness check response.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub(crate) struct ReadyResponse {
    status: String,
    provider: String,
    provider_configured: bool,
}

/// Liveness check handler.
pub async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// Ready once the push provider has credentials.
pub async fn ready_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let provider = state.engine.provider();
    let provider_configured = provider.is_configured();

    let response = ReadyResponse {
        status: if provider_configured {
            "ready"
        } else {
            "not_ready"
        }
        .to_string(),
        provider: provider.name().to_string(),
        provider_configured,
    };

    if provider_configured {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}

/// Prometheus text exposition. 404 when metrics are disabled.
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response {
    let Some(metrics) = &state.metrics else {
        return StatusCode::NOT_FOUND.into_response();
    };

    match metrics.render() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

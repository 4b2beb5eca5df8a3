use axum::{extract::State, http::StatusCode, response::Json};
use serde::Serialize;
use std::time::Instant;

use crate::handlers::AppState;

/// Component health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Up,
    Down,
    Degraded,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub version: String,
    pub timestamp: String,
    pub storage: ComponentHealth,
    pub read_models: ComponentHealth,
}

/// Pings the storage backend; a cold read-model cache only degrades the status.
pub async fn health_check(
    State(state): State<AppState>,
) -> (StatusCode, Json<HealthResponse>) {
    let start = Instant::now();
    let storage = match state.store.ping().await {
        Ok(()) => ComponentHealth {
            status: ComponentStatus::Up,
            message: format!("{} backend reachable", state.store.kind()),
            latency_ms: Some(start.elapsed().as_millis() as u64),
        },
        Err(err) => {
            tracing::warn!(error = %err, "Storage health check failed");
            ComponentHealth {
                status: ComponentStatus::Down,
                message: err.response_message(),
                latency_ms: Some(start.elapsed().as_millis() as u64),
            }
        }
    };

    let read_models = if state.cache.is_warm() {
        ComponentHealth {
            status: ComponentStatus::Up,
            message: "warm".to_string(),
            latency_ms: None,
        }
    } else {
        ComponentHealth {
            status: ComponentStatus::Degraded,
            message: "not yet loaded".to_string(),
            latency_ms: None,
        }
    };

    let status = match (storage.status, read_models.status) {
        (ComponentStatus::Down, _) => ComponentStatus::Down,
        (_, ComponentStatus::Up) => ComponentStatus::Up,
        _ => ComponentStatus::Degraded,
    };
    let code = if status == ComponentStatus::Down {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (
        code,
        Json(HealthResponse {
            status,
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            storage,
            read_models,
        }),
    )
}

//! Health, readiness and metrics handlers

use std::collections::HashMap;

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::api::error::{ApiError, ErrorCode};
use crate::infra::StoreError;
use crate::metrics::metric_names;
use crate::server::AppState;

/// Id used for the readiness point lookup
const READINESS_PROBE_ID: &str = "readiness-probe";

/// Response for the basic health check endpoint
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub service: &'static str,
    pub version: &'static str,
    pub timestamp: String,
}

/// Overall health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Liveness probe. Performs no checks.
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: HealthStatus::Healthy,
        service: "receipt-gateway",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// Readiness probe.
///
/// Ready when the store answers a point lookup.
pub async fn readiness_check(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let store = state.query.store();
    let start = std::time::Instant::now();
    match store.get_by_id(READINESS_PROBE_ID).await {
        Ok(_) | Err(StoreError::Corrupt { .. }) => Ok(Json(serde_json::json!({
            "status": "ready",
            "store": {
                "backend": store.backend_name(),
                "response_time_ms": start.elapsed().as_millis() as u64,
            },
            "writes_in_flight": state.in_flight.active_count(),
        }))),
        Err(e) => Err(ApiError::new(
            ErrorCode::StoreUnavailable,
            format!("store unavailable: {}", e),
        )),
    }
}

/// Metrics endpoint: Prometheus text by default, JSON with `?format=json`
pub async fn metrics_handler(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    state
        .metrics
        .set_gauge(metric_names::WRITES_IN_FLIGHT, state.in_flight.active_count())
        .await;

    if params.get("format").map(String::as_str) == Some("json") {
        return Json(state.metrics.to_json().await).into_response();
    }

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.to_prometheus().await,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_check() {
        let Json(response) = health_check().await;
        assert_eq!(response.status, HealthStatus::Healthy);
        assert_eq!(response.service, "receipt-gateway");
    }

    #[test]
    fn test_health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Unhealthy).unwrap(),
            "\"unhealthy\""
        );
    }
}

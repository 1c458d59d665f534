// =============================================================================
// HANDLERS MODULE
// =============================================================================
// HTTP request handlers.
//
// The warehouse UI creates a flow session, posts events to it and renders the
// returned view. Identification endpoints are a thin passthrough to the
// backend's photo matcher.
// =============================================================================

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    Json,
};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::flow::FlowEvent;
use crate::metrics;
use crate::models::*;
use crate::session::FlowView;
use crate::AppState;

/// Records the request with the status the result will produce
fn record<T>(
    method: &str,
    endpoint: &str,
    ok_status: StatusCode,
    result: &AppResult<T>,
    start: Instant,
) {
    let status = match result {
        Ok(_) => ok_status,
        Err(err) => err.status_code(),
    };
    metrics::record_http_request(method, endpoint, status.as_u16(), start.elapsed().as_secs_f64());
}

// =============================================================================
// HEALTH CHECK ENDPOINTS
// =============================================================================

/// Liveness probe
///
/// GET /health
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: "inventory-flow-service".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness probe: warehouse backend reachable, Redis answering when configured.
///
/// GET /ready
pub async fn readiness_check(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ReadinessResponse>, StatusCode> {
    let warehouse_api = state.runner.api().health().await;
    let redis = state.runner.cache().ping().await;

    let all_healthy = warehouse_api && redis.unwrap_or(true);
    let status = if all_healthy { "ready" } else { "not_ready" };

    let response = ReadinessResponse {
        status: status.to_string(),
        checks: ReadinessChecks {
            warehouse_api,
            redis,
        },
    };

    if all_healthy {
        Ok(Json(response))
    } else {
        tracing::warn!(warehouse_api, redis = ?redis, "Service not ready");
        Err(StatusCode::SERVICE_UNAVAILABLE)
    }
}

/// Prometheus metrics endpoint
///
/// GET /metrics
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> String {
    state.metrics_handle.render()
}

// =============================================================================
// FLOW SESSIONS
// =============================================================================

/// Open a new flow session
///
/// POST /api/v1/flows
///
/// # Request Body
/// ```json
/// { "direction": "outbound", "warehouseId": 3 }
/// ```
pub async fn create_flow(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateFlowRequest>,
) -> (StatusCode, Json<FlowView>) {
    let start = Instant::now();
    let view = state.runner.create(request).await;
    metrics::record_http_request(
        "POST",
        "/api/v1/flows",
        201,
        start.elapsed().as_secs_f64(),
    );
    (StatusCode::CREATED, Json(view))
}

/// GET /api/v1/flows/:id
pub async fn get_flow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<FlowView>> {
    let start = Instant::now();
    let result = state.runner.view(id).await;
    record("GET", "/api/v1/flows/:id", StatusCode::OK, &result, start);
    result.map(Json)
}

/// Apply one user event
///
/// POST /api/v1/flows/:id/events
///
/// # Request Body
/// ```json
/// { "type": "scanned", "code": "]C1012345678901234" }
/// ```
///
/// # Response
/// - 200 OK: the updated view (step errors are inside it)
/// - 409 Conflict: event not accepted in the current step, or busy
/// - 404 Not Found: unknown or expired session
pub async fn post_event(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(event): Json<FlowEvent>,
) -> AppResult<Json<FlowView>> {
    let start = Instant::now();
    let result = state.runner.dispatch_event(id, event).await;
    record("POST", "/api/v1/flows/:id/events", StatusCode::OK, &result, start);
    result.map(Json)
}

/// DELETE /api/v1/flows/:id
pub async fn delete_flow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let start = Instant::now();
    let result = state.runner.delete(id).await;
    record("DELETE", "/api/v1/flows/:id", StatusCode::NO_CONTENT, &result, start);
    result.map(|_| StatusCode::NO_CONTENT)
}

// =============================================================================
// ITEM IDENTIFICATION
// =============================================================================

/// Forward a captured photo to the backend matcher
///
/// POST /api/v1/identify
///
/// Raw image body; Content-Type is passed on (default image/jpeg).
pub async fn identify(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<IdentificationResult>> {
    let start = Instant::now();

    let result: AppResult<IdentificationResult> = async {
        if body.is_empty() {
            return Err(AppError::BadRequest("Image body is empty".to_string()));
        }
        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("image/jpeg");

        tracing::info!(bytes = body.len(), content_type, "Identifying item from photo");
        Ok(state.runner.api().identify(body.to_vec(), content_type).await?)
    }
    .await;

    record("POST", "/api/v1/identify", StatusCode::OK, &result, start);
    result.map(Json)
}

/// Tell the matcher a suggestion was wrong
///
/// POST /api/v1/identify/mismatch
pub async fn report_mismatch(
    State(state): State<Arc<AppState>>,
    Json(report): Json<MismatchReport>,
) -> AppResult<StatusCode> {
    let start = Instant::now();

    tracing::info!(
        identification_id = %report.identification_id,
        rejected_item_id = report.rejected_item_id,
        "Identification mismatch reported"
    );
    let result = state
        .runner
        .api()
        .report_mismatch(&report)
        .await
        .map_err(AppError::from);

    record("POST", "/api/v1/identify/mismatch", StatusCode::NO_CONTENT, &result, start);
    result.map(|_| StatusCode::NO_CONTENT)
}

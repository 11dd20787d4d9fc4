use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use chrono::Utc;
use serde_json::json;

use super::domain::{BypassEventPayload, CourierReportPayload};
use super::pipeline::BypassPipeline;
use crate::error::AppError;
use crate::identity::{require_role, CallerIdentity, Role};

/// Couriers report what they saw in person, so their reports escalate at the top tier.
pub const COURIER_REPORT_SCORE: f64 = 1.0;

/// Header a client sets to make a retried report reuse the same nonce. Without
/// it the nonce is derived from the request, so blind retries still collapse.
pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

/// Detector webhook plus the courier-facing report endpoint.
pub fn bypass_router(pipeline: Arc<BypassPipeline>) -> Router {
    Router::new()
        .route("/webhook/bypass", post(bypass_webhook_handler))
        .route("/report-bypass", post(report_bypass_handler))
        .with_state(pipeline)
}

fn header_nonce(headers: &HeaderMap) -> Option<String> {
    headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

pub(crate) async fn bypass_webhook_handler(
    State(pipeline): State<Arc<BypassPipeline>>,
    headers: HeaderMap,
    payload: Result<Json<BypassEventPayload>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(payload) = payload?;
    let nonce = header_nonce(&headers).unwrap_or_else(|| payload.derived_nonce());
    let report = payload.into_report(nonce, Utc::now());
    let outcome = pipeline.handle_bypass_report(&report).await?;

    let body = json!({
        "status": "received",
        "outcome": outcome,
    });
    Ok((StatusCode::OK, Json(body)).into_response())
}

pub(crate) async fn report_bypass_handler(
    State(pipeline): State<Arc<BypassPipeline>>,
    caller: CallerIdentity,
    headers: HeaderMap,
    payload: Result<Json<CourierReportPayload>, JsonRejection>,
) -> Result<Response, AppError> {
    require_role(&caller, Role::Courier)?;
    let Json(payload) = payload?;

    let nonce =
        header_nonce(&headers).unwrap_or_else(|| payload.derived_nonce(&caller.user_id));
    let report = payload.into_report(caller.user_id, COURIER_REPORT_SCORE, nonce, Utc::now());
    let outcome = pipeline.handle_bypass_report(&report).await?;

    let body = json!({
        "message": "Bonus credited. Producer penalized.",
        "outcome": outcome,
    });
    Ok((StatusCode::OK, Json(body)).into_response())
}

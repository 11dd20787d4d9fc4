use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde_json::json;

use super::service::{ContactDisclosure, DisclosureService};
use crate::domain::OrderId;
use crate::error::AppError;
use crate::identity::CallerIdentity;

/// Order views with contact details gated by the disclosure policy.
pub fn disclosure_router(service: Arc<DisclosureService>) -> Router {
    Router::new()
        .route("/api/v1/orders/:order_id", get(order_handler))
        .route("/api/v1/orders/:order_id/contact", get(contact_handler))
        .with_state(service)
}

pub(crate) async fn order_handler(
    State(service): State<Arc<DisclosureService>>,
    Path(order_id): Path<String>,
) -> Result<Response, AppError> {
    let view = service.sanitized(&OrderId(order_id), Utc::now()).await?;
    Ok((StatusCode::OK, Json(view)).into_response())
}

pub(crate) async fn contact_handler(
    State(service): State<Arc<DisclosureService>>,
    caller: CallerIdentity,
    Path(order_id): Path<String>,
) -> Result<Response, AppError> {
    let order_id = OrderId(order_id);
    match service.contact_for(&order_id, Utc::now()).await? {
        ContactDisclosure::Revealed(contact) => {
            tracing::info!(
                order_id = %order_id,
                caller = %caller.user_id,
                role = caller.role.as_str(),
                "contact handed to caller"
            );
            Ok((StatusCode::OK, Json(contact)).into_response())
        }
        ContactDisclosure::Withheld(view) => {
            let payload = json!({
                "error": "contact details are not available for this order yet",
                "order_id": view.id,
                "canReveal": false,
            });
            Ok((StatusCode::FORBIDDEN, Json(payload)).into_response())
        }
    }
}

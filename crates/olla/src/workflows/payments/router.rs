use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use chrono::Utc;
use serde_json::{json, Value};

use super::event::PaymentWebhookEvent;
use super::processor::PaymentWebhookProcessor;
use crate::error::AppError;

/// Payment gateway webhook endpoint.
pub fn payment_router(processor: Arc<PaymentWebhookProcessor>) -> Router {
    Router::new()
        .route("/webhook/payments", post(payment_webhook_handler))
        .with_state(processor)
}

pub(crate) async fn payment_webhook_handler(
    State(processor): State<Arc<PaymentWebhookProcessor>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(payload) = payload?;
    let now = Utc::now();
    let event = PaymentWebhookEvent::from_payload(&payload, now)?;
    let outcome = processor.process(&event, now).await?;

    let body = json!({
        "received": true,
        "order_id": event.order_id,
        "reveal_eligible": outcome.reveal_eligible(),
        "result": outcome,
    });
    Ok((StatusCode::OK, Json(body)).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Order, OrderId};
    use crate::gateway::{encode_row, MemoryStore, StoreGateway, Table};
    use crate::workflows::disclosure::{DisclosurePolicy, DisclosureService};
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request};
    use tower::ServiceExt;

    fn router(store: &MemoryStore) -> Router {
        let shared: Arc<dyn StoreGateway> = Arc::new(store.clone());
        let disclosure = Arc::new(DisclosureService::new(
            shared.clone(),
            DisclosurePolicy::default(),
        ));
        payment_router(Arc::new(PaymentWebhookProcessor::new(shared, disclosure)))
    }

    fn post(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/webhook/payments")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request builds")
    }

    #[tokio::test]
    async fn duplicate_deliveries_are_acknowledged() {
        let store = MemoryStore::new();
        let order = Order {
            id: OrderId("77".to_string()),
            is_paid: false,
            paid_at: None,
            pickup_at: None,
            status: Default::default(),
            phone: None,
            address: None,
        };
        store.seed(Table::Orders, [encode_row(&order).expect("order encodes")]);
        let app = router(&store);
        let body = r#"{"data":{"status":"approved","order_id":77,"amount":900}}"#;

        let first = app.clone().oneshot(post(body)).await.expect("responds");
        assert_eq!(first.status(), StatusCode::OK);
        let first_body = to_bytes(first.into_body(), 4096).await.expect("read body");
        let first_json: Value = serde_json::from_slice(&first_body).expect("json");
        assert_eq!(first_json["result"]["outcome"], json!("confirmed"));

        let second = app.oneshot(post(body)).await.expect("responds");
        assert_eq!(second.status(), StatusCode::OK);
        let second_body = to_bytes(second.into_body(), 4096).await.expect("read body");
        let second_json: Value = serde_json::from_slice(&second_body).expect("json");
        assert_eq!(second_json["result"]["outcome"], json!("already_confirmed"));
        assert_eq!(second_json["reveal_eligible"], json!(true));
    }

    #[tokio::test]
    async fn payload_without_status_is_unprocessable() {
        let store = MemoryStore::new();
        let response = router(&store)
            .oneshot(post(r#"{"data":{"order_id":"1"}}"#))
            .await
            .expect("responds");
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn invalid_json_is_a_bad_request() {
        let store = MemoryStore::new();
        let response = router(&store)
            .oneshot(post("{not json"))
            .await
            .expect("responds");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}

use crate::infra::{AppState, Services};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Extension, Json, Router};
use olla::workflows::{bypass_router, disclosure_router, payment_router, proximity_router};
use serde_json::json;

pub(crate) fn with_service_routes(services: Services) -> Router {
    disclosure_router(services.disclosure)
        .merge(payment_router(services.payments))
        .merge(bypass_router(services.bypass))
        .merge(proximity_router(services.proximity))
        .route("/health", get(healthcheck))
        .route("/ready", get(readiness_endpoint))
        .route("/metrics", get(metrics_endpoint))
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(std::sync::atomic::Ordering::Acquire);
    if ready {
        (StatusCode::OK, Json(json!({ "status": "ready" })))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "initializing" })),
        )
    }
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::{build_disbursement, build_store};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use olla::config::AppConfig;
    use olla::identity::{CALLER_ID_HEADER, CALLER_ROLE_HEADER};
    use olla::workflows::bypass::NotificationQueue;
    use serde_json::Value;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app(ready: bool) -> (Router, Arc<AtomicBool>) {
        let config = AppConfig::from_lookup(|_| None).expect("default config");
        let store = build_store(&config, None).expect("store builds");
        let disbursement = build_disbursement(&config, store.clone()).expect("ledger builds");
        let (queue, _receiver) = NotificationQueue::bounded(16);
        let services = Services::build(&config, store, disbursement, queue);

        let readiness = Arc::new(AtomicBool::new(ready));
        let state = AppState {
            readiness: readiness.clone(),
            metrics: Arc::new(PrometheusBuilder::new().build_recorder().handle()),
        };
        (
            with_service_routes(services).layer(Extension(state)),
            readiness,
        )
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body reads");
        serde_json::from_slice(&bytes).expect("json body")
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .body(Body::empty())
            .expect("request builds")
    }

    #[tokio::test]
    async fn health_is_always_ok() {
        let (app, _) = app(false);
        let response = app.oneshot(get_request("/health")).await.expect("responds");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn readiness_follows_the_startup_flag() {
        let (app, readiness) = app(false);
        let response = app
            .clone()
            .oneshot(get_request("/ready"))
            .await
            .expect("responds");
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        readiness.store(true, Ordering::Release);
        let response = app.oneshot(get_request("/ready")).await.expect("responds");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "ready");
    }

    #[tokio::test]
    async fn metrics_are_served_as_prometheus_text() {
        let (app, _) = app(true);
        let response = app.oneshot(get_request("/metrics")).await.expect("responds");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/plain; version=0.0.4"
        );
    }

    #[tokio::test]
    async fn workflow_routes_are_mounted() {
        let (app, _) = app(true);

        let unknown_order = app
            .clone()
            .oneshot(get_request("/api/v1/orders/ghost"))
            .await
            .expect("responds");
        assert_eq!(unknown_order.status(), StatusCode::NOT_FOUND);

        let nearby = app
            .clone()
            .oneshot(get_request("/api/v1/producers/nearby?lat=-34.6&lon=-58.4"))
            .await
            .expect("responds");
        assert_eq!(nearby.status(), StatusCode::OK);
        assert_eq!(json_body(nearby).await["count"], 0);

        let webhook = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhook/payments")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"data":{"status":"pending","order_id":"1"}}"#))
                    .expect("request builds"),
            )
            .await
            .expect("responds");
        assert_eq!(webhook.status(), StatusCode::OK);
        assert_eq!(json_body(webhook).await["reveal_eligible"], false);

        let report = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/report-bypass")
                    .header(header::CONTENT_TYPE, "application/json")
                    .header(CALLER_ID_HEADER, "courier-1")
                    .header(CALLER_ROLE_HEADER, "buyer")
                    .body(Body::from(r#"{"producer_id":"p1","order_id":"1"}"#))
                    .expect("request builds"),
            )
            .await
            .expect("responds");
        assert_eq!(report.status(), StatusCode::FORBIDDEN);
    }
}

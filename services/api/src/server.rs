use crate::cli::ServeArgs;
use crate::infra::{build_disbursement, build_notifier, build_store, AppState, Services};
use crate::routes::with_service_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use olla::config::AppConfig;
use olla::error::AppError;
use olla::telemetry;
use olla::workflows::bypass::{NotificationQueue, NotificationWorker};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let store = build_store(&config, args.producers_csv.as_deref())?;
    let notifier = build_notifier(&config)?;
    let disbursement = build_disbursement(&config, store.clone())?;

    let (queue, receiver) = NotificationQueue::bounded(config.escalation.queue_capacity);
    let worker = NotificationWorker::new(
        receiver,
        notifier,
        config.escalation.max_delivery_attempts,
    )
    .spawn();

    let services = Services::build(&config, store, disbursement, queue);
    let app = with_service_routes(services)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "olla trust broker ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The router owned the last queue sender; the worker drains what is left and exits.
    match worker.await {
        Ok(stats) => info!(
            delivered = stats.delivered,
            failed = stats.failed,
            retries = stats.retries,
            "notification worker drained"
        ),
        Err(err) => warn!(error = %err, "notification worker did not shut down cleanly"),
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

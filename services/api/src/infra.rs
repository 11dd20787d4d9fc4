use metrics_exporter_prometheus::PrometheusHandle;
use olla::config::AppConfig;
use olla::error::AppError;
use olla::gateway::seed::{producers_from_path, seed_producers};
use olla::gateway::{
    HttpDisbursement, HttpNotifier, LedgerDisbursement, MemoryStore, Notifier,
    PaymentDisbursement, PostgrestStore, StoreGateway,
};
use olla::workflows::bypass::NotificationQueue;
use olla::workflows::disclosure::DisclosureWindow;
use olla::workflows::{
    BypassPipeline, DisclosurePolicy, DisclosureService, PaymentWebhookProcessor, ProximitySearch,
};
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// The four workflow services, sharing one store.
#[derive(Clone)]
pub(crate) struct Services {
    pub(crate) disclosure: Arc<DisclosureService>,
    pub(crate) payments: Arc<PaymentWebhookProcessor>,
    pub(crate) bypass: Arc<BypassPipeline>,
    pub(crate) proximity: Arc<ProximitySearch>,
}

impl Services {
    pub(crate) fn build(
        config: &AppConfig,
        store: Arc<dyn StoreGateway>,
        disbursement: Arc<dyn PaymentDisbursement>,
        queue: NotificationQueue,
    ) -> Self {
        let policy = DisclosurePolicy::new(DisclosureWindow::from_config(&config.disclosure));
        let disclosure = Arc::new(DisclosureService::new(store.clone(), policy));
        let payments = Arc::new(PaymentWebhookProcessor::new(
            store.clone(),
            disclosure.clone(),
        ));
        let bypass = Arc::new(BypassPipeline::from_config(
            &config.escalation,
            store.clone(),
            disbursement,
            queue,
        ));
        let proximity = Arc::new(ProximitySearch::new(store, &config.proximity));

        Self {
            disclosure,
            payments,
            bypass,
            proximity,
        }
    }
}

pub(crate) fn memory_store(producers_csv: Option<&Path>) -> Result<MemoryStore, AppError> {
    let store = MemoryStore::new();
    if let Some(path) = producers_csv {
        let producers = producers_from_path(path)?;
        let loaded = seed_producers(&store, &producers)?;
        info!(loaded, path = %path.display(), "seeded producers from CSV");
    }
    Ok(store)
}

/// PostgREST when `STORE_URL` is set, otherwise an in-memory store.
pub(crate) fn build_store(
    config: &AppConfig,
    producers_csv: Option<&Path>,
) -> Result<Arc<dyn StoreGateway>, AppError> {
    match &config.store.remote {
        Some(remote) => {
            if producers_csv.is_some() {
                warn!("ignoring --producers-csv: seeding only applies to the in-memory store");
            }
            let store = PostgrestStore::new(remote)
                .map_err(|err| AppError::Startup(err.to_string()))?;
            info!(url = %remote.url, "using PostgREST store");
            Ok(Arc::new(store))
        }
        None => {
            warn!("STORE_URL not set; state lives in memory and is lost on restart");
            Ok(Arc::new(memory_store(producers_csv)?))
        }
    }
}

pub(crate) fn build_notifier(config: &AppConfig) -> Result<Arc<dyn Notifier>, AppError> {
    if config.notifier.mail_relay.is_none() {
        warn!("mail relay not configured; bypass email alerts will be dropped");
    }
    if config.notifier.twilio.is_none() {
        warn!("Twilio not configured; bypass SMS alerts will be dropped");
    }
    let notifier =
        HttpNotifier::new(&config.notifier).map_err(|err| AppError::Startup(err.to_string()))?;
    Ok(Arc::new(notifier))
}

/// Payout API when `DISBURSEMENT_URL` is set, otherwise the `payments` ledger table.
pub(crate) fn build_disbursement(
    config: &AppConfig,
    store: Arc<dyn StoreGateway>,
) -> Result<Arc<dyn PaymentDisbursement>, AppError> {
    match &config.disbursement.http {
        Some(http) => {
            let disbursement =
                HttpDisbursement::new(http).map_err(|err| AppError::Startup(err.to_string()))?;
            Ok(Arc::new(disbursement))
        }
        None => Ok(Arc::new(LedgerDisbursement::new(store))),
    }
}

use crate::infra::{memory_store, Services};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use clap::Args;
use olla::config::AppConfig;
use olla::domain::{Order, OrderId, OrderStatus, Producer, UserId};
use olla::error::AppError;
use olla::gateway::seed::seed_producers;
use olla::gateway::{
    encode_row, LedgerDisbursement, MemoryStore, NotificationError, Notifier, StoreGateway, Table,
};
use olla::workflows::bypass::{
    CourierReportPayload, NotificationQueue, NotificationWorker, COURIER_REPORT_SCORE,
};
use olla::workflows::disclosure::{ContactDisclosure, SanitizedOrder};
use olla::workflows::payments::PaymentWebhookEvent;
use olla::workflows::proximity::NearbyProducer;
use olla::workflows::ProximitySearch;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;

const DEMO_ORDER_ID: &str = "1001";
const DEMO_LAT: f64 = -34.6037;
const DEMO_LON: f64 = -58.3816;

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Producer CSV (id,display_name,lat,lon,rating). A built-in Buenos Aires set is used otherwise.
    #[arg(long)]
    pub(crate) producers_csv: Option<PathBuf>,
    /// Minutes from now until the demo order's pickup.
    #[arg(long, default_value_t = 90)]
    pub(crate) pickup_in_minutes: i64,
}

#[derive(Args, Debug)]
pub(crate) struct NearbyArgs {
    /// Latitude of the search origin
    #[arg(long, allow_negative_numbers = true)]
    pub(crate) lat: f64,
    /// Longitude of the search origin
    #[arg(long, allow_negative_numbers = true)]
    pub(crate) lon: f64,
    /// Search radius in kilometres (defaults to PROXIMITY_DEFAULT_RADIUS_KM)
    #[arg(long)]
    pub(crate) radius_km: Option<f64>,
    /// Producer CSV (id,display_name,lat,lon,rating)
    #[arg(long)]
    pub(crate) producers_csv: PathBuf,
}

/// Prints alerts instead of sending them.
struct ConsoleNotifier;

#[async_trait]
impl Notifier for ConsoleNotifier {
    async fn send_email(
        &self,
        subject: &str,
        _body: &str,
        recipients: &[String],
    ) -> Result<(), NotificationError> {
        println!("    email -> {}: {}", recipients.join(", "), subject);
        Ok(())
    }

    async fn send_sms(&self, body: &str, recipient: &str) -> Result<(), NotificationError> {
        let headline = body.lines().next().unwrap_or_default();
        println!("    sms   -> {recipient}: {headline}");
        Ok(())
    }
}

fn sample_producers() -> Vec<Producer> {
    let mut rosa = Producer::new("p-rosa", "Cocina de Abuela Rosa").located_at(-34.6118, -58.3712);
    rosa.rating = Some(4.8);
    let mut tito = Producer::new("p-tito", "Empanadas Tito").located_at(-34.5889, -58.4306);
    tito.rating = Some(4.5);
    let mut lu = Producer::new("p-lu", "Lu Pastelería").located_at(-34.9214, -57.9544);
    lu.rating = Some(4.9);
    vec![rosa, tito, lu]
}

fn demo_order(pickup_in_minutes: i64) -> Order {
    Order {
        id: OrderId(DEMO_ORDER_ID.to_string()),
        is_paid: false,
        paid_at: None,
        pickup_at: Some(Utc::now() + Duration::minutes(pickup_in_minutes)),
        status: OrderStatus::Pending,
        phone: Some("+5491144440000".to_string()),
        address: Some("Defensa 1000, San Telmo".to_string()),
    }
}

fn seed_order(store: &MemoryStore, order: &Order) -> Result<(), AppError> {
    let row = encode_row(order).map_err(|err| AppError::Startup(err.to_string()))?;
    store.seed(Table::Orders, [row]);
    Ok(())
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        producers_csv,
        pickup_in_minutes,
    } = args;

    let mut config = AppConfig::load()?;
    if config.escalation.email_recipients.is_empty() {
        config.escalation.email_recipients = vec!["ops@olla.example".to_string()];
    }
    if config.escalation.sms_recipients.is_empty() {
        config.escalation.sms_recipients = vec!["+5491100000000".to_string()];
    }

    let memory = memory_store(producers_csv.as_deref())?;
    if producers_csv.is_none() {
        seed_producers(&memory, &sample_producers())?;
    }
    seed_order(&memory, &demo_order(pickup_in_minutes))?;

    let store: Arc<dyn StoreGateway> = Arc::new(memory.clone());
    let (queue, receiver) = NotificationQueue::bounded(config.escalation.queue_capacity);
    let worker = NotificationWorker::new(
        receiver,
        Arc::new(ConsoleNotifier),
        config.escalation.max_delivery_attempts,
    )
    .spawn();
    let services = Services::build(
        &config,
        store.clone(),
        Arc::new(LedgerDisbursement::new(store)),
        queue,
    );

    let order_id = OrderId(DEMO_ORDER_ID.to_string());
    println!("Olla trust broker demo");
    println!("\n1. Buyer views order #{order_id} before paying");
    render_order(&services.disclosure.sanitized(&order_id, Utc::now()).await?);

    println!("\n2. Payment gateway delivers an approval, then replays it");
    let payload = json!({
        "type": "payment",
        "data": { "id": "demo-payment", "status": "approved", "order_id": DEMO_ORDER_ID, "amount": 5400 }
    });
    for delivery in ["first", "replay"] {
        let now = Utc::now();
        let event = PaymentWebhookEvent::from_payload(&payload, now)?;
        let outcome = services.payments.process(&event, now).await?;
        println!(
            "  {delivery:<6} -> {outcome:?} (reveal eligible: {})",
            outcome.reveal_eligible()
        );
    }
    println!(
        "  reveal procedure calls recorded: {}",
        memory.procedure_calls().len()
    );

    println!("\n3. Courier asks for contact details");
    match services.disclosure.contact_for(&order_id, Utc::now()).await? {
        ContactDisclosure::Revealed(contact) => {
            println!("  phone:   {}", contact.phone);
            println!("  address: {}", contact.address);
        }
        ContactDisclosure::Withheld(view) => {
            println!("  withheld until the pickup window opens");
            render_order(&view);
        }
    }

    println!("\n4. Buyer searches for producers near Plaza de Mayo");
    let nearby = services
        .proximity
        .producers_within_radius(DEMO_LAT, DEMO_LON, None)
        .await?;
    render_nearby(&nearby);

    println!("\n5. Courier reports a producer for asking to settle off-platform");
    match nearby.first() {
        Some(target) => {
            let report = CourierReportPayload {
                producer_id: target.producer.id.as_str().to_string(),
                order_id: order_id.clone(),
                reason: Some("asked to be paid in cash outside the app".to_string()),
            }
            .into_report(
                UserId("courier-7".to_string()),
                COURIER_REPORT_SCORE,
                "demo-report-1".to_string(),
                Utc::now(),
            );
            let outcome = services.bypass.handle_bypass_report(&report).await?;
            println!("  tier:             {}", outcome.tier.label());
            println!("  bypass attempts:  {}", outcome.bypass_attempts);
            println!("  producer hidden:  {}", outcome.producer_hidden);
            if let Some(bonus) = &outcome.bonus {
                println!(
                    "  courier bonus:    {} cents (payment {})",
                    bonus.amount_cents, bonus.payment_id
                );
            }
            println!(
                "  alerts queued:    {} (dropped {})",
                outcome.notifications.enqueued, outcome.notifications.dropped
            );
        }
        None => println!("  no producer nearby to report"),
    }

    drop(services);
    match worker.await {
        Ok(stats) => println!(
            "\nAlert delivery: {} delivered, {} failed",
            stats.delivered, stats.failed
        ),
        Err(err) => println!("\nAlert worker stopped unexpectedly: {err}"),
    }

    Ok(())
}

pub(crate) async fn run_nearby(args: NearbyArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    let store = memory_store(Some(&args.producers_csv))?;
    let search = ProximitySearch::new(Arc::new(store), &config.proximity);
    let radius_km = args.radius_km.unwrap_or(search.default_radius_km());

    let nearby = search
        .producers_within_radius(args.lat, args.lon, Some(radius_km))
        .await?;
    println!(
        "Producers within {radius_km} km of ({}, {})",
        args.lat, args.lon
    );
    render_nearby(&nearby);
    Ok(())
}

fn render_order(view: &SanitizedOrder) {
    println!("  status:     {}", view.status.label());
    println!("  paid:       {}", view.is_paid);
    println!("  canReveal:  {}", view.can_reveal);
    println!(
        "  phone:      {}",
        view.phone.as_deref().unwrap_or("(hidden)")
    );
    println!(
        "  address:    {}",
        view.address.as_deref().unwrap_or("(hidden)")
    );
}

fn render_nearby(nearby: &[NearbyProducer]) {
    if nearby.is_empty() {
        println!("  (none)");
        return;
    }
    for entry in nearby {
        let name = entry
            .producer
            .display_name
            .as_deref()
            .unwrap_or(entry.producer.id.as_str());
        let rating = entry
            .producer
            .rating
            .map(|rating| format!("{rating:.1}"))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {:>6.2} km  {:<28} rating {}",
            entry.distance_km, name, rating
        );
    }
}

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{
    producer_row, report, seed_producer, FailingInserts, FlakyDisbursement, RecordingNotifier,
    RejectingDisbursement, Sent,
};
use olla::domain::Producer;
use olla::error::ErrorKind;
use olla::gateway::{LedgerDisbursement, MemoryStore, StoreGateway, Table};
use olla::workflows::bypass::{
    BypassError, BypassPipeline, EscalationPolicy, EscalationTier, NotificationQueue,
    NotificationWorker,
};
use serde_json::json;

fn policy() -> EscalationPolicy {
    EscalationPolicy::default().with_recipients(
        vec!["ops@olla.test".to_string()],
        vec!["+5491100000001".to_string(), "+5491100000002".to_string()],
    )
}

fn store_with_producer() -> MemoryStore {
    let store = MemoryStore::new();
    seed_producer(&store, &Producer::new("p1", "Abuela Rosa").located_at(-34.6, -58.4));
    store
}

#[tokio::test]
async fn concurrent_reports_never_lose_increments() {
    let store = store_with_producer();
    let shared: Arc<dyn StoreGateway> = Arc::new(store.clone());
    let (queue, _receiver) = NotificationQueue::bounded(64);
    let pipeline = Arc::new(BypassPipeline::new(
        shared.clone(),
        Arc::new(LedgerDisbursement::new(shared)),
        queue,
        policy(),
    ));

    let handles: Vec<_> = (0..10)
        .map(|n| {
            let pipeline = pipeline.clone();
            tokio::spawn(async move {
                pipeline
                    .handle_bypass_report(&report(
                        "p1",
                        0.9,
                        Some(&format!("courier-{n}")),
                        "n",
                    ))
                    .await
            })
        })
        .collect();

    for handle in handles {
        handle.await.expect("task joins").expect("report handled");
    }

    let producer = producer_row(&store, "p1");
    assert_eq!(producer["bypass_attempts"], json!(10));
    assert_eq!(producer["visible"], json!(false));
    assert_eq!(store.rows(Table::BypassAlertsLog).len(), 10);
    assert_eq!(store.rows(Table::Payments).len(), 10);
}

#[tokio::test]
async fn tiers_drive_notification_fan_out() {
    let cases = [
        (0.8, EscalationTier::High, 3),
        (0.79, EscalationTier::Medium, 1),
        (0.5, EscalationTier::Medium, 1),
        (0.49, EscalationTier::Low, 0),
    ];

    for (score, tier, expected_sends) in cases {
        let store = store_with_producer();
        let shared: Arc<dyn StoreGateway> = Arc::new(store.clone());
        let notifier = Arc::new(RecordingNotifier::default());
        let (queue, receiver) = NotificationQueue::bounded(8);
        let worker = NotificationWorker::new(receiver, notifier.clone(), 1).spawn();

        let pipeline = BypassPipeline::new(
            shared.clone(),
            Arc::new(LedgerDisbursement::new(shared)),
            queue,
            policy(),
        );
        let outcome = pipeline
            .handle_bypass_report(&report("p1", score, None, "n"))
            .await
            .expect("report handled");
        assert_eq!(outcome.tier, tier, "score {score}");

        drop(pipeline);
        let stats = worker.await.expect("worker joins");
        assert_eq!(stats.delivered, expected_sends, "score {score}");

        let sent = notifier.sent();
        if tier == EscalationTier::Medium {
            assert!(matches!(
                &sent[0],
                Sent::Email { subject, .. } if subject.starts_with("[WARNING] ")
            ));
        }
        if tier == EscalationTier::High {
            let sms: Vec<_> = sent
                .iter()
                .filter(|sent| matches!(sent, Sent::Sms { .. }))
                .collect();
            assert_eq!(sms.len(), 2);
        }
    }
}

#[tokio::test]
async fn failing_notifier_does_not_undo_enforcement() {
    let store = store_with_producer();
    let shared: Arc<dyn StoreGateway> = Arc::new(store.clone());
    let notifier = Arc::new(RecordingNotifier::failing());
    let (queue, receiver) = NotificationQueue::bounded(8);
    let worker = NotificationWorker::new(receiver, notifier.clone(), 2)
        .with_backoff(Duration::ZERO)
        .spawn();

    let pipeline = BypassPipeline::new(
        shared.clone(),
        Arc::new(LedgerDisbursement::new(shared)),
        queue,
        policy(),
    );
    let outcome = pipeline
        .handle_bypass_report(&report("p1", 0.95, Some("courier-1"), "n1"))
        .await
        .expect("enforcement succeeds despite notifier");

    assert_eq!(outcome.tier, EscalationTier::High);
    assert!(outcome.bonus.is_some());
    assert_eq!(producer_row(&store, "p1")["bypass_attempts"], json!(1));
    assert_eq!(store.rows(Table::Payments).len(), 1);

    drop(pipeline);
    let stats = worker.await.expect("worker joins");
    assert_eq!(stats.failed, 3);
    assert_eq!(stats.delivered, 0);
    assert_eq!(
        notifier.attempts.load(std::sync::atomic::Ordering::SeqCst),
        6
    );
}

#[tokio::test]
async fn audit_failure_is_not_fatal() {
    let store = store_with_producer();
    let failing: Arc<dyn StoreGateway> = Arc::new(FailingInserts {
        inner: store.clone(),
        table: Table::BypassAlertsLog,
    });
    let (queue, _receiver) = NotificationQueue::bounded(8);
    let pipeline = BypassPipeline::new(
        failing.clone(),
        Arc::new(LedgerDisbursement::new(failing)),
        queue,
        policy(),
    );

    let outcome = pipeline
        .handle_bypass_report(&report("p1", 0.6, Some("courier-2"), "n"))
        .await
        .expect("report handled");

    assert!(!outcome.audited);
    assert!(outcome.producer_hidden);
    assert!(outcome.bonus.is_some());
}

#[tokio::test]
async fn bonus_failure_propagates_after_penalty_commits() {
    let store = store_with_producer();
    let (queue, _receiver) = NotificationQueue::bounded(8);
    let pipeline = BypassPipeline::new(
        Arc::new(store.clone()),
        Arc::new(RejectingDisbursement),
        queue,
        policy(),
    );

    let result = pipeline
        .handle_bypass_report(&report("p1", 1.0, Some("courier-3"), "n"))
        .await;

    assert!(matches!(result, Err(BypassError::Disbursement(_))));
    assert_eq!(result.err().map(|err| err.kind()), Some(ErrorKind::Gateway));
    assert_eq!(producer_row(&store, "p1")["bypass_attempts"], json!(1));
    assert_eq!(producer_row(&store, "p1")["visible"], json!(false));
}

#[tokio::test]
async fn retry_after_bonus_failure_penalizes_once() {
    let store = store_with_producer();
    let shared: Arc<dyn StoreGateway> = Arc::new(store.clone());
    let (queue, _receiver) = NotificationQueue::bounded(8);
    let pipeline = BypassPipeline::new(
        shared.clone(),
        Arc::new(FlakyDisbursement::failing_once(LedgerDisbursement::new(shared))),
        queue,
        policy(),
    );
    let report = report("p1", 0.9, Some("courier-3"), "n");

    let first = pipeline.handle_bypass_report(&report).await;
    assert!(matches!(first, Err(BypassError::Disbursement(_))));
    assert_eq!(producer_row(&store, "p1")["bypass_attempts"], json!(1));

    let retried = pipeline
        .handle_bypass_report(&report)
        .await
        .expect("retry succeeds");
    assert!(retried.replayed);
    assert!(retried.audited);
    assert_eq!(retried.bypass_attempts, 1);
    assert!(retried.producer_hidden);
    assert!(retried.bonus.is_some());

    let again = pipeline
        .handle_bypass_report(&report)
        .await
        .expect("redelivery acknowledged");
    assert_eq!(again.bypass_attempts, 1);
    assert_eq!(again.notifications.enqueued, 0);
    assert_eq!(
        again.bonus.map(|bonus| bonus.payment_id),
        retried.bonus.map(|bonus| bonus.payment_id)
    );

    assert_eq!(producer_row(&store, "p1")["bypass_attempts"], json!(1));
    assert_eq!(store.rows(Table::Payments).len(), 1);
    assert_eq!(store.rows(Table::BypassAlertsLog).len(), 1);
}

#[tokio::test]
async fn full_queue_drops_alerts_but_still_enforces() {
    let store = store_with_producer();
    let shared: Arc<dyn StoreGateway> = Arc::new(store.clone());
    let (queue, _receiver) = NotificationQueue::bounded(1);
    let pipeline = BypassPipeline::new(
        shared.clone(),
        Arc::new(LedgerDisbursement::new(shared)),
        queue,
        policy(),
    );

    let outcome = pipeline
        .handle_bypass_report(&report("p1", 0.9, None, "n"))
        .await
        .expect("report handled");

    assert_eq!(outcome.notifications.enqueued, 1);
    assert_eq!(outcome.notifications.dropped, 2);
    assert!(!outcome.notifications.all_enqueued());
    assert_eq!(producer_row(&store, "p1")["bypass_attempts"], json!(1));
}

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use olla::domain::{Order, OrderId, OrderStatus, Producer, ProducerId, UserId};
use olla::gateway::{
    encode_row, BonusReceipt, BonusRequest, DisbursementError, Filter, MemoryStore,
    NotificationError, Notifier, PaymentDisbursement, Row, StoreError, StoreGateway, Table,
};
use olla::workflows::bypass::BypassReport;
use serde_json::{json, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Email {
        subject: String,
        recipients: Vec<String>,
    },
    Sms {
        body: String,
        recipient: String,
    },
}

/// Records every send; optionally fails all of them with a transport error.
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<Sent>>,
    pub attempts: AtomicUsize,
    fail: bool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().expect("sent mutex").clone()
    }

    fn outcome(&self, channel: &'static str, record: Sent) -> Result<(), NotificationError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(NotificationError::Transport {
                channel,
                reason: "connection reset by peer".to_string(),
            });
        }
        self.sent.lock().expect("sent mutex").push(record);
        Ok(())
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_email(
        &self,
        subject: &str,
        _body: &str,
        recipients: &[String],
    ) -> Result<(), NotificationError> {
        self.outcome(
            "email",
            Sent::Email {
                subject: subject.to_string(),
                recipients: recipients.to_vec(),
            },
        )
    }

    async fn send_sms(&self, body: &str, recipient: &str) -> Result<(), NotificationError> {
        self.outcome(
            "sms",
            Sent::Sms {
                body: body.to_string(),
                recipient: recipient.to_string(),
            },
        )
    }
}

/// Disbursement that always fails, to exercise the load-bearing path.
pub struct RejectingDisbursement;

#[async_trait]
impl PaymentDisbursement for RejectingDisbursement {
    async fn create_bonus_payment(
        &self,
        _request: &BonusRequest,
    ) -> Result<BonusReceipt, DisbursementError> {
        Err(DisbursementError::Rejected {
            status: 503,
            body: "payout provider unavailable".to_string(),
        })
    }
}

/// Rejects the first payout, then delegates. Models a provider outage that a
/// handler retry recovers from.
pub struct FlakyDisbursement<D> {
    pub inner: D,
    pub failures_left: AtomicUsize,
}

impl<D> FlakyDisbursement<D> {
    pub fn failing_once(inner: D) -> Self {
        Self {
            inner,
            failures_left: AtomicUsize::new(1),
        }
    }
}

#[async_trait]
impl<D: PaymentDisbursement> PaymentDisbursement for FlakyDisbursement<D> {
    async fn create_bonus_payment(
        &self,
        request: &BonusRequest,
    ) -> Result<BonusReceipt, DisbursementError> {
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return RejectingDisbursement.create_bonus_payment(request).await;
        }
        self.inner.create_bonus_payment(request).await
    }
}

/// Wraps a store and fails inserts into one table.
pub struct FailingInserts {
    pub inner: MemoryStore,
    pub table: Table,
}

#[async_trait]
impl StoreGateway for FailingInserts {
    async fn get(&self, table: Table, filter: &Filter) -> Result<Vec<Row>, StoreError> {
        self.inner.get(table, filter).await
    }

    async fn insert(&self, table: Table, row: Row) -> Result<Row, StoreError> {
        if table == self.table {
            return Err(StoreError::Transport(format!("{table} is read-only today")));
        }
        self.inner.insert(table, row).await
    }

    async fn update(
        &self,
        table: Table,
        filter: &Filter,
        patch: Row,
    ) -> Result<Vec<Row>, StoreError> {
        self.inner.update(table, filter, patch).await
    }

    async fn atomic_increment(
        &self,
        table: Table,
        filter: &Filter,
        field: &str,
    ) -> Result<Option<i64>, StoreError> {
        self.inner.atomic_increment(table, filter, field).await
    }

    async fn call_procedure(&self, name: &str, args: Value) -> Result<Value, StoreError> {
        self.inner.call_procedure(name, args).await
    }
}

pub fn order(id: &str, is_paid: bool, pickup_at: Option<DateTime<Utc>>) -> Order {
    Order {
        id: OrderId(id.to_string()),
        is_paid,
        paid_at: None,
        pickup_at,
        status: if is_paid {
            OrderStatus::Confirmed
        } else {
            OrderStatus::Pending
        },
        phone: Some("+5491144440000".to_string()),
        address: Some("Defensa 1000, San Telmo".to_string()),
    }
}

pub fn seed_order(store: &MemoryStore, order: &Order) {
    store.seed(Table::Orders, [encode_row(order).expect("order encodes")]);
}

pub fn seed_producer(store: &MemoryStore, producer: &Producer) {
    store.seed(Table::Producers, [encode_row(producer).expect("producer encodes")]);
}

pub fn producer_row(store: &MemoryStore, id: &str) -> Row {
    store
        .rows(Table::Producers)
        .into_iter()
        .find(|row| row.get("id") == Some(&json!(id)))
        .expect("producer row present")
}

pub fn report(
    producer_id: &str,
    score: f64,
    reporter: Option<&str>,
    nonce: &str,
) -> BypassReport {
    BypassReport {
        order_id: OrderId("1001".to_string()),
        producer_id: ProducerId(producer_id.to_string()),
        reporter_id: reporter.map(|id| UserId(id.to_string())),
        reason: "shared phone number in chat".to_string(),
        score,
        created_at: Utc::now(),
        nonce: nonce.to_string(),
        payload: json!({ "source": "test" }),
    }
}

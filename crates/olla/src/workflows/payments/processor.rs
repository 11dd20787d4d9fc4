use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use super::event::PaymentWebhookEvent;
use crate::domain::{Order, OrderId, OrderStatus};
use crate::error::ErrorKind;
use crate::gateway::{Filter, Row, StoreError, StoreGateway, Table};
use crate::workflows::disclosure::{DisclosureError, DisclosureService};

#[derive(Debug, thiserror::Error)]
pub enum PaymentWebhookError {
    #[error("malformed payment event: {0}")]
    Malformed(String),
    #[error("order {0} changed concurrently and is still unpaid")]
    Unconfirmed(OrderId),
    #[error(transparent)]
    Disclosure(#[from] DisclosureError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl PaymentWebhookError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PaymentWebhookError::Malformed(_) => ErrorKind::MalformedEvent,
            PaymentWebhookError::Unconfirmed(_) => ErrorKind::Conflict,
            PaymentWebhookError::Disclosure(err) => err.kind(),
            PaymentWebhookError::Store(err) => err.kind(),
        }
    }
}

/// What processing a single delivery did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PaymentOutcome {
    /// Non-approved status: acknowledged, nothing written.
    Ignored { gateway_status: String },
    /// This delivery moved the order from pending to confirmed.
    Confirmed { contact_revealed: bool },
    /// A previous delivery already confirmed the order.
    AlreadyConfirmed,
    /// Approved payment for a cancelled order: acknowledged, nothing written.
    Cancelled,
}

impl PaymentOutcome {
    /// Whether the order is now in a reveal-eligible payment state.
    pub fn reveal_eligible(&self) -> bool {
        matches!(
            self,
            PaymentOutcome::Confirmed { .. } | PaymentOutcome::AlreadyConfirmed
        )
    }
}

/// Drives the `pending -> confirmed` edge on approved gateway events.
///
/// Safe under at-least-once delivery: the write is guarded by `is_paid = false`
/// and `status = pending`, so only one delivery ever wins the transition and a
/// cancellation landing between read and write is never overwritten.
///
/// Once the payment has committed, a failed reveal is logged rather than
/// returned: a redelivery would only see `AlreadyConfirmed`, and the contact
/// endpoint reveals on demand.
#[derive(Clone)]
pub struct PaymentWebhookProcessor {
    store: Arc<dyn StoreGateway>,
    disclosure: Arc<DisclosureService>,
}

impl PaymentWebhookProcessor {
    pub fn new(store: Arc<dyn StoreGateway>, disclosure: Arc<DisclosureService>) -> Self {
        Self { store, disclosure }
    }

    /// Parse a raw gateway payload and process it. Returns whether the order
    /// ended up reveal-eligible.
    pub async fn process_webhook_event(
        &self,
        payload: &Value,
        now: DateTime<Utc>,
    ) -> Result<bool, PaymentWebhookError> {
        let event = PaymentWebhookEvent::from_payload(payload, now)?;
        let outcome = self.process(&event, now).await?;
        Ok(outcome.reveal_eligible())
    }

    pub async fn process(
        &self,
        event: &PaymentWebhookEvent,
        now: DateTime<Utc>,
    ) -> Result<PaymentOutcome, PaymentWebhookError> {
        if !event.is_approved() {
            info!(
                order_id = %event.order_id,
                status = %event.gateway_status,
                "ignoring non-approved payment event"
            );
            return Ok(PaymentOutcome::Ignored {
                gateway_status: event.gateway_status.clone(),
            });
        }

        let order = self.disclosure.fetch_order(&event.order_id).await?;
        if let Some(settled) = settled_outcome(&order) {
            info!(order_id = %order.id, outcome = ?settled, "approved event needs no write");
            return Ok(settled);
        }

        let guard = Filter::eq("id", order.id.as_str())
            .and_eq("is_paid", false)
            .and_eq("status", OrderStatus::Pending.label());
        let updated = self
            .store
            .update(Table::Orders, &guard, confirmation_patch(now))
            .await?;

        if updated.is_empty() {
            // Another delivery, or a cancellation, changed the order between our
            // read and update.
            let current = self.disclosure.fetch_order(&event.order_id).await?;
            return settled_outcome(&current)
                .ok_or_else(|| PaymentWebhookError::Unconfirmed(event.order_id.clone()));
        }

        info!(order_id = %order.id, amount = ?event.amount, "order confirmed as paid");
        let contact_revealed = match self.confirm_reveal(&order.id, now).await {
            Ok(revealed) => revealed,
            Err(err) => {
                error!(
                    order_id = %order.id,
                    error = %err,
                    "order confirmed but contact reveal failed"
                );
                false
            }
        };
        Ok(PaymentOutcome::Confirmed { contact_revealed })
    }

    /// Run the sanitize-then-reveal path against the freshly confirmed order.
    async fn confirm_reveal(
        &self,
        order_id: &OrderId,
        now: DateTime<Utc>,
    ) -> Result<bool, PaymentWebhookError> {
        let view = self.disclosure.sanitized(order_id, now).await?;
        if !view.can_reveal {
            return Ok(false);
        }

        match self.disclosure.reveal_contact(order_id).await {
            Ok(_) => Ok(true),
            Err(DisclosureError::IncompleteContact(id)) => {
                warn!(order_id = %id, "paid order has incomplete contact details");
                Ok(false)
            }
            Err(err) => Err(err.into()),
        }
    }
}

fn settled_outcome(order: &Order) -> Option<PaymentOutcome> {
    if order.status == OrderStatus::Cancelled {
        Some(PaymentOutcome::Cancelled)
    } else if order.is_paid || order.status.is_past_payment() {
        Some(PaymentOutcome::AlreadyConfirmed)
    } else {
        None
    }
}

fn confirmation_patch(now: DateTime<Utc>) -> Row {
    let mut patch = Row::new();
    patch.insert("is_paid".to_string(), json!(true));
    patch.insert("paid_at".to_string(), json!(now.to_rfc3339()));
    patch.insert(
        "status".to_string(),
        json!(OrderStatus::Confirmed.label()),
    );
    patch
}

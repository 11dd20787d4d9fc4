use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use super::processor::PaymentWebhookError;
use crate::domain::OrderId;

/// Gateway status that confirms a payment. Everything else is acknowledged and ignored.
pub const APPROVED_STATUS: &str = "approved";

/// Payment gateway notification, reduced to the fields the processor acts on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentWebhookEvent {
    pub order_id: OrderId,
    pub gateway_status: String,
    pub amount: Option<f64>,
    pub received_at: DateTime<Utc>,
}

impl PaymentWebhookEvent {
    /// Read `{data: {status, order_id, amount}}`. Status and order id are required.
    pub fn from_payload(
        payload: &Value,
        received_at: DateTime<Utc>,
    ) -> Result<Self, PaymentWebhookError> {
        let data = payload
            .get("data")
            .filter(|data| data.is_object())
            .ok_or_else(|| PaymentWebhookError::Malformed("missing 'data' object".into()))?;

        let gateway_status = data
            .get("status")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|status| !status.is_empty())
            .ok_or_else(|| PaymentWebhookError::Malformed("missing 'data.status'".into()))?
            .to_string();

        let order_id = data
            .get("order_id")
            .and_then(OrderId::from_value)
            .ok_or_else(|| PaymentWebhookError::Malformed("missing 'data.order_id'".into()))?;

        let amount = data.get("amount").and_then(Value::as_f64);

        Ok(Self {
            order_id,
            gateway_status,
            amount,
            received_at,
        })
    }

    pub fn is_approved(&self) -> bool {
        self.gateway_status.eq_ignore_ascii_case(APPROVED_STATUS)
    }
}

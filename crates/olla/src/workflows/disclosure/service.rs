use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use super::policy::{DisclosurePolicy, SanitizedOrder};
use crate::domain::{Order, OrderId};
use crate::error::ErrorKind;
use crate::gateway::{decode_row, Filter, StoreError, StoreGateway, Table, REVEAL_CONTACT_PROCEDURE};

#[derive(Debug, thiserror::Error)]
pub enum DisclosureError {
    #[error("order {0} does not exist")]
    NotFound(OrderId),
    #[error("order {order_id} could not be decoded: {reason}")]
    Decode { order_id: OrderId, reason: String },
    #[error("reveal for order {0} returned incomplete contact details")]
    IncompleteContact(OrderId),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl DisclosureError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DisclosureError::NotFound(_) => ErrorKind::NotFound,
            DisclosureError::Decode { .. } | DisclosureError::IncompleteContact(_) => {
                ErrorKind::Gateway
            }
            DisclosureError::Store(err) => err.kind(),
        }
    }
}

/// Both contact fields, as handed out by the store's reveal procedure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContactDetails {
    pub order_id: OrderId,
    pub phone: String,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ContactDisclosure {
    Revealed(ContactDetails),
    Withheld(SanitizedOrder),
}

#[derive(Debug, Deserialize)]
struct RevealRow {
    #[serde(default)]
    phone: Option<String>,
    #[serde(default)]
    address: Option<String>,
}

/// Reads orders through the store and applies the disclosure policy.
#[derive(Clone)]
pub struct DisclosureService {
    store: Arc<dyn StoreGateway>,
    policy: DisclosurePolicy,
}

impl DisclosureService {
    pub fn new(store: Arc<dyn StoreGateway>, policy: DisclosurePolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &DisclosurePolicy {
        &self.policy
    }

    pub async fn fetch_order(&self, order_id: &OrderId) -> Result<Order, DisclosureError> {
        let row = self
            .store
            .get(Table::Orders, &Filter::eq("id", order_id.as_str()))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| DisclosureError::NotFound(order_id.clone()))?;

        decode_row(row).map_err(|err| DisclosureError::Decode {
            order_id: order_id.clone(),
            reason: err.to_string(),
        })
    }

    pub async fn sanitized(
        &self,
        order_id: &OrderId,
        now: DateTime<Utc>,
    ) -> Result<SanitizedOrder, DisclosureError> {
        let order = self.fetch_order(order_id).await?;
        Ok(self.policy.sanitize(&order, now))
    }

    /// Hand out contact details through the store's audited reveal procedure.
    ///
    /// Callers must have observed `canReveal` first; this does not re-check.
    pub async fn reveal_contact(
        &self,
        order_id: &OrderId,
    ) -> Result<ContactDetails, DisclosureError> {
        let result = self
            .store
            .call_procedure(
                REVEAL_CONTACT_PROCEDURE,
                json!({ "order_id": order_id.as_str() }),
            )
            .await?;

        let row = match result {
            Value::Array(rows) => rows.into_iter().next(),
            Value::Null => None,
            object => Some(object),
        }
        .ok_or_else(|| DisclosureError::NotFound(order_id.clone()))?;

        let reveal: RevealRow =
            serde_json::from_value(row).map_err(|err| DisclosureError::Decode {
                order_id: order_id.clone(),
                reason: err.to_string(),
            })?;

        match (non_blank(reveal.phone), non_blank(reveal.address)) {
            (Some(phone), Some(address)) => {
                info!(order_id = %order_id, "contact details revealed");
                Ok(ContactDetails {
                    order_id: order_id.clone(),
                    phone,
                    address,
                })
            }
            _ => Err(DisclosureError::IncompleteContact(order_id.clone())),
        }
    }

    /// Sanitize first; reveal only when the policy allows it.
    pub async fn contact_for(
        &self,
        order_id: &OrderId,
        now: DateTime<Utc>,
    ) -> Result<ContactDisclosure, DisclosureError> {
        let sanitized = self.sanitized(order_id, now).await?;
        if !sanitized.can_reveal {
            debug!(order_id = %order_id, "contact withheld by disclosure policy");
            return Ok(ContactDisclosure::Withheld(sanitized));
        }
        self.reveal_contact(order_id)
            .await
            .map(ContactDisclosure::Revealed)
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|text| !text.trim().is_empty())
}

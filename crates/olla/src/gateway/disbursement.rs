use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use super::store::{decode_row, encode_row, Filter, StoreError, StoreGateway, Table};
use crate::config::HttpDisbursementConfig;
use crate::domain::UserId;
use crate::error::ErrorKind;

/// Ledger `kind` column for bypass-report bonuses.
pub const BONUS_PAYMENT_KIND: &str = "bypass_bonus";

/// Instruction to credit a user. `idempotency_key` makes replays return the first receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BonusRequest {
    pub user_id: UserId,
    pub amount_cents: i64,
    pub reason: String,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BonusReceipt {
    #[serde(rename = "id")]
    pub payment_id: String,
    pub user_id: UserId,
    pub amount_cents: i64,
    pub reason: String,
    pub idempotency_key: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum DisbursementError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("disbursement transport failed: {0}")]
    Transport(String),
    #[error("disbursement rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("disbursement response could not be decoded: {0}")]
    Decode(String),
}

impl DisbursementError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DisbursementError::Store(err) => err.kind(),
            _ => ErrorKind::Gateway,
        }
    }
}

#[async_trait]
pub trait PaymentDisbursement: Send + Sync {
    async fn create_bonus_payment(
        &self,
        request: &BonusRequest,
    ) -> Result<BonusReceipt, DisbursementError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct LedgerRow {
    #[serde(flatten)]
    receipt: BonusReceipt,
    kind: String,
}

/// Records bonuses as rows in the `payments` table; the store's uniqueness on
/// `idempotency_key` turns a concurrent replay into a lookup of the winner.
#[derive(Clone)]
pub struct LedgerDisbursement {
    store: Arc<dyn StoreGateway>,
}

impl LedgerDisbursement {
    pub fn new(store: Arc<dyn StoreGateway>) -> Self {
        Self { store }
    }

    async fn existing(&self, idempotency_key: &str) -> Result<Option<BonusReceipt>, StoreError> {
        let rows = self
            .store
            .get(
                Table::Payments,
                &Filter::eq("idempotency_key", idempotency_key),
            )
            .await?;

        rows.into_iter()
            .next()
            .map(|row| decode_row::<LedgerRow>(row).map(|ledger| ledger.receipt))
            .transpose()
    }
}

#[async_trait]
impl PaymentDisbursement for LedgerDisbursement {
    async fn create_bonus_payment(
        &self,
        request: &BonusRequest,
    ) -> Result<BonusReceipt, DisbursementError> {
        if let Some(receipt) = self.existing(&request.idempotency_key).await? {
            info!(key = %request.idempotency_key, "bonus already credited, returning original receipt");
            return Ok(receipt);
        }

        let receipt = BonusReceipt {
            payment_id: Uuid::new_v4().to_string(),
            user_id: request.user_id.clone(),
            amount_cents: request.amount_cents,
            reason: request.reason.clone(),
            idempotency_key: request.idempotency_key.clone(),
            created_at: Utc::now(),
        };
        let row = encode_row(&LedgerRow {
            receipt: receipt.clone(),
            kind: BONUS_PAYMENT_KIND.to_string(),
        })?;

        match self.store.insert(Table::Payments, row).await {
            Ok(_) => Ok(receipt),
            Err(StoreError::Duplicate { .. }) => self
                .existing(&request.idempotency_key)
                .await?
                .ok_or_else(|| {
                    DisbursementError::Decode("duplicate bonus row vanished during replay".into())
                }),
            Err(err) => Err(err.into()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PayoutResponse {
    id: String,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

/// Posts bonuses to an external payout API, forwarding the idempotency key as a header.
#[derive(Debug, Clone)]
pub struct HttpDisbursement {
    client: reqwest::Client,
    url: String,
    token: String,
}

impl HttpDisbursement {
    pub fn new(config: &HttpDisbursementConfig) -> Result<Self, DisbursementError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|err| DisbursementError::Transport(err.to_string()))?;

        Ok(Self {
            client,
            url: config.url.clone(),
            token: config.token.clone(),
        })
    }
}

#[async_trait]
impl PaymentDisbursement for HttpDisbursement {
    async fn create_bonus_payment(
        &self,
        request: &BonusRequest,
    ) -> Result<BonusReceipt, DisbursementError> {
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.token)
            .header("X-Idempotency-Key", &request.idempotency_key)
            .json(&serde_json::json!({
                "user_id": request.user_id,
                "amount_cents": request.amount_cents,
                "reason": request.reason,
            }))
            .send()
            .await
            .map_err(|err| DisbursementError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DisbursementError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let payout: PayoutResponse = response
            .json()
            .await
            .map_err(|err| DisbursementError::Decode(err.to_string()))?;

        Ok(BonusReceipt {
            payment_id: payout.id,
            user_id: request.user_id.clone(),
            amount_cents: request.amount_cents,
            reason: request.reason.clone(),
            idempotency_key: request.idempotency_key.clone(),
            created_at: payout.created_at.unwrap_or_else(Utc::now),
        })
    }
}

use std::sync::Arc;

use serde_json::json;
use tracing::{info, warn};

use super::domain::{
    BypassAuditRecord, BypassReport, EscalationOutcome, EscalationTier, NotificationDispatch,
};
use super::escalation::EscalationPolicy;
use super::queue::NotificationQueue;
use crate::config::EscalationConfig;
use crate::domain::{Producer, ProducerId};
use crate::error::ErrorKind;
use crate::gateway::{
    decode_row, encode_row, BonusReceipt, BonusRequest, DisbursementError, Filter,
    PaymentDisbursement, Row, StoreError, StoreGateway, Table,
};

/// Reason attached to every reporter bonus.
pub const BONUS_REASON: &str = "bypass report confirmed";
pub const DEFAULT_BONUS_CENTS: i64 = 50_000;

/// What appending the audit row said about a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReportClaim {
    /// This delivery appended the row and owns the penalty and alerts.
    Claimed,
    /// The audit write failed for another reason; the report is handled as new.
    Unaudited,
    /// An earlier delivery appended the row.
    Replayed,
}

#[derive(Debug, thiserror::Error)]
pub enum BypassError {
    #[error("malformed bypass report: {0}")]
    Malformed(String),
    #[error("producer {0} does not exist")]
    ProducerNotFound(ProducerId),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Disbursement(#[from] DisbursementError),
}

impl BypassError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BypassError::Malformed(_) => ErrorKind::MalformedEvent,
            BypassError::ProducerNotFound(_) => ErrorKind::NotFound,
            BypassError::Store(err) => err.kind(),
            BypassError::Disbursement(err) => err.kind(),
        }
    }
}

/// Audit, penalize, reward, escalate.
///
/// Only the penalty and the bonus are load-bearing: their failures propagate so
/// the caller can retry. The audit row claims the report, so a retried report
/// skips the penalty and alerts and only settles the idempotent bonus. Audit
/// writes and alert delivery are best-effort.
#[derive(Clone)]
pub struct BypassPipeline {
    store: Arc<dyn StoreGateway>,
    disbursement: Arc<dyn PaymentDisbursement>,
    queue: NotificationQueue,
    policy: EscalationPolicy,
    bonus_cents: i64,
}

impl BypassPipeline {
    pub fn new(
        store: Arc<dyn StoreGateway>,
        disbursement: Arc<dyn PaymentDisbursement>,
        queue: NotificationQueue,
        policy: EscalationPolicy,
    ) -> Self {
        Self {
            store,
            disbursement,
            queue,
            policy,
            bonus_cents: DEFAULT_BONUS_CENTS,
        }
    }

    pub fn from_config(
        config: &EscalationConfig,
        store: Arc<dyn StoreGateway>,
        disbursement: Arc<dyn PaymentDisbursement>,
        queue: NotificationQueue,
    ) -> Self {
        Self::new(store, disbursement, queue, EscalationPolicy::from_config(config))
            .with_bonus_cents(config.bonus_amount_cents)
    }

    pub fn with_bonus_cents(mut self, cents: i64) -> Self {
        self.bonus_cents = cents;
        self
    }

    pub fn policy(&self) -> &EscalationPolicy {
        &self.policy
    }

    pub async fn handle_bypass_report(
        &self,
        report: &BypassReport,
    ) -> Result<EscalationOutcome, BypassError> {
        report.validate()?;
        let tier = self.policy.tier(report.score);

        let claim = self.claim(report, tier).await;
        let replayed = claim == ReportClaim::Replayed;
        let (bypass_attempts, producer_hidden) = if replayed {
            self.current_standing(&report.producer_id).await?
        } else {
            let attempts = self.penalize(&report.producer_id).await?;
            (attempts, attempts >= 1)
        };
        let bonus = self.reward(report).await?;
        let notifications = if replayed {
            NotificationDispatch::default()
        } else {
            self.escalate(report, tier)
        };
        let audited = claim != ReportClaim::Unaudited;

        info!(
            order_id = %report.order_id,
            producer_id = %report.producer_id,
            tier = tier.label(),
            bypass_attempts,
            audited,
            replayed,
            bonus = bonus.is_some(),
            alerts = notifications.enqueued,
            "bypass report handled"
        );

        Ok(EscalationOutcome {
            order_id: report.order_id.clone(),
            producer_id: report.producer_id.clone(),
            tier,
            audited,
            replayed,
            bypass_attempts,
            producer_hidden,
            bonus,
            notifications,
        })
    }

    /// Append the audit row. Its `report_key` is unique, so a duplicate means
    /// an earlier delivery already penalized and alerted for this report.
    async fn claim(&self, report: &BypassReport, tier: EscalationTier) -> ReportClaim {
        let record = BypassAuditRecord::from_report(report, tier);
        let result = match encode_row(&record) {
            Ok(row) => self.store.insert(Table::BypassAlertsLog, row).await.map(|_| ()),
            Err(err) => Err(err),
        };

        match result {
            Ok(()) => ReportClaim::Claimed,
            Err(StoreError::Duplicate { .. }) => {
                info!(
                    report_key = %record.report_key,
                    "bypass report already handled, settling bonus only"
                );
                ReportClaim::Replayed
            }
            Err(err) => {
                warn!(
                    order_id = %report.order_id,
                    producer_id = %report.producer_id,
                    error = %err,
                    "bypass audit write failed, continuing"
                );
                ReportClaim::Unaudited
            }
        }
    }

    /// Increment the attempt counter atomically, then hide the producer.
    async fn penalize(&self, producer_id: &ProducerId) -> Result<i64, BypassError> {
        let filter = Filter::eq("id", producer_id.as_str());
        let attempts = self
            .store
            .atomic_increment(Table::Producers, &filter, "bypass_attempts")
            .await?
            .ok_or_else(|| BypassError::ProducerNotFound(producer_id.clone()))?;

        if attempts >= 1 {
            let mut patch = Row::new();
            patch.insert("visible".to_string(), json!(false));
            self.store.update(Table::Producers, &filter, patch).await?;
        }
        Ok(attempts)
    }

    /// Attempt count and visibility as left by an earlier delivery.
    async fn current_standing(
        &self,
        producer_id: &ProducerId,
    ) -> Result<(i64, bool), BypassError> {
        let producer = self
            .store
            .get(Table::Producers, &Filter::eq("id", producer_id.as_str()))
            .await?
            .into_iter()
            .next()
            .map(decode_row::<Producer>)
            .transpose()?
            .ok_or_else(|| BypassError::ProducerNotFound(producer_id.clone()))?;
        Ok((producer.bypass_attempts, !producer.visible))
    }

    async fn reward(&self, report: &BypassReport) -> Result<Option<BonusReceipt>, BypassError> {
        let (Some(reporter), Some(idempotency_key)) =
            (report.reporter_id.as_ref(), report.bonus_idempotency_key())
        else {
            return Ok(None);
        };

        let receipt = self
            .disbursement
            .create_bonus_payment(&BonusRequest {
                user_id: reporter.clone(),
                amount_cents: self.bonus_cents,
                reason: BONUS_REASON.to_string(),
                idempotency_key,
            })
            .await?;
        Ok(Some(receipt))
    }

    fn escalate(&self, report: &BypassReport, tier: EscalationTier) -> NotificationDispatch {
        let mut dispatch = NotificationDispatch::default();
        for job in self.policy.jobs_for(report, tier) {
            let channel = job.channel();
            match self.queue.enqueue(job) {
                Ok(()) => dispatch.enqueued += 1,
                Err(err) => {
                    dispatch.dropped += 1;
                    warn!(
                        order_id = %report.order_id,
                        channel,
                        error = %err,
                        "bypass alert dropped"
                    );
                }
            }
        }
        if tier == EscalationTier::Low {
            info!(order_id = %report.order_id, "low score bypass report, audit only");
        }
        dispatch
    }
}

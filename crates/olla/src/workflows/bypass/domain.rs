use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::pipeline::BypassError;
use crate::domain::{OrderId, ProducerId, UserId};
use crate::gateway::BonusReceipt;

/// Reason recorded when a report arrives without one.
pub const UNKNOWN_REASON: &str = "unknown";

/// Stands in for the reporter in keys of automated detections.
const DETECTOR_REPORTER: &str = "detector";

/// Severity bucket derived from a report's score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationTier {
    Low,
    Medium,
    High,
}

impl EscalationTier {
    pub fn label(&self) -> &'static str {
        match self {
            EscalationTier::Low => "low",
            EscalationTier::Medium => "medium",
            EscalationTier::High => "high",
        }
    }
}

/// A single abuse signal against a producer. Consumed once by the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BypassReport {
    pub order_id: OrderId,
    pub producer_id: ProducerId,
    /// Courier who reported it; automated detections have none and earn no bonus.
    pub reporter_id: Option<UserId>,
    pub reason: String,
    pub score: f64,
    pub created_at: DateTime<Utc>,
    /// Distinguishes separate reports by the same reporter on the same order.
    pub nonce: String,
    /// Raw inbound payload, kept for the audit trail and alert body.
    pub payload: Value,
}

impl BypassReport {
    pub fn validate(&self) -> Result<(), BypassError> {
        if self.producer_id.as_str().trim().is_empty() {
            return Err(BypassError::Malformed("producer_id must not be empty".into()));
        }
        if !self.score.is_finite() || !(0.0..=1.0).contains(&self.score) {
            return Err(BypassError::Malformed(format!(
                "score must lie within [0, 1], got {}",
                self.score
            )));
        }
        if self.nonce.trim().is_empty() {
            return Err(BypassError::Malformed("report nonce must not be empty".into()));
        }
        Ok(())
    }

    /// Key that makes the reporter bonus exactly-once across handler retries.
    pub fn bonus_idempotency_key(&self) -> Option<String> {
        self.reporter_id
            .as_ref()
            .map(|reporter| format!("{}:{}:{}", self.order_id, reporter, self.nonce))
    }

    /// Unique per report; a redelivery of the same report yields the same key.
    pub fn report_key(&self) -> String {
        let reporter = self
            .reporter_id
            .as_ref()
            .map(UserId::as_str)
            .unwrap_or(DETECTOR_REPORTER);
        format!(
            "{}:{}:{}:{}",
            self.order_id, self.producer_id, reporter, self.nonce
        )
    }
}

/// Body of `POST /webhook/bypass`, sent by the chat detector.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BypassEventPayload {
    pub order_id: OrderId,
    pub producer_id: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub score: f64,
    #[serde(default = "empty_meta")]
    pub meta: Value,
}

/// Body of `POST /report-bypass`, sent by a courier.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CourierReportPayload {
    pub producer_id: String,
    pub order_id: OrderId,
    #[serde(default)]
    pub reason: Option<String>,
}

fn empty_meta() -> Value {
    Value::Object(Default::default())
}

fn reason_or_unknown(reason: Option<String>) -> String {
    reason
        .map(|reason| reason.trim().to_string())
        .filter(|reason| !reason.is_empty())
        .unwrap_or_else(|| UNKNOWN_REASON.to_string())
}

impl BypassEventPayload {
    /// Nonce for a detector event that carries no idempotency key. Identical
    /// bodies map to the same nonce.
    pub fn derived_nonce(&self) -> String {
        let body = serde_json::to_vec(self).unwrap_or_default();
        Uuid::new_v5(&Uuid::NAMESPACE_OID, &body).to_string()
    }

    pub fn into_report(self, nonce: String, created_at: DateTime<Utc>) -> BypassReport {
        let payload = serde_json::to_value(&self).unwrap_or(Value::Null);
        BypassReport {
            order_id: self.order_id,
            producer_id: ProducerId(self.producer_id.trim().to_string()),
            reporter_id: None,
            reason: reason_or_unknown(self.reason),
            score: self.score,
            created_at,
            nonce,
            payload,
        }
    }
}

impl CourierReportPayload {
    /// Nonce for a courier report that carries no idempotency key: one report
    /// per courier, order and producer.
    pub fn derived_nonce(&self, reporter: &UserId) -> String {
        let seed = format!(
            "{}:{}:{}",
            self.order_id,
            self.producer_id.trim(),
            reporter
        );
        Uuid::new_v5(&Uuid::NAMESPACE_OID, seed.as_bytes()).to_string()
    }

    pub fn into_report(
        self,
        reporter: UserId,
        score: f64,
        nonce: String,
        created_at: DateTime<Utc>,
    ) -> BypassReport {
        let payload = serde_json::to_value(&self).unwrap_or(Value::Null);
        BypassReport {
            order_id: self.order_id,
            producer_id: ProducerId(self.producer_id.trim().to_string()),
            reporter_id: Some(reporter),
            reason: reason_or_unknown(self.reason),
            score,
            created_at,
            nonce,
            payload,
        }
    }
}

/// Row appended to `bypass_alerts_log`. Never updated. `report_key` is unique,
/// so appending the row also claims the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BypassAuditRecord {
    pub report_key: String,
    pub order_id: OrderId,
    pub producer_id: ProducerId,
    pub reporter_id: Option<UserId>,
    pub reason: String,
    pub score: f64,
    pub tier: EscalationTier,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

impl BypassAuditRecord {
    pub fn from_report(report: &BypassReport, tier: EscalationTier) -> Self {
        Self {
            report_key: report.report_key(),
            order_id: report.order_id.clone(),
            producer_id: report.producer_id.clone(),
            reporter_id: report.reporter_id.clone(),
            reason: report.reason.clone(),
            score: report.score,
            tier,
            payload: report.payload.clone(),
            created_at: report.created_at,
        }
    }
}

/// How many alert jobs were handed to the background queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NotificationDispatch {
    pub enqueued: usize,
    pub dropped: usize,
}

impl NotificationDispatch {
    pub fn all_enqueued(&self) -> bool {
        self.dropped == 0
    }
}

/// Result of handling one report, for the caller and for logs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EscalationOutcome {
    pub order_id: OrderId,
    pub producer_id: ProducerId,
    pub tier: EscalationTier,
    pub audited: bool,
    /// The report had already been claimed by an earlier delivery.
    pub replayed: bool,
    pub bypass_attempts: i64,
    pub producer_hidden: bool,
    pub bonus: Option<BonusReceipt>,
    pub notifications: NotificationDispatch,
}

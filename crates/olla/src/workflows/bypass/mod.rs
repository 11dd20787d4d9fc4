//! Bypass reports: audit, penalize the producer, pay the reporter, alert operators.

pub mod domain;
pub mod escalation;
pub mod pipeline;
pub mod queue;
pub mod router;

pub use domain::{
    BypassAuditRecord, BypassEventPayload, BypassReport, CourierReportPayload, EscalationOutcome,
    EscalationTier, NotificationDispatch,
};
pub use escalation::{alert_body, alert_subject, EscalationPolicy};
pub use pipeline::{BypassError, BypassPipeline, BONUS_REASON, DEFAULT_BONUS_CENTS};
pub use queue::{DeliveryStats, NotificationJob, NotificationQueue, NotificationWorker, QueueError};
pub use router::{bypass_router, COURIER_REPORT_SCORE, IDEMPOTENCY_KEY_HEADER};

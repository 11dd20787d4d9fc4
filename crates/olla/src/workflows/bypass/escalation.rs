use super::domain::{BypassReport, EscalationTier};
use super::queue::NotificationJob;
use crate::config::EscalationConfig;

pub const DEFAULT_HIGH_THRESHOLD: f64 = 0.8;
pub const DEFAULT_MEDIUM_THRESHOLD: f64 = 0.5;
const WARNING_PREFIX: &str = "[WARNING] ";

/// Maps report scores to tiers and tiers to alert fan-out.
///
/// Both thresholds are inclusive: a score equal to a threshold lands in the
/// higher tier.
#[derive(Debug, Clone, PartialEq)]
pub struct EscalationPolicy {
    high_threshold: f64,
    medium_threshold: f64,
    email_recipients: Vec<String>,
    sms_recipients: Vec<String>,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self {
            high_threshold: DEFAULT_HIGH_THRESHOLD,
            medium_threshold: DEFAULT_MEDIUM_THRESHOLD,
            email_recipients: Vec::new(),
            sms_recipients: Vec::new(),
        }
    }
}

impl EscalationPolicy {
    pub fn from_config(config: &EscalationConfig) -> Self {
        Self {
            high_threshold: config.high_threshold,
            medium_threshold: config.medium_threshold,
            email_recipients: config.email_recipients.clone(),
            sms_recipients: config.sms_recipients.clone(),
        }
    }

    pub fn with_recipients(mut self, email: Vec<String>, sms: Vec<String>) -> Self {
        self.email_recipients = email;
        self.sms_recipients = sms;
        self
    }

    pub fn tier(&self, score: f64) -> EscalationTier {
        if score >= self.high_threshold {
            EscalationTier::High
        } else if score >= self.medium_threshold {
            EscalationTier::Medium
        } else {
            EscalationTier::Low
        }
    }

    /// Alert jobs for a report: email plus one SMS per phone on high, a
    /// `[WARNING]` email on medium, nothing on low.
    pub fn jobs_for(&self, report: &BypassReport, tier: EscalationTier) -> Vec<NotificationJob> {
        let subject = alert_subject(report);
        let body = alert_body(report);
        let mut jobs = Vec::new();

        match tier {
            EscalationTier::High => {
                if !self.email_recipients.is_empty() {
                    jobs.push(NotificationJob::Email {
                        order_id: report.order_id.clone(),
                        subject: subject.clone(),
                        body,
                        recipients: self.email_recipients.clone(),
                    });
                }
                let sms_body = format!("{subject}\n{}", report.reason);
                jobs.extend(self.sms_recipients.iter().map(|recipient| {
                    NotificationJob::Sms {
                        order_id: report.order_id.clone(),
                        body: sms_body.clone(),
                        recipient: recipient.clone(),
                    }
                }));
            }
            EscalationTier::Medium => {
                if !self.email_recipients.is_empty() {
                    jobs.push(NotificationJob::Email {
                        order_id: report.order_id.clone(),
                        subject: format!("{WARNING_PREFIX}{subject}"),
                        body,
                        recipients: self.email_recipients.clone(),
                    });
                }
            }
            EscalationTier::Low => {}
        }
        jobs
    }
}

pub fn alert_subject(report: &BypassReport) -> String {
    format!("[ALERTA BYPASS] {} - order #{}", report.reason, report.order_id)
}

pub fn alert_body(report: &BypassReport) -> String {
    format!(
        "Bypass alert detected:\n\norder: {}\nproducer: {}\nreason: {}\nscore: {}\ncreated: {}\n\nPayload: {}",
        report.order_id,
        report.producer_id,
        report.reason,
        report.score,
        report.created_at.to_rfc3339(),
        report.payload,
    )
}

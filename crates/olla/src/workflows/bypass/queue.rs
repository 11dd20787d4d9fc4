//! Bounded alert queue between request handlers and the notification worker.
//!
//! Handlers enqueue with `try_send` and return immediately; a full queue drops
//! the job and says so instead of stalling the request. A single worker task
//! drains the queue and retries transport failures a bounded number of times.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::domain::OrderId;
use crate::gateway::{NotificationError, Notifier};

const DEFAULT_BACKOFF: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "channel", rename_all = "snake_case")]
pub enum NotificationJob {
    Email {
        order_id: OrderId,
        subject: String,
        body: String,
        recipients: Vec<String>,
    },
    Sms {
        order_id: OrderId,
        body: String,
        recipient: String,
    },
}

impl NotificationJob {
    pub fn channel(&self) -> &'static str {
        match self {
            NotificationJob::Email { .. } => "email",
            NotificationJob::Sms { .. } => "sms",
        }
    }

    pub fn order_id(&self) -> &OrderId {
        match self {
            NotificationJob::Email { order_id, .. } | NotificationJob::Sms { order_id, .. } => {
                order_id
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("notification queue is full")]
    Full,
    #[error("notification worker has stopped")]
    Closed,
}

/// Sending half, cloned into every pipeline that raises alerts.
#[derive(Debug, Clone)]
pub struct NotificationQueue {
    sender: mpsc::Sender<NotificationJob>,
}

impl NotificationQueue {
    /// Create a queue holding at most `capacity` pending jobs, plus the receiving half.
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<NotificationJob>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    pub fn enqueue(&self, job: NotificationJob) -> Result<(), QueueError> {
        self.sender.try_send(job).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => QueueError::Full,
            mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
        })
    }
}

/// Totals reported when the worker's queue closes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryStats {
    pub delivered: u64,
    pub failed: u64,
    pub retries: u64,
}

pub struct NotificationWorker {
    receiver: mpsc::Receiver<NotificationJob>,
    notifier: Arc<dyn Notifier>,
    max_attempts: u32,
    backoff: Duration,
}

impl NotificationWorker {
    pub fn new(
        receiver: mpsc::Receiver<NotificationJob>,
        notifier: Arc<dyn Notifier>,
        max_attempts: u32,
    ) -> Self {
        Self {
            receiver,
            notifier,
            max_attempts: max_attempts.max(1),
            backoff: DEFAULT_BACKOFF,
        }
    }

    /// Base delay between attempts; doubles after each failure.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn spawn(self) -> JoinHandle<DeliveryStats> {
        tokio::spawn(self.run())
    }

    /// Drain jobs until every queue handle is dropped.
    pub async fn run(mut self) -> DeliveryStats {
        let mut stats = DeliveryStats::default();
        while let Some(job) = self.receiver.recv().await {
            match self.deliver(&job, &mut stats).await {
                Ok(()) => stats.delivered += 1,
                Err(err) => {
                    stats.failed += 1;
                    error!(
                        order_id = %job.order_id(),
                        channel = job.channel(),
                        error = %err,
                        "bypass alert not delivered"
                    );
                }
            }
        }
        info!(?stats, "notification worker stopped");
        stats
    }

    async fn deliver(
        &self,
        job: &NotificationJob,
        stats: &mut DeliveryStats,
    ) -> Result<(), NotificationError> {
        let mut delay = self.backoff;
        let mut attempt = 1;
        loop {
            match self.send_once(job).await {
                Ok(()) => return Ok(()),
                Err(err) if err.is_retryable() && attempt < self.max_attempts => {
                    warn!(
                        order_id = %job.order_id(),
                        channel = job.channel(),
                        attempt,
                        error = %err,
                        "alert delivery failed, retrying"
                    );
                    stats.retries += 1;
                    attempt += 1;
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn send_once(&self, job: &NotificationJob) -> Result<(), NotificationError> {
        match job {
            NotificationJob::Email {
                subject,
                body,
                recipients,
                ..
            } => self.notifier.send_email(subject, body, recipients).await,
            NotificationJob::Sms {
                body, recipient, ..
            } => self.notifier.send_sms(body, recipient).await,
        }
    }
}

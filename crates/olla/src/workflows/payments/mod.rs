//! Payment gateway webhooks: flip an order to paid exactly once.

pub mod event;
pub mod processor;
pub mod router;

pub use event::{PaymentWebhookEvent, APPROVED_STATUS};
pub use processor::{PaymentOutcome, PaymentWebhookError, PaymentWebhookProcessor};
pub use router::payment_router;

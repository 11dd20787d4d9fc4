pub mod bypass;
pub mod disclosure;
pub mod payments;
pub mod proximity;

pub use bypass::{bypass_router, BypassPipeline};
pub use disclosure::{disclosure_router, DisclosurePolicy, DisclosureService};
pub use payments::{payment_router, PaymentWebhookProcessor};
pub use proximity::{proximity_router, ProximitySearch};

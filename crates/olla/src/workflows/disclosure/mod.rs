//! Disclosure policy: when an order's phone and address may be shown.

pub mod policy;
pub mod router;
pub mod service;

pub use policy::{DisclosurePolicy, DisclosureWindow, SanitizedOrder};
pub use router::disclosure_router;
pub use service::{ContactDetails, ContactDisclosure, DisclosureError, DisclosureService};

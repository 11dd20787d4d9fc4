//! Trust brokering for a home-cooking marketplace.
//!
//! Buyers, producers and couriers only see each other's contact details once an
//! order is paid and its pickup is near. Attempts to settle off-platform are
//! reported, penalized and escalated to operators.

pub mod config;
pub mod domain;
pub mod error;
pub mod gateway;
pub mod identity;
pub mod telemetry;
pub mod workflows;

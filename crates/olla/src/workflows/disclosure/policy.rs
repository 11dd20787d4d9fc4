use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::config::DisclosureConfig;
use crate::domain::{Order, OrderId, OrderStatus};

/// Time range around a pickup during which contact details may be shown.
///
/// The window opens `lead` before pickup. With `close_after` set it shuts
/// that long after pickup; without it the window stays open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisclosureWindow {
    lead: Duration,
    close_after: Option<Duration>,
}

impl DisclosureWindow {
    pub fn new(lead: Duration, close_after: Option<Duration>) -> Self {
        Self { lead, close_after }
    }

    pub fn from_config(config: &DisclosureConfig) -> Self {
        Self::new(
            Duration::minutes(i64::from(config.lead_minutes)),
            config
                .close_after_minutes
                .map(|minutes| Duration::minutes(i64::from(minutes))),
        )
    }

    pub fn opens_at(&self, pickup_at: DateTime<Utc>) -> DateTime<Utc> {
        pickup_at - self.lead
    }

    pub fn contains(&self, pickup_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        if now < self.opens_at(pickup_at) {
            return false;
        }
        match self.close_after {
            Some(close_after) => now <= pickup_at + close_after,
            None => true,
        }
    }
}

impl Default for DisclosureWindow {
    fn default() -> Self {
        Self::from_config(&DisclosureConfig::default())
    }
}

/// Stateless rule deciding whether an order's private fields may be shown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DisclosurePolicy {
    window: DisclosureWindow,
}

impl DisclosurePolicy {
    pub fn new(window: DisclosureWindow) -> Self {
        Self { window }
    }

    pub fn window(&self) -> &DisclosureWindow {
        &self.window
    }

    /// Paid, not cancelled, and `now` inside the window around a known pickup.
    pub fn can_reveal(&self, order: &Order, now: DateTime<Utc>) -> bool {
        if !order.is_paid || order.status == OrderStatus::Cancelled {
            return false;
        }
        order
            .pickup_at
            .map(|pickup_at| self.window.contains(pickup_at, now))
            .unwrap_or(false)
    }

    /// Copy of the order with contact fields blanked unless revealable.
    pub fn sanitize(&self, order: &Order, now: DateTime<Utc>) -> SanitizedOrder {
        let can_reveal = self.can_reveal(order, now);
        let (phone, address) = if can_reveal {
            (order.phone.clone(), order.address.clone())
        } else {
            (None, None)
        };

        SanitizedOrder {
            id: order.id.clone(),
            is_paid: order.is_paid,
            paid_at: order.paid_at,
            pickup_at: order.pickup_at,
            status: order.status,
            phone,
            address,
            can_reveal,
        }
    }
}

/// Public view of an order. `canReveal` is always present.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SanitizedOrder {
    pub id: OrderId,
    pub is_paid: bool,
    pub paid_at: Option<DateTime<Utc>>,
    pub pickup_at: Option<DateTime<Utc>>,
    pub status: OrderStatus,
    pub phone: Option<String>,
    pub address: Option<String>,
    #[serde(rename = "canReveal")]
    pub can_reveal: bool,
}

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::courier::GeoPoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    PendingAssignment,
    Assigned,
    PickedUp,
    InTransit,
    Delivered,
    Failed,
    Cancelled,
}

impl DeliveryStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DeliveryStatus::Delivered | DeliveryStatus::Failed | DeliveryStatus::Cancelled
        )
    }

    /// The lifecycle is a strict chain with two escape hatches: `Failed` and
    /// `Cancelled` are reachable from any non-terminal state, nothing leaves
    /// a terminal state.
    pub fn can_transition_to(self, next: DeliveryStatus) -> bool {
        if self.is_terminal() {
            return false;
        }

        match (self, next) {
            (DeliveryStatus::PendingAssignment, DeliveryStatus::Assigned) => true,
            (DeliveryStatus::Assigned, DeliveryStatus::PickedUp) => true,
            (DeliveryStatus::PickedUp, DeliveryStatus::InTransit) => true,
            (DeliveryStatus::InTransit, DeliveryStatus::Delivered) => true,
            (_, DeliveryStatus::Failed) | (_, DeliveryStatus::Cancelled) => true,
            _ => false,
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeliveryStatus::PendingAssignment => "pending_assignment",
            DeliveryStatus::Assigned => "assigned",
            DeliveryStatus::PickedUp => "picked_up",
            DeliveryStatus::InTransit => "in_transit",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Failed => "failed",
            DeliveryStatus::Cancelled => "cancelled",
        };
        write!(f, "{name}")
    }
}

/// A street address paired with its coordinates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Location {
    pub address: String,
    pub point: GeoPoint,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingEntry {
    pub status: DeliveryStatus,
    pub location: Option<GeoPoint>,
    pub note: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delivery {
    pub id: Uuid,
    /// Unique; at most one delivery per order.
    pub order_id: Uuid,
    pub order_number: String,
    pub restaurant_id: Uuid,
    pub restaurant_name: String,
    pub pickup: Location,
    pub dropoff: Location,
    pub customer_name: String,
    pub customer_phone: String,
    pub items_summary: String,
    pub status: DeliveryStatus,
    pub courier_id: Option<Uuid>,
    /// Denormalized for display; `courier_id` is the canonical ownership
    /// field and the only one consulted by queries and authorization.
    pub courier_name: Option<String>,
    pub estimated_delivery_at: Option<DateTime<Utc>>,
    pub actual_delivery_at: Option<DateTime<Utc>>,
    /// Append-only; entries are never removed or rewritten.
    pub tracking: Vec<TrackingEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The facts needed to open a delivery for an order.
#[derive(Debug, Clone)]
pub struct NewDelivery {
    pub order_id: Uuid,
    pub order_number: String,
    pub restaurant_id: Uuid,
    pub restaurant_name: String,
    pub pickup: Location,
    pub dropoff: Location,
    pub customer_name: String,
    pub customer_phone: String,
    pub items_summary: String,
}

#[cfg(test)]
mod tests {
    use super::DeliveryStatus;

    #[test]
    fn lifecycle_chain_is_strict() {
        use DeliveryStatus::*;

        assert!(PendingAssignment.can_transition_to(Assigned));
        assert!(Assigned.can_transition_to(PickedUp));
        assert!(PickedUp.can_transition_to(InTransit));
        assert!(InTransit.can_transition_to(Delivered));

        assert!(!PendingAssignment.can_transition_to(PickedUp));
        assert!(!Assigned.can_transition_to(InTransit));
        assert!(!Assigned.can_transition_to(Delivered));
        assert!(!PickedUp.can_transition_to(PendingAssignment));
    }

    #[test]
    fn failed_and_cancelled_reachable_from_any_non_terminal_state() {
        use DeliveryStatus::*;

        for from in [PendingAssignment, Assigned, PickedUp, InTransit] {
            assert!(from.can_transition_to(Failed));
            assert!(from.can_transition_to(Cancelled));
        }
    }

    #[test]
    fn terminal_states_have_no_exits() {
        use DeliveryStatus::*;

        for from in [Delivered, Failed, Cancelled] {
            for to in [
                PendingAssignment,
                Assigned,
                PickedUp,
                InTransit,
                Delivered,
                Failed,
                Cancelled,
            ] {
                assert!(!from.can_transition_to(to));
            }
        }
    }
}

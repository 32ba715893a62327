//! Wire types for the event bus.
//!
//! Every message is a dot-namespaced routing key plus a JSON payload.
//! Payloads are validated into these types at the gateway boundary; the
//! orchestrator only ever sees typed structs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::delivery::{DeliveryStatus, Location};

pub mod keys {
    pub const ORDER_CONFIRMED: &str = "order.confirmed";
    pub const ORDER_CANCELLED: &str = "order.cancelled";
    pub const ORDER_READY: &str = "order.ready";
    pub const USER_REGISTERED: &str = "user.registered";

    pub const DELIVERY_CREATED: &str = "delivery.created";
    pub const DELIVERY_ASSIGNED: &str = "delivery.assigned";
    pub const DELIVERY_PICKED_UP: &str = "delivery.picked_up";
    pub const DELIVERY_STATUS_UPDATED: &str = "delivery.status_updated";
    pub const DELIVERY_CANCELLED: &str = "delivery.cancelled";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerInfo {
    pub name: String,
    pub phone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderConfirmed {
    pub order_id: Uuid,
    pub order_number: String,
    pub restaurant_id: Uuid,
    pub delivery_address: Location,
    pub customer: CustomerInfo,
    #[serde(default)]
    pub items_summary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCancelled {
    pub order_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderReady {
    pub order_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRegistered {
    pub user_id: Uuid,
    pub role: String,
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
}

/// State changes this service announces. Payloads are denormalized so
/// consumers can act without a synchronous callback.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum DeliveryEvent {
    Created {
        delivery_id: Uuid,
        order_id: Uuid,
        order_number: String,
        restaurant_id: Uuid,
        restaurant_name: String,
        status: DeliveryStatus,
        created_at: DateTime<Utc>,
    },
    Assigned {
        delivery_id: Uuid,
        order_id: Uuid,
        courier_id: Uuid,
        courier_name: String,
        estimated_delivery_at: Option<DateTime<Utc>>,
        assigned_at: DateTime<Utc>,
    },
    PickedUp {
        delivery_id: Uuid,
        order_id: Uuid,
        courier_id: Option<Uuid>,
        picked_up_at: DateTime<Utc>,
    },
    StatusUpdated {
        delivery_id: Uuid,
        order_id: Uuid,
        status: DeliveryStatus,
        courier_id: Option<Uuid>,
        updated_at: DateTime<Utc>,
    },
    Cancelled {
        delivery_id: Uuid,
        order_id: Uuid,
        courier_id: Option<Uuid>,
        cancelled_at: DateTime<Utc>,
    },
}

impl DeliveryEvent {
    pub fn routing_key(&self) -> &'static str {
        match self {
            DeliveryEvent::Created { .. } => keys::DELIVERY_CREATED,
            DeliveryEvent::Assigned { .. } => keys::DELIVERY_ASSIGNED,
            DeliveryEvent::PickedUp { .. } => keys::DELIVERY_PICKED_UP,
            DeliveryEvent::StatusUpdated { .. } => keys::DELIVERY_STATUS_UPDATED,
            DeliveryEvent::Cancelled { .. } => keys::DELIVERY_CANCELLED,
        }
    }
}

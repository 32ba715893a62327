//! Synchronous lookups against the order and restaurant services.
//!
//! The catalog is a trait object so the HTTP client can be swapped for the
//! in-memory implementation in tests and URL-less local runs. Every method
//! treats an unreachable collaborator as a retriable failure, never a crash.

pub mod http;
pub mod mock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::delivery::Location;

pub use http::HttpOrderCatalog;
pub use mock::MockCatalog;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderDetails {
    pub order_id: Uuid,
    pub order_number: String,
    pub restaurant_id: Uuid,
    pub delivery_address: Location,
    pub customer_name: String,
    pub customer_phone: String,
    #[serde(default)]
    pub items_summary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestaurantDetails {
    pub restaurant_id: Uuid,
    pub name: String,
    pub location: Location,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderPhase {
    Placed,
    Confirmed,
    Preparing,
    Ready,
    Completed,
    Cancelled,
}

#[async_trait]
pub trait OrderCatalog: Send + Sync {
    async fn fetch_order(&self, order_id: Uuid) -> Result<OrderDetails, AppError>;

    async fn fetch_restaurant(&self, restaurant_id: Uuid) -> Result<RestaurantDetails, AppError>;

    /// Gate for courier-initiated pickups: the order must be `Ready`.
    async fn fetch_order_status(&self, order_id: Uuid) -> Result<OrderPhase, AppError>;
}

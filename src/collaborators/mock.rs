//! In-memory catalog used by tests and URL-less local runs.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use super::{OrderCatalog, OrderDetails, OrderPhase, RestaurantDetails};
use crate::error::AppError;

#[derive(Default)]
pub struct MockCatalog {
    orders: DashMap<Uuid, OrderDetails>,
    restaurants: DashMap<Uuid, RestaurantDetails>,
    statuses: DashMap<Uuid, OrderPhase>,
    unreachable: AtomicBool,
}

impl MockCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_order(&self, order: OrderDetails) {
        self.statuses.insert(order.order_id, OrderPhase::Confirmed);
        self.orders.insert(order.order_id, order);
    }

    pub fn insert_restaurant(&self, restaurant: RestaurantDetails) {
        self.restaurants
            .insert(restaurant.restaurant_id, restaurant);
    }

    pub fn set_order_status(&self, order_id: Uuid, phase: OrderPhase) {
        self.statuses.insert(order_id, phase);
    }

    /// Simulate the collaborator being down; every call fails retriably
    /// until flipped back.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    fn check_reachable(&self) -> Result<(), AppError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(AppError::CollaboratorUnavailable(
                "order catalog is unreachable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl OrderCatalog for MockCatalog {
    async fn fetch_order(&self, order_id: Uuid) -> Result<OrderDetails, AppError> {
        self.check_reachable()?;
        self.orders
            .get(&order_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))
    }

    async fn fetch_restaurant(&self, restaurant_id: Uuid) -> Result<RestaurantDetails, AppError> {
        self.check_reachable()?;
        self.restaurants
            .get(&restaurant_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AppError::NotFound(format!("restaurant {restaurant_id} not found")))
    }

    async fn fetch_order_status(&self, order_id: Uuid) -> Result<OrderPhase, AppError> {
        self.check_reachable()?;
        self.statuses
            .get(&order_id)
            .map(|entry| *entry)
            .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))
    }
}

//! Delivery records and their lifecycle.
//!
//! One record per order, enforced by an atomic entry on the order index.
//! Status changes are compare-and-set against an expected prior status, so a
//! stale writer loses instead of silently overwriting a newer state.
//! Terminal records are retained for history, never deleted.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::courier::GeoPoint;
use crate::models::delivery::{Delivery, DeliveryStatus, NewDelivery, TrackingEntry};

pub struct DeliveryStore {
    deliveries: DashMap<Uuid, Delivery>,
    by_order: DashMap<Uuid, Uuid>,
}

impl DeliveryStore {
    pub fn new() -> Self {
        Self {
            deliveries: DashMap::new(),
            by_order: DashMap::new(),
        }
    }

    /// Open a delivery for an order. Idempotent: a second create for the same
    /// order returns the existing record, which is what makes at-least-once
    /// redelivery of `order.confirmed` harmless. The bool reports whether a
    /// record was created by this call.
    pub fn create(&self, facts: NewDelivery) -> (Delivery, bool) {
        match self.by_order.entry(facts.order_id) {
            Entry::Occupied(entry) => {
                let delivery_id = *entry.get();
                // The index entry is written after the record itself.
                let existing = self
                    .deliveries
                    .get(&delivery_id)
                    .expect("order index points at existing delivery")
                    .clone();
                (existing, false)
            }
            Entry::Vacant(entry) => {
                let now = Utc::now();
                let delivery = Delivery {
                    id: Uuid::new_v4(),
                    order_id: facts.order_id,
                    order_number: facts.order_number,
                    restaurant_id: facts.restaurant_id,
                    restaurant_name: facts.restaurant_name,
                    pickup: facts.pickup,
                    dropoff: facts.dropoff,
                    customer_name: facts.customer_name,
                    customer_phone: facts.customer_phone,
                    items_summary: facts.items_summary,
                    status: DeliveryStatus::PendingAssignment,
                    courier_id: None,
                    courier_name: None,
                    estimated_delivery_at: None,
                    actual_delivery_at: None,
                    tracking: vec![TrackingEntry {
                        status: DeliveryStatus::PendingAssignment,
                        location: None,
                        note: Some("delivery created".to_string()),
                        recorded_at: now,
                    }],
                    created_at: now,
                    updated_at: now,
                };
                self.deliveries.insert(delivery.id, delivery.clone());
                entry.insert(delivery.id);
                (delivery, true)
            }
        }
    }

    /// Conditional status change. The target edge is checked against the
    /// state machine before any write; the stored status must still equal
    /// `expected` at write time or the caller gets `StaleState` and must
    /// re-read and retry or abort.
    pub fn transition(
        &self,
        delivery_id: Uuid,
        new_status: DeliveryStatus,
        expected: DeliveryStatus,
        location: Option<GeoPoint>,
        note: Option<String>,
    ) -> Result<Delivery, AppError> {
        if !expected.can_transition_to(new_status) {
            return Err(AppError::InvalidTransition {
                from: expected,
                to: new_status,
            });
        }

        let mut delivery = self
            .deliveries
            .get_mut(&delivery_id)
            .ok_or_else(|| AppError::NotFound(format!("delivery {delivery_id} not found")))?;

        if delivery.status != expected {
            return Err(AppError::StaleState(format!(
                "delivery {delivery_id} is {}, expected {expected}",
                delivery.status
            )));
        }

        let now = Utc::now();
        delivery.status = new_status;
        delivery.updated_at = now;
        if new_status == DeliveryStatus::Delivered {
            delivery.actual_delivery_at = Some(now);
        }
        delivery.tracking.push(TrackingEntry {
            status: new_status,
            location,
            note,
            recorded_at: now,
        });

        Ok(delivery.clone())
    }

    /// Attach a courier. Conditional on the delivery still awaiting
    /// assignment with no courier; a concurrent assigner that lost the race
    /// gets `AlreadyAssigned`.
    pub fn assign_courier(
        &self,
        delivery_id: Uuid,
        courier_id: Uuid,
        courier_name: &str,
        estimated_delivery_at: DateTime<Utc>,
    ) -> Result<Delivery, AppError> {
        let mut delivery = self
            .deliveries
            .get_mut(&delivery_id)
            .ok_or_else(|| AppError::NotFound(format!("delivery {delivery_id} not found")))?;

        if delivery.status != DeliveryStatus::PendingAssignment || delivery.courier_id.is_some() {
            return Err(AppError::AlreadyAssigned(format!(
                "delivery {delivery_id} is {} and cannot be assigned",
                delivery.status
            )));
        }

        let now = Utc::now();
        delivery.status = DeliveryStatus::Assigned;
        delivery.courier_id = Some(courier_id);
        delivery.courier_name = Some(courier_name.to_string());
        delivery.estimated_delivery_at = Some(estimated_delivery_at);
        delivery.updated_at = now;
        delivery.tracking.push(TrackingEntry {
            status: DeliveryStatus::Assigned,
            location: None,
            note: Some(format!("assigned to {courier_name}")),
            recorded_at: now,
        });

        Ok(delivery.clone())
    }

    /// Location-only tracking entry, status unchanged. Pings that arrive
    /// after the delivery reached a terminal state are dropped.
    pub fn append_tracking(
        &self,
        delivery_id: Uuid,
        location: GeoPoint,
        note: Option<String>,
    ) -> Result<(), AppError> {
        let mut delivery = self
            .deliveries
            .get_mut(&delivery_id)
            .ok_or_else(|| AppError::NotFound(format!("delivery {delivery_id} not found")))?;

        if delivery.status.is_terminal() {
            return Ok(());
        }

        let status = delivery.status;
        delivery.tracking.push(TrackingEntry {
            status,
            location: Some(location),
            note,
            recorded_at: Utc::now(),
        });
        Ok(())
    }

    pub fn get(&self, delivery_id: Uuid) -> Option<Delivery> {
        self.deliveries.get(&delivery_id).map(|entry| entry.value().clone())
    }

    pub fn get_by_order(&self, order_id: Uuid) -> Option<Delivery> {
        let delivery_id = *self.by_order.get(&order_id)?;
        self.get(delivery_id)
    }

    pub fn list_by_restaurant(
        &self,
        restaurant_id: Uuid,
        since: Option<DateTime<Utc>>,
        status: Option<DeliveryStatus>,
    ) -> Vec<Delivery> {
        self.deliveries
            .iter()
            .filter(|entry| entry.restaurant_id == restaurant_id)
            .filter(|entry| since.is_none_or(|cutoff| entry.created_at >= cutoff))
            .filter(|entry| status.is_none_or(|wanted| entry.status == wanted))
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn list_active(&self) -> Vec<Delivery> {
        self.deliveries
            .iter()
            .filter(|entry| !entry.status.is_terminal())
            .map(|entry| entry.value().clone())
            .collect()
    }
}

impl Default for DeliveryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::DeliveryStore;
    use crate::error::AppError;
    use crate::models::courier::GeoPoint;
    use crate::models::delivery::{DeliveryStatus, Location, NewDelivery};

    fn facts(order_id: Uuid) -> NewDelivery {
        NewDelivery {
            order_id,
            order_number: "A-100".to_string(),
            restaurant_id: Uuid::new_v4(),
            restaurant_name: "Trattoria".to_string(),
            pickup: Location {
                address: "Pickup St 1".to_string(),
                point: GeoPoint { lat: 0.0, lng: 0.0 },
            },
            dropoff: Location {
                address: "Dropoff Ave 2".to_string(),
                point: GeoPoint { lat: 0.1, lng: 0.1 },
            },
            customer_name: "Kim".to_string(),
            customer_phone: "+4912345".to_string(),
            items_summary: "2x pasta".to_string(),
        }
    }

    #[test]
    fn create_is_idempotent_per_order() {
        let store = DeliveryStore::new();
        let order_id = Uuid::new_v4();

        let (first, created_first) = store.create(facts(order_id));
        let (second, created_second) = store.create(facts(order_id));

        assert!(created_first);
        assert!(!created_second);
        assert_eq!(first.id, second.id);
        assert!(store.get_by_order(order_id).is_some());
    }

    #[test]
    fn invalid_transition_is_rejected_before_any_write() {
        let store = DeliveryStore::new();
        let (delivery, _) = store.create(facts(Uuid::new_v4()));

        let err = store
            .transition(
                delivery.id,
                DeliveryStatus::PendingAssignment,
                DeliveryStatus::PickedUp,
                None,
                None,
            )
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }));

        let unchanged = store.get(delivery.id).unwrap();
        assert_eq!(unchanged.status, DeliveryStatus::PendingAssignment);
        assert_eq!(unchanged.tracking.len(), 1);
    }

    #[test]
    fn stale_expected_status_loses() {
        let store = DeliveryStore::new();
        let (delivery, _) = store.create(facts(Uuid::new_v4()));
        store
            .assign_courier(delivery.id, Uuid::new_v4(), "Ada", chrono::Utc::now())
            .unwrap();

        // A writer still believing the delivery is pending must not win.
        let err = store
            .transition(
                delivery.id,
                DeliveryStatus::Cancelled,
                DeliveryStatus::PendingAssignment,
                None,
                None,
            )
            .unwrap_err();
        assert!(matches!(err, AppError::StaleState(_)));
        assert_eq!(
            store.get(delivery.id).unwrap().status,
            DeliveryStatus::Assigned
        );
    }

    #[test]
    fn double_assignment_is_rejected() {
        let store = DeliveryStore::new();
        let (delivery, _) = store.create(facts(Uuid::new_v4()));

        store
            .assign_courier(delivery.id, Uuid::new_v4(), "Ada", chrono::Utc::now())
            .unwrap();
        let err = store
            .assign_courier(delivery.id, Uuid::new_v4(), "Bo", chrono::Utc::now())
            .unwrap_err();

        assert!(matches!(err, AppError::AlreadyAssigned(_)));
    }

    #[test]
    fn delivered_stamps_actual_time_and_tracking_is_append_only() {
        let store = DeliveryStore::new();
        let (delivery, _) = store.create(facts(Uuid::new_v4()));
        let courier_id = Uuid::new_v4();
        store
            .assign_courier(delivery.id, courier_id, "Ada", chrono::Utc::now())
            .unwrap();

        store
            .transition(
                delivery.id,
                DeliveryStatus::PickedUp,
                DeliveryStatus::Assigned,
                None,
                None,
            )
            .unwrap();
        store
            .transition(
                delivery.id,
                DeliveryStatus::InTransit,
                DeliveryStatus::PickedUp,
                None,
                None,
            )
            .unwrap();
        let done = store
            .transition(
                delivery.id,
                DeliveryStatus::Delivered,
                DeliveryStatus::InTransit,
                None,
                None,
            )
            .unwrap();

        assert!(done.actual_delivery_at.is_some());
        // created + assigned + picked_up + in_transit + delivered
        assert_eq!(done.tracking.len(), 5);
        assert_eq!(done.tracking[0].status, DeliveryStatus::PendingAssignment);
        assert_eq!(done.tracking[4].status, DeliveryStatus::Delivered);
    }

    #[test]
    fn terminal_deliveries_drop_late_location_pings() {
        let store = DeliveryStore::new();
        let (delivery, _) = store.create(facts(Uuid::new_v4()));
        store
            .transition(
                delivery.id,
                DeliveryStatus::Cancelled,
                DeliveryStatus::PendingAssignment,
                None,
                None,
            )
            .unwrap();

        store
            .append_tracking(delivery.id, GeoPoint { lat: 1.0, lng: 1.0 }, None)
            .unwrap();

        assert_eq!(store.get(delivery.id).unwrap().tracking.len(), 2);
    }

    #[test]
    fn active_query_excludes_terminal_deliveries() {
        let store = DeliveryStore::new();
        let (open, _) = store.create(facts(Uuid::new_v4()));
        let (closed, _) = store.create(facts(Uuid::new_v4()));
        store
            .transition(
                closed.id,
                DeliveryStatus::Cancelled,
                DeliveryStatus::PendingAssignment,
                None,
                None,
            )
            .unwrap();

        let active = store.list_active();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, open.id);
    }
}

//! Courier availability and location records.
//!
//! Backed by sharded concurrent maps. Every conditional mutation runs under
//! the shard write lock via `get_mut`, which is what makes `reserve` a single
//! atomic compare-and-set rather than a read-then-write pair.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use uuid::Uuid;

use crate::error::AppError;
use crate::geo::haversine_km;
use crate::models::courier::{Courier, CourierLocation, GeoPoint};

pub struct CourierRegistry {
    couriers: DashMap<Uuid, Courier>,
    by_user: DashMap<Uuid, Uuid>,
}

impl CourierRegistry {
    pub fn new() -> Self {
        Self {
            couriers: DashMap::new(),
            by_user: DashMap::new(),
        }
    }

    /// Direct registration through the courier-facing API. The profile is
    /// supplied up front, so the courier comes out fully onboarded and ready
    /// to take work.
    pub fn register(
        &self,
        user_id: Uuid,
        name: String,
        phone: String,
        location: Option<GeoPoint>,
    ) -> Result<Courier, AppError> {
        match self.by_user.entry(user_id) {
            Entry::Occupied(_) => Err(AppError::Conflict(format!(
                "courier already registered for user {user_id}"
            ))),
            Entry::Vacant(entry) => {
                let now = Utc::now();
                let courier = Courier {
                    id: Uuid::new_v4(),
                    user_id,
                    name,
                    phone,
                    available: true,
                    active: true,
                    verified: true,
                    profile_complete: true,
                    location: location.map(|point| CourierLocation {
                        point,
                        recorded_at: now,
                    }),
                    current_delivery: None,
                    rating: 5.0,
                    updated_at: now,
                };
                self.couriers.insert(courier.id, courier.clone());
                entry.insert(courier.id);
                Ok(courier)
            }
        }
    }

    /// Lazy creation from an upstream registration event. Idempotent on
    /// `user_id`. The courier still has to complete their profile and go
    /// online before the matching engine will consider them.
    pub fn ensure_registered(&self, user_id: Uuid, name: String, phone: String) -> Courier {
        match self.by_user.entry(user_id) {
            Entry::Occupied(entry) => {
                let courier_id = *entry.get();
                // Index entries are written after the record itself.
                self.couriers
                    .get(&courier_id)
                    .expect("courier index points at existing record")
                    .clone()
            }
            Entry::Vacant(entry) => {
                let now = Utc::now();
                let courier = Courier {
                    id: Uuid::new_v4(),
                    user_id,
                    name,
                    phone,
                    available: false,
                    active: true,
                    verified: false,
                    profile_complete: false,
                    location: None,
                    current_delivery: None,
                    rating: 5.0,
                    updated_at: now,
                };
                self.couriers.insert(courier.id, courier.clone());
                entry.insert(courier.id);
                courier
            }
        }
    }

    pub fn get(&self, courier_id: Uuid) -> Option<Courier> {
        self.couriers.get(&courier_id).map(|entry| entry.value().clone())
    }

    pub fn get_by_user(&self, user_id: Uuid) -> Option<Courier> {
        let courier_id = *self.by_user.get(&user_id)?;
        self.get(courier_id)
    }

    pub fn list(&self) -> Vec<Courier> {
        self.couriers.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Couriers the matching engine may consider, in no particular order.
    pub fn find_available(&self) -> Vec<Courier> {
        self.couriers
            .iter()
            .filter(|entry| entry.is_dispatchable())
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Dispatchable couriers with a known location within `max_distance_km`
    /// of `point`, ascending by distance, at most `limit`. Pairs carry the
    /// computed distance so callers can log and rank without recomputing.
    pub fn find_nearby(
        &self,
        point: &GeoPoint,
        max_distance_km: f64,
        limit: usize,
    ) -> Vec<(Courier, f64)> {
        let mut candidates: Vec<(Courier, f64)> = self
            .couriers
            .iter()
            .filter(|entry| entry.is_dispatchable())
            .filter_map(|entry| {
                let location = entry.location.as_ref()?;
                let distance = haversine_km(point, &location.point);
                (distance <= max_distance_km).then(|| (entry.value().clone(), distance))
            })
            .collect();

        candidates.sort_by(|a, b| a.1.total_cmp(&b.1));
        candidates.truncate(limit);
        candidates
    }

    /// Atomically claim a courier for a delivery. Succeeds only if the
    /// courier is currently available with no active delivery; the check and
    /// the write happen under one shard lock, so two concurrent reservations
    /// of the same courier cannot both win.
    pub fn reserve(&self, courier_id: Uuid, delivery_id: Uuid) -> Result<Courier, AppError> {
        let mut courier = self
            .couriers
            .get_mut(&courier_id)
            .ok_or_else(|| AppError::NotFound(format!("courier {courier_id} not found")))?;

        if !courier.available || courier.current_delivery.is_some() {
            return Err(AppError::AlreadyAssigned(format!(
                "courier {courier_id} is not free"
            )));
        }

        courier.available = false;
        courier.current_delivery = Some(delivery_id);
        courier.updated_at = Utc::now();
        Ok(courier.clone())
    }

    /// Return a courier to the pool. Idempotent: releasing an already-free
    /// or unknown courier is a no-op.
    pub fn release(&self, courier_id: Uuid) {
        if let Some(mut courier) = self.couriers.get_mut(&courier_id) {
            if courier.current_delivery.is_none() && courier.available {
                return;
            }
            courier.current_delivery = None;
            courier.available = true;
            courier.updated_at = Utc::now();
        }
    }

    /// Overwrite the courier's location. Returns the updated record together
    /// with the active delivery, if any, so the caller can cross-post a
    /// tracking entry.
    pub fn update_location(
        &self,
        courier_id: Uuid,
        point: GeoPoint,
        recorded_at: DateTime<Utc>,
    ) -> Result<(Courier, Option<Uuid>), AppError> {
        let mut courier = self
            .couriers
            .get_mut(&courier_id)
            .ok_or_else(|| AppError::NotFound(format!("courier {courier_id} not found")))?;

        courier.location = Some(CourierLocation { point, recorded_at });
        courier.updated_at = Utc::now();

        let active_delivery = courier.current_delivery;
        Ok((courier.clone(), active_delivery))
    }

    /// Voluntary availability toggle. Going available while holding a
    /// delivery is rejected; the assignment owns that flag until release.
    pub fn set_availability(&self, courier_id: Uuid, available: bool) -> Result<Courier, AppError> {
        let mut courier = self
            .couriers
            .get_mut(&courier_id)
            .ok_or_else(|| AppError::NotFound(format!("courier {courier_id} not found")))?;

        if available && courier.current_delivery.is_some() {
            return Err(AppError::Conflict(format!(
                "courier {courier_id} still holds an active delivery"
            )));
        }

        courier.available = available;
        courier.updated_at = Utc::now();
        Ok(courier.clone())
    }

    /// Fill in the profile of a lazily-created courier. Verification at this
    /// boundary is folded into profile completion; an external vetting
    /// service would flip the flag separately in a larger deployment.
    pub fn complete_profile(
        &self,
        courier_id: Uuid,
        name: String,
        phone: String,
    ) -> Result<Courier, AppError> {
        let mut courier = self
            .couriers
            .get_mut(&courier_id)
            .ok_or_else(|| AppError::NotFound(format!("courier {courier_id} not found")))?;

        courier.name = name;
        courier.phone = phone;
        courier.profile_complete = true;
        courier.verified = true;
        courier.updated_at = Utc::now();
        Ok(courier.clone())
    }
}

impl Default for CourierRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::CourierRegistry;
    use crate::error::AppError;
    use crate::models::courier::GeoPoint;

    fn registry_with_one_courier() -> (CourierRegistry, Uuid) {
        let registry = CourierRegistry::new();
        let courier = registry
            .register(
                Uuid::new_v4(),
                "Ada".to_string(),
                "+4912345".to_string(),
                Some(GeoPoint { lat: 0.0, lng: 0.0 }),
            )
            .unwrap();
        (registry, courier.id)
    }

    #[test]
    fn reserve_claims_a_free_courier() {
        let (registry, courier_id) = registry_with_one_courier();
        let delivery_id = Uuid::new_v4();

        let reserved = registry.reserve(courier_id, delivery_id).unwrap();
        assert!(!reserved.available);
        assert_eq!(reserved.current_delivery, Some(delivery_id));
    }

    #[test]
    fn reserve_on_busy_courier_fails_without_mutation() {
        let (registry, courier_id) = registry_with_one_courier();
        let first = Uuid::new_v4();
        registry.reserve(courier_id, first).unwrap();

        let err = registry.reserve(courier_id, Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, AppError::AlreadyAssigned(_)));

        let courier = registry.get(courier_id).unwrap();
        assert_eq!(courier.current_delivery, Some(first));
        assert!(!courier.available);
    }

    #[test]
    fn release_is_idempotent() {
        let (registry, courier_id) = registry_with_one_courier();
        registry.reserve(courier_id, Uuid::new_v4()).unwrap();

        registry.release(courier_id);
        registry.release(courier_id);
        registry.release(Uuid::new_v4());

        let courier = registry.get(courier_id).unwrap();
        assert!(courier.available);
        assert!(courier.current_delivery.is_none());
    }

    #[test]
    fn ensure_registered_is_idempotent_per_user() {
        let registry = CourierRegistry::new();
        let user_id = Uuid::new_v4();

        let first =
            registry.ensure_registered(user_id, "Bo".to_string(), "+491".to_string());
        let second =
            registry.ensure_registered(user_id, "Bo".to_string(), "+491".to_string());

        assert_eq!(first.id, second.id);
        assert_eq!(registry.list().len(), 1);
        assert!(!first.profile_complete);
        assert!(!first.available);
    }

    #[test]
    fn find_nearby_orders_by_distance_and_respects_limit() {
        let registry = CourierRegistry::new();
        let origin = GeoPoint { lat: 0.0, lng: 0.0 };

        for lng in [0.03, 0.01, 0.02] {
            registry
                .register(
                    Uuid::new_v4(),
                    format!("courier-{lng}"),
                    "+49".to_string(),
                    Some(GeoPoint { lat: 0.0, lng }),
                )
                .unwrap();
        }

        let nearby = registry.find_nearby(&origin, 10.0, 2);
        assert_eq!(nearby.len(), 2);
        assert!(nearby[0].1 < nearby[1].1);
        assert_eq!(nearby[0].0.name, "courier-0.01");
    }

    #[test]
    fn going_available_while_assigned_is_rejected() {
        let (registry, courier_id) = registry_with_one_courier();
        registry.reserve(courier_id, Uuid::new_v4()).unwrap();

        let err = registry.set_availability(courier_id, true).unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }
}

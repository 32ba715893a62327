//! Courier selection for an unassigned delivery.

use rand::seq::SliceRandom;
use tracing::{debug, warn};

use crate::config::MatchingPolicy;
use crate::error::AppError;
use crate::models::courier::{Courier, GeoPoint};
use crate::registry::CourierRegistry;

/// Pick the courier for a pickup point.
///
/// Ranked candidates come from the proximity query; the winner is the one at
/// minimum distance, ties keeping the query's order. When no available
/// courier has reported a location at all, selection falls back to a uniform
/// random pick from the unranked pool so deliveries do not starve on missing
/// telemetry — an explicit, logged branch, intentionally non-deterministic.
/// An empty pool is `NoCourierAvailable`: a normal, retriable outcome.
pub fn select_courier(
    registry: &CourierRegistry,
    pickup: &GeoPoint,
    policy: &MatchingPolicy,
) -> Result<Courier, AppError> {
    let nearby = registry.find_nearby(pickup, policy.max_courier_distance_km, policy.candidate_limit);

    if let Some((courier, distance_km)) = nearby.iter().min_by(|a, b| a.1.total_cmp(&b.1)) {
        debug!(
            courier_id = %courier.id,
            distance_km = *distance_km,
            candidates = nearby.len(),
            "selected nearest courier"
        );
        return Ok(courier.clone());
    }

    let pool = registry.find_available();
    if pool.is_empty() {
        return Err(AppError::NoCourierAvailable);
    }

    if pool.iter().any(|courier| courier.location.is_some()) {
        // Location data exists but nobody is within range.
        return Err(AppError::NoCourierAvailable);
    }

    match pool.choose(&mut rand::thread_rng()) {
        Some(courier) => {
            warn!(
                courier_id = %courier.id,
                pool = pool.len(),
                "no courier has location data; picked one at random"
            );
            Ok(courier.clone())
        }
        None => Err(AppError::NoCourierAvailable),
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::select_courier;
    use crate::config::MatchingPolicy;
    use crate::error::AppError;
    use crate::models::courier::GeoPoint;
    use crate::registry::CourierRegistry;

    fn policy() -> MatchingPolicy {
        MatchingPolicy {
            max_courier_distance_km: 10.0,
            candidate_limit: 10,
            prep_minutes: 30,
            transit_minutes: 20,
        }
    }

    #[test]
    fn nearest_courier_wins() {
        let registry = CourierRegistry::new();
        let near = registry
            .register(
                Uuid::new_v4(),
                "near".to_string(),
                "+1".to_string(),
                Some(GeoPoint {
                    lat: 0.0,
                    lng: 0.001,
                }),
            )
            .unwrap();
        registry
            .register(
                Uuid::new_v4(),
                "far".to_string(),
                "+2".to_string(),
                Some(GeoPoint { lat: 0.0, lng: 0.05 }),
            )
            .unwrap();

        let pickup = GeoPoint { lat: 0.0, lng: 0.0 };
        let selected = select_courier(&registry, &pickup, &policy()).unwrap();
        assert_eq!(selected.id, near.id);
    }

    #[test]
    fn empty_pool_is_no_courier_available() {
        let registry = CourierRegistry::new();
        let pickup = GeoPoint { lat: 0.0, lng: 0.0 };

        let err = select_courier(&registry, &pickup, &policy()).unwrap_err();
        assert!(matches!(err, AppError::NoCourierAvailable));
    }

    #[test]
    fn falls_back_to_random_pick_when_nobody_has_location_data() {
        let registry = CourierRegistry::new();
        let mut expected = Vec::new();
        for n in 0..3 {
            let courier = registry
                .register(Uuid::new_v4(), format!("courier-{n}"), "+1".to_string(), None)
                .unwrap();
            expected.push(courier.id);
        }

        let pickup = GeoPoint { lat: 0.0, lng: 0.0 };
        // The pick is intentionally non-deterministic; any courier from the
        // pool is a valid outcome.
        let selected = select_courier(&registry, &pickup, &policy()).unwrap();
        assert!(expected.contains(&selected.id));
    }

    #[test]
    fn out_of_range_couriers_with_locations_do_not_trigger_the_fallback() {
        let registry = CourierRegistry::new();
        registry
            .register(
                Uuid::new_v4(),
                "remote".to_string(),
                "+1".to_string(),
                Some(GeoPoint { lat: 50.0, lng: 50.0 }),
            )
            .unwrap();

        let pickup = GeoPoint { lat: 0.0, lng: 0.0 };
        let err = select_courier(&registry, &pickup, &policy()).unwrap_err();
        assert!(matches!(err, AppError::NoCourierAvailable));
    }
}

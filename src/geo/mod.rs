use chrono::{DateTime, Duration, Utc};

use crate::config::MatchingPolicy;
use crate::models::courier::GeoPoint;

const EARTH_RADIUS_KM: f64 = 6_371.0;

/// Great-circle distance between two points. Callers validate coordinates
/// first; NaN in means NaN out.
pub fn haversine_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lng = (b.lng - a.lng).to_radians();

    let sin_lat = (delta_lat / 2.0).sin();
    let sin_lng = (delta_lng / 2.0).sin();

    let haversine = sin_lat * sin_lat + lat1.cos() * lat2.cos() * sin_lng * sin_lng;
    let central_angle = 2.0 * haversine.sqrt().asin();

    EARTH_RADIUS_KM * central_angle
}

/// Coarse ETA: fixed prep time plus fixed transit time from policy.
/// The pickup/dropoff pair is accepted but not yet factored in.
/// TODO: weigh transit by haversine_km(pickup, dropoff) once per-city speed
/// profiles are available.
pub fn estimated_delivery_time(
    now: DateTime<Utc>,
    _pickup: &GeoPoint,
    _dropoff: &GeoPoint,
    policy: &MatchingPolicy,
) -> DateTime<Utc> {
    now + Duration::minutes(policy.prep_minutes + policy.transit_minutes)
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::{estimated_delivery_time, haversine_km};
    use crate::config::MatchingPolicy;
    use crate::models::courier::GeoPoint;

    #[test]
    fn zero_distance_for_same_point() {
        let p = GeoPoint {
            lat: 53.5511,
            lng: 9.9937,
        };
        let distance = haversine_km(&p, &p);
        assert!(distance < 1e-9);
    }

    #[test]
    fn one_degree_of_longitude_at_the_equator() {
        let a = GeoPoint { lat: 0.0, lng: 0.0 };
        let b = GeoPoint { lat: 0.0, lng: 1.0 };
        let distance = haversine_km(&a, &b);
        assert!((distance - 111.19).abs() < 0.5);
    }

    #[test]
    fn london_to_paris_is_around_343_km() {
        let london = GeoPoint {
            lat: 51.5074,
            lng: -0.1278,
        };
        let paris = GeoPoint {
            lat: 48.8566,
            lng: 2.3522,
        };
        let distance = haversine_km(&london, &paris);
        assert!((distance - 343.0).abs() < 5.0);
    }

    #[test]
    fn eta_is_prep_plus_transit() {
        let policy = MatchingPolicy {
            max_courier_distance_km: 10.0,
            candidate_limit: 10,
            prep_minutes: 30,
            transit_minutes: 20,
        };
        let now = Utc::now();
        let p = GeoPoint { lat: 0.0, lng: 0.0 };

        let eta = estimated_delivery_time(now, &p, &p, &policy);
        assert_eq!(eta - now, Duration::minutes(50));
    }
}

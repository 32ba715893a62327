use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    /// Latitude must lie in [-90, 90] and longitude in [-180, 180].
    /// Distance math propagates NaN on garbage input, so callers validate
    /// before anything geographic happens.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CourierLocation {
    pub point: GeoPoint,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Courier {
    pub id: Uuid,
    /// External account identity. Unique; one courier per user.
    pub user_id: Uuid,
    pub name: String,
    pub phone: String,
    pub available: bool,
    pub active: bool,
    pub verified: bool,
    pub profile_complete: bool,
    pub location: Option<CourierLocation>,
    /// At most one active delivery per courier. Non-null implies unavailable.
    pub current_delivery: Option<Uuid>,
    pub rating: f64,
    pub updated_at: DateTime<Utc>,
}

impl Courier {
    /// A courier the matching engine may hand a delivery to.
    pub fn is_dispatchable(&self) -> bool {
        self.available
            && self.active
            && self.verified
            && self.profile_complete
            && self.current_delivery.is_none()
    }
}

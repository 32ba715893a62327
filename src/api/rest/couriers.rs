use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, patch, post, put};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::courier::{Courier, GeoPoint};
use crate::orchestrator;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/couriers", post(register_courier).get(list_couriers))
        .route("/couriers/:id", get(get_courier))
        .route("/couriers/:id/profile", put(complete_profile))
        .route("/couriers/:id/availability", patch(set_availability))
        .route("/couriers/:id/location", patch(update_location))
}

#[derive(Deserialize)]
pub struct RegisterCourierRequest {
    pub user_id: Option<Uuid>,
    pub name: String,
    pub phone: String,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
}

async fn register_courier(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterCourierRequest>,
) -> Result<(StatusCode, Json<Courier>), AppError> {
    if payload.name.trim().is_empty() {
        return Err(AppError::Validation("name cannot be empty".to_string()));
    }
    if payload.phone.trim().is_empty() {
        return Err(AppError::Validation("phone cannot be empty".to_string()));
    }

    let location = match (payload.lat, payload.lng) {
        (Some(lat), Some(lng)) => {
            let point = GeoPoint { lat, lng };
            if !point.is_valid() {
                return Err(AppError::Validation(format!(
                    "invalid coordinates ({lat}, {lng})"
                )));
            }
            Some(point)
        }
        (None, None) => None,
        _ => {
            return Err(AppError::Validation(
                "lat and lng must be provided together".to_string(),
            ));
        }
    };

    let courier = state.registry.register(
        payload.user_id.unwrap_or_else(Uuid::new_v4),
        payload.name,
        payload.phone,
        location,
    )?;

    Ok((StatusCode::CREATED, Json(courier)))
}

async fn list_couriers(State(state): State<Arc<AppState>>) -> Json<Vec<Courier>> {
    Json(state.registry.list())
}

async fn get_courier(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Courier>, AppError> {
    let courier = state
        .registry
        .get(id)
        .ok_or_else(|| AppError::NotFound(format!("courier {id} not found")))?;
    Ok(Json(courier))
}

#[derive(Deserialize)]
pub struct CompleteProfileRequest {
    pub name: String,
    pub phone: String,
}

async fn complete_profile(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CompleteProfileRequest>,
) -> Result<Json<Courier>, AppError> {
    if payload.name.trim().is_empty() {
        return Err(AppError::Validation("name cannot be empty".to_string()));
    }
    if payload.phone.trim().is_empty() {
        return Err(AppError::Validation("phone cannot be empty".to_string()));
    }

    let courier = state
        .registry
        .complete_profile(id, payload.name, payload.phone)?;
    Ok(Json(courier))
}

#[derive(Deserialize)]
pub struct SetAvailabilityRequest {
    pub available: bool,
}

async fn set_availability(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<SetAvailabilityRequest>,
) -> Result<Json<Courier>, AppError> {
    let courier = state.registry.set_availability(id, payload.available)?;
    Ok(Json(courier))
}

#[derive(Deserialize)]
pub struct LocationPingRequest {
    pub lat: f64,
    pub lng: f64,
}

async fn update_location(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<LocationPingRequest>,
) -> Result<Json<Courier>, AppError> {
    let courier = orchestrator::location_ping(
        &state,
        id,
        GeoPoint {
            lat: payload.lat,
            lng: payload.lng,
        },
    )?;
    Ok(Json(courier))
}

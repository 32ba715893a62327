use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post, put};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::courier::GeoPoint;
use crate::models::delivery::{Delivery, DeliveryStatus, TrackingEntry};
use crate::orchestrator;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/deliveries", get(list_deliveries))
        .route("/deliveries/create-for-order", post(create_for_order))
        .route("/deliveries/:id", get(get_delivery))
        .route("/deliveries/:id/assign-auto", post(assign_auto))
        .route("/deliveries/:id/assign-specific", post(assign_specific))
        .route("/deliveries/:id/status", put(update_status))
        .route("/deliveries/:id/tracking", get(get_tracking))
}

#[derive(Deserialize)]
pub struct CreateForOrderRequest {
    pub order_id: Uuid,
}

async fn create_for_order(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateForOrderRequest>,
) -> Result<(StatusCode, Json<Delivery>), AppError> {
    let (delivery, created) =
        orchestrator::create_delivery_for_order(state, payload.order_id).await?;

    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(delivery)))
}

async fn get_delivery(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Delivery>, AppError> {
    let delivery = state
        .deliveries
        .get(id)
        .ok_or_else(|| AppError::NotFound(format!("delivery {id} not found")))?;
    Ok(Json(delivery))
}

#[derive(Deserialize)]
pub struct ListParams {
    pub restaurant_id: Option<Uuid>,
    pub status: Option<DeliveryStatus>,
    pub since: Option<DateTime<Utc>>,
    #[serde(default)]
    pub active: bool,
}

async fn list_deliveries(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<Delivery>>, AppError> {
    let deliveries = if let Some(restaurant_id) = params.restaurant_id {
        state
            .deliveries
            .list_by_restaurant(restaurant_id, params.since, params.status)
    } else if params.active {
        state.deliveries.list_active()
    } else {
        return Err(AppError::Validation(
            "pass restaurant_id or active=true".to_string(),
        ));
    };

    Ok(Json(deliveries))
}

async fn assign_auto(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Delivery>, AppError> {
    let delivery = orchestrator::auto_assign(state, id).await?;
    Ok(Json(delivery))
}

#[derive(Deserialize)]
pub struct AssignSpecificRequest {
    pub courier_id: Uuid,
}

async fn assign_specific(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<AssignSpecificRequest>,
) -> Result<Json<Delivery>, AppError> {
    let delivery = orchestrator::assign_specific(state, id, payload.courier_id).await?;
    Ok(Json(delivery))
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: DeliveryStatus,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
}

/// Courier-scoped: the acting courier's identity arrives in `x-courier-id`,
/// injected by the auth layer in front of this service.
async fn update_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<Json<Delivery>, AppError> {
    let courier_id = courier_identity(&headers)?;

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

    let delivery =
        orchestrator::update_status(state, id, courier_id, payload.status, location).await?;
    Ok(Json(delivery))
}

#[derive(Serialize)]
pub struct CourierContact {
    pub id: Uuid,
    pub name: String,
    pub phone: String,
}

#[derive(Serialize)]
pub struct TrackingResponse {
    pub delivery_id: Uuid,
    pub order_id: Uuid,
    pub status: DeliveryStatus,
    pub estimated_delivery_at: Option<DateTime<Utc>>,
    pub actual_delivery_at: Option<DateTime<Utc>>,
    pub courier: Option<CourierContact>,
    pub history: Vec<TrackingEntry>,
}

async fn get_tracking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<TrackingResponse>, AppError> {
    let delivery = state
        .deliveries
        .get(id)
        .ok_or_else(|| AppError::NotFound(format!("delivery {id} not found")))?;

    let courier = delivery
        .courier_id
        .and_then(|courier_id| state.registry.get(courier_id))
        .map(|courier| CourierContact {
            id: courier.id,
            name: courier.name,
            phone: courier.phone,
        });

    Ok(Json(TrackingResponse {
        delivery_id: delivery.id,
        order_id: delivery.order_id,
        status: delivery.status,
        estimated_delivery_at: delivery.estimated_delivery_at,
        actual_delivery_at: delivery.actual_delivery_at,
        courier,
        history: delivery.tracking,
    }))
}

fn courier_identity(headers: &HeaderMap) -> Result<Uuid, AppError> {
    let raw = headers
        .get("x-courier-id")
        .ok_or_else(|| AppError::Validation("missing x-courier-id header".to_string()))?
        .to_str()
        .map_err(|_| AppError::Validation("unreadable x-courier-id header".to_string()))?;

    raw.parse::<Uuid>()
        .map_err(|_| AppError::Validation(format!("invalid courier id: {raw}")))
}

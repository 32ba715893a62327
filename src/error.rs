use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::models::delivery::DeliveryStatus;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("already assigned: {0}")]
    AlreadyAssigned(String),

    #[error("stale state: {0}")]
    StaleState(String),

    #[error("invalid transition from {from} to {to}")]
    InvalidTransition {
        from: DeliveryStatus,
        to: DeliveryStatus,
    },

    #[error("order {0} is not ready for pickup")]
    NotReady(Uuid),

    /// A normal, retriable matching outcome, never a server fault.
    #[error("no couriers available")]
    NoCourierAvailable,

    #[error("collaborator unavailable: {0}")]
    CollaboratorUnavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Whether redelivering the triggering message could change the outcome.
    /// Malformed payloads stay malformed; everything else is worth retrying.
    pub fn is_retriable(&self) -> bool {
        !matches!(self, AppError::Validation(_))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Validation(_) | AppError::NoCourierAvailable => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Conflict(_)
            | AppError::AlreadyAssigned(_)
            | AppError::StaleState(_)
            | AppError::InvalidTransition { .. }
            | AppError::NotReady(_) => StatusCode::CONFLICT,
            AppError::CollaboratorUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = if status == StatusCode::SERVICE_UNAVAILABLE {
            Json(json!({
                "error": self.to_string(),
                "retriable": true
            }))
        } else {
            Json(json!({
                "error": self.to_string()
            }))
        };

        (status, body).into_response()
    }
}

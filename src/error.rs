use axum::{
    Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::slot_guard::GuardError;

pub const SLOT_CONFLICT_DETAIL: &str = "Slot already booked for this doctor at that time.";

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub detail: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Validation(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn invalid_credentials() -> Self {
        ApiError::Unauthorized("Could not validate credentials".into())
    }

    pub fn role_not_permitted() -> Self {
        ApiError::Forbidden("Operation not permitted for your role".into())
    }

    pub fn slot_conflict() -> Self {
        ApiError::Conflict(SLOT_CONFLICT_DETAIL.into())
    }

    pub fn not_found(what: &str) -> Self {
        ApiError::NotFound(format!("{what} not found"))
    }

    pub fn db(e: sqlx::Error) -> Self {
        ApiError::Internal(format!("db error: {e}"))
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn to_error_response(detail: &str) -> Json<ErrorResponse> {
        Json(ErrorResponse {
            detail: detail.to_string(),
        })
    }
}

impl From<GuardError> for ApiError {
    fn from(e: GuardError) -> Self {
        match e {
            GuardError::SlotConflict => ApiError::slot_conflict(),
            GuardError::NotFound => ApiError::not_found("Appointment"),
            GuardError::MissingReference(what) => ApiError::not_found(what),
            GuardError::Store(msg) => ApiError::Internal(msg),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            ApiError::Unauthorized(msg) => (
                status,
                [(header::WWW_AUTHENTICATE, "Bearer")],
                ApiError::to_error_response(&msg),
            )
                .into_response(),
            ApiError::Internal(msg) => {
                // keep driver details out of the response body
                tracing::error!(error = %msg, "request failed");
                (status, ApiError::to_error_response("Internal server error")).into_response()
            }
            ApiError::Forbidden(msg)
            | ApiError::BadRequest(msg)
            | ApiError::NotFound(msg)
            | ApiError::Conflict(msg)
            | ApiError::Validation(msg) => {
                (status, ApiError::to_error_response(&msg)).into_response()
            }
        }
    }
}

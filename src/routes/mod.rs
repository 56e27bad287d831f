use crate::models::{AppState, MessageResponse};
use axum::{Json, Router, routing::get};

pub mod appointment_routes;
pub mod auth_routes;
pub mod dashboard_routes;
pub mod invoice_routes;
pub mod patient_routes;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .merge(auth_routes::router())
        .merge(dashboard_routes::router())
        .merge(patient_routes::router())
        .merge(appointment_routes::router())
        .merge(invoice_routes::router())
        .with_state(state)
}

pub async fn root() -> Json<MessageResponse> {
    Json(MessageResponse {
        message: "Backend is working".into(),
    })
}

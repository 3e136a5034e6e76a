use crate::handlers::common::{map_service_error, success_response};
use crate::{errors::ApiError, AppState};
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use std::sync::Arc;
use uuid::Uuid;

/// Creates the router for payment endpoints
pub fn payments_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/:id", get(get_payment))
        .route("/:id/qr", get(get_payment_qr))
}

/// Get a payment record
async fn get_payment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let payment = state
        .services
        .payments
        .get_payment(id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(payment))
}

/// Render the payment's VietQR payload as a PNG
async fn get_payment_qr(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let png = state
        .services
        .payments
        .get_qr_image(id)
        .await
        .map_err(map_service_error)?;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "image/png")],
        png,
    ))
}

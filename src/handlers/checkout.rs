use crate::handlers::common::{created_response, map_service_error};
use crate::{errors::ApiError, services::checkout::CheckoutRequest, AppState};
use axum::{
    extract::{Json, Path, State},
    routing::post,
    Router,
};
use std::sync::Arc;
use uuid::Uuid;

/// Creates the router for checkout endpoints
pub fn checkout_routes() -> Router<Arc<AppState>> {
    Router::new().route("/:id/checkout", post(checkout_cart))
}

/// Convert a cart into an order with a pending payment
async fn checkout_cart(
    State(state): State<Arc<AppState>>,
    Path(cart_id): Path<Uuid>,
    Json(payload): Json<CheckoutRequest>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let summary = state
        .services
        .checkout
        .checkout_from_cart(cart_id, payload)
        .await
        .map_err(map_service_error)?;

    Ok(created_response(summary))
}

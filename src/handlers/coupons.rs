use crate::handlers::common::{map_service_error, success_response};
use crate::{errors::ApiError, services::RedeemerKey, AppState};
use axum::{
    extract::{Json, State},
    routing::post,
    Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Creates the router for coupon endpoints
pub fn coupons_routes() -> Router<Arc<AppState>> {
    Router::new().route("/validate", post(validate_coupon))
}

/// Preview a coupon against an order amount without redeeming it
async fn validate_coupon(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ValidateCouponRequest>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let redeemer = RedeemerKey::try_from_parts(payload.user_id, payload.session_id)
        .map_err(map_service_error)?;

    let (coupon, discount) = state
        .services
        .coupons
        .preview(&payload.code, payload.order_amount, &redeemer)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(ValidateCouponResponse {
        code: coupon.code,
        valid: true,
        discount_amount: discount,
        final_amount: payload.order_amount - discount,
    }))
}

#[derive(Debug, Deserialize)]
struct ValidateCouponRequest {
    code: String,
    order_amount: Decimal,
    user_id: Option<Uuid>,
    session_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct ValidateCouponResponse {
    code: String,
    valid: bool,
    discount_amount: Decimal,
    final_amount: Decimal,
}

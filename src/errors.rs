use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Error body returned for every failed request.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status category (e.g. "Not Found", "Conflict")
    pub error: String,
    /// Stable machine-readable code (e.g. "coupon_expired", "out_of_stock")
    pub code: String,
    /// Human-readable description
    pub message: String,
    /// Structured details, currently only populated for out-of-stock lines
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    /// ISO 8601 timestamp when the error occurred
    pub timestamp: String,
}

/// A cart line that cannot be fulfilled at current stock levels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutOfStockItem {
    pub product_id: Uuid,
    pub product_name: String,
    pub requested: i32,
    pub available: i32,
}

/// Coupon redemption failures, in the order the validation chain checks
/// them. First failure wins; callers never see more than one.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize)]
pub enum CouponError {
    #[error("Coupon has expired")]
    Expired,
    #[error("Coupon is not active yet")]
    NotYetActive,
    #[error("Coupon is not available for this account")]
    NotAuthorized,
    #[error("Order amount is below the coupon minimum of {minimum}")]
    MinimumNotMet { minimum: Decimal },
    #[error("Coupon usage limit has been reached")]
    UsageLimitReached,
    #[error("Coupon has already been used by this account")]
    AlreadyUsed,
    #[error("Coupon balance is exhausted")]
    BalanceExhausted,
}

impl CouponError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Expired => "coupon_expired",
            Self::NotYetActive => "coupon_not_yet_active",
            Self::NotAuthorized => "coupon_not_authorized",
            Self::MinimumNotMet { .. } => "coupon_minimum_not_met",
            Self::UsageLimitReached => "coupon_usage_limit_reached",
            Self::AlreadyUsed => "coupon_already_used",
            Self::BalanceExhausted => "coupon_balance_exhausted",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sea_orm::error::DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Insufficient stock for {} item(s)", .0.len())]
    OutOfStock(Vec<OutOfStockItem>),

    #[error("Coupon error: {0}")]
    Coupon(#[from] CouponError),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Payment error: {0}")]
    PaymentError(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl ServiceError {
    /// Single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_) => StatusCode::BAD_REQUEST,
            Self::OutOfStock(_) | Self::Coupon(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::PaymentError(_) => StatusCode::PAYMENT_REQUIRED,
            Self::DatabaseError(_) | Self::InternalError(_) | Self::Other(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Stable machine-readable code for API consumers.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::ValidationError(_) => "validation_error",
            Self::OutOfStock(_) => "out_of_stock",
            Self::Coupon(err) => err.code(),
            Self::Conflict(_) => "conflict",
            Self::PaymentError(_) => "payment_error",
            Self::DatabaseError(_) | Self::InternalError(_) | Self::Other(_) => "internal_error",
        }
    }

    /// Whether a failed checkout attempt may be retried locally.
    /// Only lost-update races qualify.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Message suitable for HTTP responses. Store-level failures return a
    /// generic message so internals never leak to clients.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::InternalError(_) | Self::Other(_) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::OutOfStock(items) => serde_json::to_value(items).ok(),
            _ => None,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            code: self.code().to_string(),
            message: self.response_message(),
            details: self.details(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}

/// API error type for HTTP handlers; delegates to `ServiceError` for
/// anything the service layer produced.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Service error: {0}")]
    ServiceError(#[from] ServiceError),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::ServiceError(err) => err.into_response(),
            ApiError::ValidationError(msg) => ServiceError::ValidationError(msg).into_response(),
            ApiError::NotFound(msg) => ServiceError::NotFound(msg).into_response(),
        }
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(err: validator::ValidationErrors) -> Self {
        ApiError::ValidationError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn status_code_mapping() {
        assert_eq!(
            ServiceError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServiceError::ValidationError("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::OutOfStock(vec![]).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ServiceError::Conflict("x".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServiceError::PaymentError("x".into()).status_code(),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            ServiceError::Coupon(CouponError::Expired).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn coupon_error_codes_are_stable() {
        assert_eq!(CouponError::Expired.code(), "coupon_expired");
        assert_eq!(CouponError::AlreadyUsed.code(), "coupon_already_used");
        assert_eq!(
            CouponError::MinimumNotMet { minimum: dec!(50) }.code(),
            "coupon_minimum_not_met"
        );
        assert_eq!(
            CouponError::BalanceExhausted.code(),
            "coupon_balance_exhausted"
        );
    }

    #[test]
    fn only_conflict_is_retryable() {
        assert!(ServiceError::Conflict("race".into()).is_retryable());
        assert!(!ServiceError::OutOfStock(vec![]).is_retryable());
        assert!(!ServiceError::Coupon(CouponError::AlreadyUsed).is_retryable());
        assert!(!ServiceError::NotFound("x".into()).is_retryable());
    }

    #[test]
    fn internal_messages_stay_generic() {
        assert_eq!(
            ServiceError::InternalError("stack trace".into()).response_message(),
            "Internal server error"
        );
        assert_eq!(
            ServiceError::NotFound("Cart abc not found".into()).response_message(),
            "Not found: Cart abc not found"
        );
    }

    #[test]
    fn out_of_stock_details_enumerate_every_offender() {
        let err = ServiceError::OutOfStock(vec![
            OutOfStockItem {
                product_id: Uuid::new_v4(),
                product_name: "A".into(),
                requested: 3,
                available: 1,
            },
            OutOfStockItem {
                product_id: Uuid::new_v4(),
                product_name: "B".into(),
                requested: 2,
                available: 0,
            },
        ]);
        match &err {
            ServiceError::OutOfStock(items) => assert_eq!(items.len(), 2),
            _ => unreachable!(),
        }
        assert_eq!(err.code(), "out_of_stock");
    }
}

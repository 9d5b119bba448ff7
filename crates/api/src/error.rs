//! API error type and HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use leadforge_billing::BillingError;
use serde_json::json;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("authentication required")]
    Unauthorized,

    #[error("insufficient permissions")]
    Forbidden,

    #[error("not found")]
    NotFound,

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Conflict(String),

    #[error("insufficient lead coins: need {needed}, have {available}")]
    InsufficientCoins { needed: i64, available: i64 },

    #[error("too many requests")]
    RateLimited { retry_after: u64 },

    #[error("database error: {0}")]
    Database(String),

    #[error("payment gateway error: {0}")]
    Gateway(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for ApiError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => ApiError::NotFound,
            other => ApiError::Database(other.to_string()),
        }
    }
}

impl From<BillingError> for ApiError {
    fn from(e: BillingError) -> Self {
        match e {
            BillingError::SessionNotFound(_)
            | BillingError::PlanNotFound(_)
            | BillingError::PackageNotFound(_) => ApiError::NotFound,
            BillingError::InsufficientCoins { needed, available } => {
                ApiError::InsufficientCoins { needed, available }
            }
            BillingError::SessionExpired => {
                ApiError::BadRequest("payment session expired".to_string())
            }
            BillingError::WebhookSignatureInvalid => {
                ApiError::BadRequest("invalid webhook signature".to_string())
            }
            BillingError::Stripe(msg) | BillingError::Gateway(msg) => ApiError::Gateway(msg),
            BillingError::Database(msg) => ApiError::Database(msg),
            BillingError::Config(msg) | BillingError::Internal(msg) => ApiError::Internal(msg),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            ApiError::Forbidden => (StatusCode::FORBIDDEN, self.to_string()),
            ApiError::NotFound => (StatusCode::NOT_FOUND, self.to_string()),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, self.to_string()),
            ApiError::InsufficientCoins { .. } => {
                (StatusCode::PAYMENT_REQUIRED, self.to_string())
            }
            ApiError::RateLimited { .. } => (StatusCode::TOO_MANY_REQUESTS, self.to_string()),
            // Server-side details go to the log, not the wire.
            ApiError::Database(msg) | ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
            ApiError::Gateway(msg) => {
                tracing::error!(error = %msg, "Payment gateway error");
                (
                    StatusCode::BAD_GATEWAY,
                    "payment gateway unavailable".to_string(),
                )
            }
        };

        let mut response = (status, Json(json!({ "error": message }))).into_response();

        if let ApiError::RateLimited { retry_after } = self {
            if let Ok(value) = retry_after.to_string().parse() {
                response.headers_mut().insert("Retry-After", value);
            }
        }

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_billing_error_mapping() {
        assert!(matches!(
            ApiError::from(BillingError::PlanNotFound(uuid::Uuid::new_v4())),
            ApiError::NotFound
        ));
        assert!(matches!(
            ApiError::from(BillingError::InsufficientCoins {
                needed: 10,
                available: 3
            }),
            ApiError::InsufficientCoins {
                needed: 10,
                available: 3
            }
        ));
        assert!(matches!(
            ApiError::from(BillingError::Stripe("rate limited".to_string())),
            ApiError::Gateway(_)
        ));
    }

    #[test]
    fn test_row_not_found_maps_to_404() {
        assert!(matches!(
            ApiError::from(sqlx::Error::RowNotFound),
            ApiError::NotFound
        ));
    }
}

//! Billing error types.

use uuid::Uuid;

pub type BillingResult<T> = Result<T, BillingError>;

#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    #[error("database error: {0}")]
    Database(String),

    #[error("stripe error: {0}")]
    Stripe(String),

    #[error("gateway returned a malformed object: {0}")]
    Gateway(String),

    #[error("payment session not found: {0}")]
    SessionNotFound(Uuid),

    #[error("payment session expired")]
    SessionExpired,

    #[error("subscription plan not found or inactive: {0}")]
    PlanNotFound(Uuid),

    #[error("coin package not found or inactive: {0}")]
    PackageNotFound(Uuid),

    #[error("insufficient lead coins: need {needed}, have {available}")]
    InsufficientCoins { needed: i64, available: i64 },

    #[error("webhook signature invalid")]
    WebhookSignatureInvalid,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for BillingError {
    fn from(e: sqlx::Error) -> Self {
        BillingError::Database(e.to_string())
    }
}

impl From<stripe::StripeError> for BillingError {
    fn from(e: stripe::StripeError) -> Self {
        BillingError::Stripe(e.to_string())
    }
}

impl From<stripe::ParseIdError> for BillingError {
    fn from(e: stripe::ParseIdError) -> Self {
        BillingError::Gateway(format!("unparseable gateway id: {e}"))
    }
}

//! Billing error types
//!
//! One taxonomy for everything the billing crate can fail with. The api crate
//! maps these onto HTTP status codes; internal callers match on variants.

use thiserror::Error;

/// Errors produced by billing operations
#[derive(Debug, Error)]
pub enum BillingError {
    /// Referenced entity does not exist (unknown provider account, unknown id)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Inbound webhook failed signature verification or could not be decoded
    #[error("Invalid webhook signature")]
    WebhookSignatureInvalid,

    /// Caller must fix a precondition before retrying (customer not synced,
    /// zero/multiple active subscriptions, no provider for tenant)
    #[error("{0}")]
    Unprocessable(String),

    /// Unrecoverable divergence between our records and the provider's
    #[error("{0}")]
    Conflict(String),

    /// Malformed request data
    #[error("{0}")]
    BadRequest(String),

    /// Stripe API call failed
    #[error("Stripe API error: {0}")]
    StripeApi(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// Internal invariant violation
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<stripe::StripeError> for BillingError {
    fn from(e: stripe::StripeError) -> Self {
        BillingError::StripeApi(e.to_string())
    }
}

impl From<sqlx::Error> for BillingError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => BillingError::NotFound("row not found".to_string()),
            other => BillingError::Database(other.to_string()),
        }
    }
}

/// Result type for billing operations
pub type BillingResult<T> = Result<T, BillingError>;

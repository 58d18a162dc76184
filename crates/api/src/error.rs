//! HTTP error mapping
//!
//! The billing crate's error taxonomy mapped onto status codes. Webhook
//! callers only see the status; internal detail for 5xx stays in the logs.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use paybridge_billing::BillingError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Billing(#[from] BillingError),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let ApiError::Billing(err) = self;

        let status = match &err {
            BillingError::WebhookSignatureInvalid => StatusCode::FORBIDDEN,
            BillingError::NotFound(_) => StatusCode::NOT_FOUND,
            BillingError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            BillingError::Conflict(_) => StatusCode::CONFLICT,
            BillingError::BadRequest(_) => StatusCode::BAD_REQUEST,
            BillingError::StripeApi(_) | BillingError::Database(_) | BillingError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        if status.is_server_error() {
            tracing::error!(error = %err, "Request failed");
            return (
                status,
                Json(serde_json::json!({ "error": "Internal server error" })),
            )
                .into_response();
        }

        (status, Json(serde_json::json!({ "error": err.to_string() }))).into_response()
    }
}

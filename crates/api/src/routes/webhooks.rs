//! Inbound Stripe webhook endpoint
//!
//! The body is taken as raw bytes: the signature covers the exact payload
//! Stripe sent, so nothing may parse it before verification.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use paybridge_billing::BillingError;
use uuid::Uuid;

use crate::error::ApiResult;
use crate::state::AppState;

pub async fn stripe_webhook(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<StatusCode> {
    if body.is_empty() {
        return Err(BillingError::BadRequest("Missing request body".to_string()).into());
    }

    let signature = headers
        .get("stripe-signature")
        .and_then(|value| value.to_str().ok())
        .ok_or(BillingError::WebhookSignatureInvalid)?;

    state.webhooks.handle(account_id, signature, &body).await?;

    // 201 covers ignored events too: delivery succeeded either way.
    Ok(StatusCode::CREATED)
}

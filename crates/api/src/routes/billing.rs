//! Tenant-facing billing routes
//!
//! Thin wrappers over the per-tenant payment provider. Tenant auth sits in
//! front of this router and is not handled here.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use paybridge_billing::{BaseCustomer, ProductSelection, SubscriptionsProjection};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SyncCustomerRequest {
    pub user_ref: String,
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct SyncCustomerResponse {
    pub stripe_customer_id: String,
}

pub async fn sync_customer(
    State(state): State<AppState>,
    Path((tenant_id, customer_id)): Path<(Uuid, Uuid)>,
    Json(request): Json<SyncCustomerRequest>,
) -> ApiResult<Json<SyncCustomerResponse>> {
    let provider = state.providers.for_tenant(tenant_id).await?;
    let customer = BaseCustomer {
        id: customer_id,
        tenant_id,
        user_ref: request.user_ref,
        email: request.email,
    };
    let stripe_customer_id = provider.sync_customer(&customer).await?;
    Ok(Json(SyncCustomerResponse { stripe_customer_id }))
}

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub products: Vec<ProductSelection>,
    pub success_url: Option<String>,
    pub cancel_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub url: String,
}

pub async fn create_checkout_session(
    State(state): State<AppState>,
    Path((tenant_id, customer_id)): Path<(Uuid, Uuid)>,
    Json(request): Json<CheckoutRequest>,
) -> ApiResult<Json<SessionResponse>> {
    let provider = state.providers.for_tenant(tenant_id).await?;
    let url = provider
        .create_checkout_session(
            tenant_id,
            customer_id,
            &request.products,
            request.success_url.as_deref(),
            request.cancel_url.as_deref(),
        )
        .await?;
    Ok(Json(SessionResponse { url }))
}

#[derive(Debug, Deserialize)]
pub struct PortalRequest {
    pub return_url: String,
}

pub async fn create_portal_session(
    State(state): State<AppState>,
    Path((tenant_id, customer_id)): Path<(Uuid, Uuid)>,
    Json(request): Json<PortalRequest>,
) -> ApiResult<Json<SessionResponse>> {
    let provider = state.providers.for_tenant(tenant_id).await?;
    let url = provider
        .create_portal_session(tenant_id, customer_id, &request.return_url)
        .await?;
    Ok(Json(SessionResponse { url }))
}

pub async fn get_subscriptions(
    State(state): State<AppState>,
    Path((tenant_id, customer_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<SubscriptionsProjection>> {
    let provider = state.providers.for_tenant(tenant_id).await?;
    let projection = provider.get_subscriptions(tenant_id, customer_id).await?;
    Ok(Json(projection))
}

#[derive(Debug, Deserialize)]
pub struct UpdateSubscriptionRequest {
    pub products: Vec<ProductSelection>,
}

pub async fn update_subscription(
    State(state): State<AppState>,
    Path((tenant_id, customer_id)): Path<(Uuid, Uuid)>,
    Json(request): Json<UpdateSubscriptionRequest>,
) -> ApiResult<StatusCode> {
    let provider = state.providers.for_tenant(tenant_id).await?;
    provider
        .update_subscription(tenant_id, customer_id, &request.products)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct CancelSubscriptionRequest {
    pub cancel: bool,
}

pub async fn cancel_subscription(
    State(state): State<AppState>,
    Path((tenant_id, customer_id)): Path<(Uuid, Uuid)>,
    Json(request): Json<CancelSubscriptionRequest>,
) -> ApiResult<StatusCode> {
    let provider = state.providers.for_tenant(tenant_id).await?;
    provider
        .cancel_subscription_at_period_end(tenant_id, customer_id, request.cancel)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

//! HTTP routes

pub mod billing;
pub mod webhooks;

use axum::routing::{get, post, put};
use axum::Router;

use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/stripe-accounts/{account_id}/webhook",
            post(webhooks::stripe_webhook),
        )
        .route(
            "/tenants/{tenant_id}/customers/{customer_id}/sync",
            post(billing::sync_customer),
        )
        .route(
            "/tenants/{tenant_id}/customers/{customer_id}/checkout",
            post(billing::create_checkout_session),
        )
        .route(
            "/tenants/{tenant_id}/customers/{customer_id}/portal",
            post(billing::create_portal_session),
        )
        .route(
            "/tenants/{tenant_id}/customers/{customer_id}/subscriptions",
            get(billing::get_subscriptions),
        )
        .route(
            "/tenants/{tenant_id}/customers/{customer_id}/subscription",
            put(billing::update_subscription),
        )
        .route(
            "/tenants/{tenant_id}/customers/{customer_id}/subscription/cancel",
            post(billing::cancel_subscription),
        )
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

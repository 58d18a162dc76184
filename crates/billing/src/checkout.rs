//! Checkout and billing portal sessions
//!
//! Thin wrappers that resolve the internal customer to its provider
//! counterpart and hand back a redirect URL. Sync is a hard precondition,
//! same as the subscription operations.

use std::sync::Arc;

use uuid::Uuid;

use crate::client::{PaymentGateway, ProductSelection};
use crate::customers::{CustomerMapping, CustomerMappingRepository};
use crate::error::{BillingError, BillingResult};

pub struct CheckoutService {
    gateway: Arc<dyn PaymentGateway>,
    mappings: Arc<dyn CustomerMappingRepository>,
}

impl CheckoutService {
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        mappings: Arc<dyn CustomerMappingRepository>,
    ) -> Self {
        Self { gateway, mappings }
    }

    async fn require_mapping(
        &self,
        tenant_id: Uuid,
        customer_id: Uuid,
    ) -> BillingResult<CustomerMapping> {
        self.mappings
            .find(tenant_id, customer_id)
            .await?
            .ok_or_else(|| {
                BillingError::Unprocessable("Customer not found, sync first".to_string())
            })
    }

    /// Create a checkout session for the given products and return its URL.
    pub async fn create_checkout_session(
        &self,
        tenant_id: Uuid,
        customer_id: Uuid,
        products: &[ProductSelection],
        success_url: Option<&str>,
        cancel_url: Option<&str>,
    ) -> BillingResult<String> {
        if products.is_empty() {
            return Err(BillingError::BadRequest(
                "Checkout requires at least one product".to_string(),
            ));
        }

        let mapping = self.require_mapping(tenant_id, customer_id).await?;

        let url = self
            .gateway
            .create_checkout_session(
                &mapping.stripe_customer_id,
                products,
                success_url,
                cancel_url,
            )
            .await?;

        tracing::info!(
            customer_id = %customer_id,
            products = products.len(),
            "Created checkout session"
        );
        Ok(url)
    }

    /// Create a billing portal session and return its URL.
    pub async fn create_portal_session(
        &self,
        tenant_id: Uuid,
        customer_id: Uuid,
        return_url: &str,
    ) -> BillingResult<String> {
        let mapping = self.require_mapping(tenant_id, customer_id).await?;

        self.gateway
            .create_portal_session(&mapping.stripe_customer_id, return_url)
            .await
    }
}

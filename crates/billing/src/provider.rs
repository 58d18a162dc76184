//! Payment provider surface and tenant registry
//!
//! `PaymentProvider` is the capability surface the CRUD layer programs
//! against; `PaymentProviderRegistry` resolves which concrete provider backs
//! a given tenant. The set of providers is closed and known at build time,
//! Stripe being the only implementation today.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::accounts::AccountRepository;
use crate::checkout::CheckoutService;
use crate::client::{PaymentGateway, ProductSelection};
use crate::customers::{BaseCustomer, CustomerMappingRepository, CustomerSyncService};
use crate::error::{BillingError, BillingResult};
use crate::subscriptions::{SubscriptionService, SubscriptionsProjection};
use crate::webhooks::GatewayFactory;

/// Everything a tenant can do against its payment provider
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Client-side key for the account backing this provider, when known.
    fn publishable_key(&self) -> Option<&str> {
        None
    }

    async fn sync_customer(&self, customer: &BaseCustomer) -> BillingResult<String>;

    async fn create_checkout_session(
        &self,
        tenant_id: Uuid,
        customer_id: Uuid,
        products: &[ProductSelection],
        success_url: Option<&str>,
        cancel_url: Option<&str>,
    ) -> BillingResult<String>;

    async fn create_portal_session(
        &self,
        tenant_id: Uuid,
        customer_id: Uuid,
        return_url: &str,
    ) -> BillingResult<String>;

    async fn get_subscriptions(
        &self,
        tenant_id: Uuid,
        customer_id: Uuid,
    ) -> BillingResult<SubscriptionsProjection>;

    async fn update_subscription(
        &self,
        tenant_id: Uuid,
        customer_id: Uuid,
        products: &[ProductSelection],
    ) -> BillingResult<()>;

    async fn cancel_subscription_at_period_end(
        &self,
        tenant_id: Uuid,
        customer_id: Uuid,
        cancel: bool,
    ) -> BillingResult<()>;
}

/// Stripe-backed provider, composed from the individual services
pub struct StripePaymentProvider {
    sync: CustomerSyncService,
    checkout: CheckoutService,
    subscriptions: SubscriptionService,
    publishable_key: Option<String>,
}

impl StripePaymentProvider {
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        mappings: Arc<dyn CustomerMappingRepository>,
    ) -> Self {
        Self {
            sync: CustomerSyncService::new(gateway.clone(), mappings.clone()),
            checkout: CheckoutService::new(gateway.clone(), mappings.clone()),
            subscriptions: SubscriptionService::new(gateway, mappings),
            publishable_key: None,
        }
    }

    pub fn with_publishable_key(mut self, key: impl Into<String>) -> Self {
        self.publishable_key = Some(key.into());
        self
    }
}

#[async_trait]
impl PaymentProvider for StripePaymentProvider {
    fn publishable_key(&self) -> Option<&str> {
        self.publishable_key.as_deref()
    }

    async fn sync_customer(&self, customer: &BaseCustomer) -> BillingResult<String> {
        self.sync.sync(customer).await
    }

    async fn create_checkout_session(
        &self,
        tenant_id: Uuid,
        customer_id: Uuid,
        products: &[ProductSelection],
        success_url: Option<&str>,
        cancel_url: Option<&str>,
    ) -> BillingResult<String> {
        self.checkout
            .create_checkout_session(tenant_id, customer_id, products, success_url, cancel_url)
            .await
    }

    async fn create_portal_session(
        &self,
        tenant_id: Uuid,
        customer_id: Uuid,
        return_url: &str,
    ) -> BillingResult<String> {
        self.checkout
            .create_portal_session(tenant_id, customer_id, return_url)
            .await
    }

    async fn get_subscriptions(
        &self,
        tenant_id: Uuid,
        customer_id: Uuid,
    ) -> BillingResult<SubscriptionsProjection> {
        self.subscriptions
            .get_subscriptions(tenant_id, customer_id)
            .await
    }

    async fn update_subscription(
        &self,
        tenant_id: Uuid,
        customer_id: Uuid,
        products: &[ProductSelection],
    ) -> BillingResult<()> {
        self.subscriptions
            .update_subscription(tenant_id, customer_id, products)
            .await
    }

    async fn cancel_subscription_at_period_end(
        &self,
        tenant_id: Uuid,
        customer_id: Uuid,
        cancel: bool,
    ) -> BillingResult<()> {
        self.subscriptions
            .cancel_at_period_end(tenant_id, customer_id, cancel)
            .await
    }
}

/// Resolves the provider serving a tenant
pub struct PaymentProviderRegistry {
    accounts: Arc<dyn AccountRepository>,
    mappings: Arc<dyn CustomerMappingRepository>,
    gateway_factory: GatewayFactory,
}

impl PaymentProviderRegistry {
    pub fn new(
        accounts: Arc<dyn AccountRepository>,
        mappings: Arc<dyn CustomerMappingRepository>,
        gateway_factory: GatewayFactory,
    ) -> Self {
        Self {
            accounts,
            mappings,
            gateway_factory,
        }
    }

    /// Provider for a tenant, bound to that tenant's account credentials.
    pub async fn for_tenant(&self, tenant_id: Uuid) -> BillingResult<Arc<dyn PaymentProvider>> {
        let account = self
            .accounts
            .find_by_tenant_id(tenant_id)
            .await?
            .ok_or_else(|| {
                BillingError::Unprocessable(format!(
                    "No payment provider found for tenant {}",
                    tenant_id
                ))
            })?;

        let gateway = (self.gateway_factory)(&account);
        Ok(Arc::new(
            StripePaymentProvider::new(gateway, self.mappings.clone())
                .with_publishable_key(account.publishable_key),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::StripeAccount;
    use crate::testing::{FakeGateway, InMemoryAccounts, InMemoryMappings};

    fn registry(accounts: Arc<InMemoryAccounts>) -> PaymentProviderRegistry {
        let gateway = Arc::new(FakeGateway::new());
        PaymentProviderRegistry::new(
            accounts,
            Arc::new(InMemoryMappings::new()),
            Arc::new(move |_account: &StripeAccount| gateway.clone() as Arc<dyn PaymentGateway>),
        )
    }

    #[tokio::test]
    async fn tenant_with_an_account_resolves_to_a_provider() {
        let accounts = Arc::new(InMemoryAccounts::new());
        let account_id = accounts.insert("whsec_x");
        let tenant_id = Uuid::new_v4();
        accounts.link_tenant(account_id, tenant_id);

        let registry = registry(accounts);
        let provider = registry.for_tenant(tenant_id).await.unwrap();
        assert_eq!(provider.publishable_key(), Some("pk_test_fake"));
    }

    #[tokio::test]
    async fn tenant_without_an_account_is_unprocessable() {
        let registry = registry(Arc::new(InMemoryAccounts::new()));
        let tenant_id = Uuid::new_v4();

        let err = registry.for_tenant(tenant_id).await.err().map(|e| e.to_string());
        assert_eq!(
            err.as_deref(),
            Some(format!("No payment provider found for tenant {}", tenant_id).as_str())
        );
    }
}

//! Customer identity sync
//!
//! Maps internal customers (tenant + user reference) to provider-side
//! customer ids and keeps the provider record alive and current. Billing
//! operations call [`CustomerSyncService::sync`] first so they always work
//! against a live provider customer.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::client::PaymentGateway;
use crate::error::{BillingError, BillingResult};

/// An internal customer identity, as the host application knows it
#[derive(Debug, Clone)]
pub struct BaseCustomer {
    pub id: Uuid,
    pub tenant_id: Uuid,
    /// Stable reference into the host application's user store
    pub user_ref: String,
    pub email: String,
}

/// Stored link between an internal customer and a provider customer
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CustomerMapping {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub customer_id: Uuid,
    pub user_ref: String,
    pub stripe_customer_id: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Persistence for customer mappings
#[async_trait]
pub trait CustomerMappingRepository: Send + Sync {
    async fn find(
        &self,
        tenant_id: Uuid,
        customer_id: Uuid,
    ) -> BillingResult<Option<CustomerMapping>>;

    async fn find_by_stripe_customer_id(
        &self,
        stripe_customer_id: &str,
    ) -> BillingResult<Option<CustomerMapping>>;

    /// Insert a mapping, or return the existing one if another writer got
    /// there first. Never overwrites a stored provider customer id.
    async fn insert_or_get(
        &self,
        customer: &BaseCustomer,
        stripe_customer_id: &str,
    ) -> BillingResult<CustomerMapping>;
}

/// Postgres-backed mapping repository
pub struct PgCustomerMappingRepository {
    pool: PgPool,
}

impl PgCustomerMappingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CustomerMappingRepository for PgCustomerMappingRepository {
    async fn find(
        &self,
        tenant_id: Uuid,
        customer_id: Uuid,
    ) -> BillingResult<Option<CustomerMapping>> {
        let mapping = sqlx::query_as::<_, CustomerMapping>(
            r#"
            SELECT id, tenant_id, customer_id, user_ref, stripe_customer_id,
                   created_at, updated_at
            FROM stripe_customers
            WHERE tenant_id = $1 AND customer_id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(mapping)
    }

    async fn find_by_stripe_customer_id(
        &self,
        stripe_customer_id: &str,
    ) -> BillingResult<Option<CustomerMapping>> {
        let mapping = sqlx::query_as::<_, CustomerMapping>(
            r#"
            SELECT id, tenant_id, customer_id, user_ref, stripe_customer_id,
                   created_at, updated_at
            FROM stripe_customers
            WHERE stripe_customer_id = $1
            "#,
        )
        .bind(stripe_customer_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(mapping)
    }

    async fn insert_or_get(
        &self,
        customer: &BaseCustomer,
        stripe_customer_id: &str,
    ) -> BillingResult<CustomerMapping> {
        // DO UPDATE on the conflict target keeps the stored stripe id and
        // makes RETURNING yield the winning row either way.
        let mapping = sqlx::query_as::<_, CustomerMapping>(
            r#"
            INSERT INTO stripe_customers (id, tenant_id, customer_id, user_ref, stripe_customer_id)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (tenant_id, customer_id)
            DO UPDATE SET updated_at = now()
            RETURNING id, tenant_id, customer_id, user_ref, stripe_customer_id,
                      created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(customer.tenant_id)
        .bind(customer.id)
        .bind(&customer.user_ref)
        .bind(stripe_customer_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(mapping)
    }
}

/// Ensures an internal customer has a live, current provider counterpart
pub struct CustomerSyncService {
    gateway: Arc<dyn PaymentGateway>,
    mappings: Arc<dyn CustomerMappingRepository>,
}

impl CustomerSyncService {
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        mappings: Arc<dyn CustomerMappingRepository>,
    ) -> Self {
        Self { gateway, mappings }
    }

    /// Sync one customer, returning the provider customer id.
    ///
    /// No mapping: create the provider customer (idempotent per tenant and
    /// user ref) and store the link. Existing mapping: verify the provider
    /// record is still live and push an email change if the internal email
    /// moved ahead of the provider's copy.
    pub async fn sync(&self, customer: &BaseCustomer) -> BillingResult<String> {
        let existing = self.mappings.find(customer.tenant_id, customer.id).await?;

        let Some(mapping) = existing else {
            let stripe_customer_id = self.gateway.create_customer(customer).await?;
            let mapping = self
                .mappings
                .insert_or_get(customer, &stripe_customer_id)
                .await?;
            return Ok(mapping.stripe_customer_id);
        };

        let remote = self
            .gateway
            .retrieve_customer(&mapping.stripe_customer_id)
            .await?;

        if remote.deleted {
            tracing::error!(
                customer_id = %customer.id,
                stripe_customer_id = %mapping.stripe_customer_id,
                "Stripe customer deleted upstream"
            );
            return Err(BillingError::Conflict(
                "The customer has been deleted from Stripe".to_string(),
            ));
        }

        if remote.email.as_deref() != Some(customer.email.as_str()) {
            self.gateway
                .update_customer_email(&mapping.stripe_customer_id, &customer.email)
                .await?;
        }

        Ok(mapping.stripe_customer_id)
    }
}

//! Stripe account credentials
//!
//! A `StripeAccount` holds the credentials for one Stripe account and is
//! scoped to one or more tenants. Accounts are managed out of band (admin
//! tooling); at runtime they are read-only and looked up either by the opaque
//! account id carried in the webhook URL or by tenant.

use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};

/// Credentials for one Stripe account
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StripeAccount {
    pub id: Uuid,
    pub publishable_key: String,
    pub secret_key: String,
    pub webhook_secret: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Lookup interface for Stripe accounts
#[async_trait]
pub trait AccountRepository: Send + Sync {
    /// Find an account by its id. Unknown id is an error: the id came from
    /// the webhook URL and an unknown one means a misconfigured endpoint.
    async fn find_by_id(&self, id: Uuid) -> BillingResult<StripeAccount>;

    /// Find the account serving a tenant, if any.
    async fn find_by_tenant_id(&self, tenant_id: Uuid) -> BillingResult<Option<StripeAccount>>;
}

/// Postgres-backed account repository
pub struct PgAccountRepository {
    pool: PgPool,
}

impl PgAccountRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountRepository for PgAccountRepository {
    async fn find_by_id(&self, id: Uuid) -> BillingResult<StripeAccount> {
        let account = sqlx::query_as::<_, StripeAccount>(
            r#"
            SELECT id, publishable_key, secret_key, webhook_secret, created_at, updated_at
            FROM stripe_accounts
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        account.ok_or_else(|| BillingError::NotFound(format!("Stripe account {} not found", id)))
    }

    async fn find_by_tenant_id(&self, tenant_id: Uuid) -> BillingResult<Option<StripeAccount>> {
        let account = sqlx::query_as::<_, StripeAccount>(
            r#"
            SELECT a.id, a.publishable_key, a.secret_key, a.webhook_secret,
                   a.created_at, a.updated_at
            FROM stripe_accounts a
            JOIN stripe_account_tenants t ON t.stripe_account_id = a.id
            WHERE t.tenant_id = $1
            "#,
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(account)
    }
}

//! Payment gateway abstraction and its Stripe implementation
//!
//! `PaymentGateway` is the seam between billing logic and the external
//! payment API: one method per raw provider operation, normalized value
//! types, no provider SDK types leaking out. `StripeClient` implements it
//! with async-stripe, bound to one account's secret key.

use std::collections::HashMap;

use async_trait::async_trait;
use stripe::{
    BillingPortalSession, CancelSubscription, Charge, ChargeId, CheckoutSession,
    CheckoutSessionMode, Client, CreateBillingPortalSession, CreateCheckoutSession,
    CreateCheckoutSessionLineItems, CreateCustomer, CreateRefund, Customer, CustomerId,
    Expandable, ListSubscriptions, Price, PriceId, Refund, RefundReasonFilter, RequestStrategy,
    Subscription, SubscriptionId, SubscriptionStatus as StripeSubStatus, SubscriptionStatusFilter,
    UpdateCustomer, UpdateSubscription, UpdateSubscriptionItems,
};
// Two generated enums share this name; UpdateSubscription takes the one
// under billing::subscription.
use stripe::generated::billing::subscription::SubscriptionProrationBehavior;
use time::OffsetDateTime;

use crate::customers::BaseCustomer;
use crate::error::{BillingError, BillingResult};

/// A customer record as the provider sees it
#[derive(Debug, Clone)]
pub struct GatewayCustomer {
    pub id: String,
    pub email: Option<String>,
    /// True when the provider reports the customer deleted upstream
    pub deleted: bool,
}

/// A charge as the provider sees it
#[derive(Debug, Clone)]
pub struct GatewayCharge {
    pub id: String,
    /// Provider customer id, absent for guest checkouts
    pub customer_id: Option<String>,
    pub refunded: bool,
}

/// Normalized subscription status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Active,
    Trialing,
    PastDue,
    Canceled,
    Other,
}

/// Card summary shown to end users ("visa •••• 4242, 04/2027")
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct CardSummary {
    pub brand: String,
    pub last_digits: String,
    /// "MM/YYYY"
    pub expiry: String,
}

/// One line item on a subscription
#[derive(Debug, Clone)]
pub struct GatewaySubscriptionItem {
    pub id: String,
    pub price_id: String,
    pub quantity: Option<u64>,
    pub unit_amount: Option<i64>,
    pub currency: String,
}

/// A subscription as the provider sees it, fully populated (no lazy loading)
#[derive(Debug, Clone)]
pub struct GatewaySubscription {
    pub id: String,
    pub status: SubscriptionState,
    pub cancel_at_period_end: bool,
    /// The provider recorded a customer-requested cancellation
    pub cancellation_requested: bool,
    pub current_period_start: OffsetDateTime,
    pub current_period_end: OffsetDateTime,
    pub items: Vec<GatewaySubscriptionItem>,
    pub payment_method: Option<CardSummary>,
}

/// A product/price selection on checkout or subscription update
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ProductSelection {
    pub external_ref: String,
    pub quantity: u64,
}

/// One change in a subscription items diff
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionItemChange {
    /// Mark an existing item deleted
    Remove { item_id: String },
    /// Append a new price
    Add { price: String, quantity: u64 },
}

/// Refund reason accepted by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefundReason {
    Fraudulent,
    Duplicate,
    RequestedByCustomer,
}

/// Status filter for subscription listing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFilter {
    Active,
    Trialing,
    All,
}

/// Raw payment-provider operations, one method per API call
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Create a provider-side customer tagged with internal metadata.
    /// Must be idempotent per (tenant, user_ref) so concurrent duplicate
    /// sync calls collapse to a single provider customer.
    async fn create_customer(&self, customer: &BaseCustomer) -> BillingResult<String>;

    async fn retrieve_customer(&self, provider_customer_id: &str)
        -> BillingResult<GatewayCustomer>;

    async fn update_customer_email(
        &self,
        provider_customer_id: &str,
        email: &str,
    ) -> BillingResult<()>;

    /// Create a checkout session, returning its URL.
    async fn create_checkout_session(
        &self,
        provider_customer_id: &str,
        products: &[ProductSelection],
        success_url: Option<&str>,
        cancel_url: Option<&str>,
    ) -> BillingResult<String>;

    /// Create a billing portal session, returning its URL.
    async fn create_portal_session(
        &self,
        provider_customer_id: &str,
        return_url: &str,
    ) -> BillingResult<String>;

    async fn list_subscriptions(
        &self,
        provider_customer_id: &str,
        filter: StatusFilter,
    ) -> BillingResult<Vec<GatewaySubscription>>;

    /// Apply an item diff to a subscription in one call, with prorations.
    async fn update_subscription_items(
        &self,
        subscription_id: &str,
        changes: &[SubscriptionItemChange],
    ) -> BillingResult<()>;

    async fn set_cancel_at_period_end(
        &self,
        subscription_id: &str,
        cancel_at_period_end: bool,
    ) -> BillingResult<()>;

    /// Cancel immediately, no refund of the partial period.
    async fn cancel_subscription_now(&self, subscription_id: &str) -> BillingResult<()>;

    async fn refund_charge(&self, charge_id: &str, reason: RefundReason) -> BillingResult<()>;

    async fn retrieve_charge(&self, charge_id: &str) -> BillingResult<GatewayCharge>;
}

/// Stripe-backed gateway, bound to one account's secret key
pub struct StripeClient {
    client: Client,
}

impl StripeClient {
    pub fn new(secret_key: &str) -> Self {
        Self {
            client: Client::new(secret_key),
        }
    }

    fn parse_customer_id(provider_customer_id: &str) -> BillingResult<CustomerId> {
        provider_customer_id
            .parse::<CustomerId>()
            .map_err(|e| BillingError::StripeApi(format!("Invalid customer ID: {}", e)))
    }

    fn parse_subscription_id(subscription_id: &str) -> BillingResult<SubscriptionId> {
        subscription_id
            .parse::<SubscriptionId>()
            .map_err(|e| BillingError::StripeApi(format!("Invalid subscription ID: {}", e)))
    }

    fn map_subscription(subscription: Subscription) -> GatewaySubscription {
        let status = match subscription.status {
            StripeSubStatus::Active => SubscriptionState::Active,
            StripeSubStatus::Trialing => SubscriptionState::Trialing,
            StripeSubStatus::PastDue => SubscriptionState::PastDue,
            StripeSubStatus::Canceled => SubscriptionState::Canceled,
            _ => SubscriptionState::Other,
        };

        let cancellation_requested = subscription
            .cancellation_details
            .as_ref()
            .and_then(|details| details.reason.as_ref())
            .map(|reason| {
                matches!(
                    reason,
                    stripe::CancellationDetailsReason::CancellationRequested
                )
            })
            .unwrap_or(false);

        let payment_method = match &subscription.default_payment_method {
            Some(Expandable::Object(pm)) => pm.card.as_ref().map(|card| CardSummary {
                brand: format!("{:?}", card.brand).to_lowercase(),
                last_digits: card.last4.clone(),
                expiry: format!("{:02}/{}", card.exp_month, card.exp_year),
            }),
            _ => None,
        };

        let items = subscription
            .items
            .data
            .iter()
            .map(|item| GatewaySubscriptionItem {
                id: item.id.to_string(),
                price_id: item
                    .price
                    .as_ref()
                    .map(|p| p.id.to_string())
                    .unwrap_or_default(),
                quantity: item.quantity,
                unit_amount: item.price.as_ref().and_then(|p| p.unit_amount),
                currency: item
                    .price
                    .as_ref()
                    .and_then(|p| p.currency)
                    .map(|c| c.to_string())
                    .unwrap_or_default(),
            })
            .collect();

        GatewaySubscription {
            id: subscription.id.to_string(),
            status,
            cancel_at_period_end: subscription.cancel_at_period_end,
            cancellation_requested,
            current_period_start: OffsetDateTime::from_unix_timestamp(
                subscription.current_period_start,
            )
            .unwrap_or_else(|_| OffsetDateTime::now_utc()),
            current_period_end: OffsetDateTime::from_unix_timestamp(
                subscription.current_period_end,
            )
            .unwrap_or_else(|_| OffsetDateTime::now_utc()),
            items,
            payment_method,
        }
    }
}

#[async_trait]
impl PaymentGateway for StripeClient {
    async fn create_customer(&self, customer: &BaseCustomer) -> BillingResult<String> {
        let mut metadata = HashMap::new();
        metadata.insert("tenant_id".to_string(), customer.tenant_id.to_string());
        metadata.insert("customer_id".to_string(), customer.id.to_string());
        metadata.insert("user_ref".to_string(), customer.user_ref.clone());

        let params = CreateCustomer {
            email: Some(customer.email.as_str()),
            metadata: Some(metadata),
            ..Default::default()
        };

        // Idempotency key collapses concurrent duplicate sync calls into
        // one provider-side customer.
        let idempotency_key = format!(
            "tenant-{}-ref-{}",
            customer.tenant_id, customer.user_ref
        );
        let client = self
            .client
            .clone()
            .with_strategy(RequestStrategy::Idempotent(idempotency_key));

        let created = Customer::create(&client, params).await?;

        tracing::info!(
            customer_id = %customer.id,
            stripe_customer_id = %created.id,
            "Created Stripe customer"
        );

        Ok(created.id.to_string())
    }

    async fn retrieve_customer(
        &self,
        provider_customer_id: &str,
    ) -> BillingResult<GatewayCustomer> {
        let customer_id = Self::parse_customer_id(provider_customer_id)?;
        let customer = Customer::retrieve(&self.client, &customer_id, &[]).await?;

        Ok(GatewayCustomer {
            id: customer.id.to_string(),
            email: customer.email,
            deleted: customer.deleted,
        })
    }

    async fn update_customer_email(
        &self,
        provider_customer_id: &str,
        email: &str,
    ) -> BillingResult<()> {
        let customer_id = Self::parse_customer_id(provider_customer_id)?;
        let params = UpdateCustomer {
            email: Some(email),
            ..Default::default()
        };
        Customer::update(&self.client, &customer_id, params).await?;
        Ok(())
    }

    async fn create_checkout_session(
        &self,
        provider_customer_id: &str,
        products: &[ProductSelection],
        success_url: Option<&str>,
        cancel_url: Option<&str>,
    ) -> BillingResult<String> {
        let customer_id = Self::parse_customer_id(provider_customer_id)?;

        // Retrieve every selected price; one recurring price switches the
        // whole session into subscription mode.
        let mut prices = Vec::with_capacity(products.len());
        for product in products {
            let price_id = product
                .external_ref
                .parse::<PriceId>()
                .map_err(|e| BillingError::BadRequest(format!("Invalid price ID: {}", e)))?;
            let price = Price::retrieve(&self.client, &price_id, &[])
                .await
                .map_err(|_| {
                    BillingError::BadRequest("Failed to retrieve prices from Stripe".to_string())
                })?;
            prices.push((price, product.quantity));
        }

        let recurring = prices.iter().any(|(price, _)| price.recurring.is_some());

        let mut params = CreateCheckoutSession::new();
        params.customer = Some(customer_id);
        params.mode = Some(if recurring {
            CheckoutSessionMode::Subscription
        } else {
            CheckoutSessionMode::Payment
        });
        params.success_url = success_url;
        params.cancel_url = cancel_url;
        params.allow_promotion_codes = Some(true);
        params.line_items = Some(
            prices
                .iter()
                .map(|(price, quantity)| CreateCheckoutSessionLineItems {
                    price: Some(price.id.to_string()),
                    quantity: Some(*quantity),
                    ..Default::default()
                })
                .collect(),
        );

        let session = CheckoutSession::create(&self.client, params).await?;

        session.url.ok_or_else(|| {
            BillingError::Internal("Checkout session created without a URL".to_string())
        })
    }

    async fn create_portal_session(
        &self,
        provider_customer_id: &str,
        return_url: &str,
    ) -> BillingResult<String> {
        let customer_id = Self::parse_customer_id(provider_customer_id)?;

        let mut params = CreateBillingPortalSession::new(customer_id);
        params.return_url = Some(return_url);

        let session = BillingPortalSession::create(&self.client, params).await?;
        Ok(session.url)
    }

    async fn list_subscriptions(
        &self,
        provider_customer_id: &str,
        filter: StatusFilter,
    ) -> BillingResult<Vec<GatewaySubscription>> {
        let customer_id = Self::parse_customer_id(provider_customer_id)?;

        let params = ListSubscriptions {
            customer: Some(customer_id),
            status: Some(match filter {
                StatusFilter::Active => SubscriptionStatusFilter::Active,
                StatusFilter::Trialing => SubscriptionStatusFilter::Trialing,
                StatusFilter::All => SubscriptionStatusFilter::All,
            }),
            expand: &["data.default_payment_method"],
            ..Default::default()
        };

        let subscriptions = Subscription::list(&self.client, &params).await?;

        Ok(subscriptions
            .data
            .into_iter()
            .map(Self::map_subscription)
            .collect())
    }

    async fn update_subscription_items(
        &self,
        subscription_id: &str,
        changes: &[SubscriptionItemChange],
    ) -> BillingResult<()> {
        let sub_id = Self::parse_subscription_id(subscription_id)?;

        let items = changes
            .iter()
            .map(|change| match change {
                SubscriptionItemChange::Remove { item_id } => UpdateSubscriptionItems {
                    id: Some(item_id.clone()),
                    deleted: Some(true),
                    ..Default::default()
                },
                SubscriptionItemChange::Add { price, quantity } => UpdateSubscriptionItems {
                    price: Some(price.clone()),
                    quantity: Some(*quantity),
                    ..Default::default()
                },
            })
            .collect();

        let params = UpdateSubscription {
            items: Some(items),
            proration_behavior: Some(SubscriptionProrationBehavior::CreateProrations),
            ..Default::default()
        };

        Subscription::update(&self.client, &sub_id, params).await?;
        Ok(())
    }

    async fn set_cancel_at_period_end(
        &self,
        subscription_id: &str,
        cancel_at_period_end: bool,
    ) -> BillingResult<()> {
        let sub_id = Self::parse_subscription_id(subscription_id)?;

        let params = UpdateSubscription {
            cancel_at_period_end: Some(cancel_at_period_end),
            ..Default::default()
        };

        Subscription::update(&self.client, &sub_id, params).await?;
        Ok(())
    }

    async fn cancel_subscription_now(&self, subscription_id: &str) -> BillingResult<()> {
        let sub_id = Self::parse_subscription_id(subscription_id)?;

        let params = CancelSubscription {
            cancellation_details: None,
            invoice_now: None,
            prorate: None,
        };

        Subscription::cancel(&self.client, &sub_id, params).await?;
        Ok(())
    }

    async fn refund_charge(&self, charge_id: &str, reason: RefundReason) -> BillingResult<()> {
        let mut params = CreateRefund::new();
        params.charge = Some(
            charge_id
                .parse()
                .map_err(|e| BillingError::StripeApi(format!("Invalid charge ID: {}", e)))?,
        );
        params.reason = Some(match reason {
            RefundReason::Fraudulent => RefundReasonFilter::Fraudulent,
            RefundReason::Duplicate => RefundReasonFilter::Duplicate,
            RefundReason::RequestedByCustomer => RefundReasonFilter::RequestedByCustomer,
        });

        Refund::create(&self.client, params).await?;
        Ok(())
    }

    async fn retrieve_charge(&self, charge_id: &str) -> BillingResult<GatewayCharge> {
        let id = charge_id
            .parse::<ChargeId>()
            .map_err(|e| BillingError::StripeApi(format!("Invalid charge ID: {}", e)))?;

        let charge = Charge::retrieve(&self.client, &id, &[]).await?;

        let customer_id = charge.customer.as_ref().map(|c| match c {
            Expandable::Id(id) => id.to_string(),
            Expandable::Object(customer) => customer.id.to_string(),
        });

        Ok(GatewayCharge {
            id: charge.id.to_string(),
            customer_id,
            refunded: charge.refunded,
        })
    }
}

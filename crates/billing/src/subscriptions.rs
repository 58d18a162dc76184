//! Subscription operations
//!
//! Tenant-facing subscription reads and mutations. Every operation requires
//! the customer to have been synced first; the mutating operations further
//! require exactly one active subscription, since multi-subscription
//! customers are unsupported for plan changes.

use std::sync::Arc;

use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::client::{
    CardSummary, GatewaySubscription, PaymentGateway, ProductSelection, StatusFilter,
    SubscriptionItemChange, SubscriptionState,
};
use crate::customers::{CustomerMapping, CustomerMappingRepository};
use crate::error::{BillingError, BillingResult};

/// One line item in the subscription projection
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionItemView {
    pub price_id: String,
    pub quantity: Option<u64>,
    pub unit_amount: Option<i64>,
    pub currency: String,
}

/// One subscription in the projection handed to tenants
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionView {
    pub id: String,
    pub status: String,
    pub cancel_at_period_end: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub current_period_start: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub current_period_end: OffsetDateTime,
    pub items: Vec<SubscriptionItemView>,
    pub payment_method: Option<CardSummary>,
}

/// Normalized view of a customer's running subscriptions
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionsProjection {
    pub subscriptions: Vec<SubscriptionView>,
    /// Only active and trialing grant product access
    pub should_provide_product: bool,
    /// Past due is visible but does not grant access
    pub has_past_due_subscription: bool,
}

fn status_label(state: SubscriptionState) -> &'static str {
    match state {
        SubscriptionState::Active => "active",
        SubscriptionState::Trialing => "trialing",
        SubscriptionState::PastDue => "past_due",
        SubscriptionState::Canceled => "canceled",
        SubscriptionState::Other => "other",
    }
}

fn project(subscription: &GatewaySubscription) -> SubscriptionView {
    SubscriptionView {
        id: subscription.id.clone(),
        status: status_label(subscription.status).to_string(),
        // The provider flag alone misses cancellations entered through the
        // portal, which only set the cancellation reason.
        cancel_at_period_end: subscription.cancel_at_period_end
            || subscription.cancellation_requested,
        current_period_start: subscription.current_period_start,
        current_period_end: subscription.current_period_end,
        items: subscription
            .items
            .iter()
            .map(|item| SubscriptionItemView {
                price_id: item.price_id.clone(),
                quantity: item.quantity,
                unit_amount: item.unit_amount,
                currency: item.currency.clone(),
            })
            .collect(),
        payment_method: subscription.payment_method.clone(),
    }
}

pub struct SubscriptionService {
    gateway: Arc<dyn PaymentGateway>,
    mappings: Arc<dyn CustomerMappingRepository>,
}

impl SubscriptionService {
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

    async fn require_single_active(
        &self,
        stripe_customer_id: &str,
    ) -> BillingResult<GatewaySubscription> {
        let mut active = self
            .gateway
            .list_subscriptions(stripe_customer_id, StatusFilter::Active)
            .await?;

        match active.len() {
            0 => Err(BillingError::Unprocessable(
                "No active subscription found for customer".to_string(),
            )),
            1 => Ok(active.remove(0)),
            _ => Err(BillingError::Unprocessable(
                "Multiple active subscriptions found for customer".to_string(),
            )),
        }
    }

    /// Running subscriptions (active, trialing, past due) projected into
    /// the tenant-facing shape.
    pub async fn get_subscriptions(
        &self,
        tenant_id: Uuid,
        customer_id: Uuid,
    ) -> BillingResult<SubscriptionsProjection> {
        let mapping = self.require_mapping(tenant_id, customer_id).await?;

        let all = self
            .gateway
            .list_subscriptions(&mapping.stripe_customer_id, StatusFilter::All)
            .await?;

        let running: Vec<&GatewaySubscription> = all
            .iter()
            .filter(|s| {
                matches!(
                    s.status,
                    SubscriptionState::Active
                        | SubscriptionState::Trialing
                        | SubscriptionState::PastDue
                )
            })
            .collect();

        let should_provide_product = running.iter().any(|s| {
            matches!(
                s.status,
                SubscriptionState::Active | SubscriptionState::Trialing
            )
        });
        let has_past_due_subscription = running
            .iter()
            .any(|s| s.status == SubscriptionState::PastDue);

        Ok(SubscriptionsProjection {
            subscriptions: running.into_iter().map(project).collect(),
            should_provide_product,
            has_past_due_subscription,
        })
    }

    /// Replace the customer's single active subscription's items with the
    /// requested products: every existing item marked deleted, new items
    /// appended, applied by the provider in one prorated update.
    pub async fn update_subscription(
        &self,
        tenant_id: Uuid,
        customer_id: Uuid,
        products: &[ProductSelection],
    ) -> BillingResult<()> {
        let mapping = self.require_mapping(tenant_id, customer_id).await?;
        let subscription = self
            .require_single_active(&mapping.stripe_customer_id)
            .await?;

        let mut changes: Vec<SubscriptionItemChange> = subscription
            .items
            .iter()
            .map(|item| SubscriptionItemChange::Remove {
                item_id: item.id.clone(),
            })
            .collect();
        changes.extend(products.iter().map(|product| SubscriptionItemChange::Add {
            price: product.external_ref.clone(),
            quantity: product.quantity,
        }));

        tracing::info!(
            customer_id = %customer_id,
            subscription_id = %subscription.id,
            items = changes.len(),
            "Updating subscription items"
        );

        self.gateway
            .update_subscription_items(&subscription.id, &changes)
            .await
    }

    /// Flip the period-end cancellation flag on the single active
    /// subscription.
    pub async fn cancel_at_period_end(
        &self,
        tenant_id: Uuid,
        customer_id: Uuid,
        cancel: bool,
    ) -> BillingResult<()> {
        let mapping = self.require_mapping(tenant_id, customer_id).await?;
        let subscription = self
            .require_single_active(&mapping.stripe_customer_id)
            .await?;

        self.gateway
            .set_cancel_at_period_end(&subscription.id, cancel)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{subscription, FakeGateway, GatewayCall, InMemoryMappings};

    struct Fixture {
        gateway: Arc<FakeGateway>,
        mappings: Arc<InMemoryMappings>,
        service: SubscriptionService,
    }

    fn fixture() -> Fixture {
        let gateway = Arc::new(FakeGateway::new());
        let mappings = Arc::new(InMemoryMappings::new());
        let service = SubscriptionService::new(gateway.clone(), mappings.clone());
        Fixture {
            gateway,
            mappings,
            service,
        }
    }

    #[tokio::test]
    async fn operations_require_a_synced_customer() {
        let f = fixture();
        let err = f
            .service
            .get_subscriptions(Uuid::new_v4(), Uuid::new_v4())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Customer not found, sync first");
    }

    #[tokio::test]
    async fn update_with_zero_active_subscriptions_is_rejected() {
        let f = fixture();
        let mapping = f.mappings.seed("cus_s");

        let err = f
            .service
            .update_subscription(mapping.tenant_id, mapping.customer_id, &[])
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "No active subscription found for customer");
    }

    #[tokio::test]
    async fn update_with_multiple_active_subscriptions_is_rejected() {
        let f = fixture();
        let mapping = f.mappings.seed("cus_s");
        f.gateway
            .push_subscription(subscription("sub_1", SubscriptionState::Active));
        f.gateway
            .push_subscription(subscription("sub_2", SubscriptionState::Active));

        let err = f
            .service
            .update_subscription(mapping.tenant_id, mapping.customer_id, &[])
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Multiple active subscriptions found for customer"
        );
    }

    #[tokio::test]
    async fn update_marks_old_items_deleted_and_appends_new() {
        let f = fixture();
        let mapping = f.mappings.seed("cus_s");
        let mut sub = subscription("sub_1", SubscriptionState::Active);
        sub.items = vec![
            crate::client::GatewaySubscriptionItem {
                id: "si_old1".to_string(),
                price_id: "price_old1".to_string(),
                quantity: Some(1),
                unit_amount: Some(900),
                currency: "usd".to_string(),
            },
            crate::client::GatewaySubscriptionItem {
                id: "si_old2".to_string(),
                price_id: "price_old2".to_string(),
                quantity: Some(1),
                unit_amount: Some(400),
                currency: "usd".to_string(),
            },
        ];
        f.gateway.push_subscription(sub);

        f.service
            .update_subscription(
                mapping.tenant_id,
                mapping.customer_id,
                &[ProductSelection {
                    external_ref: "price_new".to_string(),
                    quantity: 2,
                }],
            )
            .await
            .unwrap();

        let calls = f.gateway.calls();
        let update = calls
            .iter()
            .find_map(|c| match c {
                GatewayCall::UpdateSubscriptionItems {
                    subscription_id,
                    changes,
                } => Some((subscription_id.clone(), changes.clone())),
                _ => None,
            })
            .unwrap();

        assert_eq!(update.0, "sub_1");
        assert_eq!(
            update.1,
            vec![
                SubscriptionItemChange::Remove {
                    item_id: "si_old1".to_string()
                },
                SubscriptionItemChange::Remove {
                    item_id: "si_old2".to_string()
                },
                SubscriptionItemChange::Add {
                    price: "price_new".to_string(),
                    quantity: 2
                },
            ]
        );
    }

    #[tokio::test]
    async fn cancel_at_period_end_targets_the_single_active_subscription() {
        let f = fixture();
        let mapping = f.mappings.seed("cus_s");
        f.gateway
            .push_subscription(subscription("sub_only", SubscriptionState::Active));

        f.service
            .cancel_at_period_end(mapping.tenant_id, mapping.customer_id, true)
            .await
            .unwrap();

        assert!(f.gateway.calls().iter().any(|c| matches!(
            c,
            GatewayCall::SetCancelAtPeriodEnd { subscription_id, value: true }
                if subscription_id == "sub_only"
        )));
    }

    #[tokio::test]
    async fn projection_buckets_statuses() {
        let f = fixture();
        let mapping = f.mappings.seed("cus_s");
        f.gateway
            .push_subscription(subscription("sub_trial", SubscriptionState::Trialing));
        f.gateway
            .push_subscription(subscription("sub_due", SubscriptionState::PastDue));
        f.gateway
            .push_subscription(subscription("sub_gone", SubscriptionState::Canceled));

        let projection = f
            .service
            .get_subscriptions(mapping.tenant_id, mapping.customer_id)
            .await
            .unwrap();

        assert_eq!(projection.subscriptions.len(), 2);
        assert!(projection.should_provide_product);
        assert!(projection.has_past_due_subscription);
    }

    #[tokio::test]
    async fn past_due_alone_does_not_grant_product_access() {
        let f = fixture();
        let mapping = f.mappings.seed("cus_s");
        f.gateway
            .push_subscription(subscription("sub_due", SubscriptionState::PastDue));

        let projection = f
            .service
            .get_subscriptions(mapping.tenant_id, mapping.customer_id)
            .await
            .unwrap();

        assert!(!projection.should_provide_product);
        assert!(projection.has_past_due_subscription);
    }

    #[tokio::test]
    async fn cancellation_reason_marks_cancel_at_period_end() {
        let f = fixture();
        let mapping = f.mappings.seed("cus_s");
        let mut sub = subscription("sub_1", SubscriptionState::Active);
        sub.cancellation_requested = true;
        f.gateway.push_subscription(sub);

        let projection = f
            .service
            .get_subscriptions(mapping.tenant_id, mapping.customer_id)
            .await
            .unwrap();

        assert!(projection.subscriptions[0].cancel_at_period_end);
    }
}

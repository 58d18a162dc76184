//! In-memory fakes shared by the unit tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::accounts::{AccountRepository, StripeAccount};
use crate::client::{
    GatewayCharge, GatewayCustomer, GatewaySubscription, PaymentGateway, ProductSelection,
    RefundReason, StatusFilter, SubscriptionItemChange, SubscriptionState,
};
use crate::customers::{BaseCustomer, CustomerMapping, CustomerMappingRepository};
use crate::dispatch::{WebhookContext, WebhookHandler};
use crate::error::{BillingError, BillingResult};
use crate::events::{DomainEvent, DomainEventSubscriber};
use crate::webhooks::{EventKind, WebhookEvent};

/// Build a valid Stripe signature header for a payload.
pub fn signature_header(secret: &str, timestamp: i64, payload: &[u8]) -> String {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    let signature = hex::encode(mac.finalize().into_bytes());
    format!("t={},v1={}", timestamp, signature)
}

/// A gateway subscription with sane defaults for tests.
pub fn subscription(id: &str, status: SubscriptionState) -> GatewaySubscription {
    GatewaySubscription {
        id: id.to_string(),
        status,
        cancel_at_period_end: false,
        cancellation_requested: false,
        current_period_start: OffsetDateTime::now_utc(),
        current_period_end: OffsetDateTime::now_utc() + Duration::days(30),
        items: Vec::new(),
        payment_method: None,
    }
}

/// Every gateway call a test can assert on
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayCall {
    CreateCustomer { tenant_id: Uuid, user_ref: String },
    RetrieveCustomer(String),
    UpdateCustomerEmail { customer: String, email: String },
    CreateCheckoutSession { customer: String },
    CreatePortalSession { customer: String },
    ListSubscriptions { customer: String, filter: StatusFilter },
    UpdateSubscriptionItems { subscription_id: String, changes: Vec<SubscriptionItemChange> },
    SetCancelAtPeriodEnd { subscription_id: String, value: bool },
    CancelSubscriptionNow(String),
    RefundCharge { charge_id: String, reason: RefundReason },
    RetrieveCharge(String),
}

#[derive(Default)]
struct FakeGatewayState {
    calls: Vec<GatewayCall>,
    // (tenant_id, user_ref) -> stripe customer id, for idempotent creation
    created: HashMap<(Uuid, String), String>,
    customers: HashMap<String, GatewayCustomer>,
    charges: HashMap<String, GatewayCharge>,
    subscriptions: Vec<GatewaySubscription>,
    refund_failure: Option<String>,
    failing_cancels: Vec<String>,
    next_customer: usize,
}

/// Scriptable in-memory `PaymentGateway`
#[derive(Default)]
pub struct FakeGateway {
    state: Mutex<FakeGatewayState>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn mark_customer_deleted(&self, id: &str) {
        if let Some(customer) = self.state.lock().unwrap().customers.get_mut(id) {
            customer.deleted = true;
        }
    }

    pub fn add_charge(&self, id: &str, customer: Option<&str>, refunded: bool) {
        self.state.lock().unwrap().charges.insert(
            id.to_string(),
            GatewayCharge {
                id: id.to_string(),
                customer_id: customer.map(|c| c.to_string()),
                refunded,
            },
        );
    }

    pub fn push_subscription(&self, subscription: GatewaySubscription) {
        self.state.lock().unwrap().subscriptions.push(subscription);
    }

    pub fn fail_refund_with(&self, message: &str) {
        self.state.lock().unwrap().refund_failure = Some(message.to_string());
    }

    pub fn fail_cancel_for(&self, subscription_id: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_cancels
            .push(subscription_id.to_string());
    }

    fn record(&self, call: GatewayCall) {
        self.state.lock().unwrap().calls.push(call);
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_customer(&self, customer: &BaseCustomer) -> BillingResult<String> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(GatewayCall::CreateCustomer {
            tenant_id: customer.tenant_id,
            user_ref: customer.user_ref.clone(),
        });

        let key = (customer.tenant_id, customer.user_ref.clone());
        if let Some(existing) = state.created.get(&key) {
            return Ok(existing.clone());
        }

        state.next_customer += 1;
        let id = format!("cus_fake{}", state.next_customer);
        state.created.insert(key, id.clone());
        state.customers.insert(
            id.clone(),
            GatewayCustomer {
                id: id.clone(),
                email: Some(customer.email.clone()),
                deleted: false,
            },
        );
        Ok(id)
    }

    async fn retrieve_customer(
        &self,
        provider_customer_id: &str,
    ) -> BillingResult<GatewayCustomer> {
        self.record(GatewayCall::RetrieveCustomer(provider_customer_id.to_string()));
        self.state
            .lock()
            .unwrap()
            .customers
            .get(provider_customer_id)
            .cloned()
            .ok_or_else(|| {
                BillingError::StripeApi(format!("No such customer: {}", provider_customer_id))
            })
    }

    async fn update_customer_email(
        &self,
        provider_customer_id: &str,
        email: &str,
    ) -> BillingResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(GatewayCall::UpdateCustomerEmail {
            customer: provider_customer_id.to_string(),
            email: email.to_string(),
        });
        if let Some(customer) = state.customers.get_mut(provider_customer_id) {
            customer.email = Some(email.to_string());
        }
        Ok(())
    }

    async fn create_checkout_session(
        &self,
        provider_customer_id: &str,
        _products: &[ProductSelection],
        _success_url: Option<&str>,
        _cancel_url: Option<&str>,
    ) -> BillingResult<String> {
        self.record(GatewayCall::CreateCheckoutSession {
            customer: provider_customer_id.to_string(),
        });
        Ok("https://checkout.stripe.test/c/pay/cs_fake".to_string())
    }

    async fn create_portal_session(
        &self,
        provider_customer_id: &str,
        _return_url: &str,
    ) -> BillingResult<String> {
        self.record(GatewayCall::CreatePortalSession {
            customer: provider_customer_id.to_string(),
        });
        Ok("https://billing.stripe.test/p/session/bps_fake".to_string())
    }

    async fn list_subscriptions(
        &self,
        provider_customer_id: &str,
        filter: StatusFilter,
    ) -> BillingResult<Vec<GatewaySubscription>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(GatewayCall::ListSubscriptions {
            customer: provider_customer_id.to_string(),
            filter,
        });
        Ok(state
            .subscriptions
            .iter()
            .filter(|s| match filter {
                StatusFilter::Active => s.status == SubscriptionState::Active,
                StatusFilter::Trialing => s.status == SubscriptionState::Trialing,
                StatusFilter::All => true,
            })
            .cloned()
            .collect())
    }

    async fn update_subscription_items(
        &self,
        subscription_id: &str,
        changes: &[SubscriptionItemChange],
    ) -> BillingResult<()> {
        self.record(GatewayCall::UpdateSubscriptionItems {
            subscription_id: subscription_id.to_string(),
            changes: changes.to_vec(),
        });
        Ok(())
    }

    async fn set_cancel_at_period_end(
        &self,
        subscription_id: &str,
        cancel_at_period_end: bool,
    ) -> BillingResult<()> {
        self.record(GatewayCall::SetCancelAtPeriodEnd {
            subscription_id: subscription_id.to_string(),
            value: cancel_at_period_end,
        });
        Ok(())
    }

    async fn cancel_subscription_now(&self, subscription_id: &str) -> BillingResult<()> {
        let failing = self
            .state
            .lock()
            .unwrap()
            .failing_cancels
            .contains(&subscription_id.to_string());
        if failing {
            return Err(BillingError::StripeApi(format!(
                "Cannot cancel subscription {}",
                subscription_id
            )));
        }
        self.record(GatewayCall::CancelSubscriptionNow(subscription_id.to_string()));
        Ok(())
    }

    async fn refund_charge(&self, charge_id: &str, reason: RefundReason) -> BillingResult<()> {
        let failure = self.state.lock().unwrap().refund_failure.clone();
        if let Some(message) = failure {
            return Err(BillingError::StripeApi(message));
        }
        self.record(GatewayCall::RefundCharge {
            charge_id: charge_id.to_string(),
            reason,
        });
        Ok(())
    }

    async fn retrieve_charge(&self, charge_id: &str) -> BillingResult<GatewayCharge> {
        self.record(GatewayCall::RetrieveCharge(charge_id.to_string()));
        self.state
            .lock()
            .unwrap()
            .charges
            .get(charge_id)
            .cloned()
            .ok_or_else(|| BillingError::StripeApi(format!("No such charge: {}", charge_id)))
    }
}

/// In-memory `CustomerMappingRepository`
#[derive(Default)]
pub struct InMemoryMappings {
    rows: Mutex<Vec<CustomerMapping>>,
}

impl InMemoryMappings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a mapping for a fresh tenant/customer pair.
    pub fn seed(&self, stripe_customer_id: &str) -> CustomerMapping {
        let mapping = CustomerMapping {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            customer_id: Uuid::new_v4(),
            user_ref: "seeded".to_string(),
            stripe_customer_id: stripe_customer_id.to_string(),
            created_at: OffsetDateTime::now_utc(),
            updated_at: OffsetDateTime::now_utc(),
        };
        self.rows.lock().unwrap().push(mapping.clone());
        mapping
    }
}

#[async_trait]
impl CustomerMappingRepository for InMemoryMappings {
    async fn find(
        &self,
        tenant_id: Uuid,
        customer_id: Uuid,
    ) -> BillingResult<Option<CustomerMapping>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|m| m.tenant_id == tenant_id && m.customer_id == customer_id)
            .cloned())
    }

    async fn find_by_stripe_customer_id(
        &self,
        stripe_customer_id: &str,
    ) -> BillingResult<Option<CustomerMapping>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|m| m.stripe_customer_id == stripe_customer_id)
            .cloned())
    }

    async fn insert_or_get(
        &self,
        customer: &BaseCustomer,
        stripe_customer_id: &str,
    ) -> BillingResult<CustomerMapping> {
        let mut rows = self.rows.lock().unwrap();
        if let Some(existing) = rows
            .iter()
            .find(|m| m.tenant_id == customer.tenant_id && m.customer_id == customer.id)
        {
            return Ok(existing.clone());
        }
        let mapping = CustomerMapping {
            id: Uuid::new_v4(),
            tenant_id: customer.tenant_id,
            customer_id: customer.id,
            user_ref: customer.user_ref.clone(),
            stripe_customer_id: stripe_customer_id.to_string(),
            created_at: OffsetDateTime::now_utc(),
            updated_at: OffsetDateTime::now_utc(),
        };
        rows.push(mapping.clone());
        Ok(mapping)
    }
}

/// In-memory `AccountRepository`
#[derive(Default)]
pub struct InMemoryAccounts {
    accounts: Mutex<HashMap<Uuid, StripeAccount>>,
    tenants: Mutex<Vec<(Uuid, Uuid)>>,
}

impl InMemoryAccounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, webhook_secret: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.accounts.lock().unwrap().insert(
            id,
            StripeAccount {
                id,
                publishable_key: "pk_test_fake".to_string(),
                secret_key: "sk_test_fake".to_string(),
                webhook_secret: webhook_secret.to_string(),
                created_at: OffsetDateTime::now_utc(),
                updated_at: OffsetDateTime::now_utc(),
            },
        );
        id
    }

    pub fn link_tenant(&self, account_id: Uuid, tenant_id: Uuid) {
        self.tenants.lock().unwrap().push((account_id, tenant_id));
    }
}

#[async_trait]
impl AccountRepository for InMemoryAccounts {
    async fn find_by_id(&self, id: Uuid) -> BillingResult<StripeAccount> {
        self.accounts
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| BillingError::NotFound(format!("Stripe account {} not found", id)))
    }

    async fn find_by_tenant_id(&self, tenant_id: Uuid) -> BillingResult<Option<StripeAccount>> {
        let account_id = self
            .tenants
            .lock()
            .unwrap()
            .iter()
            .find(|(_, t)| *t == tenant_id)
            .map(|(a, _)| *a);
        Ok(account_id.and_then(|id| self.accounts.lock().unwrap().get(&id).cloned()))
    }
}

/// Subscriber that records events, optionally failing the first call
pub struct CollectingSubscriber {
    events: Mutex<Vec<DomainEvent>>,
    failure: Mutex<Option<BillingError>>,
}

impl CollectingSubscriber {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            failure: Mutex::new(None),
        }
    }

    pub fn failing(error: BillingError) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            failure: Mutex::new(Some(error)),
        }
    }

    pub fn events(&self) -> Vec<DomainEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl Default for CollectingSubscriber {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DomainEventSubscriber for CollectingSubscriber {
    async fn handle(&self, event: &DomainEvent) -> BillingResult<()> {
        if let Some(error) = self.failure.lock().unwrap().take() {
            return Err(error);
        }
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// Handler that counts invocations, optionally failing or recording order
pub struct CountingHandler {
    kinds: Vec<EventKind>,
    invocations: AtomicUsize,
    last_customer_id: Mutex<Option<Uuid>>,
    failure: Mutex<Option<BillingError>>,
    label: Option<&'static str>,
    order: Option<Arc<Mutex<Vec<&'static str>>>>,
}

impl CountingHandler {
    pub fn new(kinds: Vec<EventKind>) -> Self {
        Self {
            kinds,
            invocations: AtomicUsize::new(0),
            last_customer_id: Mutex::new(None),
            failure: Mutex::new(None),
            label: None,
            order: None,
        }
    }

    pub fn failing(kinds: Vec<EventKind>, error: BillingError) -> Self {
        let handler = Self::new(kinds);
        *handler.failure.lock().unwrap() = Some(error);
        handler
    }

    pub fn ordered(
        kinds: Vec<EventKind>,
        label: &'static str,
        order: Arc<Mutex<Vec<&'static str>>>,
    ) -> Self {
        let mut handler = Self::new(kinds);
        handler.label = Some(label);
        handler.order = Some(order);
        handler
    }

    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    pub fn last_customer_id(&self) -> Option<Uuid> {
        *self.last_customer_id.lock().unwrap()
    }
}

#[async_trait]
impl WebhookHandler for CountingHandler {
    fn event_kinds(&self) -> Vec<EventKind> {
        self.kinds.clone()
    }

    async fn handle(&self, _event: &WebhookEvent, context: &WebhookContext) -> BillingResult<()> {
        if let Some(error) = self.failure.lock().unwrap().take() {
            return Err(error);
        }
        self.invocations.fetch_add(1, Ordering::SeqCst);
        *self.last_customer_id.lock().unwrap() =
            context.customer.as_ref().map(|m| m.customer_id);
        if let (Some(label), Some(order)) = (self.label, &self.order) {
            order.lock().unwrap().push(label);
        }
        Ok(())
    }
}

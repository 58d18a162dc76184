// Billing crate clippy configuration
#![allow(clippy::too_many_arguments)] // Some Stripe operations require many parameters
#![allow(clippy::field_reassign_with_default)] // Used for conditional struct field setting
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! PayBridge Billing
//!
//! Multi-tenant Stripe integration: customer identity sync, checkout and
//! portal sessions, subscription management, and the inbound webhook
//! pipeline (verify, dispatch, fraud response, domain event emission).
//!
//! ## Features
//!
//! - **Webhook Pipeline**: Signature verification, handler dispatch, and
//!   domain event emission for inbound Stripe events
//! - **Fraud Response**: Refund and best-effort subscription cancellation
//!   on early fraud warnings
//! - **Customer Sync**: Idempotent internal-to-Stripe customer mapping
//! - **Checkout & Portal**: Session creation for tenant storefronts
//! - **Subscriptions**: Normalized projection plus plan change and
//!   period-end cancellation

pub mod accounts;
pub mod checkout;
pub mod client;
pub mod customers;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod fraud;
pub mod handlers;
pub mod provider;
pub mod subscriptions;
pub mod webhooks;

#[cfg(test)]
pub(crate) mod testing;

// Accounts
pub use accounts::{AccountRepository, PgAccountRepository, StripeAccount};

// Checkout
pub use checkout::CheckoutService;

// Client
pub use client::{
    CardSummary, GatewayCharge, GatewayCustomer, GatewaySubscription, GatewaySubscriptionItem,
    PaymentGateway, ProductSelection, RefundReason, StatusFilter, StripeClient,
    SubscriptionItemChange, SubscriptionState,
};

// Customers
pub use customers::{
    BaseCustomer, CustomerMapping, CustomerMappingRepository, CustomerSyncService,
    PgCustomerMappingRepository,
};

// Dispatch
pub use dispatch::{WebhookContext, WebhookDispatcher, WebhookHandler};

// Error
pub use error::{BillingError, BillingResult};

// Events
pub use events::{DomainEvent, DomainEventBus, DomainEventPayload, DomainEventSubscriber};

// Fraud
pub use fraud::{handle_early_fraud_warning, FraudResolution};

// Handlers
pub use handlers::{CustomerUpdatedHandler, EarlyFraudWarningHandler, InvoicePaidHandler};

// Provider
pub use provider::{PaymentProvider, PaymentProviderRegistry, StripePaymentProvider};

// Subscriptions
pub use subscriptions::{
    SubscriptionItemView, SubscriptionService, SubscriptionView, SubscriptionsProjection,
};

// Webhooks
pub use webhooks::{
    verify_event, EventKind, GatewayFactory, WebhookEvent, WebhookService,
    SIGNATURE_TOLERANCE_SECS,
};

use std::sync::Arc;

use sqlx::PgPool;

/// Main billing service wiring the pipeline together
pub struct BillingService {
    pub webhooks: WebhookService,
    pub providers: PaymentProviderRegistry,
}

impl BillingService {
    /// Build the full pipeline against Postgres-backed repositories, with
    /// a real Stripe gateway per account. Domain event subscribers are
    /// fixed at construction.
    pub fn new(pool: PgPool, subscribers: Vec<Arc<dyn DomainEventSubscriber>>) -> Self {
        let accounts: Arc<dyn AccountRepository> =
            Arc::new(PgAccountRepository::new(pool.clone()));
        let mappings: Arc<dyn CustomerMappingRepository> =
            Arc::new(PgCustomerMappingRepository::new(pool));

        let mut bus = DomainEventBus::new();
        for subscriber in subscribers {
            bus.subscribe(subscriber);
        }
        let bus = Arc::new(bus);

        let dispatcher = Arc::new(WebhookDispatcher::new(vec![
            Arc::new(CustomerUpdatedHandler::new(bus.clone())),
            Arc::new(InvoicePaidHandler::new(bus.clone())),
            Arc::new(EarlyFraudWarningHandler::new(bus, mappings.clone())),
        ]));

        let gateway_factory: GatewayFactory = Arc::new(|account: &StripeAccount| {
            Arc::new(StripeClient::new(&account.secret_key)) as Arc<dyn PaymentGateway>
        });

        Self {
            webhooks: WebhookService::new(
                accounts.clone(),
                mappings.clone(),
                gateway_factory.clone(),
                dispatcher,
            ),
            providers: PaymentProviderRegistry::new(accounts, mappings, gateway_factory),
        }
    }
}

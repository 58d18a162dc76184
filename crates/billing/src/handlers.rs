//! Webhook handlers
//!
//! The closed set of processing units behind the dispatcher. Each one turns
//! a provider event into at most one domain event; events whose provider
//! customer is unknown to us are dropped silently since there is no internal
//! customer to notify about.

use std::sync::Arc;

use async_trait::async_trait;

use crate::customers::CustomerMappingRepository;
use crate::dispatch::{WebhookContext, WebhookHandler};
use crate::error::BillingResult;
use crate::events::{DomainEvent, DomainEventBus, DomainEventPayload};
use crate::fraud;
use crate::webhooks::{EventKind, WebhookEvent};

/// Relays any customer-affecting provider event as a `customer.updated`
/// domain event so tenants can re-pull billing state.
pub struct CustomerUpdatedHandler {
    bus: Arc<DomainEventBus>,
}

impl CustomerUpdatedHandler {
    pub fn new(bus: Arc<DomainEventBus>) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl WebhookHandler for CustomerUpdatedHandler {
    fn event_kinds(&self) -> Vec<EventKind> {
        vec![
            EventKind::CheckoutSessionCompleted,
            EventKind::CheckoutSessionAsyncPaymentSucceeded,
            EventKind::CustomerUpdated,
            EventKind::CustomerSubscriptionCreated,
            EventKind::CustomerSubscriptionUpdated,
            EventKind::CustomerSubscriptionDeleted,
            EventKind::CustomerSubscriptionPaused,
            EventKind::CustomerSubscriptionResumed,
            EventKind::CustomerSubscriptionTrialWillEnd,
            EventKind::CustomerSubscriptionPendingUpdateApplied,
            EventKind::CustomerSubscriptionPendingUpdateExpired,
            EventKind::InvoicePaid,
            EventKind::InvoicePaymentSucceeded,
            EventKind::InvoicePaymentFailed,
            EventKind::InvoicePaymentActionRequired,
            EventKind::InvoiceUpcoming,
            EventKind::InvoiceMarkedUncollectible,
            EventKind::PaymentIntentSucceeded,
            EventKind::PaymentIntentPaymentFailed,
            EventKind::PaymentIntentCanceled,
            EventKind::ChargeRefunded,
            EventKind::ChargeDisputeCreated,
        ]
    }

    async fn handle(&self, event: &WebhookEvent, context: &WebhookContext) -> BillingResult<()> {
        let Some(mapping) = &context.customer else {
            tracing::debug!(
                event_id = %event.id,
                "Event references no known customer, nothing to relay"
            );
            return Ok(());
        };

        self.bus
            .emit(DomainEvent {
                tenant_id: mapping.tenant_id,
                customer_id: mapping.customer_id,
                payload: DomainEventPayload::CustomerUpdated,
            })
            .await
    }
}

/// Relays paid invoices together with the hosted receipt URL.
pub struct InvoicePaidHandler {
    bus: Arc<DomainEventBus>,
}

impl InvoicePaidHandler {
    pub fn new(bus: Arc<DomainEventBus>) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl WebhookHandler for InvoicePaidHandler {
    fn event_kinds(&self) -> Vec<EventKind> {
        vec![EventKind::InvoicePaid]
    }

    async fn handle(&self, event: &WebhookEvent, context: &WebhookContext) -> BillingResult<()> {
        let Some(mapping) = &context.customer else {
            return Ok(());
        };

        let receipt_url = event
            .object
            .get("hosted_invoice_url")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        self.bus
            .emit(DomainEvent {
                tenant_id: mapping.tenant_id,
                customer_id: mapping.customer_id,
                payload: DomainEventPayload::InvoicePaid { receipt_url },
            })
            .await
    }
}

/// Runs the fraud response for early fraud warnings and relays the outcome.
///
/// Radar events carry no `customer` field, so the context's resolved
/// customer is unused here; the internal customer comes from the charge via
/// the fraud result's provider customer id.
pub struct EarlyFraudWarningHandler {
    bus: Arc<DomainEventBus>,
    mappings: Arc<dyn CustomerMappingRepository>,
}

impl EarlyFraudWarningHandler {
    pub fn new(bus: Arc<DomainEventBus>, mappings: Arc<dyn CustomerMappingRepository>) -> Self {
        Self { bus, mappings }
    }
}

#[async_trait]
impl WebhookHandler for EarlyFraudWarningHandler {
    fn event_kinds(&self) -> Vec<EventKind> {
        vec![
            EventKind::EarlyFraudWarningCreated,
            EventKind::EarlyFraudWarningUpdated,
        ]
    }

    async fn handle(&self, event: &WebhookEvent, context: &WebhookContext) -> BillingResult<()> {
        let result =
            fraud::handle_early_fraud_warning(context.gateway.as_ref(), &event.object).await?;

        if result.skipped {
            tracing::info!(
                event_id = %event.id,
                reason = result.skip_reason.as_deref().unwrap_or(""),
                "Fraud warning skipped"
            );
            return Ok(());
        }

        let Some(provider_customer_id) = &result.provider_customer_id else {
            return Ok(());
        };
        let Some(mapping) = self
            .mappings
            .find_by_stripe_customer_id(provider_customer_id)
            .await?
        else {
            tracing::warn!(
                stripe_customer_id = %provider_customer_id,
                "Fraudulent charge belongs to an unmapped customer"
            );
            return Ok(());
        };

        self.bus
            .emit(DomainEvent {
                tenant_id: mapping.tenant_id,
                customer_id: mapping.customer_id,
                payload: DomainEventPayload::EarlyFraudWarning {
                    fraud_type: result.fraud_type.clone(),
                    charge_id: result.charge_id.clone().unwrap_or_default(),
                    charge_refunded: result.charge_refunded,
                    subscriptions_cancelled: result.subscriptions_cancelled,
                },
            })
            .await
    }
}

//! Domain events
//!
//! A small closed set of internal events published after webhook processing.
//! Subscribers (the outbound relay, audit logging) are registered once at
//! startup and invoked sequentially; the first subscriber error propagates
//! to the emitter so a failed relay fails the webhook request and the
//! provider redelivers.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::BillingResult;

/// What happened, in provider-agnostic terms
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainEventPayload {
    CustomerUpdated,
    InvoicePaid {
        receipt_url: Option<String>,
    },
    EarlyFraudWarning {
        fraud_type: Option<String>,
        charge_id: String,
        charge_refunded: bool,
        subscriptions_cancelled: u32,
    },
}

/// An event about one internal customer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainEvent {
    pub tenant_id: Uuid,
    pub customer_id: Uuid,
    pub payload: DomainEventPayload,
}

impl DomainEvent {
    /// Outbound event name. Every emission goes out as `customer.updated`;
    /// what distinguishes deliveries is the payload, not the name.
    pub fn name(&self) -> &'static str {
        "customer.updated"
    }
}

/// A downstream consumer of domain events
#[async_trait]
pub trait DomainEventSubscriber: Send + Sync {
    async fn handle(&self, event: &DomainEvent) -> BillingResult<()>;
}

/// Sequential fan-out to a fixed subscriber list
#[derive(Default)]
pub struct DomainEventBus {
    subscribers: Vec<Arc<dyn DomainEventSubscriber>>,
}

impl DomainEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, subscriber: Arc<dyn DomainEventSubscriber>) {
        self.subscribers.push(subscriber);
    }

    /// Emit to every subscriber in registration order. Stops at the first
    /// subscriber error and returns it.
    pub async fn emit(&self, event: DomainEvent) -> BillingResult<()> {
        tracing::debug!(
            event = event.name(),
            customer_id = %event.customer_id,
            "Emitting domain event"
        );
        for subscriber in &self.subscribers {
            subscriber.handle(&event).await?;
        }
        Ok(())
    }
}

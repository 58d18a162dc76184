//! Domain event sink
//!
//! The outbound webhook relay that forwards domain events to each tenant's
//! configured URL lives in a separate service; this subscriber records the
//! emission so processed events are visible in the server logs.

use async_trait::async_trait;
use paybridge_billing::{BillingResult, DomainEvent, DomainEventSubscriber};

pub struct LogRelay;

#[async_trait]
impl DomainEventSubscriber for LogRelay {
    async fn handle(&self, event: &DomainEvent) -> BillingResult<()> {
        tracing::info!(
            event = event.name(),
            tenant_id = %event.tenant_id,
            customer_id = %event.customer_id,
            "Domain event emitted"
        );
        Ok(())
    }
}

//! Webhook handler registry and dispatcher
//!
//! Handlers declare the event kinds they want; the dispatcher inverts that
//! declaration into a routing table once at startup and treats it as
//! immutable afterwards. Dispatch is sequential within one event, and a
//! handler error aborts the remaining handlers for that event so the
//! provider sees a failure and redelivers.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::client::PaymentGateway;
use crate::customers::CustomerMapping;
use crate::error::BillingResult;
use crate::webhooks::{EventKind, WebhookEvent};

/// Per-request context handed to every handler, read-only
pub struct WebhookContext {
    pub account_id: Uuid,
    /// Gateway bound to the receiving account's credentials
    pub gateway: Arc<dyn PaymentGateway>,
    /// Internal customer resolved from the event's provider customer ref,
    /// when one exists
    pub customer: Option<CustomerMapping>,
}

/// A unit of webhook processing, subscribed to a fixed set of event kinds
#[async_trait]
pub trait WebhookHandler: Send + Sync {
    /// Event kinds this handler wants. Read once at registration.
    fn event_kinds(&self) -> Vec<EventKind>;

    async fn handle(&self, event: &WebhookEvent, context: &WebhookContext) -> BillingResult<()>;
}

/// Routes verified events to their registered handlers
pub struct WebhookDispatcher {
    routes: HashMap<EventKind, Vec<Arc<dyn WebhookHandler>>>,
}

impl WebhookDispatcher {
    /// Build the routing table from a fixed handler list. Handlers keep
    /// their registration order per event kind.
    pub fn new(handlers: Vec<Arc<dyn WebhookHandler>>) -> Self {
        let mut routes: HashMap<EventKind, Vec<Arc<dyn WebhookHandler>>> = HashMap::new();
        for handler in handlers {
            for kind in handler.event_kinds() {
                routes.entry(kind).or_default().push(handler.clone());
            }
        }
        Self { routes }
    }

    /// Invoke every handler registered for the event's kind, in order.
    /// Unrouted kinds are a silent no-op. The first handler error aborts
    /// the rest and propagates.
    pub async fn dispatch(
        &self,
        event: &WebhookEvent,
        context: &WebhookContext,
    ) -> BillingResult<()> {
        let Some(handlers) = self.routes.get(&event.kind) else {
            tracing::debug!(event_id = %event.id, event_kind = ?event.kind, "No handler registered, ignoring event");
            return Ok(());
        };

        for handler in handlers {
            if let Err(e) = handler.handle(event, context).await {
                tracing::error!(
                    event_id = %event.id,
                    event_kind = ?event.kind,
                    error = %e,
                    "Webhook handler failed"
                );
                return Err(e);
            }
        }

        Ok(())
    }
}

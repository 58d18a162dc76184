//! Application state

use std::sync::Arc;

use paybridge_billing::{PaymentProviderRegistry, WebhookService};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub webhooks: Arc<WebhookService>,
    pub providers: Arc<PaymentProviderRegistry>,
}

impl AppState {
    pub fn new(webhooks: Arc<WebhookService>, providers: Arc<PaymentProviderRegistry>) -> Self {
        Self {
            webhooks,
            providers,
        }
    }
}

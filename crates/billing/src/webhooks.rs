//! Inbound webhook verification and context building
//!
//! Raw bytes and a signature header come in from the HTTP layer; what comes
//! out is a decoded [`WebhookEvent`] plus a [`WebhookContext`] carrying the
//! account's gateway handle and the resolved internal customer, ready for
//! dispatch. The body must reach verification unparsed: the signature covers
//! the exact bytes Stripe sent.

use std::sync::Arc;

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::accounts::{AccountRepository, StripeAccount};
use crate::client::PaymentGateway;
use crate::customers::CustomerMappingRepository;
use crate::dispatch::{WebhookContext, WebhookDispatcher};
use crate::error::{BillingError, BillingResult};

type HmacSha256 = Hmac<Sha256>;

/// Maximum accepted age of a webhook signature timestamp, in seconds.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 3600 * 24;

/// Inbound event types this system routes. Anything else decodes to
/// `Other` and is ignored at dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    CheckoutSessionCompleted,
    CheckoutSessionAsyncPaymentSucceeded,
    CustomerUpdated,
    CustomerSubscriptionCreated,
    CustomerSubscriptionUpdated,
    CustomerSubscriptionDeleted,
    CustomerSubscriptionPaused,
    CustomerSubscriptionResumed,
    CustomerSubscriptionTrialWillEnd,
    CustomerSubscriptionPendingUpdateApplied,
    CustomerSubscriptionPendingUpdateExpired,
    InvoicePaid,
    InvoicePaymentSucceeded,
    InvoicePaymentFailed,
    InvoicePaymentActionRequired,
    InvoiceUpcoming,
    InvoiceMarkedUncollectible,
    PaymentIntentSucceeded,
    PaymentIntentPaymentFailed,
    PaymentIntentCanceled,
    ChargeRefunded,
    ChargeDisputeCreated,
    EarlyFraudWarningCreated,
    EarlyFraudWarningUpdated,
    Other(String),
}

impl EventKind {
    pub fn from_type(event_type: &str) -> Self {
        match event_type {
            "checkout.session.completed" => Self::CheckoutSessionCompleted,
            "checkout.session.async_payment_succeeded" => {
                Self::CheckoutSessionAsyncPaymentSucceeded
            }
            "customer.updated" => Self::CustomerUpdated,
            "customer.subscription.created" => Self::CustomerSubscriptionCreated,
            "customer.subscription.updated" => Self::CustomerSubscriptionUpdated,
            "customer.subscription.deleted" => Self::CustomerSubscriptionDeleted,
            "customer.subscription.paused" => Self::CustomerSubscriptionPaused,
            "customer.subscription.resumed" => Self::CustomerSubscriptionResumed,
            "customer.subscription.trial_will_end" => Self::CustomerSubscriptionTrialWillEnd,
            "customer.subscription.pending_update_applied" => {
                Self::CustomerSubscriptionPendingUpdateApplied
            }
            "customer.subscription.pending_update_expired" => {
                Self::CustomerSubscriptionPendingUpdateExpired
            }
            "invoice.paid" => Self::InvoicePaid,
            "invoice.payment_succeeded" => Self::InvoicePaymentSucceeded,
            "invoice.payment_failed" => Self::InvoicePaymentFailed,
            "invoice.payment_action_required" => Self::InvoicePaymentActionRequired,
            "invoice.upcoming" => Self::InvoiceUpcoming,
            "invoice.marked_uncollectible" => Self::InvoiceMarkedUncollectible,
            "payment_intent.succeeded" => Self::PaymentIntentSucceeded,
            "payment_intent.payment_failed" => Self::PaymentIntentPaymentFailed,
            "payment_intent.canceled" => Self::PaymentIntentCanceled,
            "charge.refunded" => Self::ChargeRefunded,
            "charge.dispute.created" => Self::ChargeDisputeCreated,
            "radar.early_fraud_warning.created" => Self::EarlyFraudWarningCreated,
            "radar.early_fraud_warning.updated" => Self::EarlyFraudWarningUpdated,
            other => Self::Other(other.to_string()),
        }
    }
}

/// A verified, decoded inbound event
#[derive(Debug, Clone)]
pub struct WebhookEvent {
    pub id: String,
    pub kind: EventKind,
    /// The event's `data.object`, kept as raw JSON since its shape varies
    /// per event type
    pub object: serde_json::Value,
}

impl WebhookEvent {
    /// Provider customer reference from the payload, if any. Stripe sends
    /// `customer` as a bare id, an embedded object, or not at all.
    pub fn customer_ref(&self) -> Option<String> {
        match self.object.get("customer") {
            Some(serde_json::Value::String(id)) => Some(id.clone()),
            Some(serde_json::Value::Object(obj)) => obj
                .get("id")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            _ => None,
        }
    }
}

#[derive(Deserialize)]
struct RawEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: RawEventData,
}

#[derive(Deserialize)]
struct RawEventData {
    object: serde_json::Value,
}

/// Verify a Stripe signature header against the raw payload and decode the
/// event.
///
/// Every failure mode (malformed header, stale timestamp, signature
/// mismatch, undecodable payload) collapses into
/// [`BillingError::WebhookSignatureInvalid`]; details are logged server-side
/// only.
pub fn verify_event(
    payload: &[u8],
    signature_header: &str,
    webhook_secret: &str,
) -> BillingResult<WebhookEvent> {
    let mut timestamp: Option<i64> = None;
    let mut signatures: Vec<Vec<u8>> = Vec::new();

    for part in signature_header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse().ok(),
            Some(("v1", value)) => {
                if let Ok(bytes) = hex::decode(value) {
                    signatures.push(bytes);
                }
            }
            _ => {}
        }
    }

    let Some(timestamp) = timestamp else {
        tracing::warn!("Webhook signature header has no timestamp");
        return Err(BillingError::WebhookSignatureInvalid);
    };
    if signatures.is_empty() {
        tracing::warn!("Webhook signature header has no v1 signature");
        return Err(BillingError::WebhookSignatureInvalid);
    }

    let age = OffsetDateTime::now_utc().unix_timestamp() - timestamp;
    if age.abs() > SIGNATURE_TOLERANCE_SECS {
        tracing::warn!(age_secs = age, "Webhook signature timestamp outside tolerance");
        return Err(BillingError::WebhookSignatureInvalid);
    }

    // The signed payload is "{timestamp}.{raw body}".
    let verified = signatures.iter().any(|candidate| {
        let Ok(mut mac) = HmacSha256::new_from_slice(webhook_secret.as_bytes()) else {
            return false;
        };
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        mac.verify_slice(candidate).is_ok()
    });

    if !verified {
        tracing::warn!("Webhook signature mismatch");
        return Err(BillingError::WebhookSignatureInvalid);
    }

    let raw: RawEvent = serde_json::from_slice(payload).map_err(|e| {
        tracing::warn!(error = %e, "Verified webhook payload failed to decode");
        BillingError::WebhookSignatureInvalid
    })?;

    Ok(WebhookEvent {
        id: raw.id,
        kind: EventKind::from_type(&raw.event_type),
        object: raw.data.object,
    })
}

/// Builds a per-account gateway; injected so tests can substitute fakes.
pub type GatewayFactory = Arc<dyn Fn(&StripeAccount) -> Arc<dyn PaymentGateway> + Send + Sync>;

/// Entry point for inbound webhooks: verify, build context, dispatch
pub struct WebhookService {
    accounts: Arc<dyn AccountRepository>,
    mappings: Arc<dyn CustomerMappingRepository>,
    gateway_factory: GatewayFactory,
    dispatcher: Arc<WebhookDispatcher>,
}

impl WebhookService {
    pub fn new(
        accounts: Arc<dyn AccountRepository>,
        mappings: Arc<dyn CustomerMappingRepository>,
        gateway_factory: GatewayFactory,
        dispatcher: Arc<WebhookDispatcher>,
    ) -> Self {
        Self {
            accounts,
            mappings,
            gateway_factory,
            dispatcher,
        }
    }

    /// Handle one inbound delivery. Errors map to HTTP statuses at the API
    /// layer; success covers "event ignored" no-ops too.
    pub async fn handle(
        &self,
        account_id: Uuid,
        signature_header: &str,
        raw_body: &[u8],
    ) -> BillingResult<()> {
        if raw_body.is_empty() {
            return Err(BillingError::BadRequest("Missing request body".to_string()));
        }

        let account = self.accounts.find_by_id(account_id).await?;
        let event = verify_event(raw_body, signature_header, &account.webhook_secret)?;

        tracing::info!(
            account_id = %account_id,
            event_id = %event.id,
            event_kind = ?event.kind,
            "Received webhook event"
        );

        let customer = match event.customer_ref() {
            Some(stripe_customer_id) => {
                self.mappings
                    .find_by_stripe_customer_id(&stripe_customer_id)
                    .await?
            }
            None => None,
        };

        let context = WebhookContext {
            account_id,
            gateway: (self.gateway_factory)(&account),
            customer,
        };

        self.dispatcher.dispatch(&event, &context).await
    }
}

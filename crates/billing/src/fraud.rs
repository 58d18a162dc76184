//! Fraud response
//!
//! Reacts to an early fraud warning from the provider: refund the implicated
//! charge and cancel every running subscription of the affected customer.
//! The refund is idempotent under redelivery, and cancellation is best
//! effort: one failed cancellation never blocks the others.

use crate::client::{PaymentGateway, RefundReason, StatusFilter};
use crate::error::{BillingError, BillingResult};

/// Outcome of one fraud warning, consumed synchronously by the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FraudResolution {
    pub skipped: bool,
    pub skip_reason: Option<String>,
    pub charge_refunded: bool,
    pub subscriptions_cancelled: u32,
    pub subscription_cancellations_failed: u32,
    pub provider_customer_id: Option<String>,
    pub charge_id: Option<String>,
    pub fraud_type: Option<String>,
}

impl FraudResolution {
    fn skipped(reason: &str) -> Self {
        Self {
            skipped: true,
            skip_reason: Some(reason.to_string()),
            charge_refunded: false,
            subscriptions_cancelled: 0,
            subscription_cancellations_failed: 0,
            provider_customer_id: None,
            charge_id: None,
            fraud_type: None,
        }
    }
}

fn charge_ref(warning: &serde_json::Value) -> Option<String> {
    match warning.get("charge") {
        Some(serde_json::Value::String(id)) => Some(id.clone()),
        Some(serde_json::Value::Object(obj)) => obj
            .get("id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()),
        _ => None,
    }
}

/// Handle one early fraud warning payload.
///
/// Linear, no internal retries: provider redelivery is the retry mechanism.
/// A hard refund failure aborts the whole use case; cancellation failures
/// are counted and returned, never thrown.
pub async fn handle_early_fraud_warning(
    gateway: &dyn PaymentGateway,
    warning: &serde_json::Value,
) -> BillingResult<FraudResolution> {
    let actionable = warning
        .get("actionable")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    if !actionable {
        tracing::info!("Early fraud warning is not actionable, skipping");
        return Ok(FraudResolution::skipped("not actionable"));
    }

    let fraud_type = warning
        .get("fraud_type")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let charge_id = charge_ref(warning).ok_or_else(|| {
        BillingError::BadRequest("Fraud warning does not reference a charge".to_string())
    })?;

    let charge = gateway.retrieve_charge(&charge_id).await?;

    let Some(customer_id) = charge.customer_id else {
        tracing::info!(charge_id = %charge_id, "Fraudulent charge has no customer, skipping");
        return Ok(FraudResolution {
            charge_id: Some(charge_id),
            fraud_type,
            ..FraudResolution::skipped("guest checkout")
        });
    };

    // Refund unless the charge is already refunded. A concurrent refund
    // racing us surfaces as an "already been refunded" API error and is
    // treated the same as the pre-check.
    let charge_refunded = if charge.refunded {
        false
    } else {
        match gateway.refund_charge(&charge_id, RefundReason::Fraudulent).await {
            Ok(()) => true,
            Err(BillingError::StripeApi(msg)) if msg.contains("already been refunded") => {
                tracing::info!(charge_id = %charge_id, "Charge refunded concurrently");
                false
            }
            Err(e) => return Err(e),
        }
    };

    // Active and trialing must be fetched separately; run both reads
    // concurrently and concatenate.
    let (active, trialing) = tokio::join!(
        gateway.list_subscriptions(&customer_id, StatusFilter::Active),
        gateway.list_subscriptions(&customer_id, StatusFilter::Trialing),
    );
    let mut subscriptions = active?;
    subscriptions.extend(trialing?);

    let mut cancelled = 0u32;
    let mut failed = 0u32;
    for subscription in &subscriptions {
        match gateway.cancel_subscription_now(&subscription.id).await {
            Ok(()) => cancelled += 1,
            Err(e) => {
                tracing::warn!(
                    subscription_id = %subscription.id,
                    error = %e,
                    "Failed to cancel subscription for fraudulent customer"
                );
                failed += 1;
            }
        }
    }

    tracing::info!(
        charge_id = %charge_id,
        customer_id = %customer_id,
        charge_refunded,
        subscriptions_cancelled = cancelled,
        cancellations_failed = failed,
        "Processed early fraud warning"
    );

    Ok(FraudResolution {
        skipped: false,
        skip_reason: None,
        charge_refunded,
        subscriptions_cancelled: cancelled,
        subscription_cancellations_failed: failed,
        provider_customer_id: Some(customer_id),
        charge_id: Some(charge_id),
        fraud_type,
    })
}

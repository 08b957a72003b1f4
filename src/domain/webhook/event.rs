//! Inbound provider events and their canonical, provider-agnostic form.
//!
//! A `ProviderEvent` is what signature verification yields from a raw
//! webhook body: provider-native type string, the provider's own event id
//! (the idempotency key), and the raw payload. Each adapter normalizes it
//! into a `CanonicalEvent`; everything downstream of the adapter is
//! provider-agnostic.

use serde::{Deserialize, Serialize};

use crate::domain::foundation::Timestamp;
use crate::domain::subscription::SubscriptionStatus;

/// A verified inbound webhook event, still in provider-native terms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEvent {
    /// The provider's own event identifier (e.g. `evt_...`). Together with
    /// the gateway this is the idempotency key.
    pub provider_event_id: String,

    /// Provider-native event type string (e.g. `payment_intent.succeeded`).
    pub event_type: String,

    /// When the provider created the event.
    pub created: Timestamp,

    /// The raw event payload.
    pub payload: serde_json::Value,
}

/// Internal, provider-agnostic name for a business occurrence, with the
/// normalized references the orchestrators need.
///
/// `local_reference` carries our own entity id echoed back through
/// provider metadata, so a creation whose caller gave up before the
/// provider id was stored can still be matched and resumed.
#[derive(Debug, Clone, PartialEq)]
pub enum CanonicalEvent {
    PaymentSucceeded {
        provider_payment_id: String,
        local_reference: Option<String>,
        paid_at: Timestamp,
    },
    PaymentFailed {
        provider_payment_id: String,
        local_reference: Option<String>,
        failure_message: Option<String>,
    },
    RefundSucceeded {
        provider_refund_id: String,
        provider_payment_id: Option<String>,
    },
    RefundFailed {
        provider_refund_id: String,
    },
    SubscriptionUpdated {
        provider_subscription_id: String,
        local_reference: Option<String>,
        status: SubscriptionStatus,
        period_start: Timestamp,
        period_end: Timestamp,
        cancel_at_period_end: bool,
    },
    SubscriptionCanceled {
        provider_subscription_id: String,
        local_reference: Option<String>,
    },
    SubscriptionPaymentFailed {
        provider_subscription_id: String,
    },
}

impl CanonicalEvent {
    /// Canonical name, used for logging and bookkeeping.
    pub fn name(&self) -> &'static str {
        match self {
            CanonicalEvent::PaymentSucceeded { .. } => "payment-succeeded",
            CanonicalEvent::PaymentFailed { .. } => "payment-failed",
            CanonicalEvent::RefundSucceeded { .. } => "refund-succeeded",
            CanonicalEvent::RefundFailed { .. } => "refund-failed",
            CanonicalEvent::SubscriptionUpdated { .. } => "subscription-updated",
            CanonicalEvent::SubscriptionCanceled { .. } => "subscription-canceled",
            CanonicalEvent::SubscriptionPaymentFailed { .. } => "subscription-payment-failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_names_are_stable() {
        let event = CanonicalEvent::PaymentSucceeded {
            provider_payment_id: "pi_1".to_string(),
            local_reference: None,
            paid_at: Timestamp::now(),
        };
        assert_eq!(event.name(), "payment-succeeded");

        let event = CanonicalEvent::SubscriptionPaymentFailed {
            provider_subscription_id: "sub_1".to_string(),
        };
        assert_eq!(event.name(), "subscription-payment-failed");
    }
}

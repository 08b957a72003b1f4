//! Stripe event parsing and the mapping onto canonical events.
//!
//! The mapping is a closed table: event types without a row are stored
//! and acknowledged but drive no state change. Refund settlement rides
//! on `refund.updated` (Stripe moves the refund object's status there),
//! not on `charge.refunded`, which fires before the refund settles.

use serde::Deserialize;

use crate::domain::foundation::Timestamp;
use crate::domain::subscription::SubscriptionStatus;
use crate::domain::webhook::{CanonicalEvent, ProviderEvent, WebhookError};

/// Stripe webhook event envelope.
#[derive(Debug, Deserialize)]
struct StripeEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    created: i64,
    data: StripeEventData,
}

#[derive(Debug, Deserialize)]
struct StripeEventData {
    object: serde_json::Value,
}

/// Parses a verified Stripe webhook body into a provider event.
pub fn parse_event(payload: &[u8]) -> Result<ProviderEvent, WebhookError> {
    let event: StripeEvent =
        serde_json::from_slice(payload).map_err(|e| WebhookError::ParseError(e.to_string()))?;
    let raw: serde_json::Value =
        serde_json::from_slice(payload).map_err(|e| WebhookError::ParseError(e.to_string()))?;

    Ok(ProviderEvent {
        provider_event_id: event.id,
        event_type: event.event_type,
        created: Timestamp::from_unix_secs(event.created),
        payload: raw,
    })
}

/// Maps a Stripe subscription status string onto the local status.
/// `None` for statuses this system does not track (incomplete intents).
pub fn subscription_status(status: &str) -> Option<SubscriptionStatus> {
    match status {
        "trialing" => Some(SubscriptionStatus::Trialing),
        "active" => Some(SubscriptionStatus::Active),
        "past_due" => Some(SubscriptionStatus::PastDue),
        "paused" => Some(SubscriptionStatus::Paused),
        "unpaid" => Some(SubscriptionStatus::Unpaid),
        "canceled" => Some(SubscriptionStatus::Canceled),
        _ => None,
    }
}

/// Maps a Stripe event onto its canonical form.
pub fn normalize(event: &ProviderEvent) -> Result<Option<CanonicalEvent>, WebhookError> {
    let object = &event.payload["data"]["object"];
    let object_id = || -> Result<String, WebhookError> {
        object["id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| WebhookError::ParseError("missing data.object.id".to_string()))
    };
    let local_reference = object["metadata"]["local_reference"]
        .as_str()
        .map(str::to_string);

    let canonical = match event.event_type.as_str() {
        "payment_intent.succeeded" => Some(CanonicalEvent::PaymentSucceeded {
            provider_payment_id: object_id()?,
            local_reference,
            paid_at: event.created,
        }),
        "payment_intent.payment_failed" => Some(CanonicalEvent::PaymentFailed {
            provider_payment_id: object_id()?,
            local_reference,
            failure_message: object["last_payment_error"]["message"]
                .as_str()
                .map(str::to_string),
        }),
        "refund.updated" => match object["status"].as_str() {
            Some("succeeded") => Some(CanonicalEvent::RefundSucceeded {
                provider_refund_id: object_id()?,
                provider_payment_id: object["payment_intent"].as_str().map(str::to_string),
            }),
            Some("failed") | Some("canceled") => Some(CanonicalEvent::RefundFailed {
                provider_refund_id: object_id()?,
            }),
            _ => None,
        },
        "refund.failed" => Some(CanonicalEvent::RefundFailed {
            provider_refund_id: object_id()?,
        }),
        "customer.subscription.updated" => {
            let status_str = object["status"]
                .as_str()
                .ok_or_else(|| WebhookError::ParseError("missing subscription status".to_string()))?;
            match subscription_status(status_str) {
                Some(status) => Some(CanonicalEvent::SubscriptionUpdated {
                    provider_subscription_id: object_id()?,
                    local_reference,
                    status,
                    period_start: Timestamp::from_unix_secs(
                        object["current_period_start"].as_i64().unwrap_or(0),
                    ),
                    period_end: Timestamp::from_unix_secs(
                        object["current_period_end"].as_i64().unwrap_or(0),
                    ),
                    cancel_at_period_end: object["cancel_at_period_end"]
                        .as_bool()
                        .unwrap_or(false),
                }),
                // Incomplete subscriptions never became real locally.
                None => None,
            }
        }
        "customer.subscription.deleted" => Some(CanonicalEvent::SubscriptionCanceled {
            provider_subscription_id: object_id()?,
            local_reference,
        }),
        "invoice.payment_failed" => object["subscription"].as_str().map(|subscription_id| {
            CanonicalEvent::SubscriptionPaymentFailed {
                provider_subscription_id: subscription_id.to_string(),
            }
        }),
        _ => None,
    };
    Ok(canonical)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stripe_event(event_type: &str, object: serde_json::Value) -> ProviderEvent {
        let payload = serde_json::json!({
            "id": "evt_test",
            "type": event_type,
            "created": 1704067200,
            "data": { "object": object },
        });
        parse_event(payload.to_string().as_bytes()).unwrap()
    }

    #[test]
    fn payment_intent_succeeded_maps_with_local_reference() {
        let event = stripe_event(
            "payment_intent.succeeded",
            serde_json::json!({
                "id": "pi_123",
                "metadata": { "local_reference": "11111111-2222-3333-4444-555555555555" },
            }),
        );

        let canonical = normalize(&event).unwrap().unwrap();

        match canonical {
            CanonicalEvent::PaymentSucceeded {
                provider_payment_id,
                local_reference,
                ..
            } => {
                assert_eq!(provider_payment_id, "pi_123");
                assert_eq!(
                    local_reference.as_deref(),
                    Some("11111111-2222-3333-4444-555555555555")
                );
            }
            other => panic!("unexpected canonical event: {:?}", other),
        }
    }

    #[test]
    fn payment_failure_carries_the_decline_message() {
        let event = stripe_event(
            "payment_intent.payment_failed",
            serde_json::json!({
                "id": "pi_456",
                "last_payment_error": { "message": "Your card was declined." },
            }),
        );

        let canonical = normalize(&event).unwrap().unwrap();

        match canonical {
            CanonicalEvent::PaymentFailed {
                failure_message, ..
            } => assert_eq!(failure_message.as_deref(), Some("Your card was declined.")),
            other => panic!("unexpected canonical event: {:?}", other),
        }
    }

    #[test]
    fn refund_updated_maps_by_refund_status() {
        let succeeded = stripe_event(
            "refund.updated",
            serde_json::json!({"id": "re_1", "status": "succeeded", "payment_intent": "pi_1"}),
        );
        assert!(matches!(
            normalize(&succeeded).unwrap(),
            Some(CanonicalEvent::RefundSucceeded { .. })
        ));

        let failed = stripe_event(
            "refund.updated",
            serde_json::json!({"id": "re_2", "status": "failed"}),
        );
        assert!(matches!(
            normalize(&failed).unwrap(),
            Some(CanonicalEvent::RefundFailed { .. })
        ));

        let pending = stripe_event(
            "refund.updated",
            serde_json::json!({"id": "re_3", "status": "pending"}),
        );
        assert!(normalize(&pending).unwrap().is_none());
    }

    #[test]
    fn subscription_updated_carries_period_and_cancel_flag() {
        let event = stripe_event(
            "customer.subscription.updated",
            serde_json::json!({
                "id": "sub_1",
                "status": "active",
                "current_period_start": 1704067200,
                "current_period_end": 1706745600,
                "cancel_at_period_end": true,
            }),
        );

        let canonical = normalize(&event).unwrap().unwrap();

        match canonical {
            CanonicalEvent::SubscriptionUpdated {
                status,
                cancel_at_period_end,
                period_start,
                period_end,
                ..
            } => {
                assert_eq!(status, SubscriptionStatus::Active);
                assert!(cancel_at_period_end);
                assert!(period_end.is_after(&period_start));
            }
            other => panic!("unexpected canonical event: {:?}", other),
        }
    }

    #[test]
    fn incomplete_subscription_updates_are_skipped() {
        let event = stripe_event(
            "customer.subscription.updated",
            serde_json::json!({"id": "sub_2", "status": "incomplete"}),
        );

        assert!(normalize(&event).unwrap().is_none());
    }

    #[test]
    fn invoice_payment_failed_targets_the_subscription() {
        let event = stripe_event(
            "invoice.payment_failed",
            serde_json::json!({"id": "in_1", "subscription": "sub_3"}),
        );

        let canonical = normalize(&event).unwrap().unwrap();

        assert_eq!(
            canonical,
            CanonicalEvent::SubscriptionPaymentFailed {
                provider_subscription_id: "sub_3".to_string(),
            }
        );
    }

    #[test]
    fn unmapped_event_types_normalize_to_none() {
        let event = stripe_event("customer.created", serde_json::json!({"id": "cus_1"}));
        assert!(normalize(&event).unwrap().is_none());

        let event = stripe_event("charge.refunded", serde_json::json!({"id": "ch_1"}));
        assert!(normalize(&event).unwrap().is_none());
    }

    #[test]
    fn malformed_body_is_a_parse_error() {
        assert!(matches!(
            parse_event(b"not json"),
            Err(WebhookError::ParseError(_))
        ));
    }
}

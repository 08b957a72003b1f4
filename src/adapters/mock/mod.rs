//! Scripted provider adapter for tests.
//!
//! Defaults to accepting everything with generated provider ids;
//! individual calls can be scripted to fail or return specific states.
//! Webhook deliveries use a small JSON grammar of its own
//! (`{"id", "type", "created", "data"}`) signed with the same HMAC
//! scheme real providers use.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::domain::foundation::Timestamp;
use crate::domain::payment::RefundStatus;
use crate::domain::subscription::SubscriptionStatus;
use crate::domain::webhook::{CanonicalEvent, ProviderEvent, WebhookError, WebhookVerifier};
use crate::ports::{
    CreatePaymentRequest, CreateRefundRequest, CreateSubscriptionRequest, ProviderAdapter,
    ProviderError, ProviderPayment, ProviderPaymentState, ProviderRefund, ProviderSubscription,
    UpdateSubscriptionRequest,
};

pub const MOCK_GATEWAY: &str = "mock";
pub const MOCK_WEBHOOK_SECRET: &str = "whsec_mock_secret";

#[derive(Default)]
pub struct MockProviderAdapter {
    seq: AtomicU64,
    scripted_payments: Mutex<VecDeque<Result<ProviderPayment, ProviderError>>>,
    scripted_refunds: Mutex<VecDeque<Result<ProviderRefund, ProviderError>>>,
    scripted_subscriptions: Mutex<VecDeque<Result<ProviderSubscription, ProviderError>>>,
    pub payment_requests: Mutex<Vec<CreatePaymentRequest>>,
    pub refund_requests: Mutex<Vec<CreateRefundRequest>>,
    pub subscription_requests: Mutex<Vec<CreateSubscriptionRequest>>,
    pub canceled_subscriptions: Mutex<Vec<(String, bool)>>,
}

impl MockProviderAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a response for the next `create_payment` call.
    pub fn script_payment(&self, result: Result<ProviderPayment, ProviderError>) {
        self.scripted_payments.lock().unwrap().push_back(result);
    }

    pub fn script_refund(&self, result: Result<ProviderRefund, ProviderError>) {
        self.scripted_refunds.lock().unwrap().push_back(result);
    }

    pub fn script_subscription(&self, result: Result<ProviderSubscription, ProviderError>) {
        self.scripted_subscriptions.lock().unwrap().push_back(result);
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{}_{}", prefix, self.seq.fetch_add(1, Ordering::Relaxed))
    }

    fn default_subscription(&self) -> ProviderSubscription {
        let now = Timestamp::now();
        ProviderSubscription {
            provider_subscription_id: self.next_id("sub"),
            status: SubscriptionStatus::Active,
            current_period_start: now,
            current_period_end: now.add_months(1),
            cancel_at_period_end: false,
        }
    }
}

#[async_trait]
impl ProviderAdapter for MockProviderAdapter {
    async fn create_payment(
        &self,
        request: CreatePaymentRequest,
    ) -> Result<ProviderPayment, ProviderError> {
        self.payment_requests.lock().unwrap().push(request.clone());
        if let Some(scripted) = self.scripted_payments.lock().unwrap().pop_front() {
            return scripted;
        }
        Ok(ProviderPayment {
            provider_payment_id: self.next_id("pay"),
            state: if request.automatic_capture {
                ProviderPaymentState::Processing
            } else {
                ProviderPaymentState::RequiresCapture
            },
        })
    }

    async fn capture_payment(
        &self,
        provider_payment_id: &str,
    ) -> Result<ProviderPayment, ProviderError> {
        if let Some(scripted) = self.scripted_payments.lock().unwrap().pop_front() {
            return scripted;
        }
        Ok(ProviderPayment {
            provider_payment_id: provider_payment_id.to_string(),
            state: ProviderPaymentState::Succeeded,
        })
    }

    async fn cancel_payment(&self, _provider_payment_id: &str) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn create_refund(
        &self,
        request: CreateRefundRequest,
    ) -> Result<ProviderRefund, ProviderError> {
        self.refund_requests.lock().unwrap().push(request.clone());
        if let Some(scripted) = self.scripted_refunds.lock().unwrap().pop_front() {
            return scripted;
        }
        Ok(ProviderRefund {
            provider_refund_id: self.next_id("re"),
            status: RefundStatus::Processing,
        })
    }

    async fn create_subscription(
        &self,
        request: CreateSubscriptionRequest,
    ) -> Result<ProviderSubscription, ProviderError> {
        self.subscription_requests.lock().unwrap().push(request.clone());
        if let Some(scripted) = self.scripted_subscriptions.lock().unwrap().pop_front() {
            return scripted;
        }
        let mut subscription = self.default_subscription();
        if request.trial_end.is_some() {
            subscription.status = SubscriptionStatus::Trialing;
        }
        Ok(subscription)
    }

    async fn update_subscription(
        &self,
        request: UpdateSubscriptionRequest,
    ) -> Result<ProviderSubscription, ProviderError> {
        if let Some(scripted) = self.scripted_subscriptions.lock().unwrap().pop_front() {
            return scripted;
        }
        let mut subscription = self.default_subscription();
        subscription.provider_subscription_id = request.provider_subscription_id;
        Ok(subscription)
    }

    async fn cancel_subscription(
        &self,
        provider_subscription_id: &str,
        at_period_end: bool,
    ) -> Result<ProviderSubscription, ProviderError> {
        self.canceled_subscriptions
            .lock()
            .unwrap()
            .push((provider_subscription_id.to_string(), at_period_end));
        if let Some(scripted) = self.scripted_subscriptions.lock().unwrap().pop_front() {
            return scripted;
        }
        let mut subscription = self.default_subscription();
        subscription.provider_subscription_id = provider_subscription_id.to_string();
        if at_period_end {
            subscription.cancel_at_period_end = true;
        } else {
            subscription.status = SubscriptionStatus::Canceled;
        }
        Ok(subscription)
    }

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<ProviderEvent, WebhookError> {
        WebhookVerifier::new(MOCK_WEBHOOK_SECRET).verify(payload, signature_header)?;

        let value: serde_json::Value = serde_json::from_slice(payload)
            .map_err(|e| WebhookError::ParseError(e.to_string()))?;
        let id = value["id"]
            .as_str()
            .ok_or_else(|| WebhookError::ParseError("missing event id".to_string()))?;
        let event_type = value["type"]
            .as_str()
            .ok_or_else(|| WebhookError::ParseError("missing event type".to_string()))?;
        let created = value["created"]
            .as_i64()
            .ok_or_else(|| WebhookError::ParseError("missing created".to_string()))?;

        Ok(ProviderEvent {
            provider_event_id: id.to_string(),
            event_type: event_type.to_string(),
            created: Timestamp::from_unix_secs(created),
            payload: value,
        })
    }

    fn normalize(&self, event: &ProviderEvent) -> Result<Option<CanonicalEvent>, WebhookError> {
        let data = &event.payload["data"];
        let string = |key: &str| -> Result<String, WebhookError> {
            data[key]
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| WebhookError::ParseError(format!("missing data.{}", key)))
        };
        let opt_string = |key: &str| data[key].as_str().map(str::to_string);

        let canonical = match event.event_type.as_str() {
            "payment.succeeded" => Some(CanonicalEvent::PaymentSucceeded {
                provider_payment_id: string("payment_id")?,
                local_reference: opt_string("local_reference"),
                paid_at: event.created,
            }),
            "payment.failed" => Some(CanonicalEvent::PaymentFailed {
                provider_payment_id: string("payment_id")?,
                local_reference: opt_string("local_reference"),
                failure_message: opt_string("failure_message"),
            }),
            "refund.succeeded" => Some(CanonicalEvent::RefundSucceeded {
                provider_refund_id: string("refund_id")?,
                provider_payment_id: opt_string("payment_id"),
            }),
            "refund.failed" => Some(CanonicalEvent::RefundFailed {
                provider_refund_id: string("refund_id")?,
            }),
            "subscription.updated" => Some(CanonicalEvent::SubscriptionUpdated {
                provider_subscription_id: string("subscription_id")?,
                local_reference: opt_string("local_reference"),
                status: parse_status(&string("status")?)?,
                period_start: Timestamp::from_unix_secs(data["period_start"].as_i64().unwrap_or(0)),
                period_end: Timestamp::from_unix_secs(data["period_end"].as_i64().unwrap_or(0)),
                cancel_at_period_end: data["cancel_at_period_end"].as_bool().unwrap_or(false),
            }),
            "subscription.canceled" => Some(CanonicalEvent::SubscriptionCanceled {
                provider_subscription_id: string("subscription_id")?,
                local_reference: opt_string("local_reference"),
            }),
            "subscription.payment_failed" => Some(CanonicalEvent::SubscriptionPaymentFailed {
                provider_subscription_id: string("subscription_id")?,
            }),
            _ => None,
        };
        Ok(canonical)
    }
}

fn parse_status(s: &str) -> Result<SubscriptionStatus, WebhookError> {
    match s {
        "trialing" => Ok(SubscriptionStatus::Trialing),
        "active" => Ok(SubscriptionStatus::Active),
        "past_due" => Ok(SubscriptionStatus::PastDue),
        "paused" => Ok(SubscriptionStatus::Paused),
        "unpaid" => Ok(SubscriptionStatus::Unpaid),
        "canceled" => Ok(SubscriptionStatus::Canceled),
        other => Err(WebhookError::ParseError(format!(
            "unknown subscription status: {}",
            other
        ))),
    }
}

/// Builds a signed mock webhook delivery: returns `(body, header)`.
pub fn signed_event(
    event_id: &str,
    event_type: &str,
    data: serde_json::Value,
) -> (String, String) {
    let created = chrono::Utc::now().timestamp();
    let body = serde_json::json!({
        "id": event_id,
        "type": event_type,
        "created": created,
        "data": data,
    })
    .to_string();
    let header = crate::domain::webhook::sign_payload(MOCK_WEBHOOK_SECRET, created, &body);
    (body, header)
}

//! Port for external payment providers.
//!
//! One adapter per gateway. The orchestrators speak only these typed
//! requests and responses; everything provider-specific (auth, wire
//! format, event shapes) stays inside the adapter.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::foundation::{Money, Timestamp};
use crate::domain::payment::RefundStatus;
use crate::domain::subscription::SubscriptionStatus;
use crate::domain::webhook::{CanonicalEvent, ProviderEvent, WebhookError};

/// Error from a provider call.
///
/// `retryable` reflects the transport-level distinction: a definitive
/// rejection (card declined, invalid request) is final, while timeouts
/// and 5xx responses may succeed on retry.
#[derive(Debug, Clone, Error)]
#[error("provider error: {message}")]
pub struct ProviderError {
    pub message: String,
    /// The provider's own error/decline code, when one was returned.
    pub provider_code: Option<String>,
    pub retryable: bool,
}

impl ProviderError {
    pub fn rejected(message: impl Into<String>, provider_code: Option<String>) -> Self {
        Self {
            message: message.into(),
            provider_code,
            retryable: false,
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            provider_code: None,
            retryable: true,
        }
    }
}

/// Provider-side view of a payment's state, before it is folded into
/// our own `PaymentStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderPaymentState {
    Processing,
    RequiresCapture,
    Succeeded,
    Failed,
    Canceled,
}

#[derive(Debug, Clone)]
pub struct CreatePaymentRequest {
    pub amount: Money,
    /// The provider's customer handle for the paying user.
    pub customer_ref: String,
    pub description: String,
    /// Our payment id, echoed into provider metadata so events can be
    /// matched back even when the provider id was never stored locally.
    pub local_reference: String,
    /// When false the charge is authorized only and must be captured.
    pub automatic_capture: bool,
}

#[derive(Debug, Clone)]
pub struct ProviderPayment {
    pub provider_payment_id: String,
    pub state: ProviderPaymentState,
}

#[derive(Debug, Clone)]
pub struct CreateRefundRequest {
    pub provider_payment_id: String,
    pub amount: Money,
    pub reason: Option<String>,
    /// Our refund id, echoed into provider metadata.
    pub local_reference: String,
}

#[derive(Debug, Clone)]
pub struct ProviderRefund {
    pub provider_refund_id: String,
    pub status: RefundStatus,
}

#[derive(Debug, Clone)]
pub struct CreateSubscriptionRequest {
    pub customer_ref: String,
    /// The provider's price/plan handle.
    pub provider_price_id: String,
    pub trial_end: Option<Timestamp>,
    /// Our subscription id, echoed into provider metadata.
    pub local_reference: String,
}

#[derive(Debug, Clone)]
pub struct UpdateSubscriptionRequest {
    pub provider_subscription_id: String,
    /// The price to switch the subscription to.
    pub provider_price_id: String,
}

#[derive(Debug, Clone)]
pub struct ProviderSubscription {
    pub provider_subscription_id: String,
    pub status: SubscriptionStatus,
    pub current_period_start: Timestamp,
    pub current_period_end: Timestamp,
    pub cancel_at_period_end: bool,
}

/// Capability interface every payment gateway must implement.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Creates a payment at the provider. The returned state may already
    /// be terminal for synchronous providers.
    async fn create_payment(
        &self,
        request: CreatePaymentRequest,
    ) -> Result<ProviderPayment, ProviderError>;

    /// Captures a previously authorized payment.
    async fn capture_payment(
        &self,
        provider_payment_id: &str,
    ) -> Result<ProviderPayment, ProviderError>;

    /// Cancels an uncaptured payment.
    async fn cancel_payment(&self, provider_payment_id: &str) -> Result<(), ProviderError>;

    async fn create_refund(
        &self,
        request: CreateRefundRequest,
    ) -> Result<ProviderRefund, ProviderError>;

    async fn create_subscription(
        &self,
        request: CreateSubscriptionRequest,
    ) -> Result<ProviderSubscription, ProviderError>;

    async fn update_subscription(
        &self,
        request: UpdateSubscriptionRequest,
    ) -> Result<ProviderSubscription, ProviderError>;

    /// Cancels a subscription, either immediately or at period end.
    async fn cancel_subscription(
        &self,
        provider_subscription_id: &str,
        at_period_end: bool,
    ) -> Result<ProviderSubscription, ProviderError>;

    /// Verifies a webhook delivery's signature and parses the raw body
    /// into a provider event. Must be called before anything about the
    /// delivery is persisted.
    fn verify_webhook(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<ProviderEvent, WebhookError>;

    /// Maps a provider event onto its canonical form. `Ok(None)` means
    /// the event type is one this system deliberately ignores.
    fn normalize(&self, event: &ProviderEvent) -> Result<Option<CanonicalEvent>, WebhookError>;
}

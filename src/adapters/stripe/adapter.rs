//! Stripe provider adapter.
//!
//! Speaks the Stripe REST API with form-encoded posts authenticated by
//! the secret key. Amounts cross the wire as minor-unit integers. Our
//! entity ids ride along in `metadata[local_reference]` so webhook
//! events can be matched back even when a creation call never returned.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::domain::foundation::Timestamp;
use crate::domain::payment::RefundStatus;
use crate::domain::webhook::{CanonicalEvent, ProviderEvent, WebhookError, WebhookVerifier};
use crate::ports::{
    CreatePaymentRequest, CreateRefundRequest, CreateSubscriptionRequest, ProviderAdapter,
    ProviderError, ProviderPayment, ProviderPaymentState, ProviderRefund, ProviderSubscription,
    UpdateSubscriptionRequest,
};

use super::event_map;

pub const STRIPE_GATEWAY: &str = "stripe";

/// Stripe API configuration.
#[derive(Clone)]
pub struct StripeConfig {
    /// Secret API key (sk_live_... or sk_test_...).
    api_key: SecretString,

    /// Webhook signing secret (whsec_...).
    webhook_secret: SecretString,

    /// Base URL for the Stripe API.
    api_base_url: String,
}

impl StripeConfig {
    pub fn new(api_key: impl Into<String>, webhook_secret: impl Into<String>) -> Self {
        Self {
            api_key: SecretString::new(api_key.into()),
            webhook_secret: SecretString::new(webhook_secret.into()),
            api_base_url: "https://api.stripe.com".to_string(),
        }
    }

    /// Override the API base URL (for testing against a local stub).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }
}

pub struct StripeAdapter {
    config: StripeConfig,
    http_client: reqwest::Client,
}

impl StripeAdapter {
    pub fn new(config: StripeConfig) -> Self {
        Self {
            config,
            http_client: reqwest::Client::new(),
        }
    }

    /// Creation calls pass their local reference as the idempotency key
    /// so a retried request cannot double-create on the provider side.
    async fn post_form<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        params: &[(&str, String)],
        idempotency_key: Option<&str>,
    ) -> Result<T, ProviderError> {
        let url = format!("{}{}", self.config.api_base_url, path);
        let mut request = self
            .http_client
            .post(&url)
            .basic_auth(self.config.api_key.expose_secret(), Option::<&str>::None)
            .form(params);
        if let Some(key) = idempotency_key {
            request = request.header("Idempotency-Key", key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::transient(format!("stripe request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(%status, path, error = %body, "stripe API error");
            return Err(classify_http_error(status, &body));
        }

        response.json().await.map_err(|e| {
            ProviderError::transient(format!("failed to parse stripe response: {}", e))
        })
    }

    async fn delete<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T, ProviderError> {
        let url = format!("{}{}", self.config.api_base_url, path);
        let response = self
            .http_client
            .delete(&url)
            .basic_auth(self.config.api_key.expose_secret(), Option::<&str>::None)
            .send()
            .await
            .map_err(|e| ProviderError::transient(format!("stripe request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(%status, path, error = %body, "stripe API error");
            return Err(classify_http_error(status, &body));
        }

        response.json().await.map_err(|e| {
            ProviderError::transient(format!("failed to parse stripe response: {}", e))
        })
    }
}

/// 4xx responses (except 429) are definitive rejections; 429 and 5xx
/// may succeed on retry.
fn classify_http_error(status: reqwest::StatusCode, body: &str) -> ProviderError {
    let decline_code = serde_json::from_str::<StripeErrorEnvelope>(body)
        .ok()
        .and_then(|e| e.error.code);
    let retryable =
        status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
    ProviderError {
        message: format!("stripe API error ({})", status),
        provider_code: decline_code,
        retryable,
    }
}

#[derive(Debug, Deserialize)]
struct StripeErrorEnvelope {
    error: StripeErrorBody,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripePaymentIntent {
    id: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct StripeRefund {
    id: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct StripeSubscription {
    id: String,
    status: String,
    current_period_start: i64,
    current_period_end: i64,
    #[serde(default)]
    cancel_at_period_end: bool,
}

fn payment_state(status: &str) -> ProviderPaymentState {
    match status {
        "succeeded" => ProviderPaymentState::Succeeded,
        "requires_capture" => ProviderPaymentState::RequiresCapture,
        "canceled" => ProviderPaymentState::Canceled,
        // requires_payment_method, requires_confirmation, requires_action,
        // processing: the intent is still in flight.
        _ => ProviderPaymentState::Processing,
    }
}

fn refund_status(status: &str) -> RefundStatus {
    match status {
        "succeeded" => RefundStatus::Succeeded,
        "failed" | "canceled" => RefundStatus::Failed,
        _ => RefundStatus::Processing,
    }
}

fn subscription_from_wire(
    subscription: StripeSubscription,
) -> Result<ProviderSubscription, ProviderError> {
    let status = event_map::subscription_status(&subscription.status).ok_or_else(|| {
        ProviderError::transient(format!(
            "unmapped stripe subscription status: {}",
            subscription.status
        ))
    })?;
    Ok(ProviderSubscription {
        provider_subscription_id: subscription.id,
        status,
        current_period_start: Timestamp::from_unix_secs(subscription.current_period_start),
        current_period_end: Timestamp::from_unix_secs(subscription.current_period_end),
        cancel_at_period_end: subscription.cancel_at_period_end,
    })
}

#[async_trait]
impl ProviderAdapter for StripeAdapter {
    async fn create_payment(
        &self,
        request: CreatePaymentRequest,
    ) -> Result<ProviderPayment, ProviderError> {
        let mut params = vec![
            ("amount", request.amount.to_minor_units().to_string()),
            (
                "currency",
                request.amount.currency.code().to_lowercase(),
            ),
            ("customer", request.customer_ref),
            ("metadata[local_reference]", request.local_reference.clone()),
        ];
        if !request.description.is_empty() {
            params.push(("description", request.description));
        }
        if !request.automatic_capture {
            params.push(("capture_method", "manual".to_string()));
        }

        let intent: StripePaymentIntent = self
            .post_form(
                "/v1/payment_intents",
                &params,
                Some(&request.local_reference),
            )
            .await?;
        Ok(ProviderPayment {
            state: payment_state(&intent.status),
            provider_payment_id: intent.id,
        })
    }

    async fn capture_payment(
        &self,
        provider_payment_id: &str,
    ) -> Result<ProviderPayment, ProviderError> {
        let intent: StripePaymentIntent = self
            .post_form(
                &format!("/v1/payment_intents/{}/capture", provider_payment_id),
                &[],
                None,
            )
            .await?;
        Ok(ProviderPayment {
            state: payment_state(&intent.status),
            provider_payment_id: intent.id,
        })
    }

    async fn cancel_payment(&self, provider_payment_id: &str) -> Result<(), ProviderError> {
        let _: StripePaymentIntent = self
            .post_form(
                &format!("/v1/payment_intents/{}/cancel", provider_payment_id),
                &[],
                None,
            )
            .await?;
        Ok(())
    }

    async fn create_refund(
        &self,
        request: CreateRefundRequest,
    ) -> Result<ProviderRefund, ProviderError> {
        let mut params = vec![
            ("payment_intent", request.provider_payment_id),
            ("amount", request.amount.to_minor_units().to_string()),
            ("metadata[local_reference]", request.local_reference.clone()),
        ];
        if let Some(reason) = request.reason {
            params.push(("reason", reason));
        }

        let refund: StripeRefund = self
            .post_form("/v1/refunds", &params, Some(&request.local_reference))
            .await?;
        Ok(ProviderRefund {
            status: refund_status(&refund.status),
            provider_refund_id: refund.id,
        })
    }

    async fn create_subscription(
        &self,
        request: CreateSubscriptionRequest,
    ) -> Result<ProviderSubscription, ProviderError> {
        let mut params = vec![
            ("customer", request.customer_ref),
            ("items[0][price]", request.provider_price_id),
            ("metadata[local_reference]", request.local_reference.clone()),
        ];
        if let Some(trial_end) = request.trial_end {
            params.push(("trial_end", trial_end.as_unix_secs().to_string()));
        }

        let subscription: StripeSubscription = self
            .post_form("/v1/subscriptions", &params, Some(&request.local_reference))
            .await?;
        subscription_from_wire(subscription)
    }

    async fn update_subscription(
        &self,
        request: UpdateSubscriptionRequest,
    ) -> Result<ProviderSubscription, ProviderError> {
        let params = vec![("items[0][price]", request.provider_price_id)];
        let subscription: StripeSubscription = self
            .post_form(
                &format!("/v1/subscriptions/{}", request.provider_subscription_id),
                &params,
                None,
            )
            .await?;
        subscription_from_wire(subscription)
    }

    async fn cancel_subscription(
        &self,
        provider_subscription_id: &str,
        at_period_end: bool,
    ) -> Result<ProviderSubscription, ProviderError> {
        let subscription: StripeSubscription = if at_period_end {
            self.post_form(
                &format!("/v1/subscriptions/{}", provider_subscription_id),
                &[("cancel_at_period_end", "true".to_string())],
                None,
            )
            .await?
        } else {
            self.delete(&format!("/v1/subscriptions/{}", provider_subscription_id))
                .await?
        };
        subscription_from_wire(subscription)
    }

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<ProviderEvent, WebhookError> {
        WebhookVerifier::new(self.config.webhook_secret.expose_secret())
            .verify(payload, signature_header)?;
        event_map::parse_event(payload)
    }

    fn normalize(&self, event: &ProviderEvent) -> Result<Option<CanonicalEvent>, WebhookError> {
        event_map::normalize(event)
    }
}

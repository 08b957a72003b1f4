//! Webhook ingestion errors.
//!
//! Classifies every failure on the ingestion path by two axes that the
//! caller cares about: the HTTP status to answer the delivery with, and
//! whether redelivery could possibly succeed. Non-retryable rejections
//! (bad signature, malformed body) get 4xx so the provider stops
//! retrying a delivery that can never be accepted.

use http::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WebhookError {
    /// HMAC verification failed. The body must not be trusted or stored.
    #[error("webhook signature verification failed")]
    InvalidSignature,

    /// The signature header is present but unparseable.
    #[error("malformed signature header: {0}")]
    MalformedHeader(String),

    /// The delivery is older than the replay window.
    #[error("webhook timestamp outside replay window")]
    StaleTimestamp,

    /// The delivery is timestamped too far in the future.
    #[error("webhook timestamp too far in the future")]
    FutureTimestamp,

    /// The body passed verification but is not a parseable event.
    #[error("failed to parse webhook payload: {0}")]
    ParseError(String),

    /// The named gateway is not registered.
    #[error("unknown payment gateway: {0}")]
    UnknownGateway(String),

    /// The event references an entity this system has no record of.
    #[error("unmatched event reference: {0}")]
    UnmatchedReference(String),

    /// Handling failed transiently; the stored event can be retried.
    #[error("event handling failed: {0}")]
    HandlerFailed(String),

    /// Persistence failure while storing or updating the event record.
    #[error("webhook storage error: {0}")]
    Storage(String),
}

impl WebhookError {
    /// Whether redelivery or a later reprocessing sweep could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WebhookError::UnmatchedReference(_)
                | WebhookError::HandlerFailed(_)
                | WebhookError::Storage(_)
        )
    }

    /// The HTTP status an ingestion endpoint should answer with.
    pub fn status_code(&self) -> StatusCode {
        match self {
            WebhookError::InvalidSignature
            | WebhookError::StaleTimestamp
            | WebhookError::FutureTimestamp => StatusCode::UNAUTHORIZED,
            WebhookError::MalformedHeader(_) | WebhookError::ParseError(_) => {
                StatusCode::BAD_REQUEST
            }
            WebhookError::UnknownGateway(_) => StatusCode::NOT_FOUND,
            WebhookError::UnmatchedReference(_)
            | WebhookError::HandlerFailed(_)
            | WebhookError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

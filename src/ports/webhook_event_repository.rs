//! Port for the inbound webhook event log.
//!
//! Providers redeliver events on timeouts and non-2xx responses, so the
//! same event can arrive many times. The log keys events on
//! `(gateway, provider_event_id)` and the insert reports whether the
//! event was new; handlers only run for first-time inserts.
//!
//! Records are inserted *before* dispatch, unprocessed. A handler
//! failure leaves the row behind with its error, so a reprocessing
//! sweep can pick it up later instead of depending on the provider to
//! redeliver.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::foundation::{DomainError, Timestamp, WebhookEventId};

/// A received webhook event and its processing bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEventRecord {
    pub id: WebhookEventId,

    /// Gateway the event came from (e.g. "stripe").
    pub gateway: String,

    /// The provider's own event id. Unique per gateway.
    pub provider_event_id: String,

    /// Provider-native event type string.
    pub event_type: String,

    /// Full raw payload, kept for reprocessing and auditing.
    pub payload: serde_json::Value,

    /// Whether handling has completed (successfully or as a deliberate
    /// skip). Unprocessed rows are retry candidates.
    pub processed: bool,
    pub processed_at: Option<Timestamp>,

    /// Number of failed handling attempts so far.
    pub retry_count: u32,

    /// Error from the most recent failed attempt.
    pub error_message: Option<String>,

    pub received_at: Timestamp,
}

impl WebhookEventRecord {
    /// A freshly received, not-yet-handled event.
    pub fn received(
        gateway: impl Into<String>,
        provider_event_id: impl Into<String>,
        event_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: WebhookEventId::new(),
            gateway: gateway.into(),
            provider_event_id: provider_event_id.into(),
            event_type: event_type.into(),
            payload,
            processed: false,
            processed_at: None,
            retry_count: 0,
            error_message: None,
            received_at: Timestamp::now(),
        }
    }
}

/// Result of attempting to insert a webhook event record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveResult {
    /// First time seeing this `(gateway, provider_event_id)`.
    Inserted,
    /// Duplicate delivery; a record already exists.
    AlreadyExists,
}

/// Outcome of ingesting one delivery, reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Event was handled for the first time.
    Processed,
    /// Event carried a type this system deliberately ignores.
    Ignored,
    /// Duplicate delivery, skipped without running handlers.
    Duplicate,
}

/// Port for storing and updating the webhook event log.
///
/// Implementations must back `insert` with a uniqueness constraint on
/// `(gateway, provider_event_id)` so concurrent deliveries of the same
/// event race safely.
#[async_trait]
pub trait WebhookEventRepository: Send + Sync {
    /// Inserts the record unless one with the same
    /// `(gateway, provider_event_id)` already exists.
    async fn insert(&self, record: &WebhookEventRecord) -> Result<SaveResult, DomainError>;

    async fn find(
        &self,
        gateway: &str,
        provider_event_id: &str,
    ) -> Result<Option<WebhookEventRecord>, DomainError>;

    /// Marks the event handled and stamps `processed_at`.
    async fn mark_processed(&self, id: WebhookEventId) -> Result<(), DomainError>;

    /// Records a failed handling attempt: increments `retry_count` and
    /// stores the error, leaving the row unprocessed.
    async fn record_failure(&self, id: WebhookEventId, error: &str) -> Result<(), DomainError>;

    /// Unprocessed events with fewer than `max_retries` failed attempts,
    /// oldest first.
    async fn list_unprocessed(
        &self,
        max_retries: u32,
        limit: u32,
    ) -> Result<Vec<WebhookEventRecord>, DomainError>;

    /// Deletes processed records received before the cutoff. Returns the
    /// number deleted. Used by the retention sweep.
    async fn delete_processed_before(&self, cutoff: Timestamp) -> Result<u64, DomainError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn received_record_starts_unprocessed() {
        let record = WebhookEventRecord::received(
            "stripe",
            "evt_123",
            "payment_intent.succeeded",
            serde_json::json!({"id": "evt_123"}),
        );

        assert!(!record.processed);
        assert!(record.processed_at.is_none());
        assert_eq!(record.retry_count, 0);
        assert!(record.error_message.is_none());
        assert_eq!(record.gateway, "stripe");
        assert_eq!(record.provider_event_id, "evt_123");
    }
}

//! Webhook event processor: verified ingestion, idempotent dispatch,
//! and the reprocessing sweep.
//!
//! Ingestion order is fixed: verify the signature, insert the event row
//! (the uniqueness constraint on `(gateway, provider_event_id)` makes
//! this the idempotency gate), then dispatch. A handler failure leaves
//! the row unprocessed with its error recorded, so the sweep or a
//! provider redelivery can finish the job; handlers are re-entrant
//! because every orchestrator entry point is itself idempotent.

use std::sync::Arc;

use tracing::{info, warn};

use crate::domain::foundation::Timestamp;
use crate::domain::webhook::{CanonicalEvent, ProviderEvent, WebhookError};
use crate::ports::{IngestOutcome, SaveResult, WebhookEventRecord, WebhookEventRepository};

use super::payment_orchestrator::PaymentOrchestrator;
use super::refund_reconciler::RefundReconciler;
use super::registry::ProviderRegistry;
use super::subscription_orchestrator::SubscriptionOrchestrator;
use super::ApplyOutcome;

/// Counters from one reprocessing sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: u64,
    pub processed: u64,
    pub ignored: u64,
    pub failed: u64,
}

pub struct WebhookProcessor {
    events: Arc<dyn WebhookEventRepository>,
    registry: Arc<ProviderRegistry>,
    payments: Arc<PaymentOrchestrator>,
    refunds: Arc<RefundReconciler>,
    subscriptions: Arc<SubscriptionOrchestrator>,
}

impl WebhookProcessor {
    pub fn new(
        events: Arc<dyn WebhookEventRepository>,
        registry: Arc<ProviderRegistry>,
        payments: Arc<PaymentOrchestrator>,
        refunds: Arc<RefundReconciler>,
        subscriptions: Arc<SubscriptionOrchestrator>,
    ) -> Self {
        Self {
            events,
            registry,
            payments,
            refunds,
            subscriptions,
        }
    }

    /// Ingests one webhook delivery.
    ///
    /// Nothing is persisted before the signature verifies. Redelivery of
    /// a processed event is acknowledged without touching any handler;
    /// redelivery of an event whose handling never finished dispatches
    /// it again.
    pub async fn ingest(
        &self,
        gateway: &str,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<IngestOutcome, WebhookError> {
        let adapter = self
            .registry
            .adapter(gateway)
            .map_err(|_| WebhookError::UnknownGateway(gateway.to_string()))?;

        let event = adapter.verify_webhook(payload, signature_header)?;

        let record = WebhookEventRecord::received(
            gateway,
            &event.provider_event_id,
            &event.event_type,
            event.payload.clone(),
        );
        let record_id = match self
            .events
            .insert(&record)
            .await
            .map_err(|e| WebhookError::Storage(e.to_string()))?
        {
            SaveResult::Inserted => record.id,
            SaveResult::AlreadyExists => {
                // Only a completed event short-circuits. A row whose last
                // attempt failed stays eligible, so a provider redelivery
                // runs the handlers again instead of waiting for the sweep.
                let existing = self
                    .events
                    .find(gateway, &event.provider_event_id)
                    .await
                    .map_err(|e| WebhookError::Storage(e.to_string()))?
                    .ok_or_else(|| {
                        WebhookError::Storage(format!(
                            "webhook event {} vanished after duplicate insert",
                            event.provider_event_id
                        ))
                    })?;
                if existing.processed {
                    info!(
                        gateway,
                        provider_event_id = %event.provider_event_id,
                        "duplicate webhook delivery skipped"
                    );
                    return Ok(IngestOutcome::Duplicate);
                }
                info!(
                    gateway,
                    provider_event_id = %event.provider_event_id,
                    retry_count = existing.retry_count,
                    "redelivery of unfinished event, handling again"
                );
                existing.id
            }
        };

        let canonical = match adapter.normalize(&event) {
            Ok(Some(canonical)) => canonical,
            Ok(None) => {
                self.events
                    .mark_processed(record_id)
                    .await
                    .map_err(|e| WebhookError::Storage(e.to_string()))?;
                info!(gateway, event_type = %event.event_type, "webhook event type ignored");
                return Ok(IngestOutcome::Ignored);
            }
            Err(e) => {
                self.events
                    .record_failure(record_id, &e.to_string())
                    .await
                    .map_err(|e| WebhookError::Storage(e.to_string()))?;
                return Err(e);
            }
        };

        match self.dispatch(gateway, &canonical).await {
            Ok(()) => {
                self.events
                    .mark_processed(record_id)
                    .await
                    .map_err(|e| WebhookError::Storage(e.to_string()))?;
                info!(
                    gateway,
                    provider_event_id = %event.provider_event_id,
                    event = canonical.name(),
                    "webhook event processed"
                );
                Ok(IngestOutcome::Processed)
            }
            Err(e) => {
                self.events
                    .record_failure(record_id, &e.to_string())
                    .await
                    .map_err(|e| WebhookError::Storage(e.to_string()))?;
                warn!(
                    gateway,
                    provider_event_id = %event.provider_event_id,
                    event = canonical.name(),
                    error = %e,
                    "webhook event handling failed"
                );
                Err(e)
            }
        }
    }

    /// Retries stored events that never finished processing.
    pub async fn reprocess_pending(
        &self,
        max_retries: u32,
        limit: u32,
    ) -> Result<SweepReport, WebhookError> {
        let pending = self
            .events
            .list_unprocessed(max_retries, limit)
            .await
            .map_err(|e| WebhookError::Storage(e.to_string()))?;

        let mut report = SweepReport::default();
        for record in pending {
            report.scanned += 1;
            let adapter = match self.registry.adapter(&record.gateway) {
                Ok(adapter) => adapter,
                Err(_) => {
                    warn!(gateway = %record.gateway, "stored event for unregistered gateway");
                    report.failed += 1;
                    continue;
                }
            };

            let event = ProviderEvent {
                provider_event_id: record.provider_event_id.clone(),
                event_type: record.event_type.clone(),
                created: record.received_at,
                payload: record.payload.clone(),
            };

            let outcome = match adapter.normalize(&event) {
                Ok(Some(canonical)) => self.dispatch(&record.gateway, &canonical).await,
                Ok(None) => {
                    self.events
                        .mark_processed(record.id)
                        .await
                        .map_err(|e| WebhookError::Storage(e.to_string()))?;
                    report.ignored += 1;
                    continue;
                }
                Err(e) => Err(e),
            };

            match outcome {
                Ok(()) => {
                    self.events
                        .mark_processed(record.id)
                        .await
                        .map_err(|e| WebhookError::Storage(e.to_string()))?;
                    report.processed += 1;
                }
                Err(e) => {
                    self.events
                        .record_failure(record.id, &e.to_string())
                        .await
                        .map_err(|e| WebhookError::Storage(e.to_string()))?;
                    report.failed += 1;
                }
            }
        }

        info!(
            scanned = report.scanned,
            processed = report.processed,
            ignored = report.ignored,
            failed = report.failed,
            "webhook sweep complete"
        );
        Ok(report)
    }

    /// Deletes processed events received before the cutoff.
    pub async fn prune_processed(&self, cutoff: Timestamp) -> Result<u64, WebhookError> {
        let deleted = self
            .events
            .delete_processed_before(cutoff)
            .await
            .map_err(|e| WebhookError::Storage(e.to_string()))?;
        if deleted > 0 {
            info!(deleted, "pruned processed webhook events");
        }
        Ok(deleted)
    }

    /// Routes one canonical event to its orchestrator.
    ///
    /// `StaleIgnored` counts as handled: retrying an out-of-order event
    /// can never succeed, so it is acknowledged after the warning the
    /// orchestrator already logged. `Unmatched` stays retryable; the
    /// referenced row may simply not exist yet.
    async fn dispatch(&self, gateway: &str, event: &CanonicalEvent) -> Result<(), WebhookError> {
        let outcome = match event {
            CanonicalEvent::PaymentSucceeded {
                provider_payment_id,
                local_reference,
                paid_at,
            } => self
                .payments
                .record_provider_success(
                    gateway,
                    provider_payment_id,
                    local_reference.as_deref(),
                    *paid_at,
                )
                .await
                .map_err(handler_failed)?,
            CanonicalEvent::PaymentFailed {
                provider_payment_id,
                local_reference,
                failure_message,
            } => self
                .payments
                .record_provider_failure(
                    gateway,
                    provider_payment_id,
                    local_reference.as_deref(),
                    failure_message.as_deref(),
                )
                .await
                .map_err(handler_failed)?,
            CanonicalEvent::RefundSucceeded {
                provider_refund_id, ..
            } => self
                .refunds
                .record_refund_success(gateway, provider_refund_id)
                .await
                .map_err(handler_failed)?,
            CanonicalEvent::RefundFailed { provider_refund_id } => self
                .refunds
                .record_refund_failure(gateway, provider_refund_id)
                .await
                .map_err(handler_failed)?,
            CanonicalEvent::SubscriptionUpdated {
                provider_subscription_id,
                local_reference,
                status,
                period_start,
                period_end,
                cancel_at_period_end,
            } => self
                .subscriptions
                .record_provider_update(
                    gateway,
                    provider_subscription_id,
                    local_reference.as_deref(),
                    *status,
                    *period_start,
                    *period_end,
                    *cancel_at_period_end,
                )
                .await
                .map_err(handler_failed)?,
            CanonicalEvent::SubscriptionCanceled {
                provider_subscription_id,
                local_reference,
            } => self
                .subscriptions
                .record_provider_cancellation(
                    gateway,
                    provider_subscription_id,
                    local_reference.as_deref(),
                )
                .await
                .map_err(handler_failed)?,
            CanonicalEvent::SubscriptionPaymentFailed {
                provider_subscription_id,
            } => self
                .subscriptions
                .record_payment_failed(gateway, provider_subscription_id)
                .await
                .map_err(handler_failed)?,
        };

        match outcome {
            ApplyOutcome::Applied
            | ApplyOutcome::AlreadyApplied
            | ApplyOutcome::StaleIgnored => Ok(()),
            ApplyOutcome::Unmatched => Err(WebhookError::UnmatchedReference(format!(
                "{} references an unknown entity",
                event.name()
            ))),
        }
    }
}

fn handler_failed<E: std::fmt::Display>(e: E) -> WebhookError {
    WebhookError::HandlerFailed(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{
        InMemoryInvoiceRepository, InMemoryPaymentRepository, InMemoryRefundRepository,
        InMemorySubscriptionRepository, InMemoryWebhookEventRepository, StaticCustomerDirectory,
        StaticPlanCatalog,
    };
    use crate::adapters::mock::{signed_event, MockProviderAdapter, MOCK_GATEWAY};
    use crate::application::invoice_reconciler::InvoiceReconciler;
    use crate::domain::foundation::{Currency, Money, PaymentId, UserId};
    use crate::domain::payment::{Payment, PaymentKind, PaymentStatus};
    use crate::ports::PaymentRepository;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    struct Fixture {
        processor: WebhookProcessor,
        events: Arc<InMemoryWebhookEventRepository>,
        payments: Arc<InMemoryPaymentRepository>,
    }

    async fn fixture() -> Fixture {
        let payments = Arc::new(InMemoryPaymentRepository::new());
        let refunds = Arc::new(InMemoryRefundRepository::new());
        let subscriptions = Arc::new(InMemorySubscriptionRepository::new());
        let invoices = Arc::new(InMemoryInvoiceRepository::new());
        let events = Arc::new(InMemoryWebhookEventRepository::new());
        let adapter = Arc::new(MockProviderAdapter::new());
        let registry = Arc::new(
            ProviderRegistry::new(Duration::from_secs(5))
                .register(MOCK_GATEWAY, adapter.clone()),
        );
        let customers = Arc::new(StaticCustomerDirectory::new());
        let invoice_reconciler = Arc::new(InvoiceReconciler::new(invoices));

        let processor = WebhookProcessor::new(
            events.clone(),
            registry.clone(),
            Arc::new(PaymentOrchestrator::new(
                payments.clone(),
                registry.clone(),
                customers.clone(),
                invoice_reconciler.clone(),
            )),
            Arc::new(RefundReconciler::new(
                refunds,
                payments.clone(),
                registry.clone(),
                invoice_reconciler,
            )),
            Arc::new(SubscriptionOrchestrator::new(
                subscriptions,
                Arc::new(StaticPlanCatalog::new()),
                registry,
                customers,
            )),
        );
        Fixture {
            processor,
            events,
            payments,
        }
    }

    /// Inserts a Processing payment and returns it.
    async fn processing_payment(f: &Fixture, provider_id: &str) -> Payment {
        let mut payment = Payment::create(
            PaymentId::new(),
            UserId::new(),
            Money::new(dec!(50.00), Currency::new("USD").unwrap()),
            PaymentKind::OneOff,
            MOCK_GATEWAY,
            None,
        );
        payment
            .begin_processing(provider_id, serde_json::Value::Null)
            .unwrap();
        f.payments.insert(&payment).await.unwrap();
        payment
    }

    #[tokio::test]
    async fn valid_delivery_is_persisted_and_dispatched() {
        let f = fixture().await;
        let payment = processing_payment(&f, "pay_w1").await;
        let (body, header) = signed_event(
            "evt_1",
            "payment.succeeded",
            serde_json::json!({"payment_id": "pay_w1"}),
        );

        let outcome = f
            .processor
            .ingest(MOCK_GATEWAY, body.as_bytes(), &header)
            .await
            .unwrap();

        assert_eq!(outcome, IngestOutcome::Processed);
        let stored = f.payments.find(payment.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Succeeded);

        let record = f.events.find(MOCK_GATEWAY, "evt_1").await.unwrap().unwrap();
        assert!(record.processed);
        assert!(record.processed_at.is_some());
    }

    #[tokio::test]
    async fn bad_signature_persists_nothing() {
        let f = fixture().await;
        let (body, _) = signed_event("evt_2", "payment.succeeded", serde_json::json!({}));
        let forged = format!("t={},v1={}", chrono::Utc::now().timestamp(), "a".repeat(64));

        let result = f.processor.ingest(MOCK_GATEWAY, body.as_bytes(), &forged).await;

        assert!(matches!(result, Err(WebhookError::InvalidSignature)));
        assert!(f.events.find(MOCK_GATEWAY, "evt_2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_delivery_is_acknowledged_without_handlers() {
        let f = fixture().await;
        let payment = processing_payment(&f, "pay_w3").await;
        let (body, header) = signed_event(
            "evt_3",
            "payment.succeeded",
            serde_json::json!({"payment_id": "pay_w3"}),
        );

        f.processor
            .ingest(MOCK_GATEWAY, body.as_bytes(), &header)
            .await
            .unwrap();
        let second = f
            .processor
            .ingest(MOCK_GATEWAY, body.as_bytes(), &header)
            .await
            .unwrap();

        assert_eq!(second, IngestOutcome::Duplicate);
        let stored = f.payments.find(payment.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Succeeded);
    }

    #[tokio::test]
    async fn redelivery_of_unfinished_event_runs_handlers_again() {
        let f = fixture().await;
        let (body, header) = signed_event(
            "evt_redeliver",
            "payment.succeeded",
            serde_json::json!({"payment_id": "pay_slow"}),
        );
        // First delivery fails: the payment row does not exist yet.
        let first = f
            .processor
            .ingest(MOCK_GATEWAY, body.as_bytes(), &header)
            .await;
        assert!(matches!(first, Err(WebhookError::UnmatchedReference(_))));

        let payment = processing_payment(&f, "pay_slow").await;
        let second = f
            .processor
            .ingest(MOCK_GATEWAY, body.as_bytes(), &header)
            .await
            .unwrap();

        assert_eq!(second, IngestOutcome::Processed);
        let stored = f.payments.find(payment.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Succeeded);
        let record = f
            .events
            .find(MOCK_GATEWAY, "evt_redeliver")
            .await
            .unwrap()
            .unwrap();
        assert!(record.processed);
    }

    #[tokio::test]
    async fn unknown_event_type_is_stored_and_ignored() {
        let f = fixture().await;
        let (body, header) = signed_event("evt_4", "account.updated", serde_json::json!({}));

        let outcome = f
            .processor
            .ingest(MOCK_GATEWAY, body.as_bytes(), &header)
            .await
            .unwrap();

        assert_eq!(outcome, IngestOutcome::Ignored);
        let record = f.events.find(MOCK_GATEWAY, "evt_4").await.unwrap().unwrap();
        assert!(record.processed);
    }

    #[tokio::test]
    async fn unknown_gateway_is_rejected() {
        let f = fixture().await;
        let (body, header) = signed_event("evt_5", "payment.succeeded", serde_json::json!({}));

        let result = f.processor.ingest("paypal", body.as_bytes(), &header).await;

        assert!(matches!(result, Err(WebhookError::UnknownGateway(_))));
    }

    #[tokio::test]
    async fn unmatched_event_keeps_a_retryable_row() {
        let f = fixture().await;
        let (body, header) = signed_event(
            "evt_6",
            "payment.succeeded",
            serde_json::json!({"payment_id": "pay_ghost"}),
        );

        let result = f
            .processor
            .ingest(MOCK_GATEWAY, body.as_bytes(), &header)
            .await;

        assert!(matches!(result, Err(WebhookError::UnmatchedReference(_))));
        let record = f.events.find(MOCK_GATEWAY, "evt_6").await.unwrap().unwrap();
        assert!(!record.processed);
        assert_eq!(record.retry_count, 1);
        assert!(record.error_message.is_some());
    }

    #[tokio::test]
    async fn sweep_settles_an_event_once_the_payment_appears() {
        let f = fixture().await;
        let (body, header) = signed_event(
            "evt_7",
            "payment.succeeded",
            serde_json::json!({"payment_id": "pay_late"}),
        );
        // First delivery arrives before the payment row exists.
        let _ = f
            .processor
            .ingest(MOCK_GATEWAY, body.as_bytes(), &header)
            .await;

        let payment = processing_payment(&f, "pay_late").await;
        let report = f.processor.reprocess_pending(5, 100).await.unwrap();

        assert_eq!(report.processed, 1);
        assert_eq!(report.failed, 0);
        let stored = f.payments.find(payment.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Succeeded);
        let record = f.events.find(MOCK_GATEWAY, "evt_7").await.unwrap().unwrap();
        assert!(record.processed);
    }

    #[tokio::test]
    async fn sweep_skips_events_past_the_retry_budget() {
        let f = fixture().await;
        let (body, header) = signed_event(
            "evt_8",
            "payment.succeeded",
            serde_json::json!({"payment_id": "pay_never"}),
        );
        let _ = f
            .processor
            .ingest(MOCK_GATEWAY, body.as_bytes(), &header)
            .await;

        // retry_count is already 1; a budget of 1 excludes it.
        let report = f.processor.reprocess_pending(1, 100).await.unwrap();

        assert_eq!(report.scanned, 0);
    }

    #[tokio::test]
    async fn prune_removes_only_processed_rows() {
        let f = fixture().await;
        let (body, header) = signed_event("evt_9", "account.updated", serde_json::json!({}));
        f.processor
            .ingest(MOCK_GATEWAY, body.as_bytes(), &header)
            .await
            .unwrap();
        let (body2, header2) = signed_event(
            "evt_10",
            "payment.succeeded",
            serde_json::json!({"payment_id": "pay_ghost"}),
        );
        let _ = f
            .processor
            .ingest(MOCK_GATEWAY, body2.as_bytes(), &header2)
            .await;

        let deleted = f
            .processor
            .prune_processed(Timestamp::now().add_days(1))
            .await
            .unwrap();

        assert_eq!(deleted, 1);
        assert!(f.events.find(MOCK_GATEWAY, "evt_9").await.unwrap().is_none());
        assert!(f.events.find(MOCK_GATEWAY, "evt_10").await.unwrap().is_some());
    }
}

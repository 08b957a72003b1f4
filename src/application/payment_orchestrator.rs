//! Payment orchestrator: owns the payment lifecycle from creation
//! through provider confirmation.
//!
//! The synchronous path (create, capture, cancel) writes a Pending row
//! before any provider call, so a timeout can never lose money: the row
//! stays Pending and the provider's webhook settles it later, matched
//! by provider id or by the local reference echoed through provider
//! metadata. Status writes are conditional on the status the
//! orchestrator read, so a racing webhook can never be overwritten by a
//! slower synchronous response.

use std::sync::Arc;

use tracing::{info, warn};

use crate::domain::foundation::{InvoiceId, Money, PaymentId, Timestamp, UserId, ValidationError};
use crate::domain::payment::{Payment, PaymentFlowError, PaymentKind, PaymentStatus};
use crate::ports::{
    ConditionalUpdate, CreatePaymentRequest, CustomerDirectory, PaymentRepository,
    ProviderPaymentState,
};

use super::invoice_reconciler::InvoiceReconciler;
use super::registry::{ProviderCallError, ProviderRegistry};
use super::ApplyOutcome;

const MAX_CAS_ATTEMPTS: u32 = 3;

/// Command to create and submit a payment.
#[derive(Debug, Clone)]
pub struct CreatePaymentCommand {
    pub user_id: UserId,
    pub amount: Money,
    pub gateway: String,
    pub kind: PaymentKind,
    pub description: Option<String>,
    /// Invoice this payment settles, if any.
    pub invoice_id: Option<InvoiceId>,
    /// When false the charge is authorized only and held for capture.
    pub automatic_capture: bool,
}

pub struct PaymentOrchestrator {
    payments: Arc<dyn PaymentRepository>,
    registry: Arc<ProviderRegistry>,
    customers: Arc<dyn CustomerDirectory>,
    invoice_reconciler: Arc<InvoiceReconciler>,
}

impl PaymentOrchestrator {
    pub fn new(
        payments: Arc<dyn PaymentRepository>,
        registry: Arc<ProviderRegistry>,
        customers: Arc<dyn CustomerDirectory>,
        invoice_reconciler: Arc<InvoiceReconciler>,
    ) -> Self {
        Self {
            payments,
            registry,
            customers,
            invoice_reconciler,
        }
    }

    /// Creates a payment and submits it to the provider.
    ///
    /// On a definitive provider rejection the payment is marked Failed.
    /// On a timeout or transient error the payment stays Pending and the
    /// error is returned; webhook reconciliation settles it.
    pub async fn create_payment(
        &self,
        cmd: CreatePaymentCommand,
    ) -> Result<Payment, PaymentFlowError> {
        if !cmd.amount.is_positive() {
            return Err(ValidationError::not_positive("amount", cmd.amount.amount.to_string()).into());
        }
        let adapter = self
            .registry
            .adapter(&cmd.gateway)
            .map_err(|_| ValidationError::invalid_format("gateway", cmd.gateway.clone()))?;

        let mut payment = Payment::create(
            PaymentId::new(),
            cmd.user_id,
            cmd.amount,
            cmd.kind,
            cmd.gateway.clone(),
            cmd.description.clone(),
        );
        if let Some(invoice_id) = cmd.invoice_id {
            payment = payment.with_invoice(invoice_id);
        }
        self.payments.insert(&payment).await?;

        let customer_ref = self
            .customers
            .customer_ref(cmd.user_id, &cmd.gateway)
            .await?;

        let request = CreatePaymentRequest {
            amount: cmd.amount,
            customer_ref,
            description: cmd.description.unwrap_or_default(),
            local_reference: payment.id.to_string(),
            automatic_capture: cmd.automatic_capture,
        };

        match self.registry.call(adapter.create_payment(request)).await {
            Ok(provider_payment) => {
                payment.begin_processing(
                    &provider_payment.provider_payment_id,
                    serde_json::Value::Null,
                )?;
                match provider_payment.state {
                    ProviderPaymentState::Succeeded => {
                        payment.succeed(Timestamp::now())?;
                    }
                    ProviderPaymentState::Failed | ProviderPaymentState::Canceled => {
                        payment.fail(Some("rejected by provider"))?;
                    }
                    ProviderPaymentState::Processing | ProviderPaymentState::RequiresCapture => {}
                }
                self.store_transition(&payment, PaymentStatus::Pending).await?;
                if payment.status == PaymentStatus::Succeeded {
                    self.settle_invoice(&payment).await;
                }
                info!(payment_id = %payment.id, status = ?payment.status, "payment submitted");
                Ok(payment)
            }
            Err(ProviderCallError::Provider(e)) if !e.retryable => {
                payment.fail(Some(&e.message))?;
                self.store_transition(&payment, PaymentStatus::Pending).await?;
                warn!(payment_id = %payment.id, error = %e, "payment rejected by provider");
                Err(PaymentFlowError::provider(e.message, false))
            }
            Err(e) => {
                // Outcome unknown: leave the row Pending for reconciliation.
                warn!(payment_id = %payment.id, error = %e, "provider call did not complete");
                Err(map_call_error(e))
            }
        }
    }

    /// Captures a previously authorized payment.
    pub async fn capture_payment(&self, payment_id: PaymentId) -> Result<Payment, PaymentFlowError> {
        let mut payment = self.require(payment_id).await?;
        let provider_payment_id = payment.provider_payment_id.clone().ok_or_else(|| {
            PaymentFlowError::conflict(
                crate::domain::payment::ConflictKind::IllegalTransition,
                "payment has no provider id to capture",
            )
        })?;
        let adapter = self
            .registry
            .adapter(&payment.gateway)
            .map_err(|_| ValidationError::invalid_format("gateway", payment.gateway.clone()))?;

        let provider_payment = self
            .registry
            .call(adapter.capture_payment(&provider_payment_id))
            .await
            .map_err(map_call_error)?;

        if provider_payment.state == ProviderPaymentState::Succeeded {
            payment.succeed(Timestamp::now()).map_err(illegal_transition)?;
            self.store_transition(&payment, PaymentStatus::Processing).await?;
            self.settle_invoice(&payment).await;
        }
        Ok(payment)
    }

    /// Cancels a payment that has not settled. A Pending payment (never
    /// acknowledged by the provider) is failed locally; a Processing one
    /// is canceled at the provider first.
    pub async fn cancel_payment(&self, payment_id: PaymentId) -> Result<Payment, PaymentFlowError> {
        let mut payment = self.require(payment_id).await?;
        let expected = payment.status;

        if let Some(provider_payment_id) = payment.provider_payment_id.clone() {
            let adapter = self
                .registry
                .adapter(&payment.gateway)
                .map_err(|_| ValidationError::invalid_format("gateway", payment.gateway.clone()))?;
            self.registry
                .call(adapter.cancel_payment(&provider_payment_id))
                .await
                .map_err(map_call_error)?;
        }

        payment.fail(Some("canceled")).map_err(illegal_transition)?;
        self.store_transition(&payment, expected).await?;
        info!(payment_id = %payment.id, "payment canceled");
        Ok(payment)
    }

    pub async fn get_payment(&self, payment_id: PaymentId) -> Result<Payment, PaymentFlowError> {
        self.require(payment_id).await
    }

    /// Applies a provider success event. Entry point for the webhook
    /// path; idempotent and monotonic.
    pub async fn record_provider_success(
        &self,
        gateway: &str,
        provider_payment_id: &str,
        local_reference: Option<&str>,
        paid_at: Timestamp,
    ) -> Result<ApplyOutcome, PaymentFlowError> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let Some(mut payment) = self
                .match_payment(gateway, provider_payment_id, local_reference)
                .await?
            else {
                return Ok(ApplyOutcome::Unmatched);
            };
            let expected = payment.status;

            match expected {
                PaymentStatus::Pending => {
                    // Abandoned creation: the synchronous path never saw the
                    // provider's answer. Adopt the provider id, then settle.
                    payment.begin_processing(provider_payment_id, serde_json::Value::Null)?;
                    payment.succeed(paid_at)?;
                }
                PaymentStatus::Processing => {
                    payment.succeed(paid_at)?;
                }
                PaymentStatus::Succeeded
                | PaymentStatus::PartiallyRefunded
                | PaymentStatus::Refunded => return Ok(ApplyOutcome::AlreadyApplied),
                PaymentStatus::Failed => {
                    warn!(
                        payment_id = %payment.id,
                        "success event for a Failed payment, ignoring"
                    );
                    return Ok(ApplyOutcome::StaleIgnored);
                }
            }

            match self.payments.update_if_status(&payment, expected).await? {
                ConditionalUpdate::Applied => {
                    self.settle_invoice(&payment).await;
                    info!(payment_id = %payment.id, "payment settled via webhook");
                    return Ok(ApplyOutcome::Applied);
                }
                ConditionalUpdate::StaleStatus => continue,
            }
        }
        Err(PaymentFlowError::Infrastructure(
            "payment update contention exhausted retries".to_string(),
        ))
    }

    /// Applies a provider failure event.
    pub async fn record_provider_failure(
        &self,
        gateway: &str,
        provider_payment_id: &str,
        local_reference: Option<&str>,
        failure_message: Option<&str>,
    ) -> Result<ApplyOutcome, PaymentFlowError> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let Some(mut payment) = self
                .match_payment(gateway, provider_payment_id, local_reference)
                .await?
            else {
                return Ok(ApplyOutcome::Unmatched);
            };
            let expected = payment.status;

            match expected {
                PaymentStatus::Pending | PaymentStatus::Processing => {
                    payment.fail(failure_message)?;
                }
                PaymentStatus::Failed => return Ok(ApplyOutcome::AlreadyApplied),
                _ => {
                    warn!(
                        payment_id = %payment.id,
                        status = ?expected,
                        "failure event for a settled payment, ignoring"
                    );
                    return Ok(ApplyOutcome::StaleIgnored);
                }
            }

            match self.payments.update_if_status(&payment, expected).await? {
                ConditionalUpdate::Applied => {
                    info!(payment_id = %payment.id, "payment marked failed via webhook");
                    return Ok(ApplyOutcome::Applied);
                }
                ConditionalUpdate::StaleStatus => continue,
            }
        }
        Err(PaymentFlowError::Infrastructure(
            "payment update contention exhausted retries".to_string(),
        ))
    }

    /// Looks a payment up by provider id, falling back to the local
    /// reference when the id was never stored.
    async fn match_payment(
        &self,
        gateway: &str,
        provider_payment_id: &str,
        local_reference: Option<&str>,
    ) -> Result<Option<Payment>, PaymentFlowError> {
        if let Some(payment) = self
            .payments
            .find_by_provider_payment_id(gateway, provider_payment_id)
            .await?
        {
            return Ok(Some(payment));
        }
        if let Some(reference) = local_reference {
            if let Ok(id) = reference.parse::<PaymentId>() {
                return Ok(self.payments.find(id).await?);
            }
        }
        Ok(None)
    }

    async fn require(&self, payment_id: PaymentId) -> Result<Payment, PaymentFlowError> {
        self.payments
            .find(payment_id)
            .await?
            .ok_or(PaymentFlowError::PaymentNotFound(payment_id))
    }

    async fn store_transition(
        &self,
        payment: &Payment,
        expected: PaymentStatus,
    ) -> Result<(), PaymentFlowError> {
        match self.payments.update_if_status(payment, expected).await? {
            ConditionalUpdate::Applied => Ok(()),
            ConditionalUpdate::StaleStatus => Err(PaymentFlowError::conflict(
                crate::domain::payment::ConflictKind::IllegalTransition,
                "payment changed concurrently",
            )),
        }
    }

    /// Credits the linked invoice, if any. Failures are logged, not
    /// propagated: the payment itself has settled.
    async fn settle_invoice(&self, payment: &Payment) {
        if let Some(invoice_id) = payment.invoice_id {
            if let Err(e) = self.invoice_reconciler.credit(invoice_id, payment.amount).await {
                warn!(
                    payment_id = %payment.id,
                    invoice_id = %invoice_id,
                    error = %e,
                    "invoice credit failed"
                );
            }
        }
    }
}

fn map_call_error(e: ProviderCallError) -> PaymentFlowError {
    match e {
        ProviderCallError::UnknownGateway(g) => {
            ValidationError::invalid_format("gateway", g).into()
        }
        ProviderCallError::Timeout { timeout_secs } => {
            PaymentFlowError::ProviderTimeout { timeout_secs }
        }
        ProviderCallError::Provider(p) => PaymentFlowError::provider(p.message, p.retryable),
    }
}

fn illegal_transition(e: ValidationError) -> PaymentFlowError {
    PaymentFlowError::conflict(
        crate::domain::payment::ConflictKind::IllegalTransition,
        e.to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{
        InMemoryInvoiceRepository, InMemoryPaymentRepository, StaticCustomerDirectory,
    };
    use crate::adapters::mock::{MockProviderAdapter, MOCK_GATEWAY};
    use crate::domain::foundation::Currency;
    use crate::domain::invoice::{Invoice, InvoiceStatus};
    use crate::ports::{InvoiceRepository, ProviderError, ProviderPayment};
    use rust_decimal_macros::dec;
    use std::time::Duration;

    struct Fixture {
        orchestrator: PaymentOrchestrator,
        payments: Arc<InMemoryPaymentRepository>,
        invoices: Arc<InMemoryInvoiceRepository>,
        adapter: Arc<MockProviderAdapter>,
        user_id: UserId,
    }

    async fn fixture() -> Fixture {
        let payments = Arc::new(InMemoryPaymentRepository::new());
        let invoices = Arc::new(InMemoryInvoiceRepository::new());
        let adapter = Arc::new(MockProviderAdapter::new());
        let registry = Arc::new(
            ProviderRegistry::new(Duration::from_secs(5))
                .register(MOCK_GATEWAY, adapter.clone()),
        );
        let customers = Arc::new(StaticCustomerDirectory::new());
        let user_id = UserId::new();
        customers.put(user_id, MOCK_GATEWAY, "cus_test").await;

        let orchestrator = PaymentOrchestrator::new(
            payments.clone(),
            registry,
            customers,
            Arc::new(InvoiceReconciler::new(invoices.clone())),
        );
        Fixture {
            orchestrator,
            payments,
            invoices,
            adapter,
            user_id,
        }
    }

    fn usd(amount: rust_decimal::Decimal) -> Money {
        Money::new(amount, Currency::new("USD").unwrap())
    }

    fn command(f: &Fixture) -> CreatePaymentCommand {
        CreatePaymentCommand {
            user_id: f.user_id,
            amount: usd(dec!(25.00)),
            gateway: MOCK_GATEWAY.to_string(),
            kind: PaymentKind::OneOff,
            description: Some("order #7".to_string()),
            invoice_id: None,
            automatic_capture: true,
        }
    }

    #[tokio::test]
    async fn create_moves_payment_to_processing() {
        let f = fixture().await;

        let payment = f.orchestrator.create_payment(command(&f)).await.unwrap();

        assert_eq!(payment.status, PaymentStatus::Processing);
        assert!(payment.provider_payment_id.is_some());

        let stored = f.payments.find(payment.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Processing);

        // Our id travels to the provider as the recovery reference.
        let requests = f.adapter.payment_requests.lock().unwrap();
        assert_eq!(requests[0].local_reference, payment.id.to_string());
    }

    #[tokio::test]
    async fn non_positive_amount_is_rejected_before_any_call() {
        let f = fixture().await;
        let mut cmd = command(&f);
        cmd.amount = usd(dec!(0));

        let result = f.orchestrator.create_payment(cmd).await;

        assert!(matches!(result, Err(PaymentFlowError::Validation(_))));
        assert!(f.adapter.payment_requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_gateway_is_rejected() {
        let f = fixture().await;
        let mut cmd = command(&f);
        cmd.gateway = "paypal".to_string();

        let result = f.orchestrator.create_payment(cmd).await;

        assert!(matches!(result, Err(PaymentFlowError::Validation(_))));
    }

    #[tokio::test]
    async fn provider_rejection_marks_payment_failed() {
        let f = fixture().await;
        f.adapter
            .script_payment(Err(ProviderError::rejected("card_declined", Some("card_declined".into()))));

        let result = f.orchestrator.create_payment(command(&f)).await;

        assert!(matches!(result, Err(PaymentFlowError::Provider { retryable: false, .. })));
    }

    #[tokio::test]
    async fn transient_error_leaves_payment_pending() {
        let f = fixture().await;
        f.adapter
            .script_payment(Err(ProviderError::transient("upstream 503")));

        let result = f.orchestrator.create_payment(command(&f)).await;

        assert!(matches!(result, Err(PaymentFlowError::Provider { retryable: true, .. })));
    }

    #[tokio::test]
    async fn webhook_success_settles_processing_payment() {
        let f = fixture().await;
        let payment = f.orchestrator.create_payment(command(&f)).await.unwrap();
        let provider_id = payment.provider_payment_id.clone().unwrap();

        let outcome = f
            .orchestrator
            .record_provider_success(MOCK_GATEWAY, &provider_id, None, Timestamp::now())
            .await
            .unwrap();

        assert_eq!(outcome, ApplyOutcome::Applied);
        let stored = f.payments.find(payment.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Succeeded);
        assert!(stored.payment_date.is_some());
    }

    #[tokio::test]
    async fn duplicate_webhook_success_is_idempotent() {
        let f = fixture().await;
        let payment = f.orchestrator.create_payment(command(&f)).await.unwrap();
        let provider_id = payment.provider_payment_id.clone().unwrap();

        f.orchestrator
            .record_provider_success(MOCK_GATEWAY, &provider_id, None, Timestamp::now())
            .await
            .unwrap();
        let second = f
            .orchestrator
            .record_provider_success(MOCK_GATEWAY, &provider_id, None, Timestamp::now())
            .await
            .unwrap();

        assert_eq!(second, ApplyOutcome::AlreadyApplied);
    }

    #[tokio::test]
    async fn webhook_recovers_abandoned_pending_payment_by_local_reference() {
        let f = fixture().await;
        // Simulate an abandoned creation: row exists, provider id never stored.
        let payment = Payment::create(
            PaymentId::new(),
            f.user_id,
            usd(dec!(25.00)),
            PaymentKind::OneOff,
            MOCK_GATEWAY,
            None,
        );
        f.payments.insert(&payment).await.unwrap();

        let outcome = f
            .orchestrator
            .record_provider_success(
                MOCK_GATEWAY,
                "pay_recovered",
                Some(&payment.id.to_string()),
                Timestamp::now(),
            )
            .await
            .unwrap();

        assert_eq!(outcome, ApplyOutcome::Applied);
        let stored = f.payments.find(payment.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Succeeded);
        assert_eq!(stored.provider_payment_id.as_deref(), Some("pay_recovered"));
    }

    #[tokio::test]
    async fn success_event_for_failed_payment_is_ignored() {
        let f = fixture().await;
        let mut failed = Payment::create(
            PaymentId::new(),
            f.user_id,
            usd(dec!(5.00)),
            PaymentKind::OneOff,
            MOCK_GATEWAY,
            None,
        );
        failed.fail(None).unwrap();
        f.payments.insert(&failed).await.unwrap();

        let outcome = f
            .orchestrator
            .record_provider_success(
                MOCK_GATEWAY,
                "pay_late",
                Some(&failed.id.to_string()),
                Timestamp::now(),
            )
            .await
            .unwrap();

        assert_eq!(outcome, ApplyOutcome::StaleIgnored);
    }

    #[tokio::test]
    async fn unmatched_event_is_reported_not_swallowed() {
        let f = fixture().await;

        let outcome = f
            .orchestrator
            .record_provider_success(MOCK_GATEWAY, "pay_unknown", None, Timestamp::now())
            .await
            .unwrap();

        assert_eq!(outcome, ApplyOutcome::Unmatched);
    }

    #[tokio::test]
    async fn settled_invoice_payment_credits_the_invoice() {
        let f = fixture().await;
        let invoice = Invoice::new(InvoiceId::new(), usd(dec!(25.00)), InvoiceStatus::Sent);
        f.invoices.insert(&invoice).await.unwrap();
        let mut cmd = command(&f);
        cmd.invoice_id = Some(invoice.id);

        let payment = f.orchestrator.create_payment(cmd).await.unwrap();
        let provider_id = payment.provider_payment_id.clone().unwrap();
        f.orchestrator
            .record_provider_success(MOCK_GATEWAY, &provider_id, None, Timestamp::now())
            .await
            .unwrap();

        let stored = f.invoices.find(invoice.id).await.unwrap().unwrap();
        assert_eq!(stored.status, InvoiceStatus::Paid);
    }

    #[tokio::test]
    async fn capture_settles_an_authorized_payment() {
        let f = fixture().await;
        let mut cmd = command(&f);
        cmd.automatic_capture = false;
        let payment = f.orchestrator.create_payment(cmd).await.unwrap();
        assert_eq!(payment.status, PaymentStatus::Processing);

        let captured = f.orchestrator.capture_payment(payment.id).await.unwrap();

        assert_eq!(captured.status, PaymentStatus::Succeeded);
    }

    #[tokio::test]
    async fn cancel_fails_an_unsettled_payment() {
        let f = fixture().await;
        let payment = f.orchestrator.create_payment(command(&f)).await.unwrap();

        let canceled = f.orchestrator.cancel_payment(payment.id).await.unwrap();

        assert_eq!(canceled.status, PaymentStatus::Failed);
    }
}

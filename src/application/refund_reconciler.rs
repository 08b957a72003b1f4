//! Refund reconciler: creates refunds under the refund-total cap and
//! derives the parent payment's refund status from settled refunds.
//!
//! The cap counts every refund that is not Failed, so two concurrent
//! partial refunds cannot jointly exceed the payment amount even though
//! neither has settled yet. The derived payment status (Refunded /
//! PartiallyRefunded) is always recomputed from the stored refund rows,
//! never incrementally, so replayed webhooks converge on the same
//! answer.

use std::sync::Arc;

use tracing::{info, warn};

use crate::domain::foundation::{Money, PaymentId, RefundId, ValidationError};
use crate::domain::payment::{
    ConflictKind, Payment, PaymentFlowError, PaymentStatus, Refund, RefundStatus,
};
use crate::ports::{ConditionalUpdate, PaymentRepository, RefundRepository};

use super::invoice_reconciler::InvoiceReconciler;
use super::registry::{ProviderCallError, ProviderRegistry};
use super::ApplyOutcome;

const MAX_CAS_ATTEMPTS: u32 = 3;

/// Command to refund part or all of a payment.
#[derive(Debug, Clone)]
pub struct CreateRefundCommand {
    pub payment_id: PaymentId,
    /// Amount to refund; `None` refunds the full remaining amount.
    pub amount: Option<Money>,
    pub reason: Option<String>,
}

pub struct RefundReconciler {
    refunds: Arc<dyn RefundRepository>,
    payments: Arc<dyn PaymentRepository>,
    registry: Arc<ProviderRegistry>,
    invoice_reconciler: Arc<InvoiceReconciler>,
}

impl RefundReconciler {
    pub fn new(
        refunds: Arc<dyn RefundRepository>,
        payments: Arc<dyn PaymentRepository>,
        registry: Arc<ProviderRegistry>,
        invoice_reconciler: Arc<InvoiceReconciler>,
    ) -> Self {
        Self {
            refunds,
            payments,
            registry,
            invoice_reconciler,
        }
    }

    /// Creates a refund and submits it to the provider.
    pub async fn create_refund(&self, cmd: CreateRefundCommand) -> Result<Refund, PaymentFlowError> {
        let payment = self
            .payments
            .find(cmd.payment_id)
            .await?
            .ok_or(PaymentFlowError::PaymentNotFound(cmd.payment_id))?;

        if !payment.status.is_refundable() {
            return Err(PaymentFlowError::conflict(
                ConflictKind::NotRefundable,
                format!("payment in status {:?} cannot be refunded", payment.status),
            ));
        }

        let reserved = self.reserved_total(&payment).await?;
        let remaining = payment.amount.checked_sub(&reserved)?;

        let amount = match cmd.amount {
            Some(amount) => {
                if amount.currency != payment.amount.currency {
                    return Err(PaymentFlowError::conflict(
                        ConflictKind::CurrencyMismatch,
                        format!(
                            "refund currency {} does not match payment currency {}",
                            amount.currency, payment.amount.currency
                        ),
                    ));
                }
                if !amount.is_positive() {
                    return Err(ValidationError::not_positive(
                        "amount",
                        amount.amount.to_string(),
                    )
                    .into());
                }
                if amount.amount > remaining.amount {
                    return Err(PaymentFlowError::conflict(
                        ConflictKind::RefundExceedsRemaining,
                        format!(
                            "refund of {} exceeds remaining refundable {}",
                            amount.amount, remaining.amount
                        ),
                    ));
                }
                amount
            }
            None => {
                if !remaining.is_positive() {
                    return Err(PaymentFlowError::conflict(
                        ConflictKind::RefundExceedsRemaining,
                        "nothing left to refund",
                    ));
                }
                remaining
            }
        };

        let provider_payment_id = payment.provider_payment_id.clone().ok_or_else(|| {
            PaymentFlowError::conflict(
                ConflictKind::NotRefundable,
                "payment has no provider id",
            )
        })?;
        let adapter = self
            .registry
            .adapter(&payment.gateway)
            .map_err(|_| ValidationError::invalid_format("gateway", payment.gateway.clone()))?;

        let mut refund = Refund::create(
            RefundId::new(),
            payment.id,
            payment.user_id,
            amount,
            payment.gateway.clone(),
            cmd.reason.clone(),
        );
        self.refunds.insert(&refund).await?;

        let request = crate::ports::CreateRefundRequest {
            provider_payment_id,
            amount,
            reason: cmd.reason,
            local_reference: refund.id.to_string(),
        };

        match self.registry.call(adapter.create_refund(request)).await {
            Ok(provider_refund) => {
                refund.begin_processing(&provider_refund.provider_refund_id)?;
                if provider_refund.status == RefundStatus::Succeeded {
                    refund.succeed()?;
                }
                self.store_refund(&refund, RefundStatus::Pending).await?;
                if refund.status == RefundStatus::Succeeded {
                    self.recompute_payment_status(payment.id).await?;
                }
                info!(refund_id = %refund.id, payment_id = %payment.id, "refund submitted");
                Ok(refund)
            }
            Err(ProviderCallError::Provider(e)) if !e.retryable => {
                refund.fail()?;
                self.store_refund(&refund, RefundStatus::Pending).await?;
                warn!(refund_id = %refund.id, error = %e, "refund rejected by provider");
                Err(PaymentFlowError::provider(e.message, false))
            }
            Err(e) => {
                // Outcome unknown: refund stays Pending and holds its
                // reservation against the cap until reconciled.
                warn!(refund_id = %refund.id, error = %e, "provider call did not complete");
                Err(match e {
                    ProviderCallError::Timeout { timeout_secs } => {
                        PaymentFlowError::ProviderTimeout { timeout_secs }
                    }
                    ProviderCallError::Provider(p) => {
                        PaymentFlowError::provider(p.message, p.retryable)
                    }
                    ProviderCallError::UnknownGateway(g) => {
                        ValidationError::invalid_format("gateway", g).into()
                    }
                })
            }
        }
    }

    /// Applies a provider refund-succeeded event and recomputes the
    /// parent payment's derived status.
    pub async fn record_refund_success(
        &self,
        gateway: &str,
        provider_refund_id: &str,
    ) -> Result<ApplyOutcome, PaymentFlowError> {
        let Some(mut refund) = self
            .refunds
            .find_by_provider_refund_id(gateway, provider_refund_id)
            .await?
        else {
            return Ok(ApplyOutcome::Unmatched);
        };

        match refund.status {
            RefundStatus::Succeeded => return Ok(ApplyOutcome::AlreadyApplied),
            RefundStatus::Failed => {
                warn!(refund_id = %refund.id, "success event for a Failed refund, ignoring");
                return Ok(ApplyOutcome::StaleIgnored);
            }
            RefundStatus::Pending | RefundStatus::Processing => {}
        }

        let expected = refund.status;
        refund.succeed()?;
        match self.refunds.update_if_status(&refund, expected).await? {
            ConditionalUpdate::Applied => {}
            ConditionalUpdate::StaleStatus => {
                // A concurrent writer settled it first and owns the
                // invoice debit; recompute so the payment status still
                // converges, but apply no second effect.
                self.recompute_payment_status(refund.payment_id).await?;
                return Ok(ApplyOutcome::AlreadyApplied);
            }
        }

        self.recompute_payment_status(refund.payment_id).await?;

        if let Some(payment) = self.payments.find(refund.payment_id).await? {
            if let Some(invoice_id) = payment.invoice_id {
                if let Err(e) = self.invoice_reconciler.debit(invoice_id, refund.amount).await {
                    warn!(
                        refund_id = %refund.id,
                        invoice_id = %invoice_id,
                        error = %e,
                        "invoice debit failed"
                    );
                }
            }
        }

        info!(refund_id = %refund.id, "refund settled via webhook");
        Ok(ApplyOutcome::Applied)
    }

    /// Applies a provider refund-failed event. The payment's derived
    /// status is untouched; a failed refund never counted toward it.
    pub async fn record_refund_failure(
        &self,
        gateway: &str,
        provider_refund_id: &str,
    ) -> Result<ApplyOutcome, PaymentFlowError> {
        let Some(mut refund) = self
            .refunds
            .find_by_provider_refund_id(gateway, provider_refund_id)
            .await?
        else {
            return Ok(ApplyOutcome::Unmatched);
        };

        match refund.status {
            RefundStatus::Failed => return Ok(ApplyOutcome::AlreadyApplied),
            RefundStatus::Succeeded => {
                warn!(refund_id = %refund.id, "failure event for a settled refund, ignoring");
                return Ok(ApplyOutcome::StaleIgnored);
            }
            RefundStatus::Pending | RefundStatus::Processing => {}
        }

        let expected = refund.status;
        refund.fail()?;
        match self.refunds.update_if_status(&refund, expected).await? {
            ConditionalUpdate::Applied => {
                info!(refund_id = %refund.id, "refund marked failed via webhook");
                Ok(ApplyOutcome::Applied)
            }
            ConditionalUpdate::StaleStatus => Ok(ApplyOutcome::AlreadyApplied),
        }
    }

    /// Sum of refund amounts that still count against the cap: every
    /// refund that has not Failed.
    async fn reserved_total(&self, payment: &Payment) -> Result<Money, PaymentFlowError> {
        let refunds = self.refunds.list_for_payment(payment.id).await?;
        let mut total = Money::zero(payment.amount.currency);
        for refund in refunds {
            if refund.status != RefundStatus::Failed {
                total = total.checked_add(&refund.amount)?;
            }
        }
        Ok(total)
    }

    /// Recomputes the payment's refund-derived status from its settled
    /// refunds, with a bounded compare-and-set loop.
    async fn recompute_payment_status(&self, payment_id: PaymentId) -> Result<(), PaymentFlowError> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let payment = self
                .payments
                .find(payment_id)
                .await?
                .ok_or(PaymentFlowError::PaymentNotFound(payment_id))?;

            let refunds = self.refunds.list_for_payment(payment_id).await?;
            let mut settled = Money::zero(payment.amount.currency);
            for refund in &refunds {
                if refund.status == RefundStatus::Succeeded {
                    settled = settled.checked_add(&refund.amount)?;
                }
            }

            let derived = if settled.amount >= payment.amount.amount {
                PaymentStatus::Refunded
            } else if settled.is_positive() {
                PaymentStatus::PartiallyRefunded
            } else {
                return Ok(());
            };

            if payment.status == derived {
                return Ok(());
            }

            let expected = payment.status;
            let mut updated = payment;
            updated.apply_refund_status(derived).map_err(|e| {
                PaymentFlowError::conflict(ConflictKind::IllegalTransition, e.to_string())
            })?;

            match self.payments.update_if_status(&updated, expected).await? {
                ConditionalUpdate::Applied => {
                    info!(payment_id = %payment_id, status = ?derived, "payment refund status derived");
                    return Ok(());
                }
                ConditionalUpdate::StaleStatus => continue,
            }
        }
        Err(PaymentFlowError::Infrastructure(
            "payment refund-status update contention exhausted retries".to_string(),
        ))
    }

    async fn store_refund(
        &self,
        refund: &Refund,
        expected: RefundStatus,
    ) -> Result<(), PaymentFlowError> {
        match self.refunds.update_if_status(refund, expected).await? {
            ConditionalUpdate::Applied => Ok(()),
            ConditionalUpdate::StaleStatus => Err(PaymentFlowError::conflict(
                ConflictKind::IllegalTransition,
                "refund changed concurrently",
            )),
        }
    }
}

//! Invoice reconciler: applies payment credits and refund debits to
//! invoice balances.
//!
//! Runs on the settlement paths only. A succeeded payment that settles
//! an invoice credits `paid_amount`; a succeeded refund against such a
//! payment debits it back. Writes go through a bounded compare-and-set
//! loop: on contention the invoice is re-read and the amount re-applied
//! against the fresh balance.

use std::sync::Arc;

use tracing::{info, warn};

use crate::domain::foundation::{DomainError, InvoiceId, Money};
use crate::ports::{ConditionalUpdate, InvoiceRepository};

const MAX_CAS_ATTEMPTS: u32 = 3;

pub struct InvoiceReconciler {
    invoices: Arc<dyn InvoiceRepository>,
}

impl InvoiceReconciler {
    pub fn new(invoices: Arc<dyn InvoiceRepository>) -> Self {
        Self { invoices }
    }

    /// Credits a succeeded payment against the invoice.
    pub async fn credit(&self, invoice_id: InvoiceId, amount: Money) -> Result<(), DomainError> {
        self.apply(invoice_id, amount, Apply::Credit).await
    }

    /// Debits a succeeded refund back off the invoice.
    pub async fn debit(&self, invoice_id: InvoiceId, amount: Money) -> Result<(), DomainError> {
        self.apply(invoice_id, amount, Apply::Debit).await
    }

    async fn apply(
        &self,
        invoice_id: InvoiceId,
        amount: Money,
        direction: Apply,
    ) -> Result<(), DomainError> {
        for attempt in 0..MAX_CAS_ATTEMPTS {
            let mut invoice = self
                .invoices
                .find(invoice_id)
                .await?
                .ok_or_else(|| {
                    DomainError::new(
                        crate::domain::foundation::ErrorCode::InvoiceNotFound,
                        format!("invoice {} not found", invoice_id),
                    )
                })?;
            let expected_status = invoice.status;
            let expected_paid = invoice.paid_amount;

            match direction {
                Apply::Credit => invoice.credit(amount)?,
                Apply::Debit => invoice.debit(amount)?,
            }

            match self
                .invoices
                .update_if_unchanged(&invoice, expected_status, expected_paid)
                .await?
            {
                ConditionalUpdate::Applied => {
                    info!(
                        invoice_id = %invoice_id,
                        amount = %amount.amount,
                        status = ?invoice.status,
                        "invoice balance updated"
                    );
                    return Ok(());
                }
                ConditionalUpdate::StaleStatus => {
                    warn!(
                        invoice_id = %invoice_id,
                        attempt,
                        "invoice changed concurrently, retrying"
                    );
                }
            }
        }

        Err(DomainError::database(format!(
            "invoice {} update contention exhausted {} attempts",
            invoice_id, MAX_CAS_ATTEMPTS
        )))
    }
}

#[derive(Clone, Copy)]
enum Apply {
    Credit,
    Debit,
}

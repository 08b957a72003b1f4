//! Invoice collaborator entity.
//!
//! The invoice itself is owned elsewhere; this core only mutates its
//! paid-amount ledger as payments succeed (and corrects it when refunds
//! settle) and derives the Paid status.

use serde::{Deserialize, Serialize};

use crate::domain::foundation::{InvoiceId, Money, Timestamp, ValidationError};

/// Invoice status as far as this core is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Sent,
    Paid,
    Void,
}

/// Invoice with a running paid amount.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: InvoiceId,
    pub total_amount: Money,

    /// Monotonically non-decreasing as payments succeed; decreases only
    /// via the explicit refund correction.
    pub paid_amount: Money,

    pub status: InvoiceStatus,
    pub updated_at: Timestamp,
}

impl Invoice {
    pub fn new(id: InvoiceId, total_amount: Money, status: InvoiceStatus) -> Self {
        Self {
            id,
            total_amount,
            paid_amount: Money::zero(total_amount.currency),
            status,
            updated_at: Timestamp::now(),
        }
    }

    /// Credits a successful payment against this invoice.
    ///
    /// Flips to Paid once `paid_amount >= total_amount`; otherwise the
    /// status is left untouched (a Draft invoice is not forced to Sent).
    pub fn credit(&mut self, amount: Money) -> Result<(), ValidationError> {
        self.paid_amount = self.paid_amount.checked_add(&amount)?;
        if self.paid_amount.amount >= self.total_amount.amount {
            self.status = InvoiceStatus::Paid;
        }
        self.updated_at = Timestamp::now();
        Ok(())
    }

    /// Refund-driven correction: reduces the paid amount and reopens the
    /// invoice if it drops back under the total.
    pub fn debit(&mut self, amount: Money) -> Result<(), ValidationError> {
        self.paid_amount = self.paid_amount.checked_sub(&amount)?;
        if self.status == InvoiceStatus::Paid
            && self.paid_amount.amount < self.total_amount.amount
        {
            self.status = InvoiceStatus::Sent;
        }
        self.updated_at = Timestamp::now();
        Ok(())
    }

    pub fn is_paid(&self) -> bool {
        self.status == InvoiceStatus::Paid
    }
}

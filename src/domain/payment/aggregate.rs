//! Payment aggregate entity.
//!
//! A Payment is created Pending by the payment orchestrator and mutated
//! only through its transition methods, on the synchronous provider
//! response path or the asynchronous webhook path. Payments are never
//! hard-deleted; cancellation and failure are terminal statuses.
//!
//! # Invariants
//!
//! - `provider_payment_id` is set if and only if status is at or beyond
//!   Processing
//! - `payment_date` is set only on success
//! - amount is strictly positive in a supported currency

use serde::{Deserialize, Serialize};

use crate::domain::foundation::{
    InvoiceId, Money, PaymentId, StateMachine, SubscriptionId, Timestamp, UserId, ValidationError,
};

use super::PaymentStatus;

/// What the payment is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentKind {
    /// A one-off charge.
    OneOff,
    /// A recurring charge raised by a subscription billing cycle.
    SubscriptionCharge,
}

/// Payment aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,

    /// Owning user (external collaborator reference).
    pub user_id: UserId,

    /// Weak reference to an invoice this payment settles, if any.
    pub invoice_id: Option<InvoiceId>,

    /// Weak reference to the subscription that raised this charge, if any.
    pub subscription_id: Option<SubscriptionId>,

    pub amount: Money,

    pub kind: PaymentKind,

    /// Which provider adapter handles this payment, as a gateway key
    /// (see `application::PaymentGateway`).
    pub gateway: String,

    /// Provider's identifier, assigned once the provider acknowledges.
    pub provider_payment_id: Option<String>,

    pub status: PaymentStatus,

    pub description: Option<String>,

    /// Opaque provider blob: client secrets, redirect URLs, raw responses.
    pub provider_metadata: serde_json::Value,

    pub created_at: Timestamp,
    pub updated_at: Timestamp,

    /// Set only when the payment succeeds.
    pub payment_date: Option<Timestamp>,
}

impl Payment {
    /// Creates a new Pending payment. Amount positivity and currency
    /// support are enforced by `Money::positive` at the call site.
    pub fn create(
        id: PaymentId,
        user_id: UserId,
        amount: Money,
        kind: PaymentKind,
        gateway: impl Into<String>,
        description: Option<String>,
    ) -> Self {
        let now = Timestamp::now();
        Self {
            id,
            user_id,
            invoice_id: None,
            subscription_id: None,
            amount,
            kind,
            gateway: gateway.into(),
            provider_payment_id: None,
            status: PaymentStatus::Pending,
            description,
            provider_metadata: serde_json::Value::Null,
            created_at: now,
            updated_at: now,
            payment_date: None,
        }
    }

    /// Links this payment to an invoice it settles.
    pub fn with_invoice(mut self, invoice_id: InvoiceId) -> Self {
        self.invoice_id = Some(invoice_id);
        self
    }

    /// Links this payment to the subscription that raised it.
    pub fn with_subscription(mut self, subscription_id: SubscriptionId) -> Self {
        self.subscription_id = Some(subscription_id);
        self
    }

    /// Provider acknowledged the payment: Pending -> Processing.
    ///
    /// Stores the provider's payment id and any opaque client material
    /// (client secret, redirect URL) the adapter returned.
    pub fn begin_processing(
        &mut self,
        provider_payment_id: impl Into<String>,
        provider_metadata: serde_json::Value,
    ) -> Result<(), ValidationError> {
        self.status = self.status.transition_to(PaymentStatus::Processing)?;
        self.provider_payment_id = Some(provider_payment_id.into());
        self.provider_metadata = provider_metadata;
        self.updated_at = Timestamp::now();
        Ok(())
    }

    /// Provider confirmed settlement: Processing -> Succeeded.
    pub fn succeed(&mut self, paid_at: Timestamp) -> Result<(), ValidationError> {
        self.status = self.status.transition_to(PaymentStatus::Succeeded)?;
        self.payment_date = Some(paid_at);
        self.updated_at = Timestamp::now();
        Ok(())
    }

    /// Provider rejected or the charge failed.
    pub fn fail(&mut self, reason: Option<&str>) -> Result<(), ValidationError> {
        self.status = self.status.transition_to(PaymentStatus::Failed)?;
        if let Some(reason) = reason {
            self.provider_metadata = serde_json::json!({ "failure_message": reason });
        }
        self.updated_at = Timestamp::now();
        Ok(())
    }

    /// Applies the refund-derived status computed by the refund reconciler.
    pub fn apply_refund_status(&mut self, derived: PaymentStatus) -> Result<(), ValidationError> {
        debug_assert!(matches!(
            derived,
            PaymentStatus::PartiallyRefunded | PaymentStatus::Refunded
        ));
        self.status = self.status.transition_to(derived)?;
        self.updated_at = Timestamp::now();
        Ok(())
    }

    /// Checks the provider-id/status linkage invariant.
    pub fn provider_id_invariant_holds(&self) -> bool {
        let at_or_beyond_processing = self.status.rank() >= PaymentStatus::Processing.rank();
        self.provider_payment_id.is_some() == at_or_beyond_processing
            || (self.status == PaymentStatus::Failed && self.provider_payment_id.is_none())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::foundation::Currency;
    use rust_decimal_macros::dec;

    fn test_payment() -> Payment {
        Payment::create(
            PaymentId::new(),
            UserId::new(),
            Money::positive(dec!(100.00), Currency::new("USD").unwrap()).unwrap(),
            PaymentKind::OneOff,
            "stripe",
            Some("order #42".to_string()),
        )
    }

    #[test]
    fn new_payment_is_pending_without_provider_id() {
        let payment = test_payment();
        assert_eq!(payment.status, PaymentStatus::Pending);
        assert!(payment.provider_payment_id.is_none());
        assert!(payment.payment_date.is_none());
        assert!(payment.provider_id_invariant_holds());
    }

    #[test]
    fn begin_processing_sets_provider_id() {
        let mut payment = test_payment();
        payment
            .begin_processing("pi_123", serde_json::json!({"client_secret": "cs_x"}))
            .unwrap();

        assert_eq!(payment.status, PaymentStatus::Processing);
        assert_eq!(payment.provider_payment_id.as_deref(), Some("pi_123"));
        assert!(payment.provider_id_invariant_holds());
    }

    #[test]
    fn succeed_sets_payment_date() {
        let mut payment = test_payment();
        payment.begin_processing("pi_123", serde_json::Value::Null).unwrap();
        let paid_at = Timestamp::now();
        payment.succeed(paid_at).unwrap();

        assert_eq!(payment.status, PaymentStatus::Succeeded);
        assert_eq!(payment.payment_date, Some(paid_at));
    }

    #[test]
    fn succeed_from_pending_is_rejected() {
        let mut payment = test_payment();
        assert!(payment.succeed(Timestamp::now()).is_err());
        assert_eq!(payment.status, PaymentStatus::Pending);
        assert!(payment.payment_date.is_none());
    }

    #[test]
    fn fail_from_pending_records_reason() {
        let mut payment = test_payment();
        payment.fail(Some("card_declined")).unwrap();

        assert_eq!(payment.status, PaymentStatus::Failed);
        assert_eq!(
            payment.provider_metadata["failure_message"],
            serde_json::json!("card_declined")
        );
    }

    #[test]
    fn refund_status_only_from_succeeded() {
        let mut payment = test_payment();
        assert!(payment
            .apply_refund_status(PaymentStatus::PartiallyRefunded)
            .is_err());

        payment.begin_processing("pi_123", serde_json::Value::Null).unwrap();
        payment.succeed(Timestamp::now()).unwrap();
        payment
            .apply_refund_status(PaymentStatus::PartiallyRefunded)
            .unwrap();
        payment.apply_refund_status(PaymentStatus::Refunded).unwrap();
        assert_eq!(payment.status, PaymentStatus::Refunded);
    }
}

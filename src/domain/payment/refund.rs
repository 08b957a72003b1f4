//! Refund entity.
//!
//! A Refund belongs to exactly one Payment and cannot outlive it. The sum
//! of Succeeded refund amounts for a payment never exceeds the payment's
//! amount; the refund reconciler enforces that at creation and derives the
//! parent payment's refund status from the running total.

use serde::{Deserialize, Serialize};

use crate::domain::foundation::{
    Money, PaymentId, RefundId, StateMachine, Timestamp, UserId, ValidationError,
};

/// Refund lifecycle status (subset of the payment statuses).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    Pending,
    Processing,
    Succeeded,
    Failed,
}

impl StateMachine for RefundStatus {
    fn can_transition_to(&self, target: &Self) -> bool {
        use RefundStatus::*;
        matches!(
            (self, target),
            (Pending, Processing)
                | (Pending, Failed)
            // The provider's success webhook can outrun our own
            // Processing write; the machine tolerates that race.
                | (Pending, Succeeded)
                | (Processing, Succeeded)
                | (Processing, Failed)
        )
    }

    fn valid_transitions(&self) -> Vec<Self> {
        use RefundStatus::*;
        match self {
            Pending => vec![Processing, Succeeded, Failed],
            Processing => vec![Succeeded, Failed],
            Succeeded => vec![],
            Failed => vec![],
        }
    }
}

/// Refund against a payment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Refund {
    pub id: RefundId,

    /// The owning payment.
    pub payment_id: PaymentId,

    pub user_id: UserId,

    /// Refunded amount; same currency as the parent payment, at most the
    /// remaining refundable amount at creation time.
    pub amount: Money,

    pub reason: Option<String>,

    /// Gateway key of the provider handling the refund.
    pub gateway: String,

    /// Provider's refund identifier, set on adapter acceptance.
    pub provider_refund_id: Option<String>,

    pub status: RefundStatus,

    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Refund {
    /// Creates a new Pending refund.
    pub fn create(
        id: RefundId,
        payment_id: PaymentId,
        user_id: UserId,
        amount: Money,
        gateway: impl Into<String>,
        reason: Option<String>,
    ) -> Self {
        let now = Timestamp::now();
        Self {
            id,
            payment_id,
            user_id,
            amount,
            reason,
            gateway: gateway.into(),
            provider_refund_id: None,
            status: RefundStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    /// Provider accepted the refund: Pending -> Processing.
    pub fn begin_processing(
        &mut self,
        provider_refund_id: impl Into<String>,
    ) -> Result<(), ValidationError> {
        self.status = self.status.transition_to(RefundStatus::Processing)?;
        self.provider_refund_id = Some(provider_refund_id.into());
        self.updated_at = Timestamp::now();
        Ok(())
    }

    /// Provider confirmed the refund settled.
    pub fn succeed(&mut self) -> Result<(), ValidationError> {
        self.status = self.status.transition_to(RefundStatus::Succeeded)?;
        self.updated_at = Timestamp::now();
        Ok(())
    }

    /// Provider reported the refund failed.
    pub fn fail(&mut self) -> Result<(), ValidationError> {
        self.status = self.status.transition_to(RefundStatus::Failed)?;
        self.updated_at = Timestamp::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::foundation::Currency;
    use rust_decimal_macros::dec;

    fn test_refund() -> Refund {
        Refund::create(
            RefundId::new(),
            PaymentId::new(),
            UserId::new(),
            Money::positive(dec!(20.00), Currency::new("USD").unwrap()).unwrap(),
            "stripe",
            Some("requested_by_customer".to_string()),
        )
    }

    #[test]
    fn new_refund_is_pending() {
        let refund = test_refund();
        assert_eq!(refund.status, RefundStatus::Pending);
        assert!(refund.provider_refund_id.is_none());
    }

    #[test]
    fn normal_lifecycle() {
        let mut refund = test_refund();
        refund.begin_processing("re_1").unwrap();
        assert_eq!(refund.status, RefundStatus::Processing);
        refund.succeed().unwrap();
        assert_eq!(refund.status, RefundStatus::Succeeded);
    }

    #[test]
    fn webhook_can_outrun_processing_write() {
        let mut refund = test_refund();
        refund.succeed().unwrap();
        assert_eq!(refund.status, RefundStatus::Succeeded);
    }

    #[test]
    fn succeeded_and_failed_are_terminal() {
        assert!(RefundStatus::Succeeded.is_terminal());
        assert!(RefundStatus::Failed.is_terminal());

        let mut refund = test_refund();
        refund.begin_processing("re_1").unwrap();
        refund.fail().unwrap();
        assert!(refund.succeed().is_err());
    }
}

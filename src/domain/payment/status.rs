//! Payment status state machine.

use crate::domain::foundation::StateMachine;
use serde::{Deserialize, Serialize};

/// Payment lifecycle status.
///
/// Both the synchronous provider-response path and the asynchronous
/// webhook path drive the same machine; out-of-order provider
/// notifications are rejected by the monotonicity rule below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Created locally, provider not yet acknowledged.
    Pending,

    /// Provider accepted the payment; awaiting settlement confirmation.
    Processing,

    /// Funds captured. Terminal with respect to re-attempting the charge,
    /// but refunds may still move it onward.
    Succeeded,

    /// Provider rejected or the charge failed. Terminal.
    Failed,

    /// Some, but not all, of the amount has been refunded.
    PartiallyRefunded,

    /// The full amount has been refunded. Terminal.
    Refunded,
}

impl PaymentStatus {
    /// Monotonic rank of the status within the lifecycle.
    ///
    /// A payment may only ever move to a strictly higher rank. Equal-rank
    /// moves are duplicates of something already observed, lower-rank moves
    /// are out-of-order provider notifications; both are rejected. The one
    /// exception is PartiallyRefunded -> PartiallyRefunded, which a further
    /// partial refund legitimately produces.
    pub fn rank(&self) -> u8 {
        match self {
            PaymentStatus::Pending => 0,
            PaymentStatus::Processing => 1,
            PaymentStatus::Succeeded => 2,
            PaymentStatus::Failed => 2,
            PaymentStatus::PartiallyRefunded => 3,
            PaymentStatus::Refunded => 4,
        }
    }

    /// Whether a refund may be created against a payment in this status.
    pub fn is_refundable(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Succeeded | PaymentStatus::PartiallyRefunded
        )
    }
}

impl StateMachine for PaymentStatus {
    fn can_transition_to(&self, target: &Self) -> bool {
        use PaymentStatus::*;
        matches!(
            (self, target),
            // From PENDING
            (Pending, Processing)
                | (Pending, Failed)
            // From PROCESSING
                | (Processing, Succeeded)
                | (Processing, Failed)
            // From SUCCEEDED (refund reconciler only)
                | (Succeeded, PartiallyRefunded)
                | (Succeeded, Refunded)
            // From PARTIALLY_REFUNDED (further refunds)
                | (PartiallyRefunded, PartiallyRefunded)
                | (PartiallyRefunded, Refunded)
        )
    }

    fn valid_transitions(&self) -> Vec<Self> {
        use PaymentStatus::*;
        match self {
            Pending => vec![Processing, Failed],
            Processing => vec![Succeeded, Failed],
            Succeeded => vec![PartiallyRefunded, Refunded],
            PartiallyRefunded => vec![PartiallyRefunded, Refunded],
            Failed => vec![],
            Refunded => vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [PaymentStatus; 6] = [
        PaymentStatus::Pending,
        PaymentStatus::Processing,
        PaymentStatus::Succeeded,
        PaymentStatus::Failed,
        PaymentStatus::PartiallyRefunded,
        PaymentStatus::Refunded,
    ];

    #[test]
    fn pending_can_start_processing_or_fail() {
        assert!(PaymentStatus::Pending.can_transition_to(&PaymentStatus::Processing));
        assert!(PaymentStatus::Pending.can_transition_to(&PaymentStatus::Failed));
        assert!(!PaymentStatus::Pending.can_transition_to(&PaymentStatus::Succeeded));
    }

    #[test]
    fn processing_resolves_to_succeeded_or_failed() {
        assert!(PaymentStatus::Processing.can_transition_to(&PaymentStatus::Succeeded));
        assert!(PaymentStatus::Processing.can_transition_to(&PaymentStatus::Failed));
        assert!(!PaymentStatus::Processing.can_transition_to(&PaymentStatus::Pending));
    }

    #[test]
    fn succeeded_never_regresses() {
        assert!(!PaymentStatus::Succeeded.can_transition_to(&PaymentStatus::Pending));
        assert!(!PaymentStatus::Succeeded.can_transition_to(&PaymentStatus::Processing));
        assert!(!PaymentStatus::Succeeded.can_transition_to(&PaymentStatus::Failed));
    }

    #[test]
    fn partial_refund_allows_further_partials() {
        assert!(
            PaymentStatus::PartiallyRefunded.can_transition_to(&PaymentStatus::PartiallyRefunded)
        );
        assert!(PaymentStatus::PartiallyRefunded.can_transition_to(&PaymentStatus::Refunded));
    }

    #[test]
    fn failed_and_refunded_are_terminal() {
        assert!(PaymentStatus::Failed.is_terminal());
        assert!(PaymentStatus::Refunded.is_terminal());
        assert!(!PaymentStatus::Succeeded.is_terminal());
        assert!(!PaymentStatus::PartiallyRefunded.is_terminal());
    }

    #[test]
    fn only_succeeded_and_partially_refunded_are_refundable() {
        assert!(PaymentStatus::Succeeded.is_refundable());
        assert!(PaymentStatus::PartiallyRefunded.is_refundable());
        assert!(!PaymentStatus::Pending.is_refundable());
        assert!(!PaymentStatus::Processing.is_refundable());
        assert!(!PaymentStatus::Failed.is_refundable());
        assert!(!PaymentStatus::Refunded.is_refundable());
    }

    #[test]
    fn every_legal_transition_increases_rank_or_stays_partial() {
        for from in ALL {
            for to in from.valid_transitions() {
                if from == PaymentStatus::PartiallyRefunded && to == PaymentStatus::PartiallyRefunded
                {
                    continue;
                }
                assert!(
                    to.rank() > from.rank(),
                    "transition {:?} -> {:?} must increase rank",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn can_transition_to_is_consistent_with_valid_transitions() {
        for status in ALL {
            for valid_target in status.valid_transitions() {
                assert!(status.can_transition_to(&valid_target));
            }
        }
    }
}

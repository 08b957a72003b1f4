//! Subscription status state machine.

use crate::domain::foundation::StateMachine;
use serde::{Deserialize, Serialize};

/// Subscription lifecycle status.
///
/// Cancellation is unconditionally permitted from any non-terminal state,
/// immediately or deferred to period end. Canceled is the only terminal
/// state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// In the trial period; converts to Active when the trial ends and the
    /// first charge succeeds.
    Trialing,

    /// Billing normally.
    Active,

    /// A renewal charge failed; the provider is retrying.
    PastDue,

    /// Billing suspended at the user's request.
    Paused,

    /// Retries exhausted without payment.
    Unpaid,

    /// Ended. Terminal.
    Canceled,
}

impl SubscriptionStatus {
    /// Statuses that block creating another subscription for the same user.
    pub fn blocks_new_subscription(&self) -> bool {
        matches!(self, SubscriptionStatus::Active | SubscriptionStatus::Trialing)
    }
}

impl StateMachine for SubscriptionStatus {
    fn can_transition_to(&self, target: &Self) -> bool {
        use SubscriptionStatus::*;

        // Cancellation is always legal from any non-terminal state.
        if *target == Canceled {
            return *self != Canceled;
        }

        matches!(
            (self, target),
            // From TRIALING
            (Trialing, Active)
            // From ACTIVE
                | (Active, PastDue)
                | (Active, Paused)
                | (Active, Unpaid)
                | (Active, Active) // Renewal
            // From PAST_DUE
                | (PastDue, Active)
                | (PastDue, Unpaid)
            // From PAUSED
                | (Paused, Active)
            // From UNPAID (late payment recovers)
                | (Unpaid, Active)
        )
    }

    fn valid_transitions(&self) -> Vec<Self> {
        use SubscriptionStatus::*;
        match self {
            Trialing => vec![Active, Canceled],
            Active => vec![PastDue, Paused, Unpaid, Active, Canceled],
            PastDue => vec![Active, Unpaid, Canceled],
            Paused => vec![Active, Canceled],
            Unpaid => vec![Active, Canceled],
            Canceled => vec![],
        }
    }
}

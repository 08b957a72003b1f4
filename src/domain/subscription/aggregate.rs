//! Subscription aggregate entity.
//!
//! # Invariants
//!
//! - `current_period_end` is strictly after `current_period_start`
//!   (half-open interval, end exclusive)
//! - if `trial_end` is set and in the future, status is Trialing
//! - `cancel_at_period_end` records intent only; the actual Canceled
//!   transition arrives via webhook when the provider ends the period

use serde::{Deserialize, Serialize};

use crate::domain::foundation::{
    Money, PlanId, StateMachine, SubscriptionId, Timestamp, UserId, ValidationError,
};

use super::SubscriptionStatus;

/// Subscription aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,

    pub user_id: UserId,

    /// Reference into the plan catalog.
    pub plan_id: PlanId,

    /// Gateway key of the provider billing this subscription.
    pub gateway: String,

    /// Provider's subscription identifier, set once the provider accepts.
    pub provider_subscription_id: Option<String>,

    pub status: SubscriptionStatus,

    /// Current billing period, half-open: `[start, end)`.
    pub current_period_start: Timestamp,
    pub current_period_end: Timestamp,

    /// End of the trial period, if the subscription started with one.
    pub trial_end: Option<Timestamp>,

    /// Intent flag: cancel when the current period ends. Distinct from
    /// the actual status.
    pub cancel_at_period_end: bool,

    /// Amount charged per billing period.
    pub unit_amount: Money,

    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Subscription {
    /// Creates a new subscription with locally computed period fields.
    ///
    /// Starts Trialing when `trial_end` is set, Active otherwise. The
    /// provider's authoritative period overwrites these fields once the
    /// adapter responds.
    pub fn create(
        id: SubscriptionId,
        user_id: UserId,
        plan_id: PlanId,
        gateway: impl Into<String>,
        period_start: Timestamp,
        period_end: Timestamp,
        trial_end: Option<Timestamp>,
        unit_amount: Money,
    ) -> Result<Self, ValidationError> {
        if !period_end.is_after(&period_start) {
            return Err(ValidationError::invalid_format(
                "current_period_end",
                "period end must be strictly after period start",
            ));
        }

        let status = match trial_end {
            Some(_) => SubscriptionStatus::Trialing,
            None => SubscriptionStatus::Active,
        };

        let now = Timestamp::now();
        Ok(Self {
            id,
            user_id,
            plan_id,
            gateway: gateway.into(),
            provider_subscription_id: None,
            status,
            current_period_start: period_start,
            current_period_end: period_end,
            trial_end,
            cancel_at_period_end: false,
            unit_amount,
            created_at: now,
            updated_at: now,
        })
    }

    /// Overwrites period fields with the provider's authoritative billing
    /// timestamps and attaches the provider's subscription id.
    pub fn attach_provider(
        &mut self,
        provider_subscription_id: impl Into<String>,
        period_start: Timestamp,
        period_end: Timestamp,
    ) -> Result<(), ValidationError> {
        if !period_end.is_after(&period_start) {
            return Err(ValidationError::invalid_format(
                "current_period_end",
                "period end must be strictly after period start",
            ));
        }
        self.provider_subscription_id = Some(provider_subscription_id.into());
        self.current_period_start = period_start;
        self.current_period_end = period_end;
        self.updated_at = Timestamp::now();
        Ok(())
    }

    /// Applies a provider-reported status through the state machine.
    pub fn apply_status(&mut self, new_status: SubscriptionStatus) -> Result<(), ValidationError> {
        self.status = self.status.transition_to(new_status)?;
        self.updated_at = Timestamp::now();
        Ok(())
    }

    /// Records the deferred-cancellation intent without changing status.
    pub fn request_cancel_at_period_end(&mut self) {
        self.cancel_at_period_end = true;
        self.updated_at = Timestamp::now();
    }

    /// Cancels immediately.
    pub fn cancel_now(&mut self) -> Result<(), ValidationError> {
        self.status = self.status.transition_to(SubscriptionStatus::Canceled)?;
        self.updated_at = Timestamp::now();
        Ok(())
    }

    /// Moves the subscription onto a new plan after provider confirmation.
    pub fn change_plan(&mut self, plan_id: PlanId, unit_amount: Money) {
        self.plan_id = plan_id;
        self.unit_amount = unit_amount;
        self.updated_at = Timestamp::now();
    }

    /// Updates the billing period (renewal) keeping status Active.
    pub fn renew(
        &mut self,
        period_start: Timestamp,
        period_end: Timestamp,
    ) -> Result<(), ValidationError> {
        if !period_end.is_after(&period_start) {
            return Err(ValidationError::invalid_format(
                "current_period_end",
                "period end must be strictly after period start",
            ));
        }
        self.status = self.status.transition_to(SubscriptionStatus::Active)?;
        self.current_period_start = period_start;
        self.current_period_end = period_end;
        self.updated_at = Timestamp::now();
        Ok(())
    }

    /// Trial invariant: a future trial_end requires Trialing status.
    pub fn trial_invariant_holds(&self, now: Timestamp) -> bool {
        match self.trial_end {
            Some(trial_end) if trial_end.is_after(&now) => {
                self.status == SubscriptionStatus::Trialing
                    || self.status == SubscriptionStatus::Canceled
            }
            _ => true,
        }
    }
}

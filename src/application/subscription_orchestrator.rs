//! Subscription orchestrator: opens, changes, and cancels subscriptions
//! and mirrors provider-reported lifecycle changes.
//!
//! One user holds at most one Active or Trialing subscription; the
//! check runs before the local row is written. The local row is created
//! before the provider call and the provider's period timestamps
//! overwrite the locally computed ones on acknowledgment, so a timeout
//! leaves a recoverable row that the provider's webhook (matched via
//! the echoed local reference) can attach to later.

use std::sync::Arc;

use tracing::{info, warn};

use crate::domain::foundation::{PlanId, SubscriptionId, Timestamp, UserId, ValidationError};
use crate::domain::subscription::{Subscription, SubscriptionError, SubscriptionStatus};
use crate::ports::{
    ConditionalUpdate, CreateSubscriptionRequest, CustomerDirectory, PlanCatalog,
    SubscriptionRepository, UpdateSubscriptionRequest,
};

use super::registry::{ProviderCallError, ProviderRegistry};
use super::ApplyOutcome;

const MAX_CAS_ATTEMPTS: u32 = 3;

/// Command to open a subscription on a catalog plan.
#[derive(Debug, Clone)]
pub struct CreateSubscriptionCommand {
    pub user_id: UserId,
    pub plan_id: PlanId,
    pub gateway: String,
    pub trial_end: Option<Timestamp>,
}

pub struct SubscriptionOrchestrator {
    subscriptions: Arc<dyn SubscriptionRepository>,
    plans: Arc<dyn PlanCatalog>,
    registry: Arc<ProviderRegistry>,
    customers: Arc<dyn CustomerDirectory>,
}

impl SubscriptionOrchestrator {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionRepository>,
        plans: Arc<dyn PlanCatalog>,
        registry: Arc<ProviderRegistry>,
        customers: Arc<dyn CustomerDirectory>,
    ) -> Self {
        Self {
            subscriptions,
            plans,
            registry,
            customers,
        }
    }

    /// Opens a subscription: enforces the one-active rule, writes the
    /// local row, then registers it with the provider.
    pub async fn create_subscription(
        &self,
        cmd: CreateSubscriptionCommand,
    ) -> Result<Subscription, SubscriptionError> {
        if let Some(existing) = self.subscriptions.find_blocking_for_user(cmd.user_id).await? {
            warn!(
                user_id = %cmd.user_id,
                existing = %existing.id,
                "subscription rejected: user already subscribed"
            );
            return Err(SubscriptionError::AlreadySubscribed(cmd.user_id));
        }

        let plan = self
            .plans
            .find_plan(cmd.plan_id)
            .await?
            .ok_or(SubscriptionError::PlanNotFound(cmd.plan_id))?;
        let adapter = self.registry.adapter(&cmd.gateway).map_err(|_| {
            SubscriptionError::Validation(ValidationError::invalid_format(
                "gateway",
                cmd.gateway.clone(),
            ))
        })?;

        // Locally computed period; the provider's authoritative one
        // replaces it on acknowledgment.
        let period_start = Timestamp::now();
        let period_end = plan.period_end_from(period_start);
        let mut subscription = Subscription::create(
            SubscriptionId::new(),
            cmd.user_id,
            cmd.plan_id,
            cmd.gateway.clone(),
            period_start,
            period_end,
            cmd.trial_end,
            plan.unit_amount,
        )?;
        let initial_status = subscription.status;
        self.subscriptions.insert(&subscription).await?;

        let customer_ref = self
            .customers
            .customer_ref(cmd.user_id, &cmd.gateway)
            .await?;
        let request = CreateSubscriptionRequest {
            customer_ref,
            provider_price_id: plan.provider_price_id.clone(),
            trial_end: cmd.trial_end,
            local_reference: subscription.id.to_string(),
        };

        match self.registry.call(adapter.create_subscription(request)).await {
            Ok(provider_subscription) => {
                subscription.attach_provider(
                    &provider_subscription.provider_subscription_id,
                    provider_subscription.current_period_start,
                    provider_subscription.current_period_end,
                )?;
                if provider_subscription.status != subscription.status {
                    subscription
                        .apply_status(provider_subscription.status)
                        .map_err(|e| SubscriptionError::IllegalTransition(e.to_string()))?;
                }
                self.store_transition(&subscription, initial_status).await?;
                info!(subscription_id = %subscription.id, "subscription opened");
                Ok(subscription)
            }
            Err(ProviderCallError::Provider(e)) if !e.retryable => {
                // Definitive rejection: the provider holds nothing, so the
                // local row is canceled and stops blocking the user.
                subscription
                    .cancel_now()
                    .map_err(|e| SubscriptionError::IllegalTransition(e.to_string()))?;
                self.store_transition(&subscription, initial_status).await?;
                warn!(subscription_id = %subscription.id, error = %e, "subscription rejected by provider");
                Err(SubscriptionError::provider(e.message, false))
            }
            Err(e) => {
                // Outcome unknown: keep the row; the provider's webhook can
                // attach via the echoed local reference.
                warn!(subscription_id = %subscription.id, error = %e, "provider call did not complete");
                Err(map_call_error(e))
            }
        }
    }

    /// Cancels a subscription, immediately or at period end.
    ///
    /// Deferred cancellation records intent only; the Canceled transition
    /// arrives via webhook when the provider ends the period.
    pub async fn cancel_subscription(
        &self,
        subscription_id: SubscriptionId,
        at_period_end: bool,
    ) -> Result<Subscription, SubscriptionError> {
        let mut subscription = self.require(subscription_id).await?;
        if subscription.status == SubscriptionStatus::Canceled {
            return Ok(subscription);
        }
        let expected = subscription.status;

        if let Some(provider_subscription_id) = subscription.provider_subscription_id.clone() {
            let adapter = self.registry.adapter(&subscription.gateway).map_err(|_| {
                SubscriptionError::Validation(ValidationError::invalid_format(
                    "gateway",
                    subscription.gateway.clone(),
                ))
            })?;
            self.registry
                .call(adapter.cancel_subscription(&provider_subscription_id, at_period_end))
                .await
                .map_err(map_call_error)?;
        }

        if at_period_end {
            subscription.request_cancel_at_period_end();
        } else {
            subscription
                .cancel_now()
                .map_err(|e| SubscriptionError::IllegalTransition(e.to_string()))?;
        }
        self.store_transition(&subscription, expected).await?;
        info!(
            subscription_id = %subscription.id,
            at_period_end,
            "subscription cancellation recorded"
        );
        Ok(subscription)
    }

    /// Moves a subscription onto a different catalog plan.
    pub async fn change_plan(
        &self,
        subscription_id: SubscriptionId,
        new_plan_id: PlanId,
    ) -> Result<Subscription, SubscriptionError> {
        let mut subscription = self.require(subscription_id).await?;
        let expected = subscription.status;
        let plan = self
            .plans
            .find_plan(new_plan_id)
            .await?
            .ok_or(SubscriptionError::PlanNotFound(new_plan_id))?;
        let provider_subscription_id =
            subscription.provider_subscription_id.clone().ok_or_else(|| {
                SubscriptionError::IllegalTransition(
                    "subscription has no provider id yet".to_string(),
                )
            })?;
        let adapter = self.registry.adapter(&subscription.gateway).map_err(|_| {
            SubscriptionError::Validation(ValidationError::invalid_format(
                "gateway",
                subscription.gateway.clone(),
            ))
        })?;

        let provider_subscription = self
            .registry
            .call(adapter.update_subscription(UpdateSubscriptionRequest {
                provider_subscription_id,
                provider_price_id: plan.provider_price_id.clone(),
            }))
            .await
            .map_err(map_call_error)?;

        subscription.change_plan(new_plan_id, plan.unit_amount);
        subscription.attach_provider(
            &provider_subscription.provider_subscription_id,
            provider_subscription.current_period_start,
            provider_subscription.current_period_end,
        )?;
        self.store_transition(&subscription, expected).await?;
        info!(subscription_id = %subscription.id, plan_id = %new_plan_id, "subscription plan changed");
        Ok(subscription)
    }

    pub async fn get_subscription(
        &self,
        subscription_id: SubscriptionId,
    ) -> Result<Subscription, SubscriptionError> {
        self.require(subscription_id).await
    }

    /// Mirrors a provider-reported lifecycle update (status, billing
    /// period, deferred-cancel flag). Webhook entry point.
    pub async fn record_provider_update(
        &self,
        gateway: &str,
        provider_subscription_id: &str,
        local_reference: Option<&str>,
        status: SubscriptionStatus,
        period_start: Timestamp,
        period_end: Timestamp,
        cancel_at_period_end: bool,
    ) -> Result<ApplyOutcome, SubscriptionError> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let Some(mut subscription) = self
                .match_subscription(gateway, provider_subscription_id, local_reference)
                .await?
            else {
                return Ok(ApplyOutcome::Unmatched);
            };
            let expected = subscription.status;

            if subscription.provider_subscription_id.is_none() {
                // Abandoned creation recovered via local reference.
                subscription.attach_provider(provider_subscription_id, period_start, period_end)?;
            } else if period_end.is_after(&period_start) {
                subscription.current_period_start = period_start;
                subscription.current_period_end = period_end;
            }
            subscription.cancel_at_period_end = cancel_at_period_end;

            if subscription.status != status {
                if let Err(e) = subscription.apply_status(status) {
                    warn!(
                        subscription_id = %subscription.id,
                        from = ?expected,
                        to = ?status,
                        error = %e,
                        "out-of-order subscription update, ignoring"
                    );
                    return Ok(ApplyOutcome::StaleIgnored);
                }
            }

            match self
                .subscriptions
                .update_if_status(&subscription, expected)
                .await?
            {
                ConditionalUpdate::Applied => {
                    info!(subscription_id = %subscription.id, status = ?status, "subscription updated via webhook");
                    return Ok(ApplyOutcome::Applied);
                }
                ConditionalUpdate::StaleStatus => continue,
            }
        }
        Err(SubscriptionError::Infrastructure(
            "subscription update contention exhausted retries".to_string(),
        ))
    }

    /// Mirrors a provider-side cancellation. Webhook entry point.
    pub async fn record_provider_cancellation(
        &self,
        gateway: &str,
        provider_subscription_id: &str,
        local_reference: Option<&str>,
    ) -> Result<ApplyOutcome, SubscriptionError> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let Some(mut subscription) = self
                .match_subscription(gateway, provider_subscription_id, local_reference)
                .await?
            else {
                return Ok(ApplyOutcome::Unmatched);
            };
            if subscription.status == SubscriptionStatus::Canceled {
                return Ok(ApplyOutcome::AlreadyApplied);
            }
            let expected = subscription.status;
            subscription
                .cancel_now()
                .map_err(|e| SubscriptionError::IllegalTransition(e.to_string()))?;

            match self
                .subscriptions
                .update_if_status(&subscription, expected)
                .await?
            {
                ConditionalUpdate::Applied => {
                    info!(subscription_id = %subscription.id, "subscription canceled via webhook");
                    return Ok(ApplyOutcome::Applied);
                }
                ConditionalUpdate::StaleStatus => continue,
            }
        }
        Err(SubscriptionError::Infrastructure(
            "subscription cancel contention exhausted retries".to_string(),
        ))
    }

    /// Marks a subscription PastDue after a failed renewal charge.
    /// Webhook entry point.
    pub async fn record_payment_failed(
        &self,
        gateway: &str,
        provider_subscription_id: &str,
    ) -> Result<ApplyOutcome, SubscriptionError> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let Some(mut subscription) = self
                .match_subscription(gateway, provider_subscription_id, None)
                .await?
            else {
                return Ok(ApplyOutcome::Unmatched);
            };
            if subscription.status == SubscriptionStatus::PastDue {
                return Ok(ApplyOutcome::AlreadyApplied);
            }
            let expected = subscription.status;
            if let Err(e) = subscription.apply_status(SubscriptionStatus::PastDue) {
                warn!(
                    subscription_id = %subscription.id,
                    from = ?expected,
                    error = %e,
                    "payment-failed event in incompatible status, ignoring"
                );
                return Ok(ApplyOutcome::StaleIgnored);
            }

            match self
                .subscriptions
                .update_if_status(&subscription, expected)
                .await?
            {
                ConditionalUpdate::Applied => {
                    info!(subscription_id = %subscription.id, "subscription past due");
                    return Ok(ApplyOutcome::Applied);
                }
                ConditionalUpdate::StaleStatus => continue,
            }
        }
        Err(SubscriptionError::Infrastructure(
            "subscription update contention exhausted retries".to_string(),
        ))
    }

    async fn match_subscription(
        &self,
        gateway: &str,
        provider_subscription_id: &str,
        local_reference: Option<&str>,
    ) -> Result<Option<Subscription>, SubscriptionError> {
        if let Some(subscription) = self
            .subscriptions
            .find_by_provider_subscription_id(gateway, provider_subscription_id)
            .await?
        {
            return Ok(Some(subscription));
        }
        if let Some(reference) = local_reference {
            if let Ok(id) = reference.parse::<SubscriptionId>() {
                return Ok(self.subscriptions.find(id).await?);
            }
        }
        Ok(None)
    }

    async fn require(
        &self,
        subscription_id: SubscriptionId,
    ) -> Result<Subscription, SubscriptionError> {
        self.subscriptions
            .find(subscription_id)
            .await?
            .ok_or(SubscriptionError::NotFound(subscription_id))
    }

    async fn store_transition(
        &self,
        subscription: &Subscription,
        expected: SubscriptionStatus,
    ) -> Result<(), SubscriptionError> {
        match self
            .subscriptions
            .update_if_status(subscription, expected)
            .await?
        {
            ConditionalUpdate::Applied => Ok(()),
            ConditionalUpdate::StaleStatus => Err(SubscriptionError::IllegalTransition(
                "subscription changed concurrently".to_string(),
            )),
        }
    }
}

fn map_call_error(e: ProviderCallError) -> SubscriptionError {
    match e {
        ProviderCallError::UnknownGateway(g) => {
            SubscriptionError::Validation(ValidationError::invalid_format("gateway", g))
        }
        ProviderCallError::Timeout { timeout_secs } => {
            SubscriptionError::ProviderTimeout { timeout_secs }
        }
        ProviderCallError::Provider(p) => SubscriptionError::provider(p.message, p.retryable),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{
        InMemorySubscriptionRepository, StaticCustomerDirectory, StaticPlanCatalog,
    };
    use crate::adapters::mock::{MockProviderAdapter, MOCK_GATEWAY};
    use crate::domain::foundation::{Currency, Money};
    use crate::domain::subscription::{BillingInterval, SubscriptionPlan};
    use crate::ports::ProviderError;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    struct Fixture {
        orchestrator: SubscriptionOrchestrator,
        subscriptions: Arc<InMemorySubscriptionRepository>,
        adapter: Arc<MockProviderAdapter>,
        user_id: UserId,
        plan_id: PlanId,
        yearly_plan_id: PlanId,
    }

    fn usd(amount: rust_decimal::Decimal) -> Money {
        Money::new(amount, Currency::new("USD").unwrap())
    }

    async fn fixture() -> Fixture {
        let subscriptions = Arc::new(InMemorySubscriptionRepository::new());
        let adapter = Arc::new(MockProviderAdapter::new());
        let registry = Arc::new(
            ProviderRegistry::new(Duration::from_secs(5))
                .register(MOCK_GATEWAY, adapter.clone()),
        );
        let customers = Arc::new(StaticCustomerDirectory::new());
        let plans = Arc::new(StaticPlanCatalog::new());
        let user_id = UserId::new();
        customers.put(user_id, MOCK_GATEWAY, "cus_test").await;

        let plan_id = PlanId::new();
        plans
            .put(SubscriptionPlan {
                id: plan_id,
                provider_price_id: "price_monthly".to_string(),
                interval: BillingInterval::Month,
                interval_count: 1,
                unit_amount: usd(dec!(9.99)),
            })
            .await;
        let yearly_plan_id = PlanId::new();
        plans
            .put(SubscriptionPlan {
                id: yearly_plan_id,
                provider_price_id: "price_yearly".to_string(),
                interval: BillingInterval::Year,
                interval_count: 1,
                unit_amount: usd(dec!(99.00)),
            })
            .await;

        let orchestrator =
            SubscriptionOrchestrator::new(subscriptions.clone(), plans, registry, customers);
        Fixture {
            orchestrator,
            subscriptions,
            adapter,
            user_id,
            plan_id,
            yearly_plan_id,
        }
    }

    fn command(f: &Fixture) -> CreateSubscriptionCommand {
        CreateSubscriptionCommand {
            user_id: f.user_id,
            plan_id: f.plan_id,
            gateway: MOCK_GATEWAY.to_string(),
            trial_end: None,
        }
    }

    #[tokio::test]
    async fn create_opens_active_subscription_with_provider_period() {
        let f = fixture().await;

        let subscription = f
            .orchestrator
            .create_subscription(command(&f))
            .await
            .unwrap();

        assert_eq!(subscription.status, SubscriptionStatus::Active);
        assert!(subscription.provider_subscription_id.is_some());
        assert!(subscription
            .current_period_end
            .is_after(&subscription.current_period_start));

        let requests = f.adapter.subscription_requests.lock().unwrap();
        assert_eq!(requests[0].local_reference, subscription.id.to_string());
    }

    #[tokio::test]
    async fn trial_subscription_starts_trialing() {
        let f = fixture().await;
        let mut cmd = command(&f);
        cmd.trial_end = Some(Timestamp::now().add_days(14));

        let subscription = f
            .orchestrator
            .create_subscription(cmd)
            .await
            .unwrap();

        assert_eq!(subscription.status, SubscriptionStatus::Trialing);
        assert!(subscription.trial_invariant_holds(Timestamp::now()));
    }

    #[tokio::test]
    async fn second_subscription_for_same_user_is_rejected() {
        let f = fixture().await;
        f.orchestrator
            .create_subscription(command(&f))
            .await
            .unwrap();

        let result = f.orchestrator.create_subscription(command(&f)).await;

        assert!(matches!(
            result,
            Err(SubscriptionError::AlreadySubscribed(u)) if u == f.user_id
        ));
    }

    #[tokio::test]
    async fn canceled_subscription_does_not_block_a_new_one() {
        let f = fixture().await;
        let first = f
            .orchestrator
            .create_subscription(command(&f))
            .await
            .unwrap();
        f.orchestrator
            .cancel_subscription(first.id, false)
            .await
            .unwrap();

        let second = f.orchestrator.create_subscription(command(&f)).await;

        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn unknown_plan_is_rejected() {
        let f = fixture().await;
        let mut cmd = command(&f);
        cmd.plan_id = PlanId::new();

        let result = f.orchestrator.create_subscription(cmd).await;

        assert!(matches!(result, Err(SubscriptionError::PlanNotFound(_))));
    }

    #[tokio::test]
    async fn provider_rejection_cancels_the_local_row() {
        let f = fixture().await;
        f.adapter
            .script_subscription(Err(ProviderError::rejected("card_declined", None)));

        let result = f.orchestrator.create_subscription(command(&f)).await;

        assert!(matches!(result, Err(SubscriptionError::Provider { retryable: false, .. })));
        // The user is free to try again.
        let blocking = f
            .subscriptions
            .find_blocking_for_user(f.user_id)
            .await
            .unwrap();
        assert!(blocking.is_none());
    }

    #[tokio::test]
    async fn deferred_cancel_records_intent_without_status_change() {
        let f = fixture().await;
        let subscription = f
            .orchestrator
            .create_subscription(command(&f))
            .await
            .unwrap();

        let canceled = f
            .orchestrator
            .cancel_subscription(subscription.id, true)
            .await
            .unwrap();

        assert_eq!(canceled.status, SubscriptionStatus::Active);
        assert!(canceled.cancel_at_period_end);
        assert_eq!(
            f.adapter.canceled_subscriptions.lock().unwrap()[0],
            (subscription.provider_subscription_id.unwrap(), true)
        );
    }

    #[tokio::test]
    async fn immediate_cancel_transitions_to_canceled() {
        let f = fixture().await;
        let subscription = f
            .orchestrator
            .create_subscription(command(&f))
            .await
            .unwrap();

        let canceled = f
            .orchestrator
            .cancel_subscription(subscription.id, false)
            .await
            .unwrap();

        assert_eq!(canceled.status, SubscriptionStatus::Canceled);
    }

    #[tokio::test]
    async fn change_plan_updates_plan_and_amount() {
        let f = fixture().await;
        let subscription = f
            .orchestrator
            .create_subscription(command(&f))
            .await
            .unwrap();

        let changed = f
            .orchestrator
            .change_plan(subscription.id, f.yearly_plan_id)
            .await
            .unwrap();

        assert_eq!(changed.plan_id, f.yearly_plan_id);
        assert_eq!(changed.unit_amount.amount, dec!(99.00));
    }

    #[tokio::test]
    async fn webhook_renewal_rolls_the_billing_period() {
        let f = fixture().await;
        let subscription = f
            .orchestrator
            .create_subscription(command(&f))
            .await
            .unwrap();
        let provider_id = subscription.provider_subscription_id.clone().unwrap();
        let new_start = subscription.current_period_end;
        let new_end = new_start.add_months(1);

        let outcome = f
            .orchestrator
            .record_provider_update(
                MOCK_GATEWAY,
                &provider_id,
                None,
                SubscriptionStatus::Active,
                new_start,
                new_end,
                false,
            )
            .await
            .unwrap();

        assert_eq!(outcome, ApplyOutcome::Applied);
        let stored = f.subscriptions.find(subscription.id).await.unwrap().unwrap();
        assert_eq!(stored.current_period_start, new_start);
        assert_eq!(stored.current_period_end, new_end);
    }

    #[tokio::test]
    async fn webhook_cancellation_is_idempotent() {
        let f = fixture().await;
        let subscription = f
            .orchestrator
            .create_subscription(command(&f))
            .await
            .unwrap();
        let provider_id = subscription.provider_subscription_id.clone().unwrap();

        let first = f
            .orchestrator
            .record_provider_cancellation(MOCK_GATEWAY, &provider_id, None)
            .await
            .unwrap();
        let second = f
            .orchestrator
            .record_provider_cancellation(MOCK_GATEWAY, &provider_id, None)
            .await
            .unwrap();

        assert_eq!(first, ApplyOutcome::Applied);
        assert_eq!(second, ApplyOutcome::AlreadyApplied);
    }

    #[tokio::test]
    async fn renewal_payment_failure_marks_past_due() {
        let f = fixture().await;
        let subscription = f
            .orchestrator
            .create_subscription(command(&f))
            .await
            .unwrap();
        let provider_id = subscription.provider_subscription_id.clone().unwrap();

        let outcome = f
            .orchestrator
            .record_payment_failed(MOCK_GATEWAY, &provider_id)
            .await
            .unwrap();

        assert_eq!(outcome, ApplyOutcome::Applied);
        let stored = f.subscriptions.find(subscription.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SubscriptionStatus::PastDue);
    }

    #[tokio::test]
    async fn unmatched_webhook_subscription_is_reported() {
        let f = fixture().await;

        let outcome = f
            .orchestrator
            .record_provider_cancellation(MOCK_GATEWAY, "sub_ghost", None)
            .await
            .unwrap();

        assert_eq!(outcome, ApplyOutcome::Unmatched);
    }
}

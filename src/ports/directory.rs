//! Lookup ports for data owned outside this crate: provider customer
//! handles and the plan catalog.

use async_trait::async_trait;

use crate::domain::foundation::{DomainError, PlanId, UserId};
use crate::domain::subscription::SubscriptionPlan;

/// Resolves a user to their customer handle at a given gateway.
#[async_trait]
pub trait CustomerDirectory: Send + Sync {
    /// Returns the gateway's customer id for the user, creating the
    /// customer at the provider if the implementation supports it.
    async fn customer_ref(&self, user_id: UserId, gateway: &str) -> Result<String, DomainError>;
}

/// Read access to the subscription plan catalog.
#[async_trait]
pub trait PlanCatalog: Send + Sync {
    async fn find_plan(&self, plan_id: PlanId) -> Result<Option<SubscriptionPlan>, DomainError>;
}

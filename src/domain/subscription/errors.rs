//! Subscription-specific error types.

use thiserror::Error;

use crate::domain::foundation::{
    DomainError, ErrorCode, PlanId, SubscriptionId, UserId, ValidationError,
};

/// Errors from subscription operations.
#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Subscription not found: {0}")]
    NotFound(SubscriptionId),

    #[error("Plan not found: {0}")]
    PlanNotFound(PlanId),

    /// One active subscription per user; enforced here, not at the
    /// storage layer.
    #[error("User {0} already has an active or trialing subscription")]
    AlreadySubscribed(UserId),

    #[error("Invalid state transition: {0}")]
    IllegalTransition(String),

    #[error("Provider error: {message}")]
    Provider { message: String, retryable: bool },

    #[error("Provider call timed out after {timeout_secs}s")]
    ProviderTimeout { timeout_secs: u64 },

    #[error("Infrastructure error: {0}")]
    Infrastructure(String),
}

impl SubscriptionError {
    pub fn provider(message: impl Into<String>, retryable: bool) -> Self {
        SubscriptionError::Provider {
            message: message.into(),
            retryable,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SubscriptionError::Provider { retryable: true, .. }
                | SubscriptionError::ProviderTimeout { .. }
                | SubscriptionError::Infrastructure(_)
        )
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            SubscriptionError::Validation(_) => ErrorCode::ValidationFailed,
            SubscriptionError::NotFound(_) => ErrorCode::SubscriptionNotFound,
            SubscriptionError::PlanNotFound(_) => ErrorCode::PlanNotFound,
            SubscriptionError::AlreadySubscribed(_) => ErrorCode::DuplicateSubscription,
            SubscriptionError::IllegalTransition(_) => ErrorCode::InvalidStateTransition,
            SubscriptionError::Provider { .. } => ErrorCode::ProviderError,
            SubscriptionError::ProviderTimeout { .. } => ErrorCode::ProviderTimeout,
            SubscriptionError::Infrastructure(_) => ErrorCode::DatabaseError,
        }
    }
}

impl From<DomainError> for SubscriptionError {
    fn from(err: DomainError) -> Self {
        SubscriptionError::Infrastructure(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn already_subscribed_is_a_conflict_not_retryable() {
        let err = SubscriptionError::AlreadySubscribed(UserId::new());
        assert_eq!(err.code(), ErrorCode::DuplicateSubscription);
        assert!(!err.is_retryable());
    }

    #[test]
    fn timeout_is_retryable() {
        assert!(SubscriptionError::ProviderTimeout { timeout_secs: 10 }.is_retryable());
    }

    #[test]
    fn display_names_the_user_for_conflicts() {
        let user = UserId::new();
        let err = SubscriptionError::AlreadySubscribed(user);
        assert!(err.to_string().contains(&user.to_string()));
    }
}

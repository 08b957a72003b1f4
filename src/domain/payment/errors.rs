//! Payment flow error taxonomy.
//!
//! Four families, matching how callers must react:
//! - validation: rejected before any persistence or network call
//! - conflict: a named business rule blocked the operation, nothing mutated
//! - provider: the adapter call failed or timed out; local record keeps its
//!   pre-call status (webhook reconciliation is the safety net)
//! - infrastructure: repository failures

use thiserror::Error;

use crate::domain::foundation::{DomainError, ErrorCode, PaymentId, RefundId, ValidationError};

/// Named conflict kinds, surfaced so callers can distinguish business
/// rejections without string matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// The requested status transition is illegal from the current status.
    IllegalTransition,
    /// Refund amount exceeds the remaining refundable amount.
    RefundExceedsRemaining,
    /// The payment is not in a refundable status.
    NotRefundable,
    /// Refund currency does not match the payment currency.
    CurrencyMismatch,
}

/// Errors from payment and refund operations.
#[derive(Debug, Error)]
pub enum PaymentFlowError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Payment not found: {0}")]
    PaymentNotFound(PaymentId),

    #[error("Refund not found: {0}")]
    RefundNotFound(RefundId),

    #[error("Conflict ({kind:?}): {message}")]
    Conflict { kind: ConflictKind, message: String },

    #[error("Provider error: {message}")]
    Provider { message: String, retryable: bool },

    #[error("Provider call timed out after {timeout_secs}s")]
    ProviderTimeout { timeout_secs: u64 },

    #[error("Infrastructure error: {0}")]
    Infrastructure(String),
}

impl PaymentFlowError {
    pub fn conflict(kind: ConflictKind, message: impl Into<String>) -> Self {
        PaymentFlowError::Conflict {
            kind,
            message: message.into(),
        }
    }

    pub fn provider(message: impl Into<String>, retryable: bool) -> Self {
        PaymentFlowError::Provider {
            message: message.into(),
            retryable,
        }
    }

    /// Whether the caller may retry the operation as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PaymentFlowError::Provider { retryable: true, .. }
                | PaymentFlowError::ProviderTimeout { .. }
                | PaymentFlowError::Infrastructure(_)
        )
    }

    /// Returns the error code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            PaymentFlowError::Validation(_) => ErrorCode::ValidationFailed,
            PaymentFlowError::PaymentNotFound(_) => ErrorCode::PaymentNotFound,
            PaymentFlowError::RefundNotFound(_) => ErrorCode::RefundNotFound,
            PaymentFlowError::Conflict { kind, .. } => match kind {
                ConflictKind::IllegalTransition => ErrorCode::InvalidStateTransition,
                ConflictKind::RefundExceedsRemaining => ErrorCode::RefundExceedsRemaining,
                ConflictKind::NotRefundable => ErrorCode::NotRefundable,
                ConflictKind::CurrencyMismatch => ErrorCode::CurrencyMismatch,
            },
            PaymentFlowError::Provider { .. } => ErrorCode::ProviderError,
            PaymentFlowError::ProviderTimeout { .. } => ErrorCode::ProviderTimeout,
            PaymentFlowError::Infrastructure(_) => ErrorCode::DatabaseError,
        }
    }
}

impl From<DomainError> for PaymentFlowError {
    fn from(err: DomainError) -> Self {
        PaymentFlowError::Infrastructure(err.to_string())
    }
}

//! Persistence ports for payments, refunds, subscriptions, and invoices.
//!
//! Status-bearing rows are written with *conditional* updates: the write
//! carries the status the caller read, and the store applies it only if
//! the row still holds that status. A lost race surfaces as
//! `ConditionalUpdate::StaleStatus` and the caller re-reads, instead of
//! silently overwriting a concurrent transition.

use async_trait::async_trait;

use crate::domain::foundation::{
    DomainError, InvoiceId, Money, PaymentId, RefundId, SubscriptionId, UserId,
};
use crate::domain::invoice::{Invoice, InvoiceStatus};
use crate::domain::payment::{Payment, PaymentStatus, Refund, RefundStatus};
use crate::domain::subscription::{Subscription, SubscriptionStatus};

/// Outcome of a compare-and-set write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionalUpdate {
    /// The row still held the expected status and was updated.
    Applied,
    /// Another writer moved the row first; nothing was written.
    StaleStatus,
}

#[async_trait]
pub trait PaymentRepository: Send + Sync {
    async fn insert(&self, payment: &Payment) -> Result<(), DomainError>;

    async fn find(&self, id: PaymentId) -> Result<Option<Payment>, DomainError>;

    /// Looks a payment up by the provider's id, scoped to one gateway.
    async fn find_by_provider_payment_id(
        &self,
        gateway: &str,
        provider_payment_id: &str,
    ) -> Result<Option<Payment>, DomainError>;

    /// Writes all mutable fields, but only while the stored row still
    /// has `expected` status.
    async fn update_if_status(
        &self,
        payment: &Payment,
        expected: PaymentStatus,
    ) -> Result<ConditionalUpdate, DomainError>;
}

#[async_trait]
pub trait RefundRepository: Send + Sync {
    async fn insert(&self, refund: &Refund) -> Result<(), DomainError>;

    async fn find(&self, id: RefundId) -> Result<Option<Refund>, DomainError>;

    async fn find_by_provider_refund_id(
        &self,
        gateway: &str,
        provider_refund_id: &str,
    ) -> Result<Option<Refund>, DomainError>;

    /// All refunds against one payment, any status.
    async fn list_for_payment(&self, payment_id: PaymentId) -> Result<Vec<Refund>, DomainError>;

    async fn update_if_status(
        &self,
        refund: &Refund,
        expected: RefundStatus,
    ) -> Result<ConditionalUpdate, DomainError>;
}

#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    async fn insert(&self, subscription: &Subscription) -> Result<(), DomainError>;

    async fn find(&self, id: SubscriptionId) -> Result<Option<Subscription>, DomainError>;

    async fn find_by_provider_subscription_id(
        &self,
        gateway: &str,
        provider_subscription_id: &str,
    ) -> Result<Option<Subscription>, DomainError>;

    /// The user's subscription in a status that blocks opening another
    /// one (active or trialing), if any.
    async fn find_blocking_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Option<Subscription>, DomainError>;

    async fn update_if_status(
        &self,
        subscription: &Subscription,
        expected: SubscriptionStatus,
    ) -> Result<ConditionalUpdate, DomainError>;
}

#[async_trait]
pub trait InvoiceRepository: Send + Sync {
    async fn insert(&self, invoice: &Invoice) -> Result<(), DomainError>;

    async fn find(&self, id: InvoiceId) -> Result<Option<Invoice>, DomainError>;

    /// Writes the balance and status, but only while the stored row
    /// still holds both values the caller read. Guarding the status
    /// alone is not enough here: two partial credits can leave the
    /// status untouched, and the second write would silently drop the
    /// first.
    async fn update_if_unchanged(
        &self,
        invoice: &Invoice,
        expected_status: InvoiceStatus,
        expected_paid: Money,
    ) -> Result<ConditionalUpdate, DomainError>;
}

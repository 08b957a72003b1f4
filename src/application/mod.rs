//! Application layer: orchestrators coordinating domain entities,
//! repositories, and provider adapters.

pub mod invoice_reconciler;
pub mod payment_orchestrator;
pub mod refund_reconciler;
pub mod registry;
pub mod subscription_orchestrator;
pub mod webhook_processor;

pub use invoice_reconciler::InvoiceReconciler;
pub use payment_orchestrator::{CreatePaymentCommand, PaymentOrchestrator};
pub use refund_reconciler::{CreateRefundCommand, RefundReconciler};
pub use registry::{ProviderCallError, ProviderRegistry};
pub use subscription_orchestrator::{CreateSubscriptionCommand, SubscriptionOrchestrator};
pub use webhook_processor::{SweepReport, WebhookProcessor};

/// How a webhook-driven state change landed on its target entity.
///
/// Idempotent entry points report "nothing to do" distinctly from "done",
/// so the webhook processor can acknowledge duplicates and stale events
/// while keeping unmatched references retryable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The transition was applied and stored.
    Applied,
    /// The entity already reflects this event.
    AlreadyApplied,
    /// The event is out of order for the entity's current status and was
    /// deliberately skipped.
    StaleIgnored,
    /// No local entity matches the event's references.
    Unmatched,
}

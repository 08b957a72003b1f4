//! Shared domain primitives.
//!
//! - `ids` - Strongly-typed UUID identifiers
//! - `money` - Exact decimal Money and validated Currency
//! - `timestamp` - UTC instant value object with calendar-aware arithmetic
//! - `state_machine` - Transition trait enforced at a single choke point
//! - `errors` - ValidationError / ErrorCode / DomainError

mod errors;
mod ids;
mod money;
mod state_machine;
mod timestamp;

pub use errors::{DomainError, ErrorCode, ValidationError};
pub use ids::{
    InvoiceId, PaymentId, PlanId, RefundId, SubscriptionId, UserId, WebhookEventId,
};
pub use money::{Currency, Money};
pub use state_machine::StateMachine;
pub use timestamp::Timestamp;

//! Subscription domain module.
//!
//! # Module Structure
//!
//! - `aggregate` - Subscription aggregate entity
//! - `plan` - SubscriptionPlan and billing period arithmetic
//! - `status` - SubscriptionStatus state machine
//! - `errors` - Subscription error types

mod aggregate;
mod errors;
mod plan;
mod status;

pub use aggregate::Subscription;
pub use errors::SubscriptionError;
pub use plan::{BillingInterval, SubscriptionPlan};
pub use status::SubscriptionStatus;

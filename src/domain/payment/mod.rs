//! Payment domain module.
//!
//! # Module Structure
//!
//! - `aggregate` - Payment aggregate entity
//! - `refund` - Refund entity owned by a Payment
//! - `status` - PaymentStatus state machine with monotonic ranks
//! - `errors` - Payment flow error taxonomy

mod aggregate;
mod errors;
mod refund;
mod status;

pub use aggregate::{Payment, PaymentKind};
pub use errors::{ConflictKind, PaymentFlowError};
pub use refund::{Refund, RefundStatus};
pub use status::PaymentStatus;

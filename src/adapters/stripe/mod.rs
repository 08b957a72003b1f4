//! Stripe gateway adapter.

mod adapter;
mod event_map;

pub use adapter::{StripeAdapter, StripeConfig, STRIPE_GATEWAY};

//! Paybridge - Payment brokering core.
//!
//! Brokers one-off payments, refunds and recurring subscriptions across
//! interchangeable external payment providers, reconciling the internal
//! ledger against provider-side truth delivered asynchronously via webhooks.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;

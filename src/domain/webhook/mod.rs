//! Webhook event domain: verified inbound events, their canonical
//! provider-agnostic form, and signature verification.

pub mod errors;
pub mod event;
pub mod signature;

pub use errors::WebhookError;
pub use event::{CanonicalEvent, ProviderEvent};
pub use signature::{sign_payload, SignatureHeader, WebhookVerifier};

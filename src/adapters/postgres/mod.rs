//! PostgreSQL adapters - database implementations of the persistence ports.
//!
//! All status-bearing rows are written through compare-and-set updates
//! (`UPDATE ... WHERE id = $1 AND status = $2`) so that the orchestrators'
//! optimistic concurrency carries down into the store. The webhook event
//! log additionally relies on a unique `(gateway, provider_event_id)`
//! index as the idempotency gate.

mod invoice_repository;
mod payment_repository;
mod refund_repository;
mod subscription_repository;
mod webhook_event_repository;

pub use invoice_repository::PostgresInvoiceRepository;
pub use payment_repository::PostgresPaymentRepository;
pub use refund_repository::PostgresRefundRepository;
pub use subscription_repository::PostgresSubscriptionRepository;
pub use webhook_event_repository::PostgresWebhookEventRepository;

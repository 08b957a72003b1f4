//! Ports: trait boundaries between the application layer and the
//! outside world (providers, persistence, directories). Adapters
//! implement them; orchestrators consume them as `Arc<dyn Trait>`.

pub mod directory;
pub mod provider_adapter;
pub mod repositories;
pub mod webhook_event_repository;

pub use directory::{CustomerDirectory, PlanCatalog};
pub use provider_adapter::{
    CreatePaymentRequest, CreateRefundRequest, CreateSubscriptionRequest, ProviderAdapter,
    ProviderError, ProviderPayment, ProviderPaymentState, ProviderRefund, ProviderSubscription,
    UpdateSubscriptionRequest,
};
pub use repositories::{
    ConditionalUpdate, InvoiceRepository, PaymentRepository, RefundRepository,
    SubscriptionRepository,
};
pub use webhook_event_repository::{
    IngestOutcome, SaveResult, WebhookEventRecord, WebhookEventRepository,
};

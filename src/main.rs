//! Webhook sweep binary.
//!
//! Reprocesses stored webhook events whose handlers failed on first
//! delivery (for example a success event that arrived before its payment
//! row existed) and prunes processed events past the retention window.
//! Run it from cron or a scheduler; each invocation is one sweep.

use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use paybridge::adapters::memory::{StaticCustomerDirectory, StaticPlanCatalog};
use paybridge::adapters::postgres::{
    PostgresInvoiceRepository, PostgresPaymentRepository, PostgresRefundRepository,
    PostgresSubscriptionRepository, PostgresWebhookEventRepository,
};
use paybridge::adapters::stripe::{StripeAdapter, StripeConfig, STRIPE_GATEWAY};
use paybridge::application::{
    InvoiceReconciler, PaymentOrchestrator, ProviderRegistry, RefundReconciler,
    SubscriptionOrchestrator, WebhookProcessor,
};
use paybridge::config::AppConfig;
use paybridge::domain::foundation::Timestamp;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::load()?;
    config.validate()?;

    let pool = PgPoolOptions::new()
        .min_connections(config.database.min_connections)
        .max_connections(config.database.max_connections)
        .acquire_timeout(config.database.acquire_timeout())
        .connect(&config.database.url)
        .await?;

    if config.database.run_migrations {
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("Database migrations applied");
    }

    let registry = Arc::new(
        ProviderRegistry::new(Duration::from_secs(config.provider.call_timeout_secs)).register(
            STRIPE_GATEWAY,
            Arc::new(StripeAdapter::new(StripeConfig::new(
                config.provider.stripe_api_key.clone(),
                config.provider.stripe_webhook_secret.clone(),
            ))),
        ),
    );

    let payments = Arc::new(PostgresPaymentRepository::new(pool.clone()));
    let refunds = Arc::new(PostgresRefundRepository::new(pool.clone()));
    let subscriptions = Arc::new(PostgresSubscriptionRepository::new(pool.clone()));
    let invoices = Arc::new(PostgresInvoiceRepository::new(pool.clone()));
    let events = Arc::new(PostgresWebhookEventRepository::new(pool));

    let invoice_reconciler = Arc::new(InvoiceReconciler::new(invoices));
    let payment_orchestrator = Arc::new(PaymentOrchestrator::new(
        payments.clone(),
        registry.clone(),
        // Reprocessing never creates payments, so no customer lookups run.
        Arc::new(StaticCustomerDirectory::new()),
        invoice_reconciler.clone(),
    ));
    let refund_reconciler = Arc::new(RefundReconciler::new(
        refunds,
        payments,
        registry.clone(),
        invoice_reconciler,
    ));
    let subscription_orchestrator = Arc::new(SubscriptionOrchestrator::new(
        subscriptions,
        Arc::new(StaticPlanCatalog::new()),
        registry.clone(),
        Arc::new(StaticCustomerDirectory::new()),
    ));

    let processor = WebhookProcessor::new(
        events,
        registry,
        payment_orchestrator,
        refund_reconciler,
        subscription_orchestrator,
    );

    match processor
        .reprocess_pending(config.sweep.max_retries, config.sweep.batch_limit)
        .await
    {
        Ok(report) => info!(
            scanned = report.scanned,
            processed = report.processed,
            ignored = report.ignored,
            failed = report.failed,
            "Webhook sweep complete"
        ),
        Err(e) => error!(error = %e, "Webhook sweep failed"),
    }

    let cutoff = Timestamp::now().add_days(-(config.sweep.retention_days as i64));
    let deleted = processor.prune_processed(cutoff).await?;
    info!(deleted, "Webhook retention prune complete");

    Ok(())
}

//! In-memory adapter implementations of the persistence and directory
//! ports. Used by tests and local experimentation; the conditional
//! update semantics mirror the Postgres adapters exactly.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::foundation::{
    DomainError, InvoiceId, Money, PaymentId, PlanId, RefundId, SubscriptionId, Timestamp,
    UserId, WebhookEventId,
};
use crate::domain::invoice::{Invoice, InvoiceStatus};
use crate::domain::payment::{Payment, PaymentStatus, Refund, RefundStatus};
use crate::domain::subscription::{Subscription, SubscriptionPlan, SubscriptionStatus};
use crate::ports::{
    ConditionalUpdate, CustomerDirectory, InvoiceRepository, PaymentRepository, PlanCatalog,
    RefundRepository, SaveResult, SubscriptionRepository, WebhookEventRecord,
    WebhookEventRepository,
};

#[derive(Default)]
pub struct InMemoryPaymentRepository {
    rows: Arc<RwLock<HashMap<PaymentId, Payment>>>,
}

impl InMemoryPaymentRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentRepository for InMemoryPaymentRepository {
    async fn insert(&self, payment: &Payment) -> Result<(), DomainError> {
        let mut rows = self.rows.write().await;
        rows.insert(payment.id, payment.clone());
        Ok(())
    }

    async fn find(&self, id: PaymentId) -> Result<Option<Payment>, DomainError> {
        Ok(self.rows.read().await.get(&id).cloned())
    }

    async fn find_by_provider_payment_id(
        &self,
        gateway: &str,
        provider_payment_id: &str,
    ) -> Result<Option<Payment>, DomainError> {
        let rows = self.rows.read().await;
        Ok(rows
            .values()
            .find(|p| {
                p.gateway == gateway
                    && p.provider_payment_id.as_deref() == Some(provider_payment_id)
            })
            .cloned())
    }

    async fn update_if_status(
        &self,
        payment: &Payment,
        expected: PaymentStatus,
    ) -> Result<ConditionalUpdate, DomainError> {
        let mut rows = self.rows.write().await;
        match rows.get_mut(&payment.id) {
            Some(stored) if stored.status == expected => {
                *stored = payment.clone();
                Ok(ConditionalUpdate::Applied)
            }
            Some(_) => Ok(ConditionalUpdate::StaleStatus),
            None => Err(DomainError::database("payment row missing")),
        }
    }
}

#[derive(Default)]
pub struct InMemoryRefundRepository {
    rows: Arc<RwLock<HashMap<RefundId, Refund>>>,
}

impl InMemoryRefundRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RefundRepository for InMemoryRefundRepository {
    async fn insert(&self, refund: &Refund) -> Result<(), DomainError> {
        let mut rows = self.rows.write().await;
        rows.insert(refund.id, refund.clone());
        Ok(())
    }

    async fn find(&self, id: RefundId) -> Result<Option<Refund>, DomainError> {
        Ok(self.rows.read().await.get(&id).cloned())
    }

    async fn find_by_provider_refund_id(
        &self,
        gateway: &str,
        provider_refund_id: &str,
    ) -> Result<Option<Refund>, DomainError> {
        let rows = self.rows.read().await;
        Ok(rows
            .values()
            .find(|r| {
                r.gateway == gateway && r.provider_refund_id.as_deref() == Some(provider_refund_id)
            })
            .cloned())
    }

    async fn list_for_payment(&self, payment_id: PaymentId) -> Result<Vec<Refund>, DomainError> {
        let rows = self.rows.read().await;
        let mut refunds: Vec<Refund> = rows
            .values()
            .filter(|r| r.payment_id == payment_id)
            .cloned()
            .collect();
        refunds.sort_by_key(|r| *r.created_at.as_datetime());
        Ok(refunds)
    }

    async fn update_if_status(
        &self,
        refund: &Refund,
        expected: RefundStatus,
    ) -> Result<ConditionalUpdate, DomainError> {
        let mut rows = self.rows.write().await;
        match rows.get_mut(&refund.id) {
            Some(stored) if stored.status == expected => {
                *stored = refund.clone();
                Ok(ConditionalUpdate::Applied)
            }
            Some(_) => Ok(ConditionalUpdate::StaleStatus),
            None => Err(DomainError::database("refund row missing")),
        }
    }
}

#[derive(Default)]
pub struct InMemorySubscriptionRepository {
    rows: Arc<RwLock<HashMap<SubscriptionId, Subscription>>>,
}

impl InMemorySubscriptionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SubscriptionRepository for InMemorySubscriptionRepository {
    async fn insert(&self, subscription: &Subscription) -> Result<(), DomainError> {
        let mut rows = self.rows.write().await;
        rows.insert(subscription.id, subscription.clone());
        Ok(())
    }

    async fn find(&self, id: SubscriptionId) -> Result<Option<Subscription>, DomainError> {
        Ok(self.rows.read().await.get(&id).cloned())
    }

    async fn find_by_provider_subscription_id(
        &self,
        gateway: &str,
        provider_subscription_id: &str,
    ) -> Result<Option<Subscription>, DomainError> {
        let rows = self.rows.read().await;
        Ok(rows
            .values()
            .find(|s| {
                s.gateway == gateway
                    && s.provider_subscription_id.as_deref() == Some(provider_subscription_id)
            })
            .cloned())
    }

    async fn find_blocking_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Option<Subscription>, DomainError> {
        let rows = self.rows.read().await;
        Ok(rows
            .values()
            .find(|s| s.user_id == user_id && s.status.blocks_new_subscription())
            .cloned())
    }

    async fn update_if_status(
        &self,
        subscription: &Subscription,
        expected: SubscriptionStatus,
    ) -> Result<ConditionalUpdate, DomainError> {
        let mut rows = self.rows.write().await;
        match rows.get_mut(&subscription.id) {
            Some(stored) if stored.status == expected => {
                *stored = subscription.clone();
                Ok(ConditionalUpdate::Applied)
            }
            Some(_) => Ok(ConditionalUpdate::StaleStatus),
            None => Err(DomainError::database("subscription row missing")),
        }
    }
}

#[derive(Default)]
pub struct InMemoryInvoiceRepository {
    rows: Arc<RwLock<HashMap<InvoiceId, Invoice>>>,
}

impl InMemoryInvoiceRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InvoiceRepository for InMemoryInvoiceRepository {
    async fn insert(&self, invoice: &Invoice) -> Result<(), DomainError> {
        let mut rows = self.rows.write().await;
        rows.insert(invoice.id, invoice.clone());
        Ok(())
    }

    async fn find(&self, id: InvoiceId) -> Result<Option<Invoice>, DomainError> {
        Ok(self.rows.read().await.get(&id).cloned())
    }

    async fn update_if_unchanged(
        &self,
        invoice: &Invoice,
        expected_status: InvoiceStatus,
        expected_paid: Money,
    ) -> Result<ConditionalUpdate, DomainError> {
        let mut rows = self.rows.write().await;
        match rows.get_mut(&invoice.id) {
            Some(stored)
                if stored.status == expected_status
                    && stored.paid_amount.amount == expected_paid.amount =>
            {
                *stored = invoice.clone();
                Ok(ConditionalUpdate::Applied)
            }
            Some(_) => Ok(ConditionalUpdate::StaleStatus),
            None => Err(DomainError::database("invoice row missing")),
        }
    }
}

#[derive(Default)]
pub struct InMemoryWebhookEventRepository {
    // Keyed by (gateway, provider_event_id), matching the Postgres
    // uniqueness constraint.
    rows: Arc<RwLock<HashMap<(String, String), WebhookEventRecord>>>,
}

impl InMemoryWebhookEventRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WebhookEventRepository for InMemoryWebhookEventRepository {
    async fn insert(&self, record: &WebhookEventRecord) -> Result<SaveResult, DomainError> {
        let mut rows = self.rows.write().await;
        let key = (record.gateway.clone(), record.provider_event_id.clone());
        if rows.contains_key(&key) {
            Ok(SaveResult::AlreadyExists)
        } else {
            rows.insert(key, record.clone());
            Ok(SaveResult::Inserted)
        }
    }

    async fn find(
        &self,
        gateway: &str,
        provider_event_id: &str,
    ) -> Result<Option<WebhookEventRecord>, DomainError> {
        let rows = self.rows.read().await;
        Ok(rows
            .get(&(gateway.to_string(), provider_event_id.to_string()))
            .cloned())
    }

    async fn mark_processed(&self, id: WebhookEventId) -> Result<(), DomainError> {
        let mut rows = self.rows.write().await;
        let record = rows
            .values_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| DomainError::database("webhook event row missing"))?;
        record.processed = true;
        record.processed_at = Some(Timestamp::now());
        Ok(())
    }

    async fn record_failure(&self, id: WebhookEventId, error: &str) -> Result<(), DomainError> {
        let mut rows = self.rows.write().await;
        let record = rows
            .values_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| DomainError::database("webhook event row missing"))?;
        record.retry_count += 1;
        record.error_message = Some(error.to_string());
        Ok(())
    }

    async fn list_unprocessed(
        &self,
        max_retries: u32,
        limit: u32,
    ) -> Result<Vec<WebhookEventRecord>, DomainError> {
        let rows = self.rows.read().await;
        let mut pending: Vec<WebhookEventRecord> = rows
            .values()
            .filter(|r| !r.processed && r.retry_count < max_retries)
            .cloned()
            .collect();
        pending.sort_by_key(|r| *r.received_at.as_datetime());
        pending.truncate(limit as usize);
        Ok(pending)
    }

    async fn delete_processed_before(&self, cutoff: Timestamp) -> Result<u64, DomainError> {
        let mut rows = self.rows.write().await;
        let before = rows.len();
        rows.retain(|_, r| !(r.processed && r.received_at.is_before(&cutoff)));
        Ok((before - rows.len()) as u64)
    }
}

/// Static customer directory mapping users to pre-provisioned provider
/// customer handles.
#[derive(Default)]
pub struct StaticCustomerDirectory {
    entries: RwLock<HashMap<(UserId, String), String>>,
}

impl StaticCustomerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put(&self, user_id: UserId, gateway: &str, customer_ref: &str) {
        self.entries
            .write()
            .await
            .insert((user_id, gateway.to_string()), customer_ref.to_string());
    }
}

#[async_trait]
impl CustomerDirectory for StaticCustomerDirectory {
    async fn customer_ref(&self, user_id: UserId, gateway: &str) -> Result<String, DomainError> {
        let entries = self.entries.read().await;
        entries
            .get(&(user_id, gateway.to_string()))
            .cloned()
            .ok_or_else(|| {
                DomainError::new(
                    crate::domain::foundation::ErrorCode::CustomerNotFound,
                    format!("no {} customer for user {}", gateway, user_id),
                )
            })
    }
}

/// Static plan catalog.
#[derive(Default)]
pub struct StaticPlanCatalog {
    plans: RwLock<HashMap<PlanId, SubscriptionPlan>>,
}

impl StaticPlanCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put(&self, plan: SubscriptionPlan) {
        self.plans.write().await.insert(plan.id, plan);
    }
}

#[async_trait]
impl PlanCatalog for StaticPlanCatalog {
    async fn find_plan(&self, plan_id: PlanId) -> Result<Option<SubscriptionPlan>, DomainError> {
        Ok(self.plans.read().await.get(&plan_id).cloned())
    }
}

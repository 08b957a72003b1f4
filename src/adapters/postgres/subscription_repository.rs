//! PostgreSQL implementation of SubscriptionRepository.

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::domain::foundation::{
    Currency, DomainError, ErrorCode, Money, PlanId, SubscriptionId, Timestamp, UserId,
};
use crate::domain::subscription::{Subscription, SubscriptionStatus};
use crate::ports::{ConditionalUpdate, SubscriptionRepository};

/// PostgreSQL implementation of SubscriptionRepository.
#[derive(Clone)]
pub struct PostgresSubscriptionRepository {
    pool: PgPool,
}

impl PostgresSubscriptionRepository {
    /// Creates a new PostgresSubscriptionRepository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const SELECT_COLUMNS: &str = r#"
    SELECT id, user_id, plan_id, gateway, provider_subscription_id, status,
           current_period_start, current_period_end, trial_end,
           cancel_at_period_end, unit_amount, currency, created_at, updated_at
    FROM subscriptions
"#;

#[async_trait]
impl SubscriptionRepository for PostgresSubscriptionRepository {
    async fn insert(&self, subscription: &Subscription) -> Result<(), DomainError> {
        sqlx::query(
            r#"
            INSERT INTO subscriptions (
                id, user_id, plan_id, gateway, provider_subscription_id, status,
                current_period_start, current_period_end, trial_end,
                cancel_at_period_end, unit_amount, currency, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(subscription.id.as_uuid())
        .bind(subscription.user_id.as_uuid())
        .bind(subscription.plan_id.as_uuid())
        .bind(&subscription.gateway)
        .bind(subscription.provider_subscription_id.as_deref())
        .bind(subscription_status_to_str(subscription.status))
        .bind(subscription.current_period_start.as_datetime())
        .bind(subscription.current_period_end.as_datetime())
        .bind(subscription.trial_end.map(|t| *t.as_datetime()))
        .bind(subscription.cancel_at_period_end)
        .bind(subscription.unit_amount.amount)
        .bind(subscription.unit_amount.currency.code())
        .bind(subscription.created_at.as_datetime())
        .bind(subscription.updated_at.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            DomainError::new(
                ErrorCode::DatabaseError,
                format!("Failed to insert subscription: {}", e),
            )
        })?;

        Ok(())
    }

    async fn find(&self, id: SubscriptionId) -> Result<Option<Subscription>, DomainError> {
        let row = sqlx::query(&format!("{} WHERE id = $1", SELECT_COLUMNS))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                DomainError::new(
                    ErrorCode::DatabaseError,
                    format!("Failed to fetch subscription: {}", e),
                )
            })?;

        row.map(row_to_subscription).transpose()
    }

    async fn find_by_provider_subscription_id(
        &self,
        gateway: &str,
        provider_subscription_id: &str,
    ) -> Result<Option<Subscription>, DomainError> {
        let row = sqlx::query(&format!(
            "{} WHERE gateway = $1 AND provider_subscription_id = $2",
            SELECT_COLUMNS
        ))
        .bind(gateway)
        .bind(provider_subscription_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            DomainError::new(
                ErrorCode::DatabaseError,
                format!("Failed to fetch subscription: {}", e),
            )
        })?;

        row.map(row_to_subscription).transpose()
    }

    async fn find_blocking_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Option<Subscription>, DomainError> {
        let row = sqlx::query(&format!(
            "{} WHERE user_id = $1 AND status IN ('active', 'trialing') LIMIT 1",
            SELECT_COLUMNS
        ))
        .bind(user_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            DomainError::new(
                ErrorCode::DatabaseError,
                format!("Failed to fetch subscription: {}", e),
            )
        })?;

        row.map(row_to_subscription).transpose()
    }

    async fn update_if_status(
        &self,
        subscription: &Subscription,
        expected: SubscriptionStatus,
    ) -> Result<ConditionalUpdate, DomainError> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions SET
                plan_id = $3,
                provider_subscription_id = $4,
                status = $5,
                current_period_start = $6,
                current_period_end = $7,
                trial_end = $8,
                cancel_at_period_end = $9,
                unit_amount = $10,
                currency = $11,
                updated_at = $12
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(subscription.id.as_uuid())
        .bind(subscription_status_to_str(expected))
        .bind(subscription.plan_id.as_uuid())
        .bind(subscription.provider_subscription_id.as_deref())
        .bind(subscription_status_to_str(subscription.status))
        .bind(subscription.current_period_start.as_datetime())
        .bind(subscription.current_period_end.as_datetime())
        .bind(subscription.trial_end.map(|t| *t.as_datetime()))
        .bind(subscription.cancel_at_period_end)
        .bind(subscription.unit_amount.amount)
        .bind(subscription.unit_amount.currency.code())
        .bind(subscription.updated_at.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            DomainError::new(
                ErrorCode::DatabaseError,
                format!("Failed to update subscription: {}", e),
            )
        })?;

        if result.rows_affected() == 0 {
            if self.find(subscription.id).await?.is_none() {
                return Err(DomainError::new(
                    ErrorCode::SubscriptionNotFound,
                    format!("Subscription not found: {}", subscription.id),
                ));
            }
            return Ok(ConditionalUpdate::StaleStatus);
        }

        Ok(ConditionalUpdate::Applied)
    }
}

fn row_to_subscription(row: sqlx::postgres::PgRow) -> Result<Subscription, DomainError> {
    let id: Uuid = row.get("id");
    let user_id: Uuid = row.get("user_id");
    let plan_id: Uuid = row.get("plan_id");
    let gateway: String = row.get("gateway");
    let provider_subscription_id: Option<String> = row.get("provider_subscription_id");
    let status: String = row.get("status");
    let current_period_start: chrono::DateTime<chrono::Utc> = row.get("current_period_start");
    let current_period_end: chrono::DateTime<chrono::Utc> = row.get("current_period_end");
    let trial_end: Option<chrono::DateTime<chrono::Utc>> = row.get("trial_end");
    let cancel_at_period_end: bool = row.get("cancel_at_period_end");
    let unit_amount: rust_decimal::Decimal = row.get("unit_amount");
    let currency: String = row.get("currency");
    let created_at: chrono::DateTime<chrono::Utc> = row.get("created_at");
    let updated_at: chrono::DateTime<chrono::Utc> = row.get("updated_at");

    let currency = Currency::new(&currency).map_err(|e| {
        DomainError::new(ErrorCode::DatabaseError, format!("Invalid stored currency: {}", e))
    })?;

    Ok(Subscription {
        id: SubscriptionId::from_uuid(id),
        user_id: UserId::from_uuid(user_id),
        plan_id: PlanId::from_uuid(plan_id),
        gateway,
        provider_subscription_id,
        status: str_to_subscription_status(&status)?,
        current_period_start: Timestamp::from_datetime(current_period_start),
        current_period_end: Timestamp::from_datetime(current_period_end),
        trial_end: trial_end.map(Timestamp::from_datetime),
        cancel_at_period_end,
        unit_amount: Money::new(unit_amount, currency),
        created_at: Timestamp::from_datetime(created_at),
        updated_at: Timestamp::from_datetime(updated_at),
    })
}

fn subscription_status_to_str(status: SubscriptionStatus) -> &'static str {
    match status {
        SubscriptionStatus::Trialing => "trialing",
        SubscriptionStatus::Active => "active",
        SubscriptionStatus::PastDue => "past_due",
        SubscriptionStatus::Paused => "paused",
        SubscriptionStatus::Unpaid => "unpaid",
        SubscriptionStatus::Canceled => "canceled",
    }
}

fn str_to_subscription_status(s: &str) -> Result<SubscriptionStatus, DomainError> {
    match s {
        "trialing" => Ok(SubscriptionStatus::Trialing),
        "active" => Ok(SubscriptionStatus::Active),
        "past_due" => Ok(SubscriptionStatus::PastDue),
        "paused" => Ok(SubscriptionStatus::Paused),
        "unpaid" => Ok(SubscriptionStatus::Unpaid),
        "canceled" => Ok(SubscriptionStatus::Canceled),
        _ => Err(DomainError::new(
            ErrorCode::DatabaseError,
            format!("Invalid subscription status: {}", s),
        )),
    }
}

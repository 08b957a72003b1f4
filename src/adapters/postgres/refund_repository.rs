//! PostgreSQL implementation of RefundRepository.

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::domain::foundation::{
    Currency, DomainError, ErrorCode, Money, PaymentId, RefundId, Timestamp, UserId,
};
use crate::domain::payment::{Refund, RefundStatus};
use crate::ports::{ConditionalUpdate, RefundRepository};

/// PostgreSQL implementation of RefundRepository.
#[derive(Clone)]
pub struct PostgresRefundRepository {
    pool: PgPool,
}

impl PostgresRefundRepository {
    /// Creates a new PostgresRefundRepository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const SELECT_COLUMNS: &str = r#"
    SELECT id, payment_id, user_id, amount, currency, reason, gateway,
           provider_refund_id, status, created_at, updated_at
    FROM refunds
"#;

#[async_trait]
impl RefundRepository for PostgresRefundRepository {
    async fn insert(&self, refund: &Refund) -> Result<(), DomainError> {
        sqlx::query(
            r#"
            INSERT INTO refunds (
                id, payment_id, user_id, amount, currency, reason, gateway,
                provider_refund_id, status, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(refund.id.as_uuid())
        .bind(refund.payment_id.as_uuid())
        .bind(refund.user_id.as_uuid())
        .bind(refund.amount.amount)
        .bind(refund.amount.currency.code())
        .bind(refund.reason.as_deref())
        .bind(&refund.gateway)
        .bind(refund.provider_refund_id.as_deref())
        .bind(refund_status_to_str(refund.status))
        .bind(refund.created_at.as_datetime())
        .bind(refund.updated_at.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            DomainError::new(ErrorCode::DatabaseError, format!("Failed to insert refund: {}", e))
        })?;

        Ok(())
    }

    async fn find(&self, id: RefundId) -> Result<Option<Refund>, DomainError> {
        let row = sqlx::query(&format!("{} WHERE id = $1", SELECT_COLUMNS))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                DomainError::new(ErrorCode::DatabaseError, format!("Failed to fetch refund: {}", e))
            })?;

        row.map(row_to_refund).transpose()
    }

    async fn find_by_provider_refund_id(
        &self,
        gateway: &str,
        provider_refund_id: &str,
    ) -> Result<Option<Refund>, DomainError> {
        let row = sqlx::query(&format!(
            "{} WHERE gateway = $1 AND provider_refund_id = $2",
            SELECT_COLUMNS
        ))
        .bind(gateway)
        .bind(provider_refund_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            DomainError::new(ErrorCode::DatabaseError, format!("Failed to fetch refund: {}", e))
        })?;

        row.map(row_to_refund).transpose()
    }

    async fn list_for_payment(&self, payment_id: PaymentId) -> Result<Vec<Refund>, DomainError> {
        let rows = sqlx::query(&format!(
            "{} WHERE payment_id = $1 ORDER BY created_at ASC",
            SELECT_COLUMNS
        ))
        .bind(payment_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            DomainError::new(ErrorCode::DatabaseError, format!("Failed to fetch refunds: {}", e))
        })?;

        rows.into_iter().map(row_to_refund).collect()
    }

    async fn update_if_status(
        &self,
        refund: &Refund,
        expected: RefundStatus,
    ) -> Result<ConditionalUpdate, DomainError> {
        let result = sqlx::query(
            r#"
            UPDATE refunds SET
                provider_refund_id = $3,
                status = $4,
                updated_at = $5
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(refund.id.as_uuid())
        .bind(refund_status_to_str(expected))
        .bind(refund.provider_refund_id.as_deref())
        .bind(refund_status_to_str(refund.status))
        .bind(refund.updated_at.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            DomainError::new(ErrorCode::DatabaseError, format!("Failed to update refund: {}", e))
        })?;

        if result.rows_affected() == 0 {
            if self.find(refund.id).await?.is_none() {
                return Err(DomainError::new(
                    ErrorCode::RefundNotFound,
                    format!("Refund not found: {}", refund.id),
                ));
            }
            return Ok(ConditionalUpdate::StaleStatus);
        }

        Ok(ConditionalUpdate::Applied)
    }
}

fn row_to_refund(row: sqlx::postgres::PgRow) -> Result<Refund, DomainError> {
    let id: Uuid = row.get("id");
    let payment_id: Uuid = row.get("payment_id");
    let user_id: Uuid = row.get("user_id");
    let amount: rust_decimal::Decimal = row.get("amount");
    let currency: String = row.get("currency");
    let reason: Option<String> = row.get("reason");
    let gateway: String = row.get("gateway");
    let provider_refund_id: Option<String> = row.get("provider_refund_id");
    let status: String = row.get("status");
    let created_at: chrono::DateTime<chrono::Utc> = row.get("created_at");
    let updated_at: chrono::DateTime<chrono::Utc> = row.get("updated_at");

    let currency = Currency::new(&currency).map_err(|e| {
        DomainError::new(ErrorCode::DatabaseError, format!("Invalid stored currency: {}", e))
    })?;

    Ok(Refund {
        id: RefundId::from_uuid(id),
        payment_id: PaymentId::from_uuid(payment_id),
        user_id: UserId::from_uuid(user_id),
        amount: Money::new(amount, currency),
        reason,
        gateway,
        provider_refund_id,
        status: str_to_refund_status(&status)?,
        created_at: Timestamp::from_datetime(created_at),
        updated_at: Timestamp::from_datetime(updated_at),
    })
}

fn refund_status_to_str(status: RefundStatus) -> &'static str {
    match status {
        RefundStatus::Pending => "pending",
        RefundStatus::Processing => "processing",
        RefundStatus::Succeeded => "succeeded",
        RefundStatus::Failed => "failed",
    }
}

fn str_to_refund_status(s: &str) -> Result<RefundStatus, DomainError> {
    match s {
        "pending" => Ok(RefundStatus::Pending),
        "processing" => Ok(RefundStatus::Processing),
        "succeeded" => Ok(RefundStatus::Succeeded),
        "failed" => Ok(RefundStatus::Failed),
        _ => Err(DomainError::new(
            ErrorCode::DatabaseError,
            format!("Invalid refund status: {}", s),
        )),
    }
}

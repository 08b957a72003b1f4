//! PostgreSQL implementation of PaymentRepository.
//!
//! Amounts are stored as NUMERIC plus a 3-letter currency column, never
//! as floats. Status-bearing updates are compare-and-set on the status
//! column so concurrent transitions surface as `StaleStatus` instead of
//! overwriting each other.

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::domain::foundation::{
    Currency, DomainError, ErrorCode, InvoiceId, Money, PaymentId, SubscriptionId, Timestamp,
    UserId,
};
use crate::domain::payment::{Payment, PaymentKind, PaymentStatus};
use crate::ports::{ConditionalUpdate, PaymentRepository};

/// PostgreSQL implementation of PaymentRepository.
#[derive(Clone)]
pub struct PostgresPaymentRepository {
    pool: PgPool,
}

impl PostgresPaymentRepository {
    /// Creates a new PostgresPaymentRepository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const SELECT_COLUMNS: &str = r#"
    SELECT id, user_id, invoice_id, subscription_id, amount, currency,
           kind, gateway, provider_payment_id, status, description,
           provider_metadata, created_at, updated_at, payment_date
    FROM payments
"#;

#[async_trait]
impl PaymentRepository for PostgresPaymentRepository {
    async fn insert(&self, payment: &Payment) -> Result<(), DomainError> {
        sqlx::query(
            r#"
            INSERT INTO payments (
                id, user_id, invoice_id, subscription_id, amount, currency,
                kind, gateway, provider_payment_id, status, description,
                provider_metadata, created_at, updated_at, payment_date
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(payment.id.as_uuid())
        .bind(payment.user_id.as_uuid())
        .bind(payment.invoice_id.map(|id| *id.as_uuid()))
        .bind(payment.subscription_id.map(|id| *id.as_uuid()))
        .bind(payment.amount.amount)
        .bind(payment.amount.currency.code())
        .bind(payment_kind_to_str(payment.kind))
        .bind(&payment.gateway)
        .bind(payment.provider_payment_id.as_deref())
        .bind(payment_status_to_str(payment.status))
        .bind(payment.description.as_deref())
        .bind(&payment.provider_metadata)
        .bind(payment.created_at.as_datetime())
        .bind(payment.updated_at.as_datetime())
        .bind(payment.payment_date.map(|t| *t.as_datetime()))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            DomainError::new(ErrorCode::DatabaseError, format!("Failed to insert payment: {}", e))
        })?;

        Ok(())
    }

    async fn find(&self, id: PaymentId) -> Result<Option<Payment>, DomainError> {
        let row = sqlx::query(&format!("{} WHERE id = $1", SELECT_COLUMNS))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                DomainError::new(ErrorCode::DatabaseError, format!("Failed to fetch payment: {}", e))
            })?;

        row.map(row_to_payment).transpose()
    }

    async fn find_by_provider_payment_id(
        &self,
        gateway: &str,
        provider_payment_id: &str,
    ) -> Result<Option<Payment>, DomainError> {
        let row = sqlx::query(&format!(
            "{} WHERE gateway = $1 AND provider_payment_id = $2",
            SELECT_COLUMNS
        ))
        .bind(gateway)
        .bind(provider_payment_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            DomainError::new(ErrorCode::DatabaseError, format!("Failed to fetch payment: {}", e))
        })?;

        row.map(row_to_payment).transpose()
    }

    async fn update_if_status(
        &self,
        payment: &Payment,
        expected: PaymentStatus,
    ) -> Result<ConditionalUpdate, DomainError> {
        let result = sqlx::query(
            r#"
            UPDATE payments SET
                provider_payment_id = $3,
                status = $4,
                provider_metadata = $5,
                updated_at = $6,
                payment_date = $7,
                invoice_id = $8,
                subscription_id = $9
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(payment.id.as_uuid())
        .bind(payment_status_to_str(expected))
        .bind(payment.provider_payment_id.as_deref())
        .bind(payment_status_to_str(payment.status))
        .bind(&payment.provider_metadata)
        .bind(payment.updated_at.as_datetime())
        .bind(payment.payment_date.map(|t| *t.as_datetime()))
        .bind(payment.invoice_id.map(|id| *id.as_uuid()))
        .bind(payment.subscription_id.map(|id| *id.as_uuid()))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            DomainError::new(ErrorCode::DatabaseError, format!("Failed to update payment: {}", e))
        })?;

        if result.rows_affected() == 0 {
            // Distinguish a lost race from a missing row.
            if self.find(payment.id).await?.is_none() {
                return Err(DomainError::new(
                    ErrorCode::PaymentNotFound,
                    format!("Payment not found: {}", payment.id),
                ));
            }
            return Ok(ConditionalUpdate::StaleStatus);
        }

        Ok(ConditionalUpdate::Applied)
    }
}

fn row_to_payment(row: sqlx::postgres::PgRow) -> Result<Payment, DomainError> {
    let id: Uuid = row.get("id");
    let user_id: Uuid = row.get("user_id");
    let invoice_id: Option<Uuid> = row.get("invoice_id");
    let subscription_id: Option<Uuid> = row.get("subscription_id");
    let amount: rust_decimal::Decimal = row.get("amount");
    let currency: String = row.get("currency");
    let kind: String = row.get("kind");
    let gateway: String = row.get("gateway");
    let provider_payment_id: Option<String> = row.get("provider_payment_id");
    let status: String = row.get("status");
    let description: Option<String> = row.get("description");
    let provider_metadata: serde_json::Value = row.get("provider_metadata");
    let created_at: chrono::DateTime<chrono::Utc> = row.get("created_at");
    let updated_at: chrono::DateTime<chrono::Utc> = row.get("updated_at");
    let payment_date: Option<chrono::DateTime<chrono::Utc>> = row.get("payment_date");

    let currency = Currency::new(&currency).map_err(|e| {
        DomainError::new(ErrorCode::DatabaseError, format!("Invalid stored currency: {}", e))
    })?;

    Ok(Payment {
        id: PaymentId::from_uuid(id),
        user_id: UserId::from_uuid(user_id),
        invoice_id: invoice_id.map(InvoiceId::from_uuid),
        subscription_id: subscription_id.map(SubscriptionId::from_uuid),
        amount: Money::new(amount, currency),
        kind: str_to_payment_kind(&kind)?,
        gateway,
        provider_payment_id,
        status: str_to_payment_status(&status)?,
        description,
        provider_metadata,
        created_at: Timestamp::from_datetime(created_at),
        updated_at: Timestamp::from_datetime(updated_at),
        payment_date: payment_date.map(Timestamp::from_datetime),
    })
}

fn payment_status_to_str(status: PaymentStatus) -> &'static str {
    match status {
        PaymentStatus::Pending => "pending",
        PaymentStatus::Processing => "processing",
        PaymentStatus::Succeeded => "succeeded",
        PaymentStatus::Failed => "failed",
        PaymentStatus::PartiallyRefunded => "partially_refunded",
        PaymentStatus::Refunded => "refunded",
    }
}

fn str_to_payment_status(s: &str) -> Result<PaymentStatus, DomainError> {
    match s {
        "pending" => Ok(PaymentStatus::Pending),
        "processing" => Ok(PaymentStatus::Processing),
        "succeeded" => Ok(PaymentStatus::Succeeded),
        "failed" => Ok(PaymentStatus::Failed),
        "partially_refunded" => Ok(PaymentStatus::PartiallyRefunded),
        "refunded" => Ok(PaymentStatus::Refunded),
        _ => Err(DomainError::new(
            ErrorCode::DatabaseError,
            format!("Invalid payment status: {}", s),
        )),
    }
}

fn payment_kind_to_str(kind: PaymentKind) -> &'static str {
    match kind {
        PaymentKind::OneOff => "one_off",
        PaymentKind::SubscriptionCharge => "subscription_charge",
    }
}

fn str_to_payment_kind(s: &str) -> Result<PaymentKind, DomainError> {
    match s {
        "one_off" => Ok(PaymentKind::OneOff),
        "subscription_charge" => Ok(PaymentKind::SubscriptionCharge),
        _ => Err(DomainError::new(
            ErrorCode::DatabaseError,
            format!("Invalid payment kind: {}", s),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payment_status_round_trips() {
        let statuses = [
            PaymentStatus::Pending,
            PaymentStatus::Processing,
            PaymentStatus::Succeeded,
            PaymentStatus::Failed,
            PaymentStatus::PartiallyRefunded,
            PaymentStatus::Refunded,
        ];
        for status in statuses {
            let s = payment_status_to_str(status);
            assert_eq!(str_to_payment_status(s).unwrap(), status);
        }
    }

    #[test]
    fn payment_kind_round_trips() {
        for kind in [PaymentKind::OneOff, PaymentKind::SubscriptionCharge] {
            let s = payment_kind_to_str(kind);
            assert_eq!(str_to_payment_kind(s).unwrap(), kind);
        }
    }

    #[test]
    fn invalid_payment_status_returns_error() {
        assert!(str_to_payment_status("settled").is_err());
    }
}

//! PostgreSQL implementation of InvoiceRepository.

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::domain::foundation::{Currency, DomainError, ErrorCode, InvoiceId, Money, Timestamp};
use crate::domain::invoice::{Invoice, InvoiceStatus};
use crate::ports::{ConditionalUpdate, InvoiceRepository};

/// PostgreSQL implementation of InvoiceRepository.
#[derive(Clone)]
pub struct PostgresInvoiceRepository {
    pool: PgPool,
}

impl PostgresInvoiceRepository {
    /// Creates a new PostgresInvoiceRepository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl InvoiceRepository for PostgresInvoiceRepository {
    async fn insert(&self, invoice: &Invoice) -> Result<(), DomainError> {
        sqlx::query(
            r#"
            INSERT INTO invoices (
                id, total_amount, paid_amount, currency, status, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(invoice.id.as_uuid())
        .bind(invoice.total_amount.amount)
        .bind(invoice.paid_amount.amount)
        .bind(invoice.total_amount.currency.code())
        .bind(invoice_status_to_str(invoice.status))
        .bind(invoice.updated_at.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            DomainError::new(ErrorCode::DatabaseError, format!("Failed to insert invoice: {}", e))
        })?;

        Ok(())
    }

    async fn find(&self, id: InvoiceId) -> Result<Option<Invoice>, DomainError> {
        let row = sqlx::query(
            r#"
            SELECT id, total_amount, paid_amount, currency, status, updated_at
            FROM invoices WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            DomainError::new(ErrorCode::DatabaseError, format!("Failed to fetch invoice: {}", e))
        })?;

        row.map(row_to_invoice).transpose()
    }

    async fn update_if_unchanged(
        &self,
        invoice: &Invoice,
        expected_status: InvoiceStatus,
        expected_paid: Money,
    ) -> Result<ConditionalUpdate, DomainError> {
        // The balance is part of the predicate: two partial credits both
        // match on status alone, and the loser must see the contention.
        let result = sqlx::query(
            r#"
            UPDATE invoices SET
                paid_amount = $4,
                status = $5,
                updated_at = $6
            WHERE id = $1 AND status = $2 AND paid_amount = $3
            "#,
        )
        .bind(invoice.id.as_uuid())
        .bind(invoice_status_to_str(expected_status))
        .bind(expected_paid.amount)
        .bind(invoice.paid_amount.amount)
        .bind(invoice_status_to_str(invoice.status))
        .bind(invoice.updated_at.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            DomainError::new(ErrorCode::DatabaseError, format!("Failed to update invoice: {}", e))
        })?;

        if result.rows_affected() == 0 {
            if self.find(invoice.id).await?.is_none() {
                return Err(DomainError::new(
                    ErrorCode::InvoiceNotFound,
                    format!("Invoice not found: {}", invoice.id),
                ));
            }
            return Ok(ConditionalUpdate::StaleStatus);
        }

        Ok(ConditionalUpdate::Applied)
    }
}

fn row_to_invoice(row: sqlx::postgres::PgRow) -> Result<Invoice, DomainError> {
    let id: Uuid = row.get("id");
    let total_amount: rust_decimal::Decimal = row.get("total_amount");
    let paid_amount: rust_decimal::Decimal = row.get("paid_amount");
    let currency: String = row.get("currency");
    let status: String = row.get("status");
    let updated_at: chrono::DateTime<chrono::Utc> = row.get("updated_at");

    let currency = Currency::new(&currency).map_err(|e| {
        DomainError::new(ErrorCode::DatabaseError, format!("Invalid stored currency: {}", e))
    })?;

    Ok(Invoice {
        id: InvoiceId::from_uuid(id),
        total_amount: Money::new(total_amount, currency),
        paid_amount: Money::new(paid_amount, currency),
        status: str_to_invoice_status(&status)?,
        updated_at: Timestamp::from_datetime(updated_at),
    })
}

fn invoice_status_to_str(status: InvoiceStatus) -> &'static str {
    match status {
        InvoiceStatus::Draft => "draft",
        InvoiceStatus::Sent => "sent",
        InvoiceStatus::Paid => "paid",
        InvoiceStatus::Void => "void",
    }
}

fn str_to_invoice_status(s: &str) -> Result<InvoiceStatus, DomainError> {
    match s {
        "draft" => Ok(InvoiceStatus::Draft),
        "sent" => Ok(InvoiceStatus::Sent),
        "paid" => Ok(InvoiceStatus::Paid),
        "void" => Ok(InvoiceStatus::Void),
        _ => Err(DomainError::new(
            ErrorCode::DatabaseError,
            format!("Invalid invoice status: {}", s),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invoice_status_round_trips() {
        let statuses = [
            InvoiceStatus::Draft,
            InvoiceStatus::Sent,
            InvoiceStatus::Paid,
            InvoiceStatus::Void,
        ];
        for status in statuses {
            let s = invoice_status_to_str(status);
            assert_eq!(str_to_invoice_status(s).unwrap(), status);
        }
    }

    #[test]
    fn invalid_invoice_status_returns_error() {
        assert!(str_to_invoice_status("open").is_err());
    }
}

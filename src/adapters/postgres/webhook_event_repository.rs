//! PostgreSQL implementation of WebhookEventRepository.
//!
//! The `webhook_events` table carries a unique index on
//! `(gateway, provider_event_id)`; `insert` relies on
//! `ON CONFLICT DO NOTHING` so concurrent deliveries of the same event
//! resolve to exactly one inserted row.

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::domain::foundation::{DomainError, ErrorCode, Timestamp, WebhookEventId};
use crate::ports::{SaveResult, WebhookEventRecord, WebhookEventRepository};

/// PostgreSQL implementation of WebhookEventRepository.
#[derive(Clone)]
pub struct PostgresWebhookEventRepository {
    pool: PgPool,
}

impl PostgresWebhookEventRepository {
    /// Creates a new PostgresWebhookEventRepository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const SELECT_COLUMNS: &str = r#"
    SELECT id, gateway, provider_event_id, event_type, payload, processed,
           processed_at, retry_count, error_message, received_at
    FROM webhook_events
"#;

#[async_trait]
impl WebhookEventRepository for PostgresWebhookEventRepository {
    async fn insert(&self, record: &WebhookEventRecord) -> Result<SaveResult, DomainError> {
        let result = sqlx::query(
            r#"
            INSERT INTO webhook_events (
                id, gateway, provider_event_id, event_type, payload, processed,
                processed_at, retry_count, error_message, received_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (gateway, provider_event_id) DO NOTHING
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(&record.gateway)
        .bind(&record.provider_event_id)
        .bind(&record.event_type)
        .bind(&record.payload)
        .bind(record.processed)
        .bind(record.processed_at.map(|t| *t.as_datetime()))
        .bind(record.retry_count as i32)
        .bind(record.error_message.as_deref())
        .bind(record.received_at.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            DomainError::new(
                ErrorCode::DatabaseError,
                format!("Failed to insert webhook event: {}", e),
            )
        })?;

        if result.rows_affected() == 0 {
            Ok(SaveResult::AlreadyExists)
        } else {
            Ok(SaveResult::Inserted)
        }
    }

    async fn find(
        &self,
        gateway: &str,
        provider_event_id: &str,
    ) -> Result<Option<WebhookEventRecord>, DomainError> {
        let row = sqlx::query(&format!(
            "{} WHERE gateway = $1 AND provider_event_id = $2",
            SELECT_COLUMNS
        ))
        .bind(gateway)
        .bind(provider_event_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            DomainError::new(
                ErrorCode::DatabaseError,
                format!("Failed to fetch webhook event: {}", e),
            )
        })?;

        Ok(row.map(row_to_record))
    }

    async fn mark_processed(&self, id: WebhookEventId) -> Result<(), DomainError> {
        let result = sqlx::query(
            r#"
            UPDATE webhook_events SET processed = TRUE, processed_at = $2
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(Timestamp::now().as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            DomainError::new(
                ErrorCode::DatabaseError,
                format!("Failed to mark webhook event processed: {}", e),
            )
        })?;

        if result.rows_affected() == 0 {
            return Err(DomainError::new(
                ErrorCode::InternalError,
                format!("Webhook event not found: {}", id),
            ));
        }

        Ok(())
    }

    async fn record_failure(&self, id: WebhookEventId, error: &str) -> Result<(), DomainError> {
        let result = sqlx::query(
            r#"
            UPDATE webhook_events SET
                retry_count = retry_count + 1,
                error_message = $2
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            DomainError::new(
                ErrorCode::DatabaseError,
                format!("Failed to record webhook failure: {}", e),
            )
        })?;

        if result.rows_affected() == 0 {
            return Err(DomainError::new(
                ErrorCode::InternalError,
                format!("Webhook event not found: {}", id),
            ));
        }

        Ok(())
    }

    async fn list_unprocessed(
        &self,
        max_retries: u32,
        limit: u32,
    ) -> Result<Vec<WebhookEventRecord>, DomainError> {
        let rows = sqlx::query(&format!(
            "{} WHERE processed = FALSE AND retry_count < $1 ORDER BY received_at ASC LIMIT $2",
            SELECT_COLUMNS
        ))
        .bind(max_retries as i32)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            DomainError::new(
                ErrorCode::DatabaseError,
                format!("Failed to list unprocessed webhook events: {}", e),
            )
        })?;

        Ok(rows.into_iter().map(row_to_record).collect())
    }

    async fn delete_processed_before(&self, cutoff: Timestamp) -> Result<u64, DomainError> {
        let result = sqlx::query(
            "DELETE FROM webhook_events WHERE processed = TRUE AND received_at < $1",
        )
        .bind(cutoff.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            DomainError::new(
                ErrorCode::DatabaseError,
                format!("Failed to prune webhook events: {}", e),
            )
        })?;

        Ok(result.rows_affected())
    }
}

fn row_to_record(row: sqlx::postgres::PgRow) -> WebhookEventRecord {
    let id: Uuid = row.get("id");
    let gateway: String = row.get("gateway");
    let provider_event_id: String = row.get("provider_event_id");
    let event_type: String = row.get("event_type");
    let payload: serde_json::Value = row.get("payload");
    let processed: bool = row.get("processed");
    let processed_at: Option<chrono::DateTime<chrono::Utc>> = row.get("processed_at");
    let retry_count: i32 = row.get("retry_count");
    let error_message: Option<String> = row.get("error_message");
    let received_at: chrono::DateTime<chrono::Utc> = row.get("received_at");

    WebhookEventRecord {
        id: WebhookEventId::from_uuid(id),
        gateway,
        provider_event_id,
        event_type,
        payload,
        processed,
        processed_at: processed_at.map(Timestamp::from_datetime),
        retry_count: retry_count.max(0) as u32,
        error_message,
        received_at: Timestamp::from_datetime(received_at),
    }
}

//! Postgres outbox.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pairwise_id::EventId;
use sqlx::{
    postgres::{PgConnection, PgPool, PgRow},
    Row,
};

use super::DbError;
use crate::outbox::{OutboxError, OutboxMessage, OutboxStore};

const TABLE: &str = "outbox_messages";

const COLUMNS: &str = r#"
    event_id,
    aggregate_type,
    aggregate_id,
    event_type,
    payload,
    occurred_at,
    available_at,
    retry_count,
    status,
    published_at,
    last_error
"#;

#[derive(Clone)]
pub struct PgOutboxStore {
    pool: PgPool,
}

impl PgOutboxStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn message_from_row(row: &PgRow) -> Result<OutboxMessage, DbError> {
    let event_id: String = row.try_get("event_id").map_err(DbError::Query)?;
    let aggregate_type: String = row.try_get("aggregate_type").map_err(DbError::Query)?;
    let retry_count: i32 = row.try_get("retry_count").map_err(DbError::Query)?;
    let status: String = row.try_get("status").map_err(DbError::Query)?;

    Ok(OutboxMessage {
        event_id: event_id.parse().map_err(|e| DbError::corrupt(TABLE, e))?,
        aggregate_type: aggregate_type
            .parse()
            .map_err(|e| DbError::corrupt(TABLE, e))?,
        aggregate_id: row.try_get("aggregate_id").map_err(DbError::Query)?,
        event_type: row.try_get("event_type").map_err(DbError::Query)?,
        payload: row.try_get("payload").map_err(DbError::Query)?,
        occurred_at: row.try_get("occurred_at").map_err(DbError::Query)?,
        available_at: row.try_get("available_at").map_err(DbError::Query)?,
        retry_count: u32::try_from(retry_count).map_err(|e| DbError::corrupt(TABLE, e))?,
        status: status.parse().map_err(|e: String| DbError::corrupt(TABLE, e))?,
        published_at: row.try_get("published_at").map_err(DbError::Query)?,
        last_error: row.try_get("last_error").map_err(DbError::Query)?,
    })
}

/// Inserts a message on an open connection or transaction.
pub(crate) async fn insert_message(
    conn: &mut PgConnection,
    message: &OutboxMessage,
) -> Result<(), OutboxError> {
    sqlx::query(
        r#"
        INSERT INTO outbox_messages (
            event_id,
            aggregate_type,
            aggregate_id,
            event_type,
            payload,
            occurred_at,
            available_at,
            retry_count,
            status,
            published_at,
            last_error
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        "#,
    )
    .bind(message.event_id.to_string())
    .bind(message.aggregate_type.as_str())
    .bind(&message.aggregate_id)
    .bind(&message.event_type)
    .bind(&message.payload)
    .bind(message.occurred_at)
    .bind(message.available_at)
    .bind(message.retry_count as i32)
    .bind(message.status.as_str())
    .bind(message.published_at)
    .bind(&message.last_error)
    .execute(conn)
    .await
    .map_err(|e| {
        if let sqlx::Error::Database(ref db_err) = e {
            if db_err.code().as_deref() == Some("23505") {
                return OutboxError::DuplicateEvent(message.event_id);
            }
        }
        OutboxError::Storage(DbError::Query(e))
    })?;

    Ok(())
}

#[async_trait]
impl OutboxStore for PgOutboxStore {
    async fn enqueue(&self, message: OutboxMessage) -> Result<(), OutboxError> {
        let mut conn = self.pool.acquire().await.map_err(DbError::Query)?;
        insert_message(&mut conn, &message).await
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<OutboxMessage>, OutboxError> {
        let rows = sqlx::query(&format!(
            r#"
            UPDATE outbox_messages
            SET available_at = $2
            WHERE id IN (
                SELECT id
                FROM outbox_messages
                WHERE status = 'PENDING'
                  AND available_at <= $1
                ORDER BY available_at, id
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {COLUMNS}
            "#
        ))
        .bind(now)
        .bind(lease_until)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::Query)?;

        let mut messages = rows
            .iter()
            .map(message_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        messages.sort_by_key(|m| (m.occurred_at, m.event_id));
        Ok(messages)
    }

    async fn renew_claim(
        &self,
        event_id: &EventId,
        claimed_until: DateTime<Utc>,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<bool, OutboxError> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_messages
            SET available_at = $4
            WHERE event_id = $1
              AND status = 'PENDING'
              AND available_at = $2
              AND available_at > $3
            "#,
        )
        .bind(event_id.to_string())
        .bind(claimed_until)
        .bind(now)
        .bind(lease_until)
        .execute(&self.pool)
        .await
        .map_err(DbError::Query)?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_sent(
        &self,
        event_id: &EventId,
        published_at: DateTime<Utc>,
    ) -> Result<bool, OutboxError> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_messages
            SET status = 'SENT', published_at = $2
            WHERE event_id = $1 AND status = 'PENDING'
            "#,
        )
        .bind(event_id.to_string())
        .bind(published_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::Query)?;

        Ok(result.rows_affected() > 0)
    }

    async fn reschedule(
        &self,
        event_id: &EventId,
        expected_retry_count: u32,
        available_at: DateTime<Utc>,
        last_error: &str,
    ) -> Result<bool, OutboxError> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_messages
            SET retry_count = retry_count + 1,
                available_at = $3,
                last_error = $4
            WHERE event_id = $1
              AND status = 'PENDING'
              AND retry_count = $2
            "#,
        )
        .bind(event_id.to_string())
        .bind(expected_retry_count as i32)
        .bind(available_at)
        .bind(last_error)
        .execute(&self.pool)
        .await
        .map_err(DbError::Query)?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_failed(&self, event_id: &EventId, last_error: &str) -> Result<bool, OutboxError> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_messages
            SET status = 'FAILED', last_error = $2
            WHERE event_id = $1 AND status = 'PENDING'
            "#,
        )
        .bind(event_id.to_string())
        .bind(last_error)
        .execute(&self.pool)
        .await
        .map_err(DbError::Query)?;

        Ok(result.rows_affected() > 0)
    }

    async fn get(&self, event_id: &EventId) -> Result<Option<OutboxMessage>, OutboxError> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM outbox_messages WHERE event_id = $1"
        ))
        .bind(event_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::Query)?;

        Ok(row.as_ref().map(message_from_row).transpose()?)
    }
}

//! Counter sequences and reservations.
//!
//! Reservations for one bucket are serialized by a transaction-scoped
//! advisory lock keyed on the bucket, so every process sharing the database
//! sees a single total order of increments.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPool, Row};

use super::DbError;
use crate::counter::{CounterBucket, CounterError, ReserveOutcome, SequenceStore, MAX_SEQUENCE};

#[derive(Clone)]
pub struct PgSequenceStore {
    pool: PgPool,
}

impl PgSequenceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn sequence_from_db(value: i32) -> Result<u32, DbError> {
    u32::try_from(value).map_err(|_| DbError::corrupt("counter_sequences", format!("negative sequence {value}")))
}

#[async_trait]
impl SequenceStore for PgSequenceStore {
    async fn reserve(
        &self,
        bucket: &CounterBucket,
        request_key: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<ReserveOutcome, CounterError> {
        let mut tx = self.pool.begin().await.map_err(DbError::Query)?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(bucket.key())
            .execute(&mut *tx)
            .await
            .map_err(DbError::Query)?;

        let existing = sqlx::query(
            r#"
            SELECT sequence, expires_at, confirmed_at
            FROM counter_reservations
            WHERE year_code = $1
              AND gender_prefix = $2
              AND request_key = $3
            "#,
        )
        .bind(&bucket.year_code)
        .bind(bucket.prefix())
        .bind(request_key)
        .fetch_optional(&mut *tx)
        .await
        .map_err(DbError::Query)?;

        if let Some(row) = existing {
            let sequence: i32 = row.try_get("sequence").map_err(DbError::Query)?;
            let expires_at: Option<DateTime<Utc>> =
                row.try_get("expires_at").map_err(DbError::Query)?;
            let confirmed_at: Option<DateTime<Utc>> =
                row.try_get("confirmed_at").map_err(DbError::Query)?;

            if confirmed_at.is_some() {
                tx.commit().await.map_err(DbError::Query)?;
                return Ok(ReserveOutcome::Reserved {
                    sequence: sequence_from_db(sequence)?,
                    replayed: true,
                });
            }
            if expires_at.is_some_and(|at| at > now) {
                tx.commit().await.map_err(DbError::Query)?;
                return Ok(ReserveOutcome::Pending);
            }
        }

        sqlx::query(
            r#"
            INSERT INTO counter_sequences (year_code, gender_prefix, last_value)
            VALUES ($1, $2, 0)
            ON CONFLICT (year_code, gender_prefix) DO NOTHING
            "#,
        )
        .bind(&bucket.year_code)
        .bind(bucket.prefix())
        .execute(&mut *tx)
        .await
        .map_err(DbError::Query)?;

        let incremented = sqlx::query(
            r#"
            UPDATE counter_sequences
            SET last_value = last_value + 1, updated_at = now()
            WHERE year_code = $1
              AND gender_prefix = $2
              AND last_value < $3
            RETURNING last_value
            "#,
        )
        .bind(&bucket.year_code)
        .bind(bucket.prefix())
        .bind(MAX_SEQUENCE as i32)
        .fetch_optional(&mut *tx)
        .await
        .map_err(DbError::Query)?;

        let Some(row) = incremented else {
            tx.commit().await.map_err(DbError::Query)?;
            return Ok(ReserveOutcome::Exhausted);
        };
        let sequence: i32 = row.try_get("last_value").map_err(DbError::Query)?;

        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero());
        sqlx::query(
            r#"
            INSERT INTO counter_reservations (
                year_code,
                gender_prefix,
                request_key,
                sequence,
                expires_at,
                confirmed_at
            )
            VALUES ($1, $2, $3, $4, $5, NULL)
            ON CONFLICT (year_code, gender_prefix, request_key)
            DO UPDATE SET
                sequence = EXCLUDED.sequence,
                expires_at = EXCLUDED.expires_at,
                confirmed_at = NULL
            "#,
        )
        .bind(&bucket.year_code)
        .bind(bucket.prefix())
        .bind(request_key)
        .bind(sequence)
        .bind(now + ttl)
        .execute(&mut *tx)
        .await
        .map_err(DbError::Query)?;

        tx.commit().await.map_err(DbError::Query)?;

        Ok(ReserveOutcome::Reserved {
            sequence: sequence_from_db(sequence)?,
            replayed: false,
        })
    }

    async fn confirm(
        &self,
        bucket: &CounterBucket,
        request_key: &str,
        sequence: u32,
    ) -> Result<(), CounterError> {
        let result = sqlx::query(
            r#"
            UPDATE counter_reservations
            SET confirmed_at = now(), expires_at = NULL
            WHERE year_code = $1
              AND gender_prefix = $2
              AND request_key = $3
              AND sequence = $4
            "#,
        )
        .bind(&bucket.year_code)
        .bind(bucket.prefix())
        .bind(request_key)
        .bind(sequence as i32)
        .execute(&self.pool)
        .await
        .map_err(DbError::Query)?;

        if result.rows_affected() == 0 {
            return Err(CounterError::ReservationLost {
                bucket: bucket.key(),
                request_key: request_key.to_string(),
            });
        }
        Ok(())
    }

    async fn peek_next(&self, bucket: &CounterBucket) -> Result<Option<u32>, CounterError> {
        let last: Option<i32> = sqlx::query_scalar(
            r#"
            SELECT last_value
            FROM counter_sequences
            WHERE year_code = $1 AND gender_prefix = $2
            "#,
        )
        .bind(&bucket.year_code)
        .bind(bucket.prefix())
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::Query)?;

        let last = sequence_from_db(last.unwrap_or(0))?;
        Ok((last < MAX_SEQUENCE).then_some(last + 1))
    }
}

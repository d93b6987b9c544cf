//! Students, mentors and the allocation commit.

use std::collections::BTreeSet;

use async_trait::async_trait;
use pairwise_id::{MentorId, NationalId};
use sqlx::{
    postgres::{PgConnection, PgPool, PgRow},
    Row,
};
use tracing::debug;

use super::outbox::insert_message;
use super::DbError;
use crate::allocation::{
    AllocationRecord, AllocationStore, CommitOutcome, MentorRepository, NewAllocation,
    StudentAllocationStatus, StudentRepository,
};
use crate::domain::{EducationStatus, Gender, Mentor, MentorType, Student};
use crate::error::AllocationError;
use crate::outbox::OutboxMessage;

const UNIQUE_VIOLATION: &str = "23505";

#[derive(Clone)]
pub struct PgDirectory {
    pool: PgPool,
}

impl PgDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn gender_from_db(table: &'static str, code: i16) -> Result<Gender, DbError> {
    u8::try_from(code)
        .ok()
        .and_then(Gender::from_code)
        .ok_or_else(|| DbError::corrupt(table, format!("gender code {code}")))
}

fn codes_from_db(table: &'static str, values: Vec<i32>) -> Result<BTreeSet<u32>, DbError> {
    values
        .into_iter()
        .map(|v| u32::try_from(v).map_err(|_| DbError::corrupt(table, format!("negative code {v}"))))
        .collect()
}

fn u32_from_db(table: &'static str, value: i32) -> Result<u32, DbError> {
    u32::try_from(value).map_err(|_| DbError::corrupt(table, format!("negative value {value}")))
}

fn student_from_row(row: &PgRow) -> Result<Student, DbError> {
    const T: &str = "students";
    let national_id: String = row.try_get("national_id").map_err(DbError::Query)?;
    let gender: i16 = row.try_get("gender").map_err(DbError::Query)?;
    let education: String = row.try_get("education_status").map_err(DbError::Query)?;
    let center: i32 = row.try_get("center").map_err(DbError::Query)?;
    let group_code: i32 = row.try_get("group_code").map_err(DbError::Query)?;
    let school_code: Option<i32> = row.try_get("school_code").map_err(DbError::Query)?;

    let education_status = match education.as_str() {
        "studying" => EducationStatus::Studying,
        "graduated" => EducationStatus::Graduated,
        other => return Err(DbError::corrupt(T, format!("education status {other}"))),
    };

    Ok(Student {
        national_id: NationalId::parse(&national_id).map_err(|e| DbError::corrupt(T, e))?,
        gender: gender_from_db(T, gender)?,
        education_status,
        center: u32_from_db(T, center)?,
        group_code: u32_from_db(T, group_code)?,
        school_code: school_code.map(|c| u32_from_db(T, c)).transpose()?,
        counter: row.try_get("counter").map_err(DbError::Query)?,
    })
}

fn mentor_from_row(row: &PgRow) -> Result<Mentor, DbError> {
    const T: &str = "mentors";
    let mentor_id: i64 = row.try_get("mentor_id").map_err(DbError::Query)?;
    let gender: Option<i16> = row.try_get("gender").map_err(DbError::Query)?;
    let mentor_type: String = row.try_get("mentor_type").map_err(DbError::Query)?;
    let capacity: i32 = row.try_get("capacity").map_err(DbError::Query)?;
    let current_load: i32 = row.try_get("current_load").map_err(DbError::Query)?;

    let mentor_type = match mentor_type.as_str() {
        "normal" => MentorType::Normal,
        "school" => MentorType::School,
        other => return Err(DbError::corrupt(T, format!("mentor type {other}"))),
    };

    Ok(Mentor {
        id: MentorId::new(mentor_id),
        gender: gender.map(|g| gender_from_db(T, g)).transpose()?,
        mentor_type,
        capacity: u32_from_db(T, capacity)?,
        current_load: u32_from_db(T, current_load)?,
        allowed_groups: codes_from_db(T, row.try_get("allowed_groups").map_err(DbError::Query)?)?,
        allowed_centers: codes_from_db(T, row.try_get("allowed_centers").map_err(DbError::Query)?)?,
        school_codes: codes_from_db(T, row.try_get("school_codes").map_err(DbError::Query)?)?,
    })
}

fn allocation_from_row(row: &PgRow) -> Result<AllocationRecord, DbError> {
    const T: &str = "allocations";
    let allocation_id: String = row.try_get("allocation_id").map_err(DbError::Query)?;
    let student_id: String = row.try_get("student_id").map_err(DbError::Query)?;
    let status: String = row.try_get("status").map_err(DbError::Query)?;

    Ok(AllocationRecord {
        allocation_id: allocation_id.parse().map_err(|e| DbError::corrupt(T, e))?,
        allocation_code: row.try_get("allocation_code").map_err(DbError::Query)?,
        year_code: row.try_get("year_code").map_err(DbError::Query)?,
        student_id: NationalId::parse(&student_id).map_err(|e| DbError::corrupt(T, e))?,
        mentor_id: MentorId::new(row.try_get("mentor_id").map_err(DbError::Query)?),
        idempotency_key: row.try_get("idempotency_key").map_err(DbError::Query)?,
        status: status.parse().map_err(|e: String| DbError::corrupt(T, e))?,
        created_at: row.try_get("created_at").map_err(DbError::Query)?,
        updated_at: row.try_get("updated_at").map_err(DbError::Query)?,
    })
}

/// Conditional `current_load + 1` on an open connection or transaction.
async fn increment_load_on(conn: &mut PgConnection, mentor_id: MentorId) -> Result<(), AllocationError> {
    let result = sqlx::query(
        r#"
        UPDATE mentors
        SET current_load = current_load + 1, updated_at = now()
        WHERE mentor_id = $1
          AND active
          AND current_load < capacity
        "#,
    )
    .bind(mentor_id.value())
    .execute(&mut *conn)
    .await
    .map_err(DbError::Query)?;

    if result.rows_affected() > 0 {
        return Ok(());
    }

    let exists: bool =
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM mentors WHERE mentor_id = $1 AND active)")
            .bind(mentor_id.value())
            .fetch_one(&mut *conn)
            .await
            .map_err(DbError::Query)?;

    if exists {
        Err(AllocationError::CapacityExceeded { mentor_id })
    } else {
        Err(AllocationError::MentorNotAvailable { mentor_id })
    }
}

async fn find_allocation(
    conn: &mut PgConnection,
    idempotency_key: &str,
) -> Result<Option<AllocationRecord>, DbError> {
    let row = sqlx::query(
        r#"
        SELECT
            allocation_id,
            allocation_code,
            year_code,
            student_id,
            mentor_id,
            idempotency_key,
            status,
            created_at,
            updated_at
        FROM allocations
        WHERE idempotency_key = $1
        "#,
    )
    .bind(idempotency_key)
    .fetch_optional(conn)
    .await
    .map_err(DbError::Query)?;

    row.as_ref().map(allocation_from_row).transpose()
}

#[async_trait]
impl StudentRepository for PgDirectory {
    async fn list_ready_for_allocation(&self, batch_size: usize) -> Result<Vec<Student>, DbError> {
        let rows = sqlx::query(
            r#"
            SELECT
                national_id,
                gender,
                education_status,
                center,
                group_code,
                school_code,
                counter
            FROM students
            WHERE allocation_status = 'PENDING'
            ORDER BY created_at, national_id
            LIMIT $1
            "#,
        )
        .bind(i64::try_from(batch_size).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::Query)?;

        rows.iter().map(student_from_row).collect()
    }

    async fn mark_assigned(
        &self,
        student_id: &NationalId,
        mentor_id: Option<MentorId>,
        status: StudentAllocationStatus,
    ) -> Result<(), DbError> {
        sqlx::query(
            r#"
            UPDATE students
            SET allocation_status = $2, mentor_id = $3, updated_at = now()
            WHERE national_id = $1
            "#,
        )
        .bind(student_id.as_str())
        .bind(status.as_str())
        .bind(mentor_id.map(|id| id.value()))
        .execute(&self.pool)
        .await
        .map_err(DbError::Query)?;

        Ok(())
    }
}

#[async_trait]
impl MentorRepository for PgDirectory {
    async fn find_candidates(&self, _student: &Student) -> Result<Vec<Mentor>, DbError> {
        let rows = sqlx::query(
            r#"
            SELECT
                mentor_id,
                gender,
                mentor_type,
                capacity,
                current_load,
                allowed_groups,
                allowed_centers,
                school_codes
            FROM mentors
            WHERE active
            ORDER BY mentor_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::Query)?;

        rows.iter().map(mentor_from_row).collect()
    }

    async fn increment_load(&self, mentor_id: MentorId) -> Result<(), AllocationError> {
        let mut conn = self.pool.acquire().await.map_err(DbError::Query)?;
        increment_load_on(&mut conn, mentor_id).await
    }
}

#[async_trait]
impl AllocationStore for PgDirectory {
    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<AllocationRecord>, DbError> {
        let mut conn = self.pool.acquire().await.map_err(DbError::Query)?;
        find_allocation(&mut conn, key).await
    }

    async fn commit(
        &self,
        allocation: NewAllocation,
        events: Vec<OutboxMessage>,
    ) -> Result<CommitOutcome, AllocationError> {
        let mut tx = self.pool.begin().await.map_err(DbError::Query)?;

        if let Some(existing) = find_allocation(&mut tx, &allocation.idempotency_key).await? {
            return Ok(CommitOutcome::Duplicate(existing));
        }

        increment_load_on(&mut tx, allocation.mentor_id).await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO allocations (
                allocation_id,
                allocation_code,
                year_code,
                student_id,
                mentor_id,
                idempotency_key,
                status,
                created_at,
                updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, 'CONFIRMED', $7, $7)
            "#,
        )
        .bind(allocation.allocation_id.to_string())
        .bind(&allocation.allocation_code)
        .bind(&allocation.year_code)
        .bind(allocation.student_id.as_str())
        .bind(allocation.mentor_id.value())
        .bind(&allocation.idempotency_key)
        .bind(allocation.created_at)
        .execute(&mut *tx)
        .await;

        if let Err(e) = inserted {
            let constraint = match &e {
                sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) => {
                    db_err.constraint().map(str::to_string)
                }
                _ => None,
            };
            drop(tx);

            if constraint.as_deref() == Some("allocations_idempotency_key_key") {
                // Lost a race with an identical request; report its result.
                debug!(idempotency_key = %allocation.idempotency_key, "Concurrent duplicate commit");
                let mut conn = self.pool.acquire().await.map_err(DbError::Query)?;
                if let Some(existing) = find_allocation(&mut conn, &allocation.idempotency_key).await? {
                    return Ok(CommitOutcome::Duplicate(existing));
                }
            }
            if constraint.as_deref() == Some("allocations_allocation_code_key") {
                return Err(AllocationError::Internal(format!(
                    "allocation code {} already issued",
                    allocation.allocation_code
                )));
            }
            return Err(DbError::Query(e).into());
        }

        let updated = sqlx::query(
            r#"
            UPDATE students
            SET counter = COALESCE(counter, $2), updated_at = now()
            WHERE national_id = $1
            "#,
        )
        .bind(allocation.student_id.as_str())
        .bind(&allocation.allocation_code)
        .execute(&mut *tx)
        .await
        .map_err(DbError::Query)?;

        if updated.rows_affected() == 0 {
            return Err(AllocationError::InvalidStudentData(format!(
                "unknown student {}",
                allocation.student_id
            )));
        }

        for message in &events {
            insert_message(&mut tx, message).await?;
        }

        tx.commit().await.map_err(DbError::Query)?;

        Ok(CommitOutcome::Committed(allocation.into_record()))
    }
}

//! The allocation transaction.
//!
//! Selection, counter issuance and the atomic commit of load, allocation,
//! student counter and `allocation.created` event.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::Datelike;
use pairwise_events::{AllocationCreatedPayload, AllocationFailedPayload};
use pairwise_id::{AllocationId, NationalId};
use pairwise_retry::Clock;
use tracing::{error, info, instrument, warn};

use super::{
    idempotency_key, AllocationRecord, AllocationStore, CommitOutcome, MentorRepository,
    NewAllocation, StudentAllocationStatus, StudentRepository,
};
use crate::counter::{CounterRecord, SequenceService};
use crate::domain::{Mentor, Student};
use crate::engine::{AllocationEngine, RotationLedger, SelectionResult};
use crate::error::AllocationError;
use crate::outbox::{OutboxMessage, OutboxStore};

#[derive(Debug, Clone, Copy)]
pub struct AllocationConfig {
    /// Academic year used for counters and fairness keys. Defaults to the
    /// clock's calendar year for counters when unset.
    pub academic_year: Option<u32>,

    /// Selection re-runs after losing a capacity race.
    pub max_conflict_retries: u32,
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            academic_year: None,
            max_conflict_retries: 3,
        }
    }
}

/// A committed (or replayed) allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationOutcome {
    pub record: AllocationRecord,
    /// True when the idempotency key had already been committed.
    pub replayed: bool,
}

/// Result of one batch run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub processed: usize,
    pub assigned: usize,
    pub no_eligible_mentor: usize,
    pub failed: usize,
    /// Left pending after a transient failure.
    pub deferred: usize,
}

pub struct AllocationService {
    engine: AllocationEngine,
    sequences: Arc<SequenceService>,
    students: Arc<dyn StudentRepository>,
    mentors: Arc<dyn MentorRepository>,
    store: Arc<dyn AllocationStore>,
    outbox: Arc<dyn OutboxStore>,
    clock: Arc<dyn Clock>,
    ledger: Mutex<RotationLedger>,
    config: AllocationConfig,
}

impl AllocationService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        engine: AllocationEngine,
        sequences: Arc<SequenceService>,
        students: Arc<dyn StudentRepository>,
        mentors: Arc<dyn MentorRepository>,
        store: Arc<dyn AllocationStore>,
        outbox: Arc<dyn OutboxStore>,
        clock: Arc<dyn Clock>,
        config: AllocationConfig,
    ) -> Self {
        Self {
            engine,
            sequences,
            students,
            mentors,
            store,
            outbox,
            clock,
            ledger: Mutex::new(RotationLedger::new()),
            config,
        }
    }

    fn academic_year(&self) -> u32 {
        self.config
            .academic_year
            .unwrap_or_else(|| u32::try_from(self.clock.now().year()).unwrap_or_default())
    }

    fn select(&self, student: &Student, mentors: &[Mentor]) -> SelectionResult {
        let mut ledger = self.ledger.lock().unwrap_or_else(PoisonError::into_inner);
        self.engine
            .select_best_with(student, mentors, self.config.academic_year, &mut ledger)
    }

    /// Allocates one student. Repeating a call with the same correlation id
    /// returns the original allocation.
    #[instrument(skip(self, student), fields(student_id = %student.national_id))]
    pub async fn allocate(
        &self,
        student: &Student,
        correlation_id: &str,
    ) -> Result<AllocationOutcome, AllocationError> {
        let key = idempotency_key(&student.national_id, correlation_id);
        if let Some(record) = self.store.find_by_idempotency_key(&key).await? {
            info!(allocation_id = %record.allocation_id, "Replaying committed allocation");
            return Ok(AllocationOutcome {
                record,
                replayed: true,
            });
        }

        let year = self.academic_year();
        let mut candidates = self.mentors.find_candidates(student).await?;
        let attempts = self.config.max_conflict_retries + 1;

        for attempt in 1..=attempts {
            let selection = self.select(student, &candidates);
            let Some(mentor_id) = selection.mentor_id else {
                return Err(AllocationError::NoEligibleMentor {
                    student_id: student.national_id.to_string(),
                    selection: Box::new(selection),
                });
            };

            let counter = match &student.counter {
                Some(existing) => CounterRecord::parse(existing)?,
                None => {
                    self.sequences
                        .allocate(year, student.gender, &student.national_id, correlation_id)
                        .await?
                }
            };

            let now = self.clock.now();
            let allocation = NewAllocation {
                allocation_id: AllocationId::new(),
                allocation_code: counter.counter.clone(),
                year_code: counter.year_code.clone(),
                student_id: student.national_id.clone(),
                mentor_id,
                idempotency_key: key.clone(),
                created_at: now,
            };
            let event = AllocationCreatedPayload {
                allocation_id: allocation.allocation_id,
                allocation_code: counter.counter.clone(),
                year_code: counter.year_code.clone(),
                student_id: student.national_id.clone(),
                mentor_id,
                fairness_strategy: selection.strategy.to_string(),
                fairness_key: selection.fairness_key.clone(),
                correlation_id: correlation_id.to_string(),
            };
            let message = OutboxMessage::from_event(&event, now)?;

            match self.store.commit(allocation, vec![message]).await {
                Ok(CommitOutcome::Committed(record)) => {
                    info!(
                        allocation_id = %record.allocation_id,
                        mentor_id = %record.mentor_id,
                        allocation_code = %record.allocation_code,
                        eligible = selection.eligible_count,
                        "Allocation committed"
                    );
                    return Ok(AllocationOutcome {
                        record,
                        replayed: false,
                    });
                }
                Ok(CommitOutcome::Duplicate(record)) => {
                    return Ok(AllocationOutcome {
                        record,
                        replayed: true,
                    });
                }
                Err(e) if e.is_retryable() => {
                    warn!(mentor_id = %mentor_id, attempt, "Mentor filled concurrently, reselecting");
                    candidates = self.mentors.find_candidates(student).await?;
                }
                Err(e) => return Err(e),
            }
        }

        Err(AllocationError::ConcurrencyConflict { attempts })
    }

    /// Allocates every ready student in one batch and records each outcome
    /// on the student.
    #[instrument(skip(self))]
    pub async fn run_batch(&self, batch_size: usize) -> Result<BatchReport, AllocationError> {
        let students = self.students.list_ready_for_allocation(batch_size).await?;
        let mut report = BatchReport::default();
        let correlation_id = format!("batch:{}", self.academic_year());

        for student in students {
            report.processed += 1;
            match self.allocate(&student, &correlation_id).await {
                Ok(outcome) => {
                    self.students
                        .mark_assigned(
                            &student.national_id,
                            Some(outcome.record.mentor_id),
                            StudentAllocationStatus::Assigned,
                        )
                        .await?;
                    report.assigned += 1;
                }
                Err(AllocationError::NoEligibleMentor { selection, .. }) => {
                    self.record_no_eligible(&student.national_id, &selection, &correlation_id)
                        .await?;
                    report.no_eligible_mentor += 1;
                }
                Err(e) if e.is_transient() => {
                    warn!(
                        student_id = %student.national_id,
                        code = e.code(),
                        error = %e,
                        "Allocation deferred"
                    );
                    report.deferred += 1;
                }
                Err(e) => {
                    error!(
                        student_id = %student.national_id,
                        code = e.code(),
                        error = %e,
                        "Allocation failed"
                    );
                    self.students
                        .mark_assigned(&student.national_id, None, StudentAllocationStatus::Failed)
                        .await?;
                    report.failed += 1;
                }
            }
        }

        if report.processed > 0 {
            info!(
                processed = report.processed,
                assigned = report.assigned,
                no_eligible_mentor = report.no_eligible_mentor,
                failed = report.failed,
                deferred = report.deferred,
                "Allocation batch complete"
            );
        }
        Ok(report)
    }

    async fn record_no_eligible(
        &self,
        student_id: &NationalId,
        selection: &SelectionResult,
        correlation_id: &str,
    ) -> Result<(), AllocationError> {
        let failure = selection.failure.as_ref();
        let event = AllocationFailedPayload {
            student_id: student_id.clone(),
            reason_code: failure
                .map(|f| f.code.as_str())
                .unwrap_or("NO_ELIGIBLE_MENTOR")
                .to_string(),
            detail_code: failure.and_then(|f| f.detail).map(|d| d.as_str().to_string()),
            correlation_id: correlation_id.to_string(),
        };
        self.outbox
            .enqueue(OutboxMessage::from_event(&event, self.clock.now())?)
            .await?;
        self.students
            .mark_assigned(student_id, None, StudentAllocationStatus::NoEligibleMentor)
            .await?;
        info!(
            student_id = %student_id,
            detail = ?event.detail_code,
            "No eligible mentor"
        );
        Ok(())
    }
}

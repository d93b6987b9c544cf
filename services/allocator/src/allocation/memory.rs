use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use pairwise_id::{MentorId, NationalId};
use tokio::sync::Mutex;

use super::{
    AllocationRecord, AllocationStore, CommitOutcome, MentorRepository, NewAllocation,
    StudentAllocationStatus, StudentRepository,
};
use crate::db::DbError;
use crate::domain::{Mentor, Student};
use crate::error::AllocationError;
use crate::outbox::{InMemoryOutboxStore, OutboxMessage, OutboxStore};

#[derive(Debug, Clone)]
struct StudentEntry {
    student: Student,
    status: StudentAllocationStatus,
    mentor_id: Option<MentorId>,
    /// Registration order, used as the queue order.
    seq: u64,
}

#[derive(Debug, Default)]
struct DirectoryState {
    students: BTreeMap<NationalId, StudentEntry>,
    mentors: BTreeMap<MentorId, Mentor>,
    allocations: Vec<AllocationRecord>,
    next_seq: u64,
}

/// Students, mentors and allocations held in memory, sharing an
/// [`InMemoryOutboxStore`] for transactional event writes.
#[derive(Debug)]
pub struct InMemoryDirectory {
    state: Mutex<DirectoryState>,
    outbox: Arc<InMemoryOutboxStore>,
}

impl InMemoryDirectory {
    pub fn new(outbox: Arc<InMemoryOutboxStore>) -> Self {
        Self {
            state: Mutex::new(DirectoryState::default()),
            outbox,
        }
    }

    pub async fn add_student(&self, student: Student) {
        let mut state = self.state.lock().await;
        let seq = state.next_seq;
        state.next_seq += 1;
        state.students.insert(
            student.national_id.clone(),
            StudentEntry {
                student,
                status: StudentAllocationStatus::Pending,
                mentor_id: None,
                seq,
            },
        );
    }

    pub async fn add_mentor(&self, mentor: Mentor) {
        self.state.lock().await.mentors.insert(mentor.id, mentor);
    }

    pub async fn mentor(&self, mentor_id: MentorId) -> Option<Mentor> {
        self.state.lock().await.mentors.get(&mentor_id).cloned()
    }

    pub async fn student(&self, student_id: &NationalId) -> Option<Student> {
        let state = self.state.lock().await;
        state.students.get(student_id).map(|e| e.student.clone())
    }

    pub async fn student_status(
        &self,
        student_id: &NationalId,
    ) -> Option<(StudentAllocationStatus, Option<MentorId>)> {
        let state = self.state.lock().await;
        state
            .students
            .get(student_id)
            .map(|e| (e.status, e.mentor_id))
    }

    pub async fn allocations(&self) -> Vec<AllocationRecord> {
        self.state.lock().await.allocations.clone()
    }
}

fn increment(mentors: &mut BTreeMap<MentorId, Mentor>, mentor_id: MentorId) -> Result<(), AllocationError> {
    let mentor = mentors
        .get_mut(&mentor_id)
        .ok_or(AllocationError::MentorNotAvailable { mentor_id })?;
    if !mentor.has_capacity() {
        return Err(AllocationError::CapacityExceeded { mentor_id });
    }
    mentor.current_load += 1;
    Ok(())
}

#[async_trait]
impl StudentRepository for InMemoryDirectory {
    async fn list_ready_for_allocation(&self, batch_size: usize) -> Result<Vec<Student>, DbError> {
        let state = self.state.lock().await;
        let mut ready: Vec<&StudentEntry> = state
            .students
            .values()
            .filter(|e| e.status == StudentAllocationStatus::Pending)
            .collect();
        ready.sort_by_key(|e| e.seq);
        Ok(ready
            .into_iter()
            .take(batch_size)
            .map(|e| e.student.clone())
            .collect())
    }

    async fn mark_assigned(
        &self,
        student_id: &NationalId,
        mentor_id: Option<MentorId>,
        status: StudentAllocationStatus,
    ) -> Result<(), DbError> {
        let mut state = self.state.lock().await;
        if let Some(entry) = state.students.get_mut(student_id) {
            entry.status = status;
            entry.mentor_id = mentor_id;
        }
        Ok(())
    }
}

#[async_trait]
impl MentorRepository for InMemoryDirectory {
    async fn find_candidates(&self, _student: &Student) -> Result<Vec<Mentor>, DbError> {
        Ok(self.state.lock().await.mentors.values().cloned().collect())
    }

    async fn increment_load(&self, mentor_id: MentorId) -> Result<(), AllocationError> {
        let mut state = self.state.lock().await;
        increment(&mut state.mentors, mentor_id)
    }
}

#[async_trait]
impl AllocationStore for InMemoryDirectory {
    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<AllocationRecord>, DbError> {
        let state = self.state.lock().await;
        Ok(state
            .allocations
            .iter()
            .find(|a| a.idempotency_key == key)
            .cloned())
    }

    async fn commit(
        &self,
        allocation: NewAllocation,
        events: Vec<OutboxMessage>,
    ) -> Result<CommitOutcome, AllocationError> {
        let mut state = self.state.lock().await;

        if let Some(existing) = state
            .allocations
            .iter()
            .find(|a| a.idempotency_key == allocation.idempotency_key)
        {
            return Ok(CommitOutcome::Duplicate(existing.clone()));
        }

        // Every check runs before the first write.
        if state
            .allocations
            .iter()
            .any(|a| a.allocation_code == allocation.allocation_code)
        {
            return Err(AllocationError::Internal(format!(
                "allocation code {} already issued",
                allocation.allocation_code
            )));
        }
        if !state.students.contains_key(&allocation.student_id) {
            return Err(AllocationError::InvalidStudentData(format!(
                "unknown student {}",
                allocation.student_id
            )));
        }
        match state.mentors.get(&allocation.mentor_id) {
            None => {
                return Err(AllocationError::MentorNotAvailable {
                    mentor_id: allocation.mentor_id,
                })
            }
            Some(mentor) if !mentor.has_capacity() => {
                return Err(AllocationError::CapacityExceeded {
                    mentor_id: allocation.mentor_id,
                })
            }
            Some(_) => {}
        }

        for event in events {
            self.outbox.enqueue(event).await?;
        }

        increment(&mut state.mentors, allocation.mentor_id)?;
        if let Some(entry) = state.students.get_mut(&allocation.student_id) {
            if entry.student.counter.is_none() {
                entry.student.counter = Some(allocation.allocation_code.clone());
            }
        }

        let record = allocation.into_record();
        state.allocations.push(record.clone());
        Ok(CommitOutcome::Committed(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Gender;
    use chrono::{TimeZone, Utc};
    use pairwise_id::AllocationId;

    fn student_id() -> NationalId {
        NationalId::parse("0499370899").unwrap()
    }

    fn allocation(code: &str, key: &str, mentor: i64) -> NewAllocation {
        NewAllocation {
            allocation_id: AllocationId::new(),
            allocation_code: code.to_string(),
            year_code: "03".to_string(),
            student_id: student_id(),
            mentor_id: MentorId::new(mentor),
            idempotency_key: key.to_string(),
            created_at: Utc.with_ymd_and_hms(2024, 9, 23, 8, 0, 0).unwrap(),
        }
    }

    async fn directory() -> InMemoryDirectory {
        let directory = InMemoryDirectory::new(Arc::new(InMemoryOutboxStore::new()));
        directory
            .add_student(Student::new(student_id(), Gender::Female, 1, 1))
            .await;
        directory.add_mentor(Mentor::new(1, 1)).await;
        directory
    }

    #[tokio::test]
    async fn test_increment_load_is_conditional() {
        let directory = directory().await;
        directory.increment_load(MentorId::new(1)).await.unwrap();
        assert!(matches!(
            directory.increment_load(MentorId::new(1)).await,
            Err(AllocationError::CapacityExceeded { .. })
        ));
        assert!(matches!(
            directory.increment_load(MentorId::new(9)).await,
            Err(AllocationError::MentorNotAvailable { .. })
        ));
        assert_eq!(directory.mentor(MentorId::new(1)).await.unwrap().current_load, 1);
    }

    #[tokio::test]
    async fn test_commit_writes_everything_once() {
        let directory = directory().await;
        let first = directory
            .commit(allocation("033730001", "k1", 1), vec![])
            .await
            .unwrap();
        assert!(matches!(first, CommitOutcome::Committed(_)));

        let again = directory
            .commit(allocation("033730002", "k1", 1), vec![])
            .await
            .unwrap();
        assert_eq!(again, CommitOutcome::Duplicate(first.record().clone()));

        assert_eq!(directory.allocations().await.len(), 1);
        assert_eq!(directory.mentor(MentorId::new(1)).await.unwrap().current_load, 1);
        assert_eq!(
            directory.student(&student_id()).await.unwrap().counter.as_deref(),
            Some("033730001")
        );
    }

    #[tokio::test]
    async fn test_failed_commit_leaves_no_trace() {
        let directory = directory().await;
        directory.increment_load(MentorId::new(1)).await.unwrap();

        let err = directory
            .commit(allocation("033730001", "k1", 1), vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, AllocationError::CapacityExceeded { .. }));
        assert!(directory.allocations().await.is_empty());
        assert!(directory.student(&student_id()).await.unwrap().counter.is_none());
    }

    #[tokio::test]
    async fn test_ready_queue_order_and_marking() {
        let directory = directory().await;
        let second = NationalId::with_check_digit("123456789").unwrap();
        directory
            .add_student(Student::new(second.clone(), Gender::Male, 1, 1))
            .await;

        let ready = directory.list_ready_for_allocation(10).await.unwrap();
        assert_eq!(ready.len(), 2);
        assert_eq!(ready[0].national_id, student_id());

        directory
            .mark_assigned(&student_id(), Some(MentorId::new(1)), StudentAllocationStatus::Assigned)
            .await
            .unwrap();
        let ready = directory.list_ready_for_allocation(10).await.unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].national_id, second);
    }
}

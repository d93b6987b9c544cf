//! Mentor selection.

use pairwise_id::MentorId;
use serde::Serialize;
use tracing::debug;

use super::fairness::{fairness_key, FairnessPlanner, FairnessStrategy, RotationLedger};
use super::rules::{evaluate, ReasonCode, RuleTrace};
use crate::domain::{Mentor, Student};

/// Why no mentor was chosen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectionFailure {
    pub code: ReasonCode,
    pub message: &'static str,
    /// Reason of the last failing rule, when any candidate was evaluated.
    pub detail: Option<ReasonCode>,
}

/// Outcome of one selection. Never persisted by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectionResult {
    pub mentor_id: Option<MentorId>,
    pub failure: Option<SelectionFailure>,
    /// Trace of the winner, or of the last evaluated failing candidate.
    pub trace: RuleTrace,
    pub strategy: FairnessStrategy,
    pub fairness_key: String,
    pub eligible_count: usize,
}

impl SelectionResult {
    pub fn is_selected(&self) -> bool {
        self.mentor_id.is_some()
    }
}

/// Rule set plus fairness planner.
///
/// Selection is a pure function of its arguments and, for round-robin, the
/// caller's [`RotationLedger`].
#[derive(Debug, Clone, Copy, Default)]
pub struct AllocationEngine {
    planner: FairnessPlanner,
}

impl AllocationEngine {
    pub fn new(planner: FairnessPlanner) -> Self {
        Self { planner }
    }

    pub fn planner(&self) -> &FairnessPlanner {
        &self.planner
    }

    /// Picks at most one mentor. Round-robin uses rotation 0.
    pub fn select_best(
        &self,
        student: &Student,
        mentors: &[Mentor],
        academic_year: Option<u32>,
    ) -> SelectionResult {
        let key = fairness_key(student, academic_year);
        self.select(student, mentors, key, 0)
    }

    /// Picks at most one mentor, reading and advancing the round-robin
    /// cursor for the student's fairness key.
    pub fn select_best_with(
        &self,
        student: &Student,
        mentors: &[Mentor],
        academic_year: Option<u32>,
        ledger: &mut RotationLedger,
    ) -> SelectionResult {
        let key = fairness_key(student, academic_year);
        let rotation = ledger.position(&key);
        let result = self.select(student, mentors, key, rotation);

        if result.is_selected() && self.planner.strategy() == FairnessStrategy::BucketRoundRobin {
            ledger.advance(&result.fairness_key);
        }
        result
    }

    fn select(
        &self,
        student: &Student,
        mentors: &[Mentor],
        fairness_key: String,
        rotation: u64,
    ) -> SelectionResult {
        let mut pool: Vec<(&Mentor, RuleTrace)> = Vec::with_capacity(mentors.len());
        let mut last_failure: Option<RuleTrace> = None;

        for mentor in mentors {
            let trace = evaluate(student, mentor);
            if trace.passed() {
                pool.push((mentor, trace));
            } else {
                last_failure = Some(trace);
            }
        }

        let strategy = self.planner.strategy();
        let eligible_count = pool.len();

        let candidates: Vec<&Mentor> = pool.iter().map(|(mentor, _)| *mentor).collect();
        let winner = self
            .planner
            .rank(&candidates, &fairness_key, rotation)
            .first()
            .map(|mentor| mentor.id);

        match winner {
            Some(mentor_id) => {
                let trace = pool
                    .into_iter()
                    .find(|(mentor, _)| mentor.id == mentor_id)
                    .map(|(_, trace)| trace)
                    .unwrap_or_else(RuleTrace::skipped);

                debug!(
                    student_id = %student.national_id,
                    mentor_id = %mentor_id,
                    eligible = eligible_count,
                    strategy = %strategy,
                    fairness_key = %fairness_key,
                    "Selected mentor"
                );

                SelectionResult {
                    mentor_id: Some(mentor_id),
                    failure: None,
                    trace,
                    strategy,
                    fairness_key,
                    eligible_count,
                }
            }
            None => {
                let trace = last_failure.unwrap_or_else(RuleTrace::skipped);
                let detail = trace.failure().map(|(_, _, reason)| reason);

                debug!(
                    student_id = %student.national_id,
                    candidates = mentors.len(),
                    detail = ?detail,
                    "No eligible mentor"
                );

                SelectionResult {
                    mentor_id: None,
                    failure: Some(SelectionFailure {
                        code: ReasonCode::NoEligibleMentor,
                        message: ReasonCode::NoEligibleMentor.localized_message(),
                        detail,
                    }),
                    trace,
                    strategy,
                    fairness_key,
                    eligible_count,
                }
            }
        }
    }
}

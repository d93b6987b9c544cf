//! Eligibility rules.
//!
//! The rule set is a fixed, ordered array of pure predicates. Evaluation of a
//! (student, mentor) pair stops at the first failing rule; later rules are
//! recorded as skipped so every trace has one entry per rule.
//!
//! Graduation and school constraints (rules 5 and 6) combine as follows, the
//! first failing rule winning:
//!
//! | education | school code | mentor | code shared | outcome |
//! |-----------|-------------|--------|-------------|---------|
//! | studying  | no          | normal | -           | pass |
//! | studying  | no          | school | -           | `SCHOOL_MENTOR_NOT_ALLOWED` |
//! | studying  | yes         | normal | -           | `SCHOOL_MENTOR_REQUIRED` |
//! | studying  | yes         | school | yes         | pass |
//! | studying  | yes         | school | no          | `SCHOOL_CODE_MISMATCH` |
//! | graduated | no          | normal | -           | pass |
//! | graduated | no          | school | -           | `GRADUATE_NOT_ALLOWED` |
//! | graduated | yes         | normal | -           | pass |
//! | graduated | yes         | school | any         | `GRADUATE_NOT_ALLOWED` |

use serde::{Deserialize, Serialize};

use crate::domain::{Mentor, Student, ANY_CENTER};

/// Identifies a rule by its position in the fixed evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleId {
    Gender,
    Group,
    Center,
    Capacity,
    Graduation,
    SchoolType,
}

/// Machine-readable reason attached to a failed rule or selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    GenderMismatch,
    GroupNotAllowed,
    CenterNotAllowed,
    CapacityFull,
    GraduateNotAllowed,
    SchoolMentorRequired,
    SchoolCodeMismatch,
    SchoolMentorNotAllowed,
    NoEligibleMentor,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::GenderMismatch => "GENDER_MISMATCH",
            ReasonCode::GroupNotAllowed => "GROUP_NOT_ALLOWED",
            ReasonCode::CenterNotAllowed => "CENTER_NOT_ALLOWED",
            ReasonCode::CapacityFull => "CAPACITY_FULL",
            ReasonCode::GraduateNotAllowed => "GRADUATE_NOT_ALLOWED",
            ReasonCode::SchoolMentorRequired => "SCHOOL_MENTOR_REQUIRED",
            ReasonCode::SchoolCodeMismatch => "SCHOOL_CODE_MISMATCH",
            ReasonCode::SchoolMentorNotAllowed => "SCHOOL_MENTOR_NOT_ALLOWED",
            ReasonCode::NoEligibleMentor => "NO_ELIGIBLE_MENTOR",
        }
    }

    /// Human-readable message in the registry's operating language.
    pub fn localized_message(&self) -> &'static str {
        match self {
            ReasonCode::GenderMismatch => "جنسیت پشتیبان با دانش‌آموز سازگار نیست",
            ReasonCode::GroupNotAllowed => "گروه آزمایشی دانش‌آموز برای این پشتیبان مجاز نیست",
            ReasonCode::CenterNotAllowed => "مرکز ثبت‌نام دانش‌آموز برای این پشتیبان مجاز نیست",
            ReasonCode::CapacityFull => "ظرفیت پشتیبان تکمیل است",
            ReasonCode::GraduateNotAllowed => "پشتیبان مدرسه‌ای دانش‌آموز فارغ‌التحصیل نمی‌پذیرد",
            ReasonCode::SchoolMentorRequired => "دانش‌آموز مدرسه‌ای باید به پشتیبان مدرسه‌ای تخصیص یابد",
            ReasonCode::SchoolCodeMismatch => "کد مدرسه دانش‌آموز در فهرست مدارس پشتیبان نیست",
            ReasonCode::SchoolMentorNotAllowed => "دانش‌آموز عادی به پشتیبان مدرسه‌ای تخصیص نمی‌یابد",
            ReasonCode::NoEligibleMentor => "هیچ پشتیبان واجد شرایطی یافت نشد",
        }
    }
}

impl std::fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type RuleCheck = fn(&Student, &Mentor) -> Result<(), ReasonCode>;

#[derive(Clone, Copy)]
pub struct Rule {
    pub id: RuleId,
    pub check: RuleCheck,
}

impl std::fmt::Debug for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule").field("id", &self.id).finish()
    }
}

pub const RULE_COUNT: usize = 6;

/// The rule set, in evaluation order.
pub const RULES: [Rule; RULE_COUNT] = [
    Rule {
        id: RuleId::Gender,
        check: gender_compatible,
    },
    Rule {
        id: RuleId::Group,
        check: group_allowed,
    },
    Rule {
        id: RuleId::Center,
        check: center_allowed,
    },
    Rule {
        id: RuleId::Capacity,
        check: has_capacity,
    },
    Rule {
        id: RuleId::Graduation,
        check: graduation_allowed,
    },
    Rule {
        id: RuleId::SchoolType,
        check: school_type_consistent,
    },
];

fn gender_compatible(student: &Student, mentor: &Mentor) -> Result<(), ReasonCode> {
    match mentor.gender {
        None => Ok(()),
        Some(gender) if gender == student.gender => Ok(()),
        Some(_) => Err(ReasonCode::GenderMismatch),
    }
}

fn group_allowed(student: &Student, mentor: &Mentor) -> Result<(), ReasonCode> {
    if mentor.allowed_groups.contains(&student.group_code) {
        Ok(())
    } else {
        Err(ReasonCode::GroupNotAllowed)
    }
}

fn center_allowed(student: &Student, mentor: &Mentor) -> Result<(), ReasonCode> {
    if mentor.allowed_centers.contains(&ANY_CENTER)
        || mentor.allowed_centers.contains(&student.center)
    {
        Ok(())
    } else {
        Err(ReasonCode::CenterNotAllowed)
    }
}

fn has_capacity(_student: &Student, mentor: &Mentor) -> Result<(), ReasonCode> {
    if mentor.has_capacity() {
        Ok(())
    } else {
        Err(ReasonCode::CapacityFull)
    }
}

fn graduation_allowed(student: &Student, mentor: &Mentor) -> Result<(), ReasonCode> {
    if student.is_graduated() && mentor.is_school_mentor() {
        Err(ReasonCode::GraduateNotAllowed)
    } else {
        Ok(())
    }
}

fn school_type_consistent(student: &Student, mentor: &Mentor) -> Result<(), ReasonCode> {
    match (student.is_school_student(), mentor.is_school_mentor()) {
        (false, false) => Ok(()),
        (false, true) => Err(ReasonCode::SchoolMentorNotAllowed),
        (true, false) => Err(ReasonCode::SchoolMentorRequired),
        (true, true) => match student.school_code {
            Some(code) if mentor.school_codes.contains(&code) => Ok(()),
            _ => Err(ReasonCode::SchoolCodeMismatch),
        },
    }
}

/// One slot of a rule trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TraceEntry {
    Passed { rule: RuleId },
    Failed { rule: RuleId, reason: ReasonCode },
    Skipped { rule: RuleId },
}

impl TraceEntry {
    pub fn rule(&self) -> RuleId {
        match self {
            TraceEntry::Passed { rule }
            | TraceEntry::Failed { rule, .. }
            | TraceEntry::Skipped { rule } => *rule,
        }
    }

    pub fn is_pass(&self) -> bool {
        matches!(self, TraceEntry::Passed { .. })
    }
}

/// Per-rule outcomes for one (student, mentor) evaluation, always
/// [`RULE_COUNT`] entries long and in rule order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RuleTrace {
    entries: Vec<TraceEntry>,
}

impl RuleTrace {
    /// A trace in which no rule ran.
    pub fn skipped() -> Self {
        Self {
            entries: RULES
                .iter()
                .map(|rule| TraceEntry::Skipped { rule: rule.id })
                .collect(),
        }
    }

    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    pub fn passed(&self) -> bool {
        self.entries.iter().all(TraceEntry::is_pass)
    }

    /// Index, rule and reason of the failing rule, if any.
    pub fn failure(&self) -> Option<(usize, RuleId, ReasonCode)> {
        self.entries
            .iter()
            .enumerate()
            .find_map(|(index, entry)| match entry {
                TraceEntry::Failed { rule, reason } => Some((index, *rule, *reason)),
                _ => None,
            })
    }
}

/// Runs the rule set against one candidate, stopping at the first failure.
pub fn evaluate(student: &Student, mentor: &Mentor) -> RuleTrace {
    let mut entries = Vec::with_capacity(RULE_COUNT);
    let mut failed = false;

    for rule in &RULES {
        if failed {
            entries.push(TraceEntry::Skipped { rule: rule.id });
            continue;
        }
        match (rule.check)(student, mentor) {
            Ok(()) => entries.push(TraceEntry::Passed { rule: rule.id }),
            Err(reason) => {
                entries.push(TraceEntry::Failed {
                    rule: rule.id,
                    reason,
                });
                failed = true;
            }
        }
    }

    RuleTrace { entries }
}

//! Students and mentors as seen by the allocation core.
//!
//! Both are owned by upstream registries. The core reads students and
//! mutates exactly two mentor fields through the store: `current_load`
//! (conditional increment) and nothing else.

use std::collections::BTreeSet;

use pairwise_id::{MentorId, NationalId};
use serde::{Deserialize, Serialize};

/// Center code meaning "any center" in a mentor's allowed-center set.
pub const ANY_CENTER: u32 = 0;

/// Student gender as coded by the registry (`0` or `1`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Female,
    Male,
}

impl Gender {
    pub fn code(self) -> u8 {
        match self {
            Gender::Female => 0,
            Gender::Male => 1,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Gender::Female),
            1 => Some(Gender::Male),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EducationStatus {
    Studying,
    Graduated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MentorType {
    Normal,
    School,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    pub national_id: NationalId,
    pub gender: Gender,
    pub education_status: EducationStatus,
    pub center: u32,
    pub group_code: u32,
    pub school_code: Option<u32>,
    /// Allocation code, written once by the first successful allocation.
    pub counter: Option<String>,
}

impl Student {
    pub fn new(national_id: NationalId, gender: Gender, group_code: u32, center: u32) -> Self {
        Self {
            national_id,
            gender,
            education_status: EducationStatus::Studying,
            center,
            group_code,
            school_code: None,
            counter: None,
        }
    }

    pub fn graduated(mut self) -> Self {
        self.education_status = EducationStatus::Graduated;
        self
    }

    pub fn at_school(mut self, school_code: u32) -> Self {
        self.school_code = Some(school_code);
        self
    }

    pub fn is_graduated(&self) -> bool {
        self.education_status == EducationStatus::Graduated
    }

    /// School-type students hold a school code and are still studying;
    /// graduates are placed as normal students whatever their school code.
    pub fn is_school_student(&self) -> bool {
        self.school_code.is_some() && !self.is_graduated()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mentor {
    pub id: MentorId,
    /// `None` accepts students of either gender.
    pub gender: Option<Gender>,
    pub mentor_type: MentorType,
    pub capacity: u32,
    pub current_load: u32,
    pub allowed_groups: BTreeSet<u32>,
    /// Contains [`ANY_CENTER`] to accept every center.
    pub allowed_centers: BTreeSet<u32>,
    pub school_codes: BTreeSet<u32>,
}

impl Mentor {
    /// A normal mentor for any gender and any center, with no groups yet.
    pub fn new(id: i64, capacity: u32) -> Self {
        Self {
            id: MentorId::new(id),
            gender: None,
            mentor_type: MentorType::Normal,
            capacity,
            current_load: 0,
            allowed_groups: BTreeSet::new(),
            allowed_centers: BTreeSet::from([ANY_CENTER]),
            school_codes: BTreeSet::new(),
        }
    }

    pub fn with_load(mut self, current_load: u32) -> Self {
        self.current_load = current_load;
        self
    }

    pub fn with_gender(mut self, gender: Gender) -> Self {
        self.gender = Some(gender);
        self
    }

    pub fn with_groups(mut self, groups: impl IntoIterator<Item = u32>) -> Self {
        self.allowed_groups = groups.into_iter().collect();
        self
    }

    pub fn with_centers(mut self, centers: impl IntoIterator<Item = u32>) -> Self {
        self.allowed_centers = centers.into_iter().collect();
        self
    }

    pub fn school(mut self, school_codes: impl IntoIterator<Item = u32>) -> Self {
        self.mentor_type = MentorType::School;
        self.school_codes = school_codes.into_iter().collect();
        self
    }

    pub fn has_capacity(&self) -> bool {
        self.current_load < self.capacity
    }

    pub fn is_school_mentor(&self) -> bool {
        self.mentor_type == MentorType::School
    }

    pub fn occupancy_ratio(&self) -> f64 {
        if self.capacity == 0 {
            return 1.0;
        }
        f64::from(self.current_load) / f64::from(self.capacity)
    }
}

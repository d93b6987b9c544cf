//! Fairness ranking of the eligible pool.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use pairwise_id::MentorId;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::domain::{Mentor, Student};

/// Default width of an occupancy bucket for round-robin.
pub const DEFAULT_BUCKET_SIZE: f64 = 0.25;

/// Fairness key used when neither a counter nor an academic year is known.
pub const DEFAULT_FAIRNESS_KEY: &str = "default";

/// Absorbs float error at exact bucket boundaries (0.5 / 0.25 and so on).
const BUCKET_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FairnessStrategy {
    DeterministicJitter,
    BucketRoundRobin,
}

impl FairnessStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FairnessStrategy::DeterministicJitter => "DETERMINISTIC_JITTER",
            FairnessStrategy::BucketRoundRobin => "BUCKET_ROUND_ROBIN",
        }
    }
}

impl std::fmt::Display for FairnessStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FairnessStrategy {
    type Err = FairnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "deterministic_jitter" => Ok(FairnessStrategy::DeterministicJitter),
            "bucket_round_robin" => Ok(FairnessStrategy::BucketRoundRobin),
            _ => Err(FairnessError::UnknownStrategy(s.to_string())),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum FairnessError {
    #[error("unknown fairness strategy: {0}")]
    UnknownStrategy(String),

    #[error("bucket size must be a positive finite number, got {0}")]
    InvalidBucketSize(f64),
}

/// Round-robin cursors keyed by fairness key.
///
/// Owned by the caller and passed into the engine explicitly; a cursor moves
/// only when a selection succeeds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RotationLedger {
    cursors: BTreeMap<String, u64>,
}

impl RotationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self, fairness_key: &str) -> u64 {
        self.cursors.get(fairness_key).copied().unwrap_or(0)
    }

    pub fn advance(&mut self, fairness_key: &str) {
        let cursor = self.cursors.entry(fairness_key.to_string()).or_insert(0);
        *cursor = cursor.wrapping_add(1);
    }
}

/// Re-ranks the eligible pool according to the configured strategy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FairnessPlanner {
    strategy: FairnessStrategy,
    bucket_size: f64,
}

impl Default for FairnessPlanner {
    fn default() -> Self {
        Self::deterministic_jitter()
    }
}

impl FairnessPlanner {
    pub fn new(strategy: FairnessStrategy, bucket_size: f64) -> Result<Self, FairnessError> {
        if !bucket_size.is_finite() || bucket_size <= 0.0 {
            return Err(FairnessError::InvalidBucketSize(bucket_size));
        }
        Ok(Self {
            strategy,
            bucket_size,
        })
    }

    pub fn deterministic_jitter() -> Self {
        Self {
            strategy: FairnessStrategy::DeterministicJitter,
            bucket_size: DEFAULT_BUCKET_SIZE,
        }
    }

    pub fn bucket_round_robin(bucket_size: f64) -> Result<Self, FairnessError> {
        Self::new(FairnessStrategy::BucketRoundRobin, bucket_size)
    }

    pub fn strategy(&self) -> FairnessStrategy {
        self.strategy
    }

    pub fn bucket_size(&self) -> f64 {
        self.bucket_size
    }

    /// Orders the pool best-first. The first element is the winner.
    ///
    /// `rotation` only matters for [`FairnessStrategy::BucketRoundRobin`].
    pub fn rank<'a>(&self, pool: &[&'a Mentor], fairness_key: &str, rotation: u64) -> Vec<&'a Mentor> {
        match self.strategy {
            FairnessStrategy::DeterministicJitter => rank_jitter(pool, fairness_key),
            FairnessStrategy::BucketRoundRobin => {
                rank_round_robin(pool, self.bucket_size, rotation)
            }
        }
    }

    pub fn bucket_of(&self, mentor: &Mentor) -> u64 {
        let scaled = mentor.occupancy_ratio() / self.bucket_size + BUCKET_EPSILON;
        // Saturating cast; ratios are bounded so this never saturates in practice.
        scaled.floor() as u64
    }
}

/// Fairness key for a student: the first two characters of an existing
/// counter, else the academic year, else [`DEFAULT_FAIRNESS_KEY`].
pub fn fairness_key(student: &Student, academic_year: Option<u32>) -> String {
    if let Some(counter) = &student.counter {
        let prefix: String = counter.chars().take(2).collect();
        if prefix.chars().count() == 2 {
            return prefix;
        }
    }
    match academic_year {
        Some(year) => year.to_string(),
        None => DEFAULT_FAIRNESS_KEY.to_string(),
    }
}

/// First eight bytes, big-endian, of `sha256("{fairness_key}:{mentor_id}")`.
pub fn jitter_key(fairness_key: &str, mentor_id: MentorId) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(fairness_key.as_bytes());
    hasher.update(b":");
    hasher.update(mentor_id.to_string().as_bytes());
    let digest = hasher.finalize();

    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(head)
}

/// Compares occupancy ratios exactly, without floating point.
fn compare_occupancy(a: &Mentor, b: &Mentor) -> Ordering {
    let (a_load, a_cap) = occupancy_terms(a);
    let (b_load, b_cap) = occupancy_terms(b);
    (a_load * b_cap).cmp(&(b_load * a_cap))
}

fn occupancy_terms(mentor: &Mentor) -> (u64, u64) {
    if mentor.capacity == 0 {
        (1, 1)
    } else {
        (u64::from(mentor.current_load), u64::from(mentor.capacity))
    }
}

/// Base ranking: occupancy, then load, then mentor id.
pub fn compare_base(a: &Mentor, b: &Mentor) -> Ordering {
    compare_occupancy(a, b)
        .then_with(|| a.current_load.cmp(&b.current_load))
        .then_with(|| a.id.cmp(&b.id))
}

fn rank_jitter<'a>(pool: &[&'a Mentor], fairness_key: &str) -> Vec<&'a Mentor> {
    let mut keyed: Vec<(u64, &'a Mentor)> = pool
        .iter()
        .map(|mentor| (jitter_key(fairness_key, mentor.id), *mentor))
        .collect();

    keyed.sort_by(|(ja, a), (jb, b)| {
        compare_occupancy(a, b)
            .then_with(|| a.current_load.cmp(&b.current_load))
            .then_with(|| ja.cmp(jb))
            .then_with(|| a.id.cmp(&b.id))
    });

    keyed.into_iter().map(|(_, mentor)| mentor).collect()
}

fn rank_round_robin<'a>(pool: &[&'a Mentor], bucket_size: f64, rotation: u64) -> Vec<&'a Mentor> {
    let planner = FairnessPlanner {
        strategy: FairnessStrategy::BucketRoundRobin,
        bucket_size,
    };

    let Some(lowest) = pool.iter().map(|m| planner.bucket_of(m)).min() else {
        return Vec::new();
    };

    let mut members: Vec<&'a Mentor> = pool
        .iter()
        .copied()
        .filter(|m| planner.bucket_of(m) == lowest)
        .collect();
    members.sort_by_key(|m| m.id);

    let winner = members[(rotation % members.len() as u64) as usize];

    let mut rest: Vec<&'a Mentor> = pool
        .iter()
        .copied()
        .filter(|m| m.id != winner.id)
        .collect();
    rest.sort_by(|a, b| compare_base(a, b));

    let mut ranked = Vec::with_capacity(pool.len());
    ranked.push(winner);
    ranked.extend(rest);
    ranked
}

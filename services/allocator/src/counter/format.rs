//! Counter layout: `YY` + gender prefix + `NNNN`.

use std::sync::OnceLock;

use regex::{Regex, RegexBuilder};
use serde::Serialize;

use super::CounterError;
use crate::domain::Gender;

/// Highest sequence a bucket can issue.
pub const MAX_SEQUENCE: u32 = 9999;

/// Canonical counter shape.
pub const COUNTER_PATTERN: &str = r"^\d{2}(357|373)\d{4}$";

pub const COUNTER_LEN: usize = 9;

fn counter_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // ASCII digits only; Unicode `\d` would admit Persian and Arabic numerals.
    RE.get_or_init(|| {
        RegexBuilder::new(COUNTER_PATTERN)
            .unicode(false)
            .build()
            .expect("counter pattern is a valid regex")
    })
}

pub fn is_valid_counter(value: &str) -> bool {
    counter_regex().is_match(value)
}

pub fn year_code(year: u32) -> String {
    format!("{:02}", year % 100)
}

pub fn gender_prefix(gender: Gender) -> &'static str {
    match gender {
        Gender::Female => "373",
        Gender::Male => "357",
    }
}

fn gender_from_prefix(prefix: &str) -> Option<Gender> {
    match prefix {
        "373" => Some(Gender::Female),
        "357" => Some(Gender::Male),
        _ => None,
    }
}

/// A counter namespace: one per (year code, gender).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CounterBucket {
    pub year_code: String,
    pub gender: Gender,
}

impl CounterBucket {
    pub fn new(year: u32, gender: Gender) -> Self {
        Self {
            year_code: year_code(year),
            gender,
        }
    }

    pub fn prefix(&self) -> &'static str {
        gender_prefix(self.gender)
    }

    /// Stable key, also used as the advisory-lock name.
    pub fn key(&self) -> String {
        format!("{}:{}", self.year_code, self.prefix())
    }
}

impl std::fmt::Display for CounterBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.year_code, self.prefix())
    }
}

/// An issued counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CounterRecord {
    pub counter: String,
    pub year_code: String,
    pub gender: Gender,
    pub sequence: u32,
}

impl CounterRecord {
    /// Formats and validates a counter for `sequence` in `bucket`.
    pub fn issue(bucket: &CounterBucket, sequence: u32) -> Result<Self, CounterError> {
        let counter = format!("{}{}{:04}", bucket.year_code, bucket.prefix(), sequence);
        if sequence > MAX_SEQUENCE || !is_valid_counter(&counter) {
            return Err(CounterError::FormatInvariant { counter });
        }
        Ok(Self {
            counter,
            year_code: bucket.year_code.clone(),
            gender: bucket.gender,
            sequence,
        })
    }

    /// Parses a previously issued counter.
    pub fn parse(value: &str) -> Result<Self, CounterError> {
        if !is_valid_counter(value) {
            return Err(CounterError::InvalidCounter(value.to_string()));
        }
        let gender = gender_from_prefix(&value[2..5])
            .ok_or_else(|| CounterError::InvalidCounter(value.to_string()))?;
        let sequence = value[5..]
            .parse()
            .map_err(|_| CounterError::InvalidCounter(value.to_string()))?;

        Ok(Self {
            counter: value.to_string(),
            year_code: value[..2].to_string(),
            gender,
            sequence,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.counter
    }
}

impl std::fmt::Display for CounterRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.counter)
    }
}

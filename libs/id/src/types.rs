//! Typed ID definitions.

use crate::{define_ulid_id, IdError};

// =============================================================================
// Core-minted IDs
// =============================================================================

define_ulid_id!(
    /// Identifier of a committed allocation record.
    AllocationId,
    "alloc"
);

define_ulid_id!(
    /// Identifier of an outbox event; unique across the outbox table.
    EventId,
    "evt"
);

// =============================================================================
// Mentor IDs
// =============================================================================

/// Mentor identifier as assigned by the mentor registry.
///
/// Ordering is numeric and serves as the final tie-break in ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MentorId(i64);

impl MentorId {
    /// Creates a new MentorId from an i64.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the underlying i64 value.
    #[must_use]
    pub const fn value(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for MentorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for MentorId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(IdError::Empty);
        }
        s.parse::<i64>()
            .map(Self)
            .map_err(|_| IdError::InvalidNumber(s.to_string()))
    }
}

impl From<i64> for MentorId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl From<MentorId> for i64 {
    fn from(id: MentorId) -> Self {
        id.0
    }
}

impl serde::Serialize for MentorId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_i64(self.0)
    }
}

impl<'de> serde::Deserialize<'de> for MentorId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let id = i64::deserialize(deserializer)?;
        Ok(Self(id))
    }
}

// =============================================================================
// National IDs
// =============================================================================

/// Length of a national code.
pub const NATIONAL_ID_LEN: usize = 10;

/// A student's 10-digit national code.
///
/// The last digit is a weighted mod-11 check digit over the first nine:
/// with `r = Σ dᵢ·(10 − i) mod 11`, the check digit is `r` when `r < 2`
/// and `11 − r` otherwise. Codes made of a single repeated digit are
/// rejected even though they satisfy the checksum.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NationalId(String);

impl NationalId {
    /// Parses and validates a national code.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(IdError::Empty);
        }
        let invalid = |reason| IdError::InvalidNationalId {
            value: s.to_string(),
            reason,
        };

        if s.len() != NATIONAL_ID_LEN || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid("expected exactly 10 digits"));
        }

        let digits: Vec<u32> = s.bytes().map(|b| u32::from(b - b'0')).collect();
        if digits.iter().all(|d| *d == digits[0]) {
            return Err(invalid("repeated-digit codes are not issued"));
        }

        if check_digit(&digits[..9]) != digits[9] {
            return Err(invalid("check digit mismatch"));
        }

        Ok(Self(s.to_string()))
    }

    /// Builds a valid national code from its first nine digits by appending
    /// the matching check digit.
    pub fn with_check_digit(body: &str) -> Result<Self, IdError> {
        if body.len() != NATIONAL_ID_LEN - 1 || !body.bytes().all(|b| b.is_ascii_digit()) {
            return Err(IdError::InvalidNationalId {
                value: body.to_string(),
                reason: "expected exactly 9 leading digits",
            });
        }
        let digits: Vec<u32> = body.bytes().map(|b| u32::from(b - b'0')).collect();
        Self::parse(&format!("{body}{}", check_digit(&digits)))
    }

    /// Returns the code as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn check_digit(body: &[u32]) -> u32 {
    let sum: u32 = body
        .iter()
        .enumerate()
        .map(|(i, d)| d * (10 - i as u32))
        .sum();
    let r = sum % 11;
    if r < 2 {
        r
    } else {
        11 - r
    }
}

impl std::fmt::Display for NationalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for NationalId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for NationalId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl serde::Serialize for NationalId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for NationalId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_allocation_id_roundtrip() {
        let id = AllocationId::new();
        let parsed: AllocationId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!(id.to_string().starts_with("alloc_"));
    }

    #[test]
    fn test_event_id_invalid_prefix() {
        let result: Result<EventId, _> = "alloc_01HV4Z2WQXKJNM8GPQY6VBKC3D".parse();
        assert!(result.unwrap_err().is_prefix_error());
    }

    #[test]
    fn test_event_id_missing_separator() {
        let result: Result<EventId, _> = "evt01HV4Z2WQXKJNM8GPQY6VBKC3D".parse();
        assert_eq!(result.unwrap_err(), IdError::MissingSeparator);
    }

    #[test]
    fn test_event_id_serde_as_string() {
        let id = EventId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        let back: EventId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_mentor_id_parse_and_order() {
        let a: MentorId = "7".parse().unwrap();
        let b = MentorId::new(12);
        assert!(a < b);
        assert!("x7".parse::<MentorId>().is_err());
        assert!("".parse::<MentorId>().unwrap_err().is_empty());
    }

    #[test]
    fn test_national_id_known_valid() {
        let id = NationalId::parse("0499370899").unwrap();
        assert_eq!(id.as_str(), "0499370899");
    }

    #[test]
    fn test_national_id_rejects_bad_checksum() {
        let err = NationalId::parse("0499370898").unwrap_err();
        assert!(matches!(
            err,
            IdError::InvalidNationalId {
                reason: "check digit mismatch",
                ..
            }
        ));
    }

    #[test]
    fn test_national_id_rejects_shape() {
        assert!(NationalId::parse("12345").is_err());
        assert!(NationalId::parse("04993708a9").is_err());
        assert!(NationalId::parse("1111111111").is_err());
        assert!(NationalId::parse("").unwrap_err().is_empty());
    }

    proptest! {
        #[test]
        fn prop_with_check_digit_always_parses(body in "[0-9]{9}") {
            let repeated = body.bytes().all(|b| b == body.as_bytes()[0]);
            match NationalId::with_check_digit(&body) {
                Ok(id) => {
                    prop_assert!(id.as_str().starts_with(&body));
                    prop_assert_eq!(NationalId::parse(id.as_str()).unwrap(), id);
                }
                // Only a repeated-digit body can produce a rejected code.
                Err(_) => prop_assert!(repeated),
            }
        }
    }
}

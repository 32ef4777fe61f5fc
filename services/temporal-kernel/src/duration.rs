//! Duration parsing per §6: positive integer milliseconds, or strings matching
//! `^\d+(ms|s|m|h|d|w|y)$`. The `y` unit is fixed at exactly 365 days, not a
//! calendar year (spec §9 Open Questions).

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DurationError {
    #[error("duration must be a positive integer or a string like '30s', '5m', '1h'")]
    InvalidFormat(String),
    #[error("duration overflowed while converting to milliseconds")]
    Overflow,
}

const MS: u64 = 1;
const SECOND: u64 = 1_000 * MS;
const MINUTE: u64 = 60 * SECOND;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;
const WEEK: u64 = 7 * DAY;
const YEAR: u64 = 365 * DAY;

pub fn parse_duration_str(input: &str) -> Result<u64, DurationError> {
    let trimmed = input.trim();
    let split_at = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| DurationError::InvalidFormat(input.to_string()))?;
    let (digits, unit) = trimmed.split_at(split_at);
    if digits.is_empty() {
        return Err(DurationError::InvalidFormat(input.to_string()));
    }
    let value: u64 = digits
        .parse()
        .map_err(|_| DurationError::InvalidFormat(input.to_string()))?;
    let multiplier = match unit {
        "ms" => MS,
        "s" => SECOND,
        "m" => MINUTE,
        "h" => HOUR,
        "d" => DAY,
        "w" => WEEK,
        "y" => YEAR,
        _ => return Err(DurationError::InvalidFormat(input.to_string())),
    };
    value.checked_mul(multiplier).ok_or(DurationError::Overflow)
}

/// Either a raw millisecond count or a `DurationError`-validated string,
/// deserialized transparently so rule/timer configs can accept both forms.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct DurationMs(pub u64);

impl From<u64> for DurationMs {
    fn from(value: u64) -> Self {
        DurationMs(value)
    }
}

impl<'de> Deserialize<'de> for DurationMs {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u64),
            Text(String),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Number(ms) => Ok(DurationMs(ms)),
            Raw::Text(text) => {
                parse_duration_str(&text).map(DurationMs).map_err(serde::de::Error::custom)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_unit() {
        assert_eq!(parse_duration_str("500ms").unwrap(), 500);
        assert_eq!(parse_duration_str("30s").unwrap(), 30_000);
        assert_eq!(parse_duration_str("5m").unwrap(), 300_000);
        assert_eq!(parse_duration_str("2h").unwrap(), 7_200_000);
        assert_eq!(parse_duration_str("1d").unwrap(), 86_400_000);
        assert_eq!(parse_duration_str("1w").unwrap(), 7 * 86_400_000);
        assert_eq!(parse_duration_str("1y").unwrap(), 365 * 86_400_000);
    }

    #[test]
    fn rejects_malformed_strings() {
        assert!(parse_duration_str("five minutes").is_err());
        assert!(parse_duration_str("-5m").is_err());
        assert!(parse_duration_str("5").is_err());
        assert!(parse_duration_str("ms").is_err());
    }

    #[test]
    fn duration_ms_accepts_numbers_and_strings_identically() {
        let from_number: DurationMs = serde_json::from_value(serde_json::json!(300_000)).unwrap();
        let from_string: DurationMs = serde_json::from_value(serde_json::json!("5m")).unwrap();
        assert_eq!(from_number, from_string);
    }
}

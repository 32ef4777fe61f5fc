//! Cron scheduling per §6: standard 5-field expressions (`min hour dom mon dow`)
//! with step (`*/n`) and list support, plus `MON..SUN` day-of-week names.
//!
//! The `cron` crate parses 6- or 7-field expressions (seconds-first), so we
//! prepend a synthetic `0` seconds field before delegating to it.

use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CronError {
    #[error("invalid cron expression '{0}': {1}")]
    Invalid(String, String),
    #[error("cron expression '{0}' has no upcoming fire time")]
    NoUpcomingFireTime(String),
}

fn parse_schedule(expression: &str) -> Result<Schedule, CronError> {
    let fields = expression.split_whitespace().count();
    if fields != 5 {
        return Err(CronError::Invalid(
            expression.to_string(),
            format!("expected 5 fields (min hour dom mon dow), found {fields}"),
        ));
    }
    let with_seconds = format!("0 {expression}");
    Schedule::from_str(&with_seconds)
        .map_err(|error| CronError::Invalid(expression.to_string(), error.to_string()))
}

/// Validates a cron expression without computing a fire time. Used at
/// `setTimer` configuration time so invalid expressions fail fast (§7).
pub fn validate(expression: &str) -> Result<(), CronError> {
    parse_schedule(expression).map(|_| ())
}

/// Computes `max(0, nextFireWallTime - now)` as the next fire instant after `after`.
pub fn next_fire_after(expression: &str, after: DateTime<Utc>) -> Result<DateTime<Utc>, CronError> {
    let schedule = parse_schedule(expression)?;
    schedule
        .after(&after)
        .next()
        .ok_or_else(|| CronError::NoUpcomingFireTime(expression.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn accepts_step_and_list_expressions() {
        assert!(validate("*/15 * * * *").is_ok());
        assert!(validate("0,30 9-17 * * MON-FRI").is_ok());
    }

    #[test]
    fn rejects_wrong_field_count() {
        assert!(validate("* * * *").is_err());
        assert!(validate("* * * * * *").is_err());
    }

    #[test]
    fn rejects_garbage_expression() {
        assert!(validate("not a cron").is_err());
    }

    #[test]
    fn computes_next_fire_after_reference_point() {
        let reference = Utc.with_ymd_and_hms(2026, 7, 26, 10, 0, 0).unwrap();
        let next = next_fire_after("0 * * * *", reference).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 7, 26, 11, 0, 0).unwrap());
    }

    #[test]
    fn supports_day_of_week_names() {
        let reference = Utc.with_ymd_and_hms(2026, 7, 26, 0, 0, 0).unwrap(); // Sunday
        let next = next_fire_after("0 9 * * MON", reference).unwrap();
        assert_eq!(next.format("%A").to_string(), "Monday");
    }
}

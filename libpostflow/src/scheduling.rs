//! Schedule time parsing
//!
//! Turns the schedule strings operators type ("now", "2h", "2025-11-20 15:00")
//! into the UTC timestamp stored on publishing logs.

use chrono::{DateTime, Duration, NaiveDateTime, Utc};

use crate::error::{PostflowError, Result};

/// How far in the past an absolute time may be before it is rejected
const PAST_TOLERANCE_SECS: i64 = 60;

const NAIVE_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Parse a schedule string relative to `now`
///
/// Supports:
/// - `now`
/// - Relative durations: "30m", "2h", "1d 12h"
/// - RFC 3339 timestamps: "2025-11-20T15:00:00+01:00"
/// - UTC wall-clock times: "2025-11-20 15:00"
///
/// # Errors
///
/// Returns `InvalidInput` for empty or unparseable input, and for absolute
/// times more than a minute before `now`.
pub fn parse_schedule(input: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let input = input.trim();
    if input.is_empty() {
        return Err(PostflowError::InvalidInput(
            "Schedule string cannot be empty".to_string(),
        ));
    }

    if input.eq_ignore_ascii_case("now") {
        return Ok(now);
    }

    if let Ok(duration) = parse_duration(input) {
        return Ok(now + duration);
    }

    let at = parse_absolute(input).ok_or_else(|| {
        PostflowError::InvalidInput(format!("Could not parse schedule string: {}", input))
    })?;

    if at < now - Duration::seconds(PAST_TOLERANCE_SECS) {
        return Err(PostflowError::InvalidInput(format!(
            "Scheduled time {} is in the past",
            at.to_rfc3339()
        )));
    }

    Ok(at)
}

fn parse_duration(input: &str) -> Result<Duration> {
    let std_duration = humantime::parse_duration(input)
        .map_err(|e| PostflowError::InvalidInput(format!("Could not parse duration: {}", e)))?;
    Duration::from_std(std_duration)
        .map_err(|_| PostflowError::InvalidInput("Duration out of range".to_string()))
}

fn parse_absolute(input: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(input, NAIVE_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

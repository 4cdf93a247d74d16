//! Attempt-window math: when a venue releases inventory and when we hammer it.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Serialize;

use crate::error::EngineError;

/// UTC instant range in which attempts for a job are permitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Window {
    pub open_at: DateTime<Utc>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Parse a local wall-clock time, `HH:MM` or `HH:MM:SS`.
pub fn parse_local_time(s: &str) -> Result<NaiveTime, EngineError> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .map_err(|_| EngineError::InvalidTimeFormat(format!("{s:?} (want HH:MM)")))
}

pub fn parse_time_zone(name: &str) -> Result<Tz, EngineError> {
    name.trim()
        .parse::<Tz>()
        .map_err(|_| EngineError::InvalidTimeZone(name.to_string()))
}

/// Compute the attempt window for a reservation.
///
/// `open date = reservation_date - days_out` is calendar arithmetic, so the release
/// instant keeps its wall-clock time across DST changes.
pub fn compute_window(
    reservation_date: NaiveDate,
    timezone: &str,
    days_out: i64,
    release_time_local: &str,
    lead_minutes: i64,
    window_minutes: i64,
) -> Result<Window, EngineError> {
    let tz = parse_time_zone(timezone)?;
    let release = parse_local_time(release_time_local)?;

    if lead_minutes < 0 || window_minutes < 0 {
        return Err(EngineError::InvalidInput(
            "lead and window minutes must be >= 0".into(),
        ));
    }
    if lead_minutes + window_minutes == 0 {
        return Err(EngineError::InvalidInput(
            "lead + window minutes must be > 0".into(),
        ));
    }

    let open_date = reservation_date
        .checked_sub_signed(Duration::days(days_out))
        .ok_or_else(|| EngineError::InvalidInput(format!("days_out {days_out} out of range")))?;

    let open_at = resolve_local(&tz, open_date.and_time(release))?;

    Ok(Window {
        open_at,
        start: open_at - Duration::minutes(lead_minutes),
        end: open_at + Duration::minutes(window_minutes),
    })
}

/// Map a local wall-clock instant to UTC. Folds resolve to the earlier instant,
/// gaps move forward past the transition.
fn resolve_local(tz: &Tz, local: NaiveDateTime) -> Result<DateTime<Utc>, EngineError> {
    if let Some(t) = tz.from_local_datetime(&local).earliest() {
        return Ok(t.with_timezone(&Utc));
    }
    tz.from_local_datetime(&(local + Duration::hours(1)))
        .earliest()
        .map(|t| t.with_timezone(&Utc))
        .ok_or_else(|| {
            EngineError::InvalidTimeFormat(format!("{local} does not exist in {}", tz.name()))
        })
}

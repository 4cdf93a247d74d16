// crates/bookflow/src/api/models.rs
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::jobs::ReservationJob;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobListItem {
    pub id: Uuid,
    pub name: String,
    pub provider: String,
    pub venue_id: String,
    pub party_size: i32,
    pub reservation_date: NaiveDate,
    pub preferred_times: Vec<NaiveTime>,
    pub status: String,

    pub window_start_at: DateTime<Utc>,
    pub window_end_at: DateTime<Utc>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub booked_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,

    pub created_at: DateTime<Utc>,
}

impl From<ReservationJob> for JobListItem {
    fn from(j: ReservationJob) -> Self {
        Self {
            id: j.id,
            name: j.name,
            provider: j.provider,
            venue_id: j.venue_id,
            party_size: j.party_size,
            reservation_date: j.reservation_date,
            preferred_times: j.preferred_times,
            status: j.status,
            window_start_at: j.window_start_at,
            window_end_at: j.window_end_at,
            last_attempt_at: j.last_attempt_at,
            booked_at: j.booked_at,
            last_error: j.last_error,
            created_at: j.created_at,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub active: i64,
    pub booked: i64,
    pub failed: i64,
    pub total: i64,
}

impl StatusCounts {
    pub fn from_rows(rows: &[(String, i64)]) -> Self {
        let mut out = StatusCounts::default();
        for (status, n) in rows {
            match status.as_str() {
                "active" => out.active += n,
                "booked" => out.booked += n,
                "failed" => out.failed += n,
                _ => {}
            }
            out.total += n;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_fold_rows_and_total_everything() {
        let c = StatusCounts::from_rows(&[
            ("active".into(), 3),
            ("booked".into(), 2),
            ("failed".into(), 1),
        ]);
        assert_eq!(
            c,
            StatusCounts {
                active: 3,
                booked: 2,
                failed: 1,
                total: 6
            }
        );
        assert_eq!(StatusCounts::from_rows(&[]), StatusCounts::default());
    }
}

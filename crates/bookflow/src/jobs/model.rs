use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::EngineError;
use crate::providers::ProviderKind;
use crate::reservation::{preferred_instants, split_csv, ContactInfo, ReservationRequest};

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ReservationJob {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub provider: String,

    pub venue_id: String,
    pub party_size: i32,
    pub reservation_date: NaiveDate,
    pub preferred_times: Vec<NaiveTime>,
    pub reservation_types: String,
    pub timezone: String,

    pub window_start_at: DateTime<Utc>,
    pub window_end_at: DateTime<Utc>,
    pub interval_seconds: i32,

    pub status: String,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub booked_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewReservationJob {
    pub user_id: Uuid,
    pub name: String,
    pub provider: ProviderKind,
    pub venue_id: String,
    pub party_size: i32,
    pub reservation_date: NaiveDate,
    pub preferred_times: Vec<NaiveTime>,
    pub reservation_types: String,
    pub timezone: String,
    pub window_start_at: DateTime<Utc>,
    pub window_end_at: DateTime<Utc>,
    pub interval_seconds: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Active,
    Booked,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Active => "active",
            JobStatus::Booked => "booked",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(JobStatus::Active),
            "booked" => Some(JobStatus::Booked),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

impl ReservationJob {
    pub fn status(&self) -> Option<JobStatus> {
        JobStatus::parse(&self.status)
    }

    pub fn provider_kind(&self) -> Result<ProviderKind, EngineError> {
        ProviderKind::parse(&self.provider)
    }

    pub fn interval(&self) -> Duration {
        Duration::seconds(i64::from(self.interval_seconds.max(1)))
    }

    /// Earliest instant the next attempt may start.
    pub fn next_attempt_at(&self) -> DateTime<Utc> {
        match self.last_attempt_at {
            None => self.window_start_at,
            Some(last) => (last + self.interval()).max(self.window_start_at),
        }
    }

    pub fn window_contains(&self, now: DateTime<Utc>) -> bool {
        self.window_start_at <= now && now <= self.window_end_at
    }

    /// Active, inside its window, and past its retry interval.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.status() == Some(JobStatus::Active)
            && self.window_contains(now)
            && self.next_attempt_at() <= now
    }

    pub fn to_request(&self, contact: &ContactInfo) -> ReservationRequest {
        ReservationRequest {
            venue_id: self.venue_id.clone(),
            date: self.reservation_date,
            party_size: self.party_size.max(1) as u32,
            preferred_times: preferred_instants(self.reservation_date, &self.preferred_times),
            reservation_types: split_csv(&self.reservation_types),
            contact: contact.clone(),
        }
    }
}

impl NewReservationJob {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.name.trim().is_empty() {
            return Err(EngineError::InvalidInput("name required".into()));
        }
        if self.venue_id.trim().is_empty() {
            return Err(EngineError::InvalidInput("venue_id required".into()));
        }
        if self.party_size < 1 {
            return Err(EngineError::InvalidInput("party_size must be >= 1".into()));
        }
        if self.preferred_times.is_empty() {
            return Err(EngineError::InvalidInput("preferred_times required".into()));
        }
        if self.window_end_at <= self.window_start_at {
            return Err(EngineError::InvalidInput(
                "window_end_at must be after window_start_at".into(),
            ));
        }
        if self.interval_seconds < 1 {
            return Err(EngineError::InvalidInput(
                "interval_seconds must be >= 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn job(window_start: DateTime<Utc>, window_end: DateTime<Utc>) -> ReservationJob {
        ReservationJob {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            name: "anniversary".into(),
            provider: "resy".into(),
            venue_id: "834".into(),
            party_size: 2,
            reservation_date: NaiveDate::from_ymd_opt(2025, 3, 15).unwrap(),
            preferred_times: vec![
                NaiveTime::from_hms_opt(19, 0, 0).unwrap(),
                NaiveTime::from_hms_opt(18, 45, 0).unwrap(),
            ],
            reservation_types: String::new(),
            timezone: "America/New_York".into(),
            window_start_at: window_start,
            window_end_at: window_end,
            interval_seconds: 10,
            status: "active".into(),
            last_attempt_at: None,
            booked_at: None,
            last_error: None,
            created_at: window_start,
            updated_at: window_start,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::job;
    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-02-13T14:55:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn fresh_job_is_eligible_inside_window_only() {
        let j = job(t0(), t0() + Duration::minutes(25));
        assert!(!j.is_eligible(t0() - Duration::seconds(1)));
        assert!(j.is_eligible(t0()));
        assert!(j.is_eligible(t0() + Duration::minutes(25)));
        assert!(!j.is_eligible(t0() + Duration::minutes(25) + Duration::seconds(1)));
    }

    #[test]
    fn next_attempt_waits_for_interval() {
        let mut j = job(t0(), t0() + Duration::minutes(25));
        let done = t0() + Duration::seconds(3);
        j.last_attempt_at = Some(done);

        assert_eq!(j.next_attempt_at(), done + Duration::seconds(10));
        assert!(!j.is_eligible(done + Duration::seconds(9)));
        assert!(j.is_eligible(done + Duration::seconds(10)));
    }

    #[test]
    fn booked_and_failed_jobs_are_never_eligible() {
        for status in ["booked", "failed"] {
            let mut j = job(t0(), t0() + Duration::minutes(25));
            j.status = status.into();
            assert!(!j.is_eligible(t0() + Duration::minutes(1)));
        }
    }

    #[test]
    fn request_combines_date_with_preferred_times() {
        let mut j = job(t0(), t0() + Duration::minutes(25));
        j.reservation_types = "Dining Room, Bar".into();
        let req = j.to_request(&ContactInfo::default());

        assert_eq!(req.preferred_times.len(), 2);
        assert_eq!(req.preferred_times[0].to_string(), "2025-03-15 19:00:00");
        assert_eq!(req.reservation_types, vec!["Dining Room", "Bar"]);
        assert_eq!(req.party_size, 2);
    }

    #[test]
    fn validation_rejects_bad_windows_and_intervals() {
        let base = NewReservationJob {
            user_id: Uuid::new_v4(),
            name: "n".into(),
            provider: ProviderKind::Resy,
            venue_id: "v".into(),
            party_size: 2,
            reservation_date: NaiveDate::from_ymd_opt(2025, 3, 15).unwrap(),
            preferred_times: vec![NaiveTime::from_hms_opt(19, 0, 0).unwrap()],
            reservation_types: String::new(),
            timezone: "UTC".into(),
            window_start_at: t0(),
            window_end_at: t0() + Duration::minutes(25),
            interval_seconds: 10,
        };
        assert!(base.validate().is_ok());

        let mut same = base.clone();
        same.window_end_at = same.window_start_at;
        assert!(same.validate().is_err());

        let mut zero = base.clone();
        zero.interval_seconds = 0;
        assert!(zero.validate().is_err());

        let mut empty = base;
        empty.party_size = 0;
        assert!(empty.validate().is_err());
    }
}

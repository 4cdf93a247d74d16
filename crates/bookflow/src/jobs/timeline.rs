use crate::jobs::error_codes::{self, ErrorCode};
use crate::jobs::repo::WINDOW_ENDED_MESSAGE;
use crate::jobs::{AttemptsRepo, JobAttempt, JobStatus, JobsRepo, ReservationJob};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct JobTimeline {
    pub job: ReservationJob,

    /// Only while the job is still active.
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<LastError>,

    pub attempts: Vec<TimelineAttempt>,
}

#[derive(Debug, Serialize)]
pub struct TimelineAttempt {
    pub id: Uuid,
    pub attempted_at: DateTime<Utc>,
    pub label: String,
    pub success: bool,
    pub output: String,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub latency_ms: i32,
    pub suggested_action: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LastError {
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub suggested_action: Option<String>,
    /// No further attempts will be made for this job.
    pub terminal: bool,
}

impl LastError {
    fn new(error_code: Option<String>, error_message: Option<String>) -> Self {
        let code = error_code.as_deref().map(ErrorCode::from_str);
        LastError {
            suggested_action: error_code
                .as_deref()
                .map(|c| error_codes::suggested_action(c).to_string()),
            terminal: code.is_some_and(|c| c.is_terminal()),
            error_code,
            error_message,
        }
    }
}

impl From<JobAttempt> for TimelineAttempt {
    fn from(a: JobAttempt) -> Self {
        let suggested = a
            .error_code
            .as_deref()
            .map(|code| error_codes::suggested_action(code).to_string());

        TimelineAttempt {
            id: a.id,
            attempted_at: a.attempted_at,
            label: a.label,
            success: a.success,
            output: a.output,
            error_code: a.error_code,
            error_message: a.error_message,
            latency_ms: a.latency_ms,
            suggested_action: suggested,
        }
    }
}

pub fn assemble(job: ReservationJob, attempts: Vec<JobAttempt>) -> JobTimeline {
    // the expiry sweep writes the job row without an attempt
    let expired = job.status() == Some(JobStatus::Failed)
        && job
            .last_error
            .as_deref()
            .is_some_and(|e| e.starts_with(WINDOW_ENDED_MESSAGE));

    let last_error = if expired {
        Some(LastError::new(
            Some(ErrorCode::WindowExpired.as_str().to_string()),
            job.last_error.clone(),
        ))
    } else {
        attempts
            .iter()
            .rev()
            .find(|a| !a.success)
            .map(|a| LastError::new(a.error_code.clone(), a.error_message.clone()))
            .or_else(|| {
                job.last_error
                    .clone()
                    .map(|msg| LastError::new(None, Some(msg)))
            })
    };

    let next_attempt_at = (job.status() == Some(JobStatus::Active)).then(|| job.next_attempt_at());

    JobTimeline {
        job,
        next_attempt_at,
        last_error,
        attempts: attempts.into_iter().map(TimelineAttempt::from).collect(),
    }
}

pub async fn build_timeline(
    jobs: &JobsRepo,
    attempts: &AttemptsRepo,
    job_id: Uuid,
) -> anyhow::Result<Option<JobTimeline>> {
    let job = match jobs.get_job(job_id).await? {
        Some(j) => j,
        None => return Ok(None),
    };

    let rows = attempts.list_attempts_for_job(job_id).await?;
    Ok(Some(assemble(job, rows)))
}

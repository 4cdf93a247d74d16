use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::jobs::attempts::{AttemptRecord, AttemptsRepo};
use crate::jobs::model::{JobStatus, ReservationJob};
use crate::jobs::repo::JobsRepo;

/// The slice of persistence the scheduler and orchestrator depend on.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Active jobs with `now` inside their window, ordered by window start.
    async fn fetch_due_jobs(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> anyhow::Result<Vec<ReservationJob>>;

    /// True when this caller won the right to run the job's next attempt.
    async fn claim(&self, job_id: Uuid, now: DateTime<Utc>) -> anyhow::Result<bool>;

    async fn record_attempt(&self, rec: &AttemptRecord) -> anyhow::Result<()>;

    async fn set_status(
        &self,
        job_id: Uuid,
        status: JobStatus,
        error: Option<&str>,
    ) -> anyhow::Result<()>;

    /// Fail active jobs whose window closed before `now`. Returns how many changed.
    async fn expire_windows(&self, now: DateTime<Utc>) -> anyhow::Result<u64>;
}

#[derive(Clone)]
pub struct PgJobStore {
    jobs: JobsRepo,
    attempts: AttemptsRepo,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            jobs: JobsRepo::new(pool.clone()),
            attempts: AttemptsRepo::new(pool),
        }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn fetch_due_jobs(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> anyhow::Result<Vec<ReservationJob>> {
        self.jobs.due_jobs(now, limit).await
    }

    async fn claim(&self, job_id: Uuid, now: DateTime<Utc>) -> anyhow::Result<bool> {
        self.jobs.claim(job_id, now).await
    }

    async fn record_attempt(&self, rec: &AttemptRecord) -> anyhow::Result<()> {
        self.attempts.record_attempt(rec).await?;
        Ok(())
    }

    async fn set_status(
        &self,
        job_id: Uuid,
        status: JobStatus,
        error: Option<&str>,
    ) -> anyhow::Result<()> {
        self.jobs.set_status(job_id, status, error).await
    }

    async fn expire_windows(&self, now: DateTime<Utc>) -> anyhow::Result<u64> {
        self.jobs.expire_windows(now).await
    }
}

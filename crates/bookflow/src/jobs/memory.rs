//! In-process `JobStore` with the same semantics as the Postgres one.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::jobs::attempts::AttemptRecord;
use crate::jobs::model::{JobStatus, ReservationJob};
use crate::jobs::repo::WINDOW_ENDED_MESSAGE;
use crate::jobs::store::JobStore;

#[derive(Default)]
pub struct MemoryJobStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<Uuid, ReservationJob>,
    attempts: Vec<AttemptRecord>,
    claims: u64,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, job: ReservationJob) {
        self.inner.lock().await.jobs.insert(job.id, job);
    }

    pub async fn job(&self, job_id: Uuid) -> Option<ReservationJob> {
        self.inner.lock().await.jobs.get(&job_id).cloned()
    }

    pub async fn attempts_for(&self, job_id: Uuid) -> Vec<AttemptRecord> {
        self.inner
            .lock()
            .await
            .attempts
            .iter()
            .filter(|a| a.job_id == job_id)
            .cloned()
            .collect()
    }

    /// Successful claims so far.
    pub async fn claim_count(&self) -> u64 {
        self.inner.lock().await.claims
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn fetch_due_jobs(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> anyhow::Result<Vec<ReservationJob>> {
        let inner = self.inner.lock().await;
        let mut due: Vec<ReservationJob> = inner
            .jobs
            .values()
            .filter(|j| j.status() == Some(JobStatus::Active) && j.window_contains(now))
            .cloned()
            .collect();

        due.sort_by(|a, b| {
            a.window_start_at
                .cmp(&b.window_start_at)
                .then(a.id.cmp(&b.id))
        });
        due.truncate(limit.clamp(1, 500) as usize);
        Ok(due)
    }

    async fn claim(&self, job_id: Uuid, now: DateTime<Utc>) -> anyhow::Result<bool> {
        let mut inner = self.inner.lock().await;
        let won = match inner.jobs.get_mut(&job_id) {
            Some(job) if job.is_eligible(now) => {
                job.last_attempt_at = Some(now);
                job.updated_at = now;
                true
            }
            _ => false,
        };
        if won {
            inner.claims += 1;
        }
        Ok(won)
    }

    async fn record_attempt(&self, rec: &AttemptRecord) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().await;
        let Some(job) = inner.jobs.get_mut(&rec.job_id) else {
            anyhow::bail!("job {} not found", rec.job_id);
        };

        job.last_attempt_at = Some(rec.finished_at);
        job.updated_at = rec.finished_at;
        if rec.success {
            job.status = JobStatus::Booked.as_str().to_string();
            job.booked_at = Some(rec.finished_at);
            job.last_error = None;
        } else {
            job.last_error = rec.error_message.clone();
        }

        inner.attempts.push(rec.clone());
        Ok(())
    }

    async fn set_status(
        &self,
        job_id: Uuid,
        status: JobStatus,
        error: Option<&str>,
    ) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().await;
        let Some(job) = inner.jobs.get_mut(&job_id) else {
            anyhow::bail!("job {job_id} not found");
        };
        let now = Utc::now();
        job.status = status.as_str().to_string();
        job.last_error = error.map(str::to_string);
        if status == JobStatus::Booked && job.booked_at.is_none() {
            job.booked_at = Some(now);
        }
        job.updated_at = now;
        Ok(())
    }

    async fn expire_windows(&self, now: DateTime<Utc>) -> anyhow::Result<u64> {
        let mut inner = self.inner.lock().await;
        let mut n = 0;
        for job in inner.jobs.values_mut() {
            if job.status() == Some(JobStatus::Active) && job.window_end_at < now {
                job.status = JobStatus::Failed.as_str().to_string();
                job.last_error = Some(match job.last_error.as_deref() {
                    None | Some("") => WINDOW_ENDED_MESSAGE.to_string(),
                    Some(prev) => format!("{WINDOW_ENDED_MESSAGE}: {prev}"),
                });
                job.updated_at = now;
                n += 1;
            }
        }
        Ok(n)
    }
}

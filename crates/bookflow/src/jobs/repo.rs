// crates/bookflow/src/jobs/repo.rs

use crate::jobs::model::{JobStatus, NewReservationJob, ReservationJob};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

pub const WINDOW_ENDED_MESSAGE: &str = "attempt window ended without success";

#[derive(Clone)]
pub struct JobsRepo {
    pool: PgPool,
}

impl JobsRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // ----------------------------
    // Create
    // ----------------------------

    pub async fn create(&self, job: &NewReservationJob) -> anyhow::Result<Uuid> {
        job.validate()?;

        let id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO jobs (
                user_id, name, provider, venue_id, party_size, reservation_date,
                preferred_times, reservation_types, timezone,
                window_start_at, window_end_at, interval_seconds, status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING id
            "#,
        )
        .bind(job.user_id)
        .bind(&job.name)
        .bind(job.provider.as_str())
        .bind(&job.venue_id)
        .bind(job.party_size)
        .bind(job.reservation_date)
        .bind(&job.preferred_times)
        .bind(&job.reservation_types)
        .bind(&job.timezone)
        .bind(job.window_start_at)
        .bind(job.window_end_at)
        .bind(job.interval_seconds)
        .bind(JobStatus::Active.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    // ----------------------------
    // Reads
    // ----------------------------

    pub async fn get_job(&self, job_id: Uuid) -> anyhow::Result<Option<ReservationJob>> {
        let job = sqlx::query_as::<_, ReservationJob>("SELECT * FROM jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    pub async fn list_by_user(&self, user_id: Uuid) -> anyhow::Result<Vec<ReservationJob>> {
        let rows = sqlx::query_as::<_, ReservationJob>(
            r#"
            SELECT *
            FROM jobs
            WHERE user_id = $1
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Active jobs whose window contains `now`, earliest-opening first.
    ///
    /// Coarser than eligibility: the retry interval is checked by the caller
    /// and enforced again by `claim`.
    pub async fn due_jobs(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> anyhow::Result<Vec<ReservationJob>> {
        let limit = limit.clamp(1, 500);

        let rows = sqlx::query_as::<_, ReservationJob>(
            r#"
            SELECT *
            FROM jobs
            WHERE status = 'active'
              AND $1 >= window_start_at
              AND $1 <= window_end_at
            ORDER BY window_start_at ASC, id ASC
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Returns: (status, count) for every status present.
    pub async fn status_counts(&self) -> anyhow::Result<Vec<(String, i64)>> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            r#"
            SELECT status, COUNT(*)
            FROM jobs
            GROUP BY status
            ORDER BY status
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    // ----------------------------
    // Claiming
    // ----------------------------

    /// Atomically take the right to run one attempt for this job at `now`.
    ///
    /// The conditional UPDATE re-checks eligibility under the row lock, so two
    /// overlapping ticks (or two worker processes) cannot both win.
    pub async fn claim(&self, job_id: Uuid, now: DateTime<Utc>) -> anyhow::Result<bool> {
        let claimed = sqlx::query_scalar::<_, Uuid>(
            r#"
            UPDATE jobs
            SET last_attempt_at = $2,
                updated_at = now()
            WHERE id = $1
              AND status = 'active'
              AND $2 >= window_start_at
              AND $2 <= window_end_at
              AND (
                last_attempt_at IS NULL
                OR last_attempt_at + (interval_seconds * interval '1 second') <= $2
              )
            RETURNING id
            "#,
        )
        .bind(job_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(claimed.is_some())
    }

    // ----------------------------
    // State transitions
    // ----------------------------

    pub async fn set_status(
        &self,
        job_id: Uuid,
        status: JobStatus,
        last_error: Option<&str>,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = $2,
                last_error = $3,
                booked_at = CASE WHEN $2 = 'booked' THEN COALESCE(booked_at, now()) ELSE booked_at END,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(status.as_str())
        .bind(last_error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Fail every still-active job whose window closed before `now`.
    /// Keeps the last recorded error when there is one.
    pub async fn expire_windows(&self, now: DateTime<Utc>) -> anyhow::Result<u64> {
        let res = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'failed',
                last_error = CASE
                    WHEN last_error IS NULL OR last_error = '' THEN $2
                    ELSE $2 || ': ' || last_error
                END,
                updated_at = now()
            WHERE status = 'active'
              AND window_end_at < $1
            "#,
        )
        .bind(now)
        .bind(WINDOW_ENDED_MESSAGE)
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected())
    }
}

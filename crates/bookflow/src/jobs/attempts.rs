use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct JobAttempt {
    pub id: Uuid,
    pub job_id: Uuid,
    pub attempted_at: DateTime<Utc>,

    /// Slot label or provider action that was tried ("19:00:00", "ping", ...).
    pub label: String,
    pub success: bool,
    pub output: String,

    pub error_code: Option<String>,
    pub error_message: Option<String>,

    pub latency_ms: i32,
}

/// Outcome of one attempt, as handed to the job store.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptRecord {
    pub job_id: Uuid,
    pub finished_at: DateTime<Utc>,
    pub label: String,
    pub success: bool,
    pub output: String,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub latency_ms: i32,
}

#[derive(Clone)]
pub struct AttemptsRepo {
    pool: PgPool,
}

impl AttemptsRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append the attempt row and fold its outcome into the job, in one transaction.
    ///
    /// Success books the job. Failure only refreshes `last_attempt_at` and
    /// `last_error`; the job stays active until its window ends.
    pub async fn record_attempt(&self, rec: &AttemptRecord) -> anyhow::Result<Uuid> {
        let mut tx = self.pool.begin().await?;

        let attempt_id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO job_attempts (
                job_id, attempted_at, label, success, output,
                error_code, error_message, latency_ms
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id
            "#,
        )
        .bind(rec.job_id)
        .bind(rec.finished_at)
        .bind(&rec.label)
        .bind(rec.success)
        .bind(&rec.output)
        .bind(&rec.error_code)
        .bind(&rec.error_message)
        .bind(rec.latency_ms)
        .fetch_one(&mut *tx)
        .await?;

        if rec.success {
            sqlx::query(
                r#"
                UPDATE jobs
                SET status = 'booked',
                    booked_at = $2,
                    last_attempt_at = $2,
                    last_error = NULL,
                    updated_at = now()
                WHERE id = $1
                "#,
            )
            .bind(rec.job_id)
            .bind(rec.finished_at)
            .execute(&mut *tx)
            .await?;
        } else {
            sqlx::query(
                r#"
                UPDATE jobs
                SET last_attempt_at = $2,
                    last_error = $3,
                    updated_at = now()
                WHERE id = $1
                "#,
            )
            .bind(rec.job_id)
            .bind(rec.finished_at)
            .bind(&rec.error_message)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(attempt_id)
    }

    pub async fn list_attempts_for_job(&self, job_id: Uuid) -> anyhow::Result<Vec<JobAttempt>> {
        let rows = sqlx::query_as::<_, JobAttempt>(
            r#"
            SELECT *
            FROM job_attempts
            WHERE job_id = $1
            ORDER BY attempted_at ASC, id ASC
            "#,
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

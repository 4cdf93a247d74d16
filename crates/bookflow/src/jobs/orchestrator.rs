use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::EngineError;
use crate::jobs::attempts::AttemptRecord;
use crate::jobs::credentials::CredentialSource;
use crate::jobs::error_codes::ErrorCode;
use crate::jobs::model::{JobStatus, ReservationJob};
use crate::jobs::store::JobStore;
use crate::providers::ProviderFactory;
use crate::reservation::{rank, ContactInfo};

/// Writes of a confirmed booking before falling back to a bare status update.
const BOOKING_WRITE_TRIES: u32 = 3;
const BOOKING_WRITE_BACKOFF: Duration = Duration::from_millis(100);

/// What one attempt ended with. Already persisted when returned.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Booked {
        slot: String,
        confirmation: String,
    },
    Failed {
        stage: String,
        code: ErrorCode,
        message: String,
        /// The job was moved to `failed` because its window is over.
        window_closed: bool,
    },
}

impl AttemptOutcome {
    pub fn is_booked(&self) -> bool {
        matches!(self, AttemptOutcome::Booked { .. })
    }
}

struct StageFailure {
    stage: String,
    err: EngineError,
    output: String,
}

impl StageFailure {
    fn at(stage: &str, err: EngineError) -> Self {
        Self {
            stage: stage.to_string(),
            err,
            output: String::new(),
        }
    }
}

/// Bookings the provider confirmed but the store has not taken yet, keyed by job.
type Unsaved = Arc<Mutex<HashMap<Uuid, AttemptRecord>>>;

/// Runs ping → find → select → book for one job and records the result.
#[derive(Clone)]
pub struct AttemptOrchestrator {
    store: Arc<dyn JobStore>,
    credentials: Arc<dyn CredentialSource>,
    providers: Arc<dyn ProviderFactory>,
    contact: ContactInfo,
    unsaved: Unsaved,
}

impl AttemptOrchestrator {
    pub fn new(
        store: Arc<dyn JobStore>,
        credentials: Arc<dyn CredentialSource>,
        providers: Arc<dyn ProviderFactory>,
        contact: ContactInfo,
    ) -> Self {
        Self {
            store,
            credentials,
            providers,
            contact,
            unsaved: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Never fails: provider and store errors become the recorded outcome.
    pub async fn run_attempt(&self, job: &ReservationJob) -> AttemptOutcome {
        self.run_attempt_until(job, &CancellationToken::new()).await
    }

    /// Like `run_attempt`, but stops between provider calls once `cancel` fires.
    /// A call already in flight is bounded by the HTTP client timeout.
    pub async fn run_attempt_until(
        &self,
        job: &ReservationJob,
        cancel: &CancellationToken,
    ) -> AttemptOutcome {
        if let Some(outcome) = self.resume_unsaved(job.id).await {
            return outcome;
        }

        let started = Instant::now();
        info!(job_id = %job.id, provider = %job.provider, venue = %job.venue_id, "attempt started");

        let result = self.try_book(job, cancel).await;

        let latency_ms = started.elapsed().as_millis().min(i32::MAX as u128) as i32;
        let finished_at = Utc::now();

        let f = match result {
            Ok((slot, confirmation)) => {
                info!(job_id = %job.id, slot = %slot, latency_ms, "booked");
                let rec = AttemptRecord {
                    job_id: job.id,
                    finished_at,
                    label: slot.clone(),
                    success: true,
                    output: confirmation.clone(),
                    error_code: None,
                    error_message: None,
                    latency_ms,
                };
                self.persist_booking(rec).await;
                return AttemptOutcome::Booked { slot, confirmation };
            }
            Err(f) => f,
        };

        // a failure that finishes past the window end is the job's last one
        let closing = finished_at > job.window_end_at;
        let (code, message) = if closing {
            let expired = EngineError::WindowExpired;
            (expired.code(), format!("{expired}: {}", f.err))
        } else {
            (f.err.code(), f.err.to_string())
        };
        warn!(
            job_id = %job.id,
            stage = %f.stage,
            code = code.as_str(),
            latency_ms,
            error = %message,
            "attempt failed"
        );

        let rec = AttemptRecord {
            job_id: job.id,
            finished_at,
            label: f.stage.clone(),
            success: false,
            output: f.output,
            error_code: Some(code.as_str().to_string()),
            error_message: Some(message.clone()),
            latency_ms,
        };
        if let Err(e) = self.store.record_attempt(&rec).await {
            warn!(job_id = %job.id, error = %e, "failed to record attempt");
        }

        let mut window_closed = false;
        if code.is_terminal() {
            match self
                .store
                .set_status(job.id, JobStatus::Failed, Some(&message))
                .await
            {
                Ok(()) => {
                    window_closed = true;
                    info!(job_id = %job.id, "window ended; job failed");
                }
                Err(e) => warn!(job_id = %job.id, error = %e, "failed to mark job failed"),
            }
        }

        AttemptOutcome::Failed {
            stage: f.stage,
            code,
            message,
            window_closed,
        }
    }

    /// The job must leave `active` once the provider confirmed, or the next
    /// interval books it a second time.
    async fn persist_booking(&self, rec: AttemptRecord) {
        let job_id = rec.job_id;
        let mut backoff = BOOKING_WRITE_BACKOFF;

        for attempt in 1..=BOOKING_WRITE_TRIES {
            match self.store.record_attempt(&rec).await {
                Ok(()) => return,
                Err(e) => {
                    warn!(job_id = %job_id, attempt, error = %e, "failed to record booking")
                }
            }
            if attempt < BOOKING_WRITE_TRIES {
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
        }

        match self.store.set_status(job_id, JobStatus::Booked, None).await {
            Ok(()) => warn!(job_id = %job_id, "job marked booked without its attempt row"),
            Err(e) => {
                error!(job_id = %job_id, error = %e, "booking confirmed but not stored; holding it");
                self.unsaved
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(job_id, rec);
            }
        }
    }

    /// A job with a held booking is never sent to the provider again; its
    /// write is retried instead.
    async fn resume_unsaved(&self, job_id: Uuid) -> Option<AttemptOutcome> {
        let rec = self
            .unsaved
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&job_id)?;

        info!(job_id = %job_id, slot = %rec.label, "retrying write of held booking");
        let outcome = AttemptOutcome::Booked {
            slot: rec.label.clone(),
            confirmation: rec.output.clone(),
        };
        self.persist_booking(rec).await;
        Some(outcome)
    }

    async fn try_book(
        &self,
        job: &ReservationJob,
        cancel: &CancellationToken,
    ) -> Result<(String, String), StageFailure> {
        let kind = job
            .provider_kind()
            .map_err(|e| StageFailure::at("provider", e))?;

        // fresh every attempt; tokens may rotate mid-window
        let creds = self
            .credentials
            .credentials_for(job.user_id, kind)
            .await
            .map_err(|e| StageFailure::at("credentials", EngineError::Store(e.to_string())))?;

        let provider = self.providers.build(kind, creds);

        stop_if_cancelled(cancel, "ping")?;
        provider
            .ping()
            .await
            .map_err(|e| StageFailure::at("ping", e))?;

        let req = job.to_request(&self.contact);

        stop_if_cancelled(cancel, "find")?;
        let slots = provider
            .find_slots(&req)
            .await
            .map_err(|e| StageFailure::at("find", e))?;
        if slots.is_empty() {
            return Err(StageFailure::at("find", EngineError::NoSlotsFound));
        }
        debug!(job_id = %job.id, count = slots.len(), "slots found");

        let candidates = rank(&req.preferred_times, &slots);
        if candidates.is_empty() {
            return Err(StageFailure {
                stage: "select".to_string(),
                err: EngineError::NoMatch,
                output: format!("{} slots available, none preferred", slots.len()),
            });
        }

        let mut diagnostics = Vec::new();
        let mut last: Option<(String, EngineError)> = None;

        for slot in candidates.into_iter().take(provider.max_candidates().max(1)) {
            let label = slot.label();
            if cancel.is_cancelled() {
                diagnostics.push(format!("{label}: not tried"));
                return Err(StageFailure {
                    stage: label,
                    err: EngineError::Cancelled,
                    output: diagnostics.join("; "),
                });
            }
            match provider.book(&req, slot).await {
                Ok(confirmation) => return Ok((label, confirmation)),
                Err(e) => {
                    debug!(job_id = %job.id, slot = %label, error = %e, "candidate rejected");
                    diagnostics.push(format!("{label}: {e}"));
                    last = Some((label, e));
                }
            }
        }

        match last {
            Some((label, err)) => Err(StageFailure {
                stage: label,
                err,
                output: diagnostics.join("; "),
            }),
            // take(n) with n >= 1 over a non-empty list always tries one
            None => Err(StageFailure::at("book", EngineError::NoMatch)),
        }
    }
}

fn stop_if_cancelled(cancel: &CancellationToken, stage: &str) -> Result<(), StageFailure> {
    if cancel.is_cancelled() {
        return Err(StageFailure::at(stage, EngineError::Cancelled));
    }
    Ok(())
}

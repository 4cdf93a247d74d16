use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::jobs::orchestrator::AttemptOrchestrator;
use crate::jobs::store::JobStore;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub poll_interval: Duration,
    pub due_limit: i64,
    pub max_concurrency: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            due_limit: 25,
            max_concurrency: 16,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub expired: u64,
    pub due: usize,
    pub dispatched: usize,
}

type InFlight = Arc<Mutex<HashSet<Uuid>>>;

/// Removes the job from the in-flight set when its attempt task ends, panics included.
struct InFlightGuard {
    set: InFlight,
    job_id: Uuid,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut set = self.set.lock().unwrap_or_else(|e| e.into_inner());
        set.remove(&self.job_id);
    }
}

pub struct Scheduler {
    store: Arc<dyn JobStore>,
    orchestrator: AttemptOrchestrator,
    cfg: SchedulerConfig,
    permits: Arc<Semaphore>,
    in_flight: InFlight,
    /// Seen by every dispatched attempt; fired when `run` stops.
    shutdown: CancellationToken,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn JobStore>,
        orchestrator: AttemptOrchestrator,
        cfg: SchedulerConfig,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(cfg.max_concurrency.max(1)));
        Self {
            store,
            orchestrator,
            cfg,
            permits,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            shutdown: CancellationToken::new(),
        }
    }

    /// Tick immediately, then every `poll_interval`, until `cancel` fires.
    /// A tick in progress is abandoned on cancel; attempts already dispatched
    /// stop before their next provider call and are drained before returning.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            poll_secs = self.cfg.poll_interval.as_secs_f64(),
            due_limit = self.cfg.due_limit,
            max_concurrency = self.cfg.max_concurrency,
            "scheduler started"
        );

        let mut ticker = tokio::time::interval(self.cfg.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut tasks: JoinSet<()> = JoinSet::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let summary = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        summary = self.tick(Utc::now(), &mut tasks) => summary,
                    };
                    if summary.dispatched > 0 || summary.expired > 0 {
                        info!(
                            due = summary.due,
                            dispatched = summary.dispatched,
                            expired = summary.expired,
                            "tick"
                        );
                    }
                }
                Some(res) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = res {
                        warn!(error = %e, "attempt task aborted");
                    }
                }
            }
        }

        self.shutdown.cancel();
        info!(in_flight = tasks.len(), "scheduler stopping; draining attempts");
        while let Some(res) = tasks.join_next().await {
            if let Err(e) = res {
                warn!(error = %e, "attempt task aborted");
            }
        }
        info!("scheduler stopped");
    }

    /// One pass: expire closed windows, fetch due jobs, dispatch the eligible ones.
    pub async fn tick(&self, now: DateTime<Utc>, tasks: &mut JoinSet<()>) -> TickSummary {
        let mut summary = TickSummary::default();

        match self.store.expire_windows(now).await {
            Ok(n) => summary.expired = n,
            Err(e) => warn!(error = %e, "expire sweep failed"),
        }

        let due = match self.store.fetch_due_jobs(now, self.cfg.due_limit).await {
            Ok(d) => d,
            Err(e) => {
                warn!(error = %e, "due jobs query failed; skipping tick");
                return summary;
            }
        };
        summary.due = due.len();

        for job in due {
            // the store filter is coarser than exact eligibility
            if !job.is_eligible(now) {
                continue;
            }
            if self.is_in_flight(job.id) {
                debug!(job_id = %job.id, "previous attempt still running");
                continue;
            }

            let permit: OwnedSemaphorePermit = match self.permits.clone().try_acquire_owned() {
                Ok(p) => p,
                Err(_) => {
                    debug!("attempt pool saturated; deferring remaining jobs");
                    break;
                }
            };

            match self.store.claim(job.id, now).await {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "claim failed");
                    continue;
                }
            }

            let guard = self.mark_in_flight(job.id);
            let orchestrator = self.orchestrator.clone();
            let shutdown = self.shutdown.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let _guard = guard;
                orchestrator.run_attempt_until(&job, &shutdown).await;
            });
            summary.dispatched += 1;
        }

        summary
    }

    fn is_in_flight(&self, job_id: Uuid) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&job_id)
    }

    fn mark_in_flight(&self, job_id: Uuid) -> InFlightGuard {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(job_id);
        InFlightGuard {
            set: self.in_flight.clone(),
            job_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;

    use super::*;
    use crate::jobs::attempts::AttemptRecord;
    use crate::jobs::credentials::StaticCredentials;
    use crate::jobs::memory::MemoryJobStore;
    use crate::jobs::model::fixtures::job;
    use crate::jobs::model::{JobStatus, ReservationJob};
    use crate::jobs::orchestrator::fakes::{FakeFactory, FlakyStore, ScriptedProvider};
    use crate::reservation::ContactInfo;

    fn scheduler(
        store: Arc<dyn JobStore>,
        provider: Arc<ScriptedProvider>,
        max_concurrency: usize,
    ) -> Scheduler {
        let orch = AttemptOrchestrator::new(
            store.clone(),
            Arc::new(StaticCredentials::new()),
            Arc::new(FakeFactory { provider }),
            ContactInfo::default(),
        );
        Scheduler::new(
            store,
            orch,
            SchedulerConfig {
                poll_interval: Duration::from_millis(20),
                due_limit: 25,
                max_concurrency,
            },
        )
    }

    fn open_job() -> ReservationJob {
        let now = Utc::now();
        job(now - ChronoDuration::minutes(1), now + ChronoDuration::minutes(20))
    }

    async fn drain(tasks: &mut JoinSet<()>) {
        while let Some(res) = tasks.join_next().await {
            res.unwrap();
        }
    }

    #[tokio::test]
    async fn tick_books_due_job_and_never_dispatches_it_again() {
        let store = Arc::new(MemoryJobStore::new());
        let j = open_job();
        store.insert(j.clone()).await;
        let provider = Arc::new(ScriptedProvider::with_slots(&["19:00"]));
        let sched = scheduler(store.clone(), provider.clone(), 4);

        let mut tasks = JoinSet::new();
        let now = Utc::now();
        let first = sched.tick(now, &mut tasks).await;
        assert_eq!(first.dispatched, 1);
        drain(&mut tasks).await;

        assert_eq!(store.job(j.id).await.unwrap().status, "booked");

        let later = sched
            .tick(now + ChronoDuration::minutes(1), &mut tasks)
            .await;
        assert_eq!(later.due, 0);
        assert_eq!(later.dispatched, 0);
        assert_eq!(provider.booked(), vec!["19:00:00"]);
    }

    #[tokio::test]
    async fn failed_attempt_is_retried_only_after_interval() {
        let store = Arc::new(MemoryJobStore::new());
        let j = open_job();
        store.insert(j.clone()).await;
        let provider = Arc::new(ScriptedProvider::with_slots(&[]));
        let sched = scheduler(store.clone(), provider, 4);

        let mut tasks = JoinSet::new();
        let now = Utc::now();
        assert_eq!(sched.tick(now, &mut tasks).await.dispatched, 1);
        drain(&mut tasks).await;

        let finished = store.job(j.id).await.unwrap().last_attempt_at.unwrap();
        let early = sched.tick(finished + ChronoDuration::seconds(5), &mut tasks).await;
        assert_eq!(early.due, 1);
        assert_eq!(early.dispatched, 0);

        let due = sched
            .tick(finished + ChronoDuration::seconds(10), &mut tasks)
            .await;
        assert_eq!(due.dispatched, 1);
        drain(&mut tasks).await;
        assert_eq!(store.attempts_for(j.id).await.len(), 2);
    }

    #[tokio::test]
    async fn pool_bound_limits_dispatch_per_tick() {
        let store = Arc::new(MemoryJobStore::new());
        let a = open_job();
        let b = open_job();
        store.insert(a).await;
        store.insert(b).await;
        let mut p = ScriptedProvider::with_slots(&[]);
        p.delay = Duration::from_millis(100);
        let sched = scheduler(store.clone(), Arc::new(p), 1);

        let mut tasks = JoinSet::new();
        let summary = sched.tick(Utc::now(), &mut tasks).await;
        assert_eq!(summary.due, 2);
        assert_eq!(summary.dispatched, 1);
        assert_eq!(store.claim_count().await, 1);
        drain(&mut tasks).await;
    }

    #[tokio::test]
    async fn running_attempt_blocks_redispatch_of_same_job() {
        let store = Arc::new(MemoryJobStore::new());
        let j = open_job();
        store.insert(j.clone()).await;
        let mut p = ScriptedProvider::with_slots(&[]);
        p.delay = Duration::from_millis(200);
        let sched = scheduler(store.clone(), Arc::new(p), 4);

        let mut tasks = JoinSet::new();
        let now = Utc::now();
        assert_eq!(sched.tick(now, &mut tasks).await.dispatched, 1);

        // interval has passed on paper, but the first attempt has not returned
        let again = sched
            .tick(now + ChronoDuration::seconds(11), &mut tasks)
            .await;
        assert_eq!(again.dispatched, 0);
        assert_eq!(store.claim_count().await, 1);

        drain(&mut tasks).await;
        assert!(!sched.is_in_flight(j.id));
    }

    #[tokio::test]
    async fn tick_expires_closed_windows() {
        let store = Arc::new(MemoryJobStore::new());
        let now = Utc::now();
        let closed = job(now - ChronoDuration::hours(1), now - ChronoDuration::minutes(30));
        store.insert(closed.clone()).await;
        let sched = scheduler(
            store.clone(),
            Arc::new(ScriptedProvider::with_slots(&[])),
            4,
        );

        let mut tasks = JoinSet::new();
        let summary = sched.tick(now, &mut tasks).await;
        assert_eq!(summary.expired, 1);
        assert_eq!(summary.dispatched, 0);

        let saved = store.job(closed.id).await.unwrap();
        assert_eq!(saved.status, "failed");
        assert!(!saved.last_error.unwrap_or_default().is_empty());
    }

    #[tokio::test]
    async fn cancellation_waits_for_in_flight_attempts() {
        let store = Arc::new(MemoryJobStore::new());
        let j = open_job();
        store.insert(j.clone()).await;
        let mut p = ScriptedProvider::with_slots(&[]);
        p.delay = Duration::from_millis(150);
        let sched = Arc::new(scheduler(store.clone(), Arc::new(p), 4));

        let cancel = CancellationToken::new();
        let handle = {
            let sched = sched.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { sched.run(cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        handle.await.unwrap();

        // attempt started before cancel and was allowed to finish its write
        assert_eq!(store.attempts_for(j.id).await.len(), 1);
    }

    struct BrokenStore;

    #[async_trait]
    impl JobStore for BrokenStore {
        async fn fetch_due_jobs(
            &self,
            _now: DateTime<Utc>,
            _limit: i64,
        ) -> anyhow::Result<Vec<ReservationJob>> {
            anyhow::bail!("connection reset")
        }
        async fn claim(&self, _job_id: Uuid, _now: DateTime<Utc>) -> anyhow::Result<bool> {
            anyhow::bail!("connection reset")
        }
        async fn record_attempt(&self, _rec: &AttemptRecord) -> anyhow::Result<()> {
            anyhow::bail!("connection reset")
        }
        async fn set_status(
            &self,
            _job_id: Uuid,
            _status: JobStatus,
            _error: Option<&str>,
        ) -> anyhow::Result<()> {
            anyhow::bail!("connection reset")
        }
        async fn expire_windows(&self, _now: DateTime<Utc>) -> anyhow::Result<u64> {
            anyhow::bail!("connection reset")
        }
    }

    #[tokio::test]
    async fn store_failures_skip_the_tick_without_crashing() {
        let sched = scheduler(
            Arc::new(BrokenStore),
            Arc::new(ScriptedProvider::with_slots(&[])),
            4,
        );
        let mut tasks = JoinSet::new();
        let summary = sched.tick(Utc::now(), &mut tasks).await;
        assert_eq!(summary, TickSummary::default());
        assert!(tasks.is_empty());
    }

    #[tokio::test]
    async fn booking_survives_failed_write_without_second_reservation() {
        let memory = Arc::new(MemoryJobStore::new());
        let j = open_job();
        memory.insert(j.clone()).await;
        let provider = Arc::new(ScriptedProvider::with_slots(&["19:00"]));
        let sched = scheduler(
            Arc::new(FlakyStore::new(memory.clone(), 1)),
            provider.clone(),
            4,
        );

        let mut tasks = JoinSet::new();
        let now = Utc::now();
        assert_eq!(sched.tick(now, &mut tasks).await.dispatched, 1);
        drain(&mut tasks).await;
        assert_eq!(memory.job(j.id).await.unwrap().status, "booked");

        let later = sched
            .tick(now + ChronoDuration::seconds(11), &mut tasks)
            .await;
        drain(&mut tasks).await;
        assert_eq!(later.dispatched, 0);
        assert_eq!(provider.booked(), vec!["19:00:00"]);
    }

    #[tokio::test]
    async fn cancellation_stops_attempt_before_next_candidate() {
        let store = Arc::new(MemoryJobStore::new());
        let j = open_job();
        store.insert(j.clone()).await;
        let mut p = ScriptedProvider::with_slots(&["18:45", "19:00"]);
        p.reject.insert("19:00:00".into());
        p.reject.insert("18:45:00".into());
        p.book_delay = Duration::from_millis(150);
        let provider = Arc::new(p);
        let sched = Arc::new(scheduler(store.clone(), provider.clone(), 4));

        let cancel = CancellationToken::new();
        let handle = {
            let sched = sched.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { sched.run(cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(provider.booked(), vec!["19:00:00"]);
        let attempts = store.attempts_for(j.id).await;
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].error_code.as_deref(), Some("CANCELLED"));
        assert_eq!(store.job(j.id).await.unwrap().status, "active");
    }

    /// Store whose due query never answers.
    struct StalledStore;

    #[async_trait]
    impl JobStore for StalledStore {
        async fn fetch_due_jobs(
            &self,
            _now: DateTime<Utc>,
            _limit: i64,
        ) -> anyhow::Result<Vec<ReservationJob>> {
            std::future::pending().await
        }
        async fn claim(&self, _job_id: Uuid, _now: DateTime<Utc>) -> anyhow::Result<bool> {
            Ok(false)
        }
        async fn record_attempt(&self, _rec: &AttemptRecord) -> anyhow::Result<()> {
            Ok(())
        }
        async fn set_status(
            &self,
            _job_id: Uuid,
            _status: JobStatus,
            _error: Option<&str>,
        ) -> anyhow::Result<()> {
            Ok(())
        }
        async fn expire_windows(&self, _now: DateTime<Utc>) -> anyhow::Result<u64> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn cancellation_interrupts_a_stalled_tick() {
        let sched = Arc::new(scheduler(
            Arc::new(StalledStore),
            Arc::new(ScriptedProvider::with_slots(&[])),
            4,
        ));

        let cancel = CancellationToken::new();
        let handle = {
            let sched = sched.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { sched.run(cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("run returns promptly after cancel")
            .unwrap();
    }
}

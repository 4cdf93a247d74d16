mod common;

use common::{new_job, open_window, setup_db};

use bookflow::jobs::timeline::build_timeline;
use bookflow::jobs::{AttemptRecord, AttemptsRepo, JobsRepo};
use chrono::{Duration, Utc};
use serial_test::serial;
use uuid::Uuid;

fn failure(job_id: Uuid, code: &str, message: &str) -> AttemptRecord {
    AttemptRecord {
        job_id,
        finished_at: Utc::now(),
        label: "find".into(),
        success: false,
        output: String::new(),
        error_code: Some(code.into()),
        error_message: Some(message.into()),
        latency_ms: 87,
    }
}

#[tokio::test]
#[serial]
async fn failed_attempt_is_logged_and_job_stays_active() {
    let Some(pool) = setup_db().await else { return };
    let jobs = JobsRepo::new(pool.clone());
    let attempts = AttemptsRepo::new(pool.clone());

    let (start, end) = open_window();
    let id = jobs.create(&new_job(Uuid::new_v4(), start, end)).await.unwrap();

    let rec = failure(id, "NO_SLOTS_FOUND", "no matching slots: provider returned no available slots");
    attempts.record_attempt(&rec).await.unwrap();

    let job = jobs.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.status, "active");
    assert!(job.last_attempt_at.is_some());
    assert!(job.last_error.unwrap().contains("no matching slots"));

    let rows = attempts.list_attempts_for_job(id).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert!(!rows[0].success);
    assert_eq!(rows[0].label, "find");
    assert_eq!(rows[0].error_code.as_deref(), Some("NO_SLOTS_FOUND"));
    assert_eq!(rows[0].latency_ms, 87);
}

#[tokio::test]
#[serial]
async fn successful_attempt_books_the_job_and_removes_it_from_due() {
    let Some(pool) = setup_db().await else { return };
    let jobs = JobsRepo::new(pool.clone());
    let attempts = AttemptsRepo::new(pool.clone());

    let (start, end) = open_window();
    let id = jobs.create(&new_job(Uuid::new_v4(), start, end)).await.unwrap();

    attempts
        .record_attempt(&failure(id, "NO_MATCH", "no matching slots for preferred times"))
        .await
        .unwrap();
    attempts
        .record_attempt(&AttemptRecord {
            job_id: id,
            finished_at: Utc::now(),
            label: "19:00:00".into(),
            success: true,
            output: "resy_token=r-9".into(),
            error_code: None,
            error_message: None,
            latency_ms: 640,
        })
        .await
        .unwrap();

    let job = jobs.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.status, "booked");
    assert!(job.booked_at.is_some());
    assert!(job.last_error.is_none());

    let due = jobs.due_jobs(Utc::now(), 25).await.unwrap();
    assert!(due.iter().all(|j| j.id != id));
    assert!(!jobs.claim(id, Utc::now() + Duration::minutes(1)).await.unwrap());

    let tl = build_timeline(&jobs, &attempts, id).await.unwrap().unwrap();
    assert_eq!(tl.attempts.len(), 2);
    assert!(tl.attempts[0]
        .suggested_action
        .as_deref()
        .unwrap()
        .contains("preferred times"));
    assert!(tl.attempts[1].success);
    assert!(tl.next_attempt_at.is_none());
}

#[tokio::test]
#[serial]
async fn timeline_is_none_for_unknown_job() {
    let Some(pool) = setup_db().await else { return };
    let jobs = JobsRepo::new(pool.clone());
    let attempts = AttemptsRepo::new(pool);

    assert!(build_timeline(&jobs, &attempts, Uuid::new_v4())
        .await
        .unwrap()
        .is_none());
}

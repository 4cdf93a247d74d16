use bookflow::jobs::NewReservationJob;
use bookflow::providers::ProviderKind;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool};
use uuid::Uuid;

/// Connects to TEST_DATABASE_URL, migrates and truncates.
/// Returns None when no test database is configured so the suite still runs without Postgres.
#[allow(dead_code)]
pub async fn setup_db() -> Option<PgPool> {
    let _ = dotenvy::dotenv();

    let url = match std::env::var("TEST_DATABASE_URL") {
        Ok(u) if !u.trim().is_empty() => u,
        _ => {
            eprintln!("TEST_DATABASE_URL not set; skipping database test");
            return None;
        }
    };

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .expect("failed to connect to TEST_DATABASE_URL");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("migrations failed");

    sqlx::query(
        r#"
        TRUNCATE TABLE
            job_attempts,
            provider_credentials,
            jobs
        RESTART IDENTITY CASCADE
        "#,
    )
    .execute(&pool)
    .await
    .expect("truncate failed");

    Some(pool)
}

#[allow(dead_code)]
pub fn new_job(user_id: Uuid, start: DateTime<Utc>, end: DateTime<Utc>) -> NewReservationJob {
    NewReservationJob {
        user_id,
        name: "anniversary dinner".into(),
        provider: ProviderKind::Resy,
        venue_id: "834".into(),
        party_size: 2,
        reservation_date: NaiveDate::from_ymd_opt(2025, 3, 15).unwrap(),
        preferred_times: vec![
            NaiveTime::from_hms_opt(19, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(18, 45, 0).unwrap(),
        ],
        reservation_types: String::new(),
        timezone: "America/New_York".into(),
        window_start_at: start,
        window_end_at: end,
        interval_seconds: 10,
    }
}

/// A window that is open right now.
#[allow(dead_code)]
pub fn open_window() -> (DateTime<Utc>, DateTime<Utc>) {
    let now = Utc::now();
    (now - Duration::minutes(1), now + Duration::minutes(20))
}

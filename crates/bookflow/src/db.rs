use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    /// Server-side limit on any single statement; zero disables it.
    pub statement_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 8,
            acquire_timeout: Duration::from_secs(10),
            statement_timeout: Duration::from_secs(15),
        }
    }
}

pub async fn make_pool(database_url: &str, settings: &PoolSettings) -> anyhow::Result<PgPool> {
    let statement_timeout = statement_timeout_sql(settings.statement_timeout);
    let opts = PgPoolOptions::new()
        .max_connections(settings.max_connections.max(1))
        .acquire_timeout(settings.acquire_timeout)
        .after_connect(move |conn, _meta| {
            let statement_timeout = statement_timeout.clone();
            Box::pin(async move {
                // timestamps come back as UTC regardless of server default
                sqlx::query("SET TIME ZONE 'UTC'").execute(&mut *conn).await?;
                sqlx::query(&statement_timeout).execute(&mut *conn).await?;
                Ok(())
            })
        });

    let pool = opts.connect(database_url).await?;

    Ok(pool)
}

/// SET cannot take bind parameters, so the value is formatted in as whole milliseconds.
fn statement_timeout_sql(timeout: Duration) -> String {
    format!("SET statement_timeout = {}", timeout.as_millis())
}

pub async fn run_migrations(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

use std::time::Duration;

use crate::db::PoolSettings;
use crate::jobs::{SchedulerConfig, StaticCredentials};
use crate::providers::{opentable, resy, Credentials, ProviderKind, ProviderSettings};
use crate::reservation::ContactInfo;

/// Typed runtime configuration, read once from the environment.
#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,

    pub poll_seconds: u64,
    pub due_jobs_limit: i64,
    pub max_concurrent_attempts: usize,

    pub ping_timeout_secs: u64,
    pub http_timeout_secs: u64,

    pub admin_addr: Option<String>,
    pub migrate_on_startup: bool,

    pub contact: ContactInfo,
    pub resy: Credentials,
    pub opentable: Credentials,
    pub resy_base_url: String,
    pub opentable_base_url: String,

    pub db_max_connections: u32,
    pub db_acquire_timeout_secs: u64,
    /// Per-statement deadline for every store call; 0 disables it.
    pub db_statement_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same rules as `from_env`, over any key lookup.
    pub fn from_lookup<F>(get: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { get };

        let database_url = env
            .value("DATABASE_URL")
            .ok_or_else(|| anyhow::anyhow!("DATABASE_URL is missing"))?;

        let poll_seconds = env
            .parsed::<u64>(&["BOOKFLOW_POLL_SECONDS", "SCHED_POLL_SECONDS"])?
            .unwrap_or(2);
        if poll_seconds == 0 {
            anyhow::bail!("BOOKFLOW_POLL_SECONDS must be >= 1");
        }

        let due_jobs_limit = env
            .parsed::<i64>(&["BOOKFLOW_DUE_JOBS_LIMIT"])?
            .unwrap_or(25)
            .clamp(1, 500);

        let max_concurrent_attempts = env
            .parsed::<usize>(&["BOOKFLOW_MAX_CONCURRENT_ATTEMPTS"])?
            .unwrap_or(16);
        if max_concurrent_attempts == 0 {
            anyhow::bail!("BOOKFLOW_MAX_CONCURRENT_ATTEMPTS must be >= 1");
        }

        let ping_timeout_secs = env
            .parsed::<u64>(&["BOOKFLOW_PING_TIMEOUT_SECS"])?
            .unwrap_or(3)
            .max(1);
        let http_timeout_secs = env
            .parsed::<u64>(&["BOOKFLOW_HTTP_TIMEOUT_SECS"])?
            .unwrap_or(20)
            .max(1);

        let admin_addr = env
            .first(&["BOOKFLOW_ADMIN_ADDR", "ADMIN_ADDR"])
            .and_then(|s| normalize_optional_addr(&s));

        let migrate_on_startup = env.flag("BOOKFLOW_MIGRATE_ON_STARTUP").unwrap_or(false);

        let contact = ContactInfo {
            first_name: env.value("BOOKING_FIRST_NAME").unwrap_or_default(),
            last_name: env.value("BOOKING_LAST_NAME").unwrap_or_default(),
            email: env.value("BOOKING_EMAIL").unwrap_or_default(),
            phone: env.value("BOOKING_PHONE").unwrap_or_default(),
        };

        let resy = Credentials {
            api_key: env.value("RESY_API_KEY").unwrap_or_default(),
            auth_token: env.value("RESY_AUTH_TOKEN").unwrap_or_default(),
            persisted_query_hash: None,
        };
        let opentable = Credentials {
            api_key: String::new(),
            auth_token: env.value("OPENTABLE_TOKEN").unwrap_or_default(),
            persisted_query_hash: env.value("OPENTABLE_PQ_HASH"),
        };

        let resy_base_url = env
            .value("RESY_BASE_URL")
            .unwrap_or_else(|| resy::DEFAULT_BASE_URL.to_string());
        let opentable_base_url = env
            .value("OPENTABLE_BASE_URL")
            .unwrap_or_else(|| opentable::DEFAULT_BASE_URL.to_string());

        let db_max_connections = env
            .parsed::<u32>(&["BOOKFLOW_DB_MAX_CONNECTIONS"])?
            .unwrap_or(8)
            .clamp(1, 64);
        let db_acquire_timeout_secs = env
            .parsed::<u64>(&["BOOKFLOW_DB_ACQUIRE_TIMEOUT_SECS"])?
            .unwrap_or(10)
            .clamp(1, 60);
        let db_statement_timeout_secs = env
            .parsed::<u64>(&["BOOKFLOW_DB_STATEMENT_TIMEOUT_SECS"])?
            .unwrap_or(15)
            .min(300);

        Ok(Self {
            database_url,
            poll_seconds,
            due_jobs_limit,
            max_concurrent_attempts,
            ping_timeout_secs,
            http_timeout_secs,
            admin_addr,
            migrate_on_startup,
            contact,
            resy,
            opentable,
            resy_base_url,
            opentable_base_url,
            db_max_connections,
            db_acquire_timeout_secs,
            db_statement_timeout_secs,
        })
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            poll_interval: Duration::from_secs(self.poll_seconds),
            due_limit: self.due_jobs_limit,
            max_concurrency: self.max_concurrent_attempts,
        }
    }

    pub fn provider_settings(&self) -> ProviderSettings {
        ProviderSettings {
            resy_base_url: self.resy_base_url.clone(),
            opentable_base_url: self.opentable_base_url.clone(),
            opentable_query_hash: self.opentable.persisted_query_hash.clone(),
            ping_timeout: Duration::from_secs(self.ping_timeout_secs),
            request_timeout: Duration::from_secs(self.http_timeout_secs),
            contact: self.contact.clone(),
        }
    }

    /// Used for users without a row in `provider_credentials`.
    pub fn fallback_credentials(&self) -> StaticCredentials {
        StaticCredentials::new()
            .with(ProviderKind::Resy, self.resy.clone())
            .with(ProviderKind::OpenTable, self.opentable.clone())
    }

    pub fn pool_settings(&self) -> PoolSettings {
        PoolSettings {
            max_connections: self.db_max_connections,
            acquire_timeout: Duration::from_secs(self.db_acquire_timeout_secs),
            statement_timeout: Duration::from_secs(self.db_statement_timeout_secs),
        }
    }
}

struct Env<F> {
    get: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Trimmed, non-empty value.
    fn value(&self, key: &str) -> Option<String> {
        (self.get)(key)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    /// First key that is set wins: `PREFIX_VAR`, then the bare fallback.
    fn first(&self, keys: &[&str]) -> Option<String> {
        keys.iter().find_map(|k| self.value(k))
    }

    fn parsed<T>(&self, keys: &[&str]) -> anyhow::Result<Option<T>>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        for key in keys {
            if let Some(raw) = self.value(key) {
                let v = raw
                    .parse::<T>()
                    .map_err(|e| anyhow::anyhow!("{key}={raw:?} is invalid: {e}"))?;
                return Ok(Some(v));
            }
        }
        Ok(None)
    }

    fn flag(&self, key: &str) -> Option<bool> {
        self.value(key)
            .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
    }
}

fn normalize_optional_addr(value: &str) -> Option<String> {
    let v = value.trim();
    if v.is_empty() {
        return None;
    }
    if matches!(v.to_lowercase().as_str(), "0" | "off" | "false" | "none") {
        return None;
    }
    Some(v.to_string())
}

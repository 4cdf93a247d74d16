use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::providers::{Credentials, ProviderKind};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CredentialRow {
    pub user_id: Uuid,
    pub provider: String,
    pub api_key: String,
    pub auth_token: String,
    pub persisted_query_hash: String,
    pub updated_at: DateTime<Utc>,
}

impl From<CredentialRow> for Credentials {
    fn from(row: CredentialRow) -> Self {
        let hash = row.persisted_query_hash.trim().to_string();
        Credentials {
            api_key: row.api_key,
            auth_token: row.auth_token,
            persisted_query_hash: (!hash.is_empty()).then_some(hash),
        }
    }
}

#[derive(Clone)]
pub struct CredentialsRepo {
    pool: PgPool,
}

impl CredentialsRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(
        &self,
        user_id: Uuid,
        kind: ProviderKind,
    ) -> anyhow::Result<Option<CredentialRow>> {
        let row = sqlx::query_as::<_, CredentialRow>(
            r#"
            SELECT *
            FROM provider_credentials
            WHERE user_id = $1 AND provider = $2
            "#,
        )
        .bind(user_id)
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn upsert(
        &self,
        user_id: Uuid,
        kind: ProviderKind,
        creds: &Credentials,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO provider_credentials (user_id, provider, api_key, auth_token, persisted_query_hash)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (user_id, provider) DO UPDATE
            SET api_key = EXCLUDED.api_key,
                auth_token = EXCLUDED.auth_token,
                persisted_query_hash = EXCLUDED.persisted_query_hash,
                updated_at = now()
            "#,
        )
        .bind(user_id)
        .bind(kind.as_str())
        .bind(&creds.api_key)
        .bind(&creds.auth_token)
        .bind(creds.persisted_query_hash.as_deref().unwrap_or(""))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Where an attempt gets its provider secrets. Asked once per attempt.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn credentials_for(
        &self,
        user_id: Uuid,
        kind: ProviderKind,
    ) -> anyhow::Result<Credentials>;
}

/// Process-wide credentials, one set per provider (usually from the environment).
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    by_kind: HashMap<ProviderKind, Credentials>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, kind: ProviderKind, creds: Credentials) -> Self {
        self.by_kind.insert(kind, creds);
        self
    }

    pub fn get(&self, kind: ProviderKind) -> Credentials {
        self.by_kind.get(&kind).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl CredentialSource for StaticCredentials {
    async fn credentials_for(
        &self,
        _user_id: Uuid,
        kind: ProviderKind,
    ) -> anyhow::Result<Credentials> {
        Ok(self.get(kind))
    }
}

/// Per-user rows first; the static set fills in users without a row.
#[derive(Clone)]
pub struct PgCredentialSource {
    repo: CredentialsRepo,
    fallback: StaticCredentials,
}

impl PgCredentialSource {
    pub fn new(repo: CredentialsRepo, fallback: StaticCredentials) -> Self {
        Self { repo, fallback }
    }
}

#[async_trait]
impl CredentialSource for PgCredentialSource {
    async fn credentials_for(
        &self,
        user_id: Uuid,
        kind: ProviderKind,
    ) -> anyhow::Result<Credentials> {
        match self.repo.get(user_id, kind).await? {
            Some(row) => Ok(row.into()),
            None => Ok(self.fallback.get(kind)),
        }
    }
}

//! Booking platforms the engine can drive.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::reservation::{ContactInfo, ReservationRequest, Slot};

pub mod opentable;
pub mod resy;

pub use opentable::OpenTableProvider;
pub use resy::ResyProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Resy,
    OpenTable,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Resy => "resy",
            ProviderKind::OpenTable => "opentable",
        }
    }

    pub fn parse(s: &str) -> Result<Self, EngineError> {
        match s.trim().to_lowercase().as_str() {
            "resy" => Ok(ProviderKind::Resy),
            "opentable" => Ok(ProviderKind::OpenTable),
            other => Err(EngineError::InvalidInput(format!("unknown provider {other:?}"))),
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-user provider secrets, already decrypted, valid for one attempt.
///
/// Resy uses `api_key` + `auth_token`; OpenTable uses `auth_token` as its CSRF token
/// and may override the availability query hash.
#[derive(Clone, Default)]
pub struct Credentials {
    pub api_key: String,
    pub auth_token: String,
    pub persisted_query_hash: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &redact(&self.api_key))
            .field("auth_token", &redact(&self.auth_token))
            .field("persisted_query_hash", &self.persisted_query_hash)
            .finish()
    }
}

fn redact(v: &str) -> &'static str {
    if v.is_empty() {
        "<empty>"
    } else {
        "<redacted>"
    }
}

/// Capability set every platform exposes to the engine.
#[async_trait]
pub trait BookingProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Liveness / credential check. Fails with `AuthInvalid` or `ProviderUnavailable`.
    async fn ping(&self) -> Result<(), EngineError>;

    /// Slots the provider flags as available for the request's venue/date/party size.
    async fn find_slots(&self, req: &ReservationRequest) -> Result<Vec<Slot>, EngineError>;

    /// Complete the reservation for `slot`. Returns the provider's confirmation text.
    /// Never retries internally.
    async fn book(&self, req: &ReservationRequest, slot: &Slot) -> Result<String, EngineError>;

    /// How many ranked candidates one attempt may try.
    fn max_candidates(&self) -> usize {
        1
    }
}

/// Static knobs shared by all provider clients.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub resy_base_url: String,
    pub opentable_base_url: String,
    pub opentable_query_hash: Option<String>,
    pub ping_timeout: Duration,
    pub request_timeout: Duration,
    pub contact: ContactInfo,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            resy_base_url: resy::DEFAULT_BASE_URL.to_string(),
            opentable_base_url: opentable::DEFAULT_BASE_URL.to_string(),
            opentable_query_hash: None,
            ping_timeout: Duration::from_secs(3),
            request_timeout: Duration::from_secs(20),
            contact: ContactInfo::default(),
        }
    }
}

/// Builds a provider client bound to one attempt's credentials.
pub trait ProviderFactory: Send + Sync {
    fn build(&self, kind: ProviderKind, creds: Credentials) -> Arc<dyn BookingProvider>;
}

/// Real HTTP clients sharing one connection pool.
#[derive(Clone)]
pub struct HttpProviderFactory {
    http: reqwest::Client,
    settings: ProviderSettings,
}

impl HttpProviderFactory {
    pub fn new(http: reqwest::Client, settings: ProviderSettings) -> Self {
        Self { http, settings }
    }
}

impl ProviderFactory for HttpProviderFactory {
    fn build(&self, kind: ProviderKind, creds: Credentials) -> Arc<dyn BookingProvider> {
        match kind {
            ProviderKind::Resy => Arc::new(ResyProvider::new(
                self.http.clone(),
                &self.settings,
                creds,
            )),
            ProviderKind::OpenTable => Arc::new(OpenTableProvider::new(
                self.http.clone(),
                &self.settings,
                creds,
            )),
        }
    }
}

/// Collapse a response body into a short single-line diagnostic.
pub(crate) fn snippet(body: &str) -> String {
    const MAX: usize = 512;
    let flat = body.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.len() <= MAX {
        return flat;
    }
    let mut cut = MAX;
    while !flat.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…", &flat[..cut])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_kind_round_trips_names() {
        assert_eq!(ProviderKind::parse("Resy").unwrap(), ProviderKind::Resy);
        assert_eq!(
            ProviderKind::parse(" opentable ").unwrap(),
            ProviderKind::OpenTable
        );
        assert!(ProviderKind::parse("tock").is_err());
        assert_eq!(ProviderKind::OpenTable.to_string(), "opentable");
    }

    #[test]
    fn credentials_debug_never_prints_secrets() {
        let creds = Credentials {
            api_key: "k-123".into(),
            auth_token: "t-456".into(),
            persisted_query_hash: None,
        };
        let dbg = format!("{creds:?}");
        assert!(!dbg.contains("k-123"));
        assert!(!dbg.contains("t-456"));
    }

    #[test]
    fn snippet_flattens_and_caps() {
        assert_eq!(snippet("a\n  b\tc"), "a b c");
        assert!(snippet(&"x".repeat(2000)).chars().count() <= 513);
    }
}

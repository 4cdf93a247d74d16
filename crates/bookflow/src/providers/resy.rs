//! Resy: token flow over its private JSON API.
//!
//! find (`/4/find`) -> details (`/3/details`, exchanges a slot config token for a
//! book token and the default payment method) -> book (`/3/book`, form encoded).
//! The browser-origin headers are echoed exactly; the API treats them as part of auth.

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{snippet, BookingProvider, Credentials, ProviderSettings};
use crate::error::EngineError;
use crate::reservation::{ReservationRequest, Slot};

pub const DEFAULT_BASE_URL: &str = "https://api.resy.com";

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/114.0.0.0 Safari/537.36";
const ORIGIN: &str = "https://resy.com";

pub const META_CONFIG_TOKEN: &str = "config_token";
pub const META_SLOT_TYPE: &str = "slot_type";

pub struct ResyProvider {
    http: reqwest::Client,
    base: String,
    creds: Credentials,
    ping_timeout: Duration,
    request_timeout: Duration,
}

#[derive(Debug, Default, Deserialize)]
struct FindResponse {
    #[serde(default)]
    results: FindResults,
}

#[derive(Debug, Default, Deserialize)]
struct FindResults {
    #[serde(default)]
    venues: Vec<FindVenue>,
}

#[derive(Debug, Default, Deserialize)]
struct FindVenue {
    #[serde(default)]
    slots: Vec<ResySlot>,
}

#[derive(Debug, Default, Deserialize)]
struct ResySlot {
    #[serde(default)]
    date: SlotDate,
    #[serde(default)]
    config: SlotConfig,
}

#[derive(Debug, Default, Deserialize)]
struct SlotDate {
    #[serde(default)]
    start: String,
}

#[derive(Debug, Default, Deserialize)]
struct SlotConfig {
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    token: String,
}

#[derive(Debug, Serialize)]
struct DetailsRequest<'a> {
    config_id: &'a str,
    day: String,
    party_size: u32,
}

#[derive(Debug, Default, Deserialize)]
struct DetailsResponse {
    #[serde(default)]
    book_token: BookToken,
    #[serde(default)]
    user: DetailsUser,
}

#[derive(Debug, Default, Deserialize)]
struct BookToken {
    #[serde(default)]
    value: String,
}

#[derive(Debug, Default, Deserialize)]
struct DetailsUser {
    #[serde(default)]
    payment_methods: Vec<PaymentMethod>,
}

#[derive(Debug, Deserialize, Serialize)]
struct PaymentMethod {
    id: i64,
}

#[derive(Debug, Default, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    message: String,
}

impl ResyProvider {
    pub fn new(http: reqwest::Client, settings: &ProviderSettings, creds: Credentials) -> Self {
        Self {
            http,
            base: settings.resy_base_url.trim_end_matches('/').to_string(),
            creds,
            ping_timeout: settings.ping_timeout,
            request_timeout: settings.request_timeout,
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base, path))
            .header("user-agent", USER_AGENT)
            .header("origin", ORIGIN)
            .header("referrer", ORIGIN)
            .header("x-origin", ORIGIN)
            .header("cache-control", "no-cache")
            .header(
                "authorization",
                format!(r#"ResyAPI api_key="{}""#, self.creds.api_key),
            )
            .header("x-resy-auth-token", &self.creds.auth_token)
            .header("x-resy-universal-auth", &self.creds.auth_token)
    }

    fn require_credentials(&self) -> Result<(), EngineError> {
        if self.creds.api_key.trim().is_empty() || self.creds.auth_token.trim().is_empty() {
            return Err(EngineError::AuthInvalid(
                "resy api key and auth token are required".into(),
            ));
        }
        Ok(())
    }
}

/// Non-2xx outside the booking steps: auth statuses are credential problems,
/// everything else is treated as the platform being unavailable.
fn status_error(stage: &str, status: StatusCode, body: &str) -> EngineError {
    let message = serde_json::from_str::<ApiMessage>(body)
        .map(|m| m.message)
        .unwrap_or_default();
    let detail = if message.is_empty() {
        format!("resy {stage} failed (status={})", status.as_u16())
    } else {
        format!("resy {stage} failed: {message} (status={})", status.as_u16())
    };
    match status.as_u16() {
        401 | 403 | 419 => EngineError::AuthInvalid(detail),
        _ => EngineError::ProviderUnavailable(detail),
    }
}

fn parse_slot_start(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M"))
        .ok()
}

#[async_trait]
impl BookingProvider for ResyProvider {
    fn name(&self) -> &str {
        "resy"
    }

    async fn ping(&self) -> Result<(), EngineError> {
        self.require_credentials()?;

        let resp = self
            .request(Method::GET, "/2/user")
            .timeout(self.ping_timeout)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(status_error("ping", status, &body));
        }
        Ok(())
    }

    async fn find_slots(&self, req: &ReservationRequest) -> Result<Vec<Slot>, EngineError> {
        let party_size = req.party_size.to_string();
        let day = req.day();
        let resp = self
            .request(Method::GET, "/4/find")
            .query(&[
                ("party_size", party_size.as_str()),
                ("venue_id", req.venue_id.as_str()),
                ("day", day.as_str()),
                // deprecated upstream but still required
                ("lat", "0"),
                ("long", "0"),
            ])
            .timeout(self.request_timeout)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(status_error("find", status, &body));
        }

        let parsed: FindResponse = serde_json::from_str(&body)
            .map_err(|e| EngineError::MalformedResponse(format!("resy find: {e}")))?;

        let mut out = Vec::new();
        for venue in parsed.results.venues.into_iter().take(1) {
            for s in venue.slots {
                let Some(start) = parse_slot_start(&s.date.start) else {
                    debug!(start = %s.date.start, "dropping resy slot with unparseable start");
                    continue;
                };
                if s.config.token.is_empty() || !req.accepts_type(&s.config.kind) {
                    continue;
                }
                out.push(
                    Slot::new(start)
                        .with_meta(META_CONFIG_TOKEN, s.config.token)
                        .with_meta(META_SLOT_TYPE, s.config.kind),
                );
            }
        }
        Ok(out)
    }

    async fn book(&self, req: &ReservationRequest, slot: &Slot) -> Result<String, EngineError> {
        let config_id = slot.meta(META_CONFIG_TOKEN).ok_or_else(|| {
            EngineError::InvalidInput("resy slot is missing its config token".into())
        })?;

        // 1) exchange the slot config token for a book token
        let resp = self
            .request(Method::POST, "/3/details")
            .json(&DetailsRequest {
                config_id,
                day: req.day(),
                party_size: req.party_size,
            })
            .timeout(self.request_timeout)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(EngineError::BookingRejected {
                status: status.as_u16(),
                body: snippet(&body),
            });
        }

        let details: DetailsResponse = serde_json::from_str(&body)
            .map_err(|e| EngineError::MalformedResponse(format!("resy details: {e}")))?;
        if details.book_token.value.is_empty() {
            return Err(EngineError::MalformedResponse(
                "resy details returned no book token".into(),
            ));
        }

        // 2) submit, attaching the default payment method when there is one
        let mut form = vec![("book_token", details.book_token.value)];
        if let Some(pm) = details.user.payment_methods.first() {
            let encoded = serde_json::to_string(pm)
                .map_err(|e| EngineError::MalformedResponse(e.to_string()))?;
            form.push(("struct_payment_method", encoded));
        }

        let resp = self
            .request(Method::POST, "/3/book")
            .form(&form)
            .timeout(self.request_timeout)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(EngineError::BookingRejected {
                status: status.as_u16(),
                body: snippet(&body),
            });
        }
        Ok(body)
    }

    fn max_candidates(&self) -> usize {
        usize::MAX
    }
}

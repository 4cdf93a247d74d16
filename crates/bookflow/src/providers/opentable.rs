//! OpenTable: persisted GraphQL availability query plus a single booking call.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime};
use reqwest::RequestBuilder;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{snippet, BookingProvider, Credentials, ProviderSettings};
use crate::error::EngineError;
use crate::reservation::{ContactInfo, ReservationRequest, Slot};

pub const DEFAULT_BASE_URL: &str = "https://www.opentable.com/dapi";
pub const DEFAULT_QUERY_HASH: &str =
    "e6b87083b2dfc66e11d26f9bd6e98b8f6a9f4a3b7d0e9a2f33c9f1f6a0b9f2a1";

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) bookflow/0.1";

pub const META_AVAILABILITY_TOKEN: &str = "slotAvailabilityToken";
pub const META_SLOT_HASH: &str = "slotHash";
/// Provider timestamp as received, echoed back verbatim when booking.
pub const META_DATE_TIME: &str = "reservationDateTime";

pub struct OpenTableProvider {
    http: reqwest::Client,
    base: String,
    query_hash: String,
    creds: Credentials,
    contact: ContactInfo,
    request_timeout: Duration,
}

#[derive(Debug, Default, Deserialize)]
struct AvailabilityResponse {
    #[serde(default)]
    data: AvailabilityData,
}

#[derive(Debug, Default, Deserialize)]
struct AvailabilityData {
    #[serde(default)]
    availability: Vec<RestaurantAvailability>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RestaurantAvailability {
    #[serde(default)]
    availability_days: Vec<AvailabilityDay>,
}

#[derive(Debug, Default, Deserialize)]
struct AvailabilityDay {
    #[serde(default)]
    slots: Vec<OtSlot>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OtSlot {
    #[serde(default)]
    is_available: bool,
    #[serde(default)]
    reservation_date_time: String,
    #[serde(default)]
    slot_availability_token: String,
    #[serde(default)]
    slot_hash: String,
}

impl OpenTableProvider {
    pub fn new(http: reqwest::Client, settings: &ProviderSettings, creds: Credentials) -> Self {
        let query_hash = creds
            .persisted_query_hash
            .clone()
            .or_else(|| settings.opentable_query_hash.clone())
            .filter(|h| !h.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_QUERY_HASH.to_string());

        Self {
            http,
            base: settings.opentable_base_url.trim_end_matches('/').to_string(),
            query_hash,
            creds,
            contact: settings.contact.clone(),
            request_timeout: settings.request_timeout,
        }
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.http
            .post(format!("{}{}", self.base, path))
            .header("user-agent", USER_AGENT)
            .header("x-csrf-token", &self.creds.auth_token)
            .timeout(self.request_timeout)
    }
}

/// Provider timestamps carry the venue offset; the wall-clock part is what we match on.
fn parse_slot_start(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.naive_local())
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M"))
        .ok()
}

#[async_trait]
impl BookingProvider for OpenTableProvider {
    fn name(&self) -> &str {
        "opentable"
    }

    async fn ping(&self) -> Result<(), EngineError> {
        if self.creds.auth_token.trim().is_empty() {
            return Err(EngineError::AuthInvalid("opentable token is empty".into()));
        }
        Ok(())
    }

    async fn find_slots(&self, req: &ReservationRequest) -> Result<Vec<Slot>, EngineError> {
        self.ping().await?;
        if req.venue_id.trim().is_empty() {
            return Err(EngineError::InvalidInput(
                "venue id (restaurantId) is required".into(),
            ));
        }

        let payload = json!({
            "operationName": "RestaurantsAvailability",
            "variables": {
                "restaurantIds": [req.venue_id],
                "partySize": req.party_size,
                "dateTime": format!("{}T19:00:00.000", req.day()),
                "forwardDays": 1,
                "includeOffers": true,
            },
            "extensions": {
                "persistedQuery": {"version": 1, "sha256Hash": self.query_hash},
            },
        });

        let resp = self
            .post("/fe/gql")
            .query(&[("optype", "query"), ("opname", "RestaurantsAvailability")])
            .json(&payload)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            let detail = format!(
                "opentable availability http {}: {}",
                status.as_u16(),
                snippet(&body)
            );
            return Err(match status.as_u16() {
                401 | 403 => EngineError::AuthInvalid(detail),
                _ => EngineError::ProviderUnavailable(detail),
            });
        }

        let parsed: AvailabilityResponse = serde_json::from_str(&body)
            .map_err(|e| EngineError::MalformedResponse(format!("opentable availability: {e}")))?;

        let mut out = Vec::with_capacity(16);
        for restaurant in parsed.data.availability {
            for day in restaurant.availability_days {
                for s in day.slots {
                    if !s.is_available {
                        continue;
                    }
                    let Some(start) = parse_slot_start(&s.reservation_date_time) else {
                        debug!(at = %s.reservation_date_time, "dropping opentable slot with unparseable time");
                        continue;
                    };
                    out.push(
                        Slot::new(start)
                            .with_meta(META_AVAILABILITY_TOKEN, s.slot_availability_token)
                            .with_meta(META_SLOT_HASH, s.slot_hash)
                            .with_meta(META_DATE_TIME, s.reservation_date_time),
                    );
                }
            }
        }
        Ok(out)
    }

    async fn book(&self, req: &ReservationRequest, slot: &Slot) -> Result<String, EngineError> {
        self.ping().await?;
        let (Some(token), Some(hash)) = (slot.meta(META_AVAILABILITY_TOKEN), slot.meta(META_SLOT_HASH))
        else {
            return Err(EngineError::InvalidInput(
                "slot missing slotAvailabilityToken/slotHash".into(),
            ));
        };

        let contact = req.contact.or(&self.contact);
        if !contact.is_complete() {
            return Err(EngineError::InvalidInput(
                "missing contact info; set BOOKING_* env vars".into(),
            ));
        }

        let date_time = slot
            .meta(META_DATE_TIME)
            .map(str::to_string)
            .unwrap_or_else(|| slot.start.format("%Y-%m-%dT%H:%M:%S").to_string());

        let payload = json!({
            "restaurantId": req.venue_id,
            "partySize": req.party_size,
            "reservationDateTime": date_time,
            "slotAvailabilityToken": token,
            "slotHash": hash,
            "firstName": contact.first_name,
            "lastName": contact.last_name,
            "email": contact.email,
            "phoneNumber": contact.phone,
        });

        let resp = self
            .post("/booking/make-reservation")
            .json(&payload)
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
}

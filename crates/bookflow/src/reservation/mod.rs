use std::collections::HashMap;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

pub mod selection;

pub use selection::{choose, rank};

/// A bookable instant advertised by a provider, in the venue's wall-clock time.
///
/// `meta` carries the provider-opaque tokens needed to complete the booking. Slots
/// live for one attempt and are never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    pub start: NaiveDateTime,
    pub meta: HashMap<String, String>,
}

impl Slot {
    pub fn new(start: NaiveDateTime) -> Self {
        Self {
            start,
            meta: HashMap::new(),
        }
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<String>) -> Self {
        self.meta.insert(key.to_string(), value.into());
        self
    }

    pub fn meta(&self, key: &str) -> Option<&str> {
        self.meta
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Wall-clock label used in attempt records, e.g. `19:00:00`.
    pub fn label(&self) -> String {
        self.start.time().format("%H:%M:%S").to_string()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactInfo {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
}

impl ContactInfo {
    /// Fill empty fields from `fallback`; values already set win.
    pub fn or(&self, fallback: &ContactInfo) -> ContactInfo {
        fn pick(a: &str, b: &str) -> String {
            let v = if a.trim().is_empty() { b } else { a };
            v.trim().to_string()
        }
        ContactInfo {
            first_name: pick(&self.first_name, &fallback.first_name),
            last_name: pick(&self.last_name, &fallback.last_name),
            email: pick(&self.email, &fallback.email),
            phone: pick(&self.phone, &fallback.phone),
        }
    }

    pub fn is_complete(&self) -> bool {
        [&self.first_name, &self.last_name, &self.email, &self.phone]
            .iter()
            .all(|v| !v.trim().is_empty())
    }
}

/// Everything a provider needs for one attempt. Assembled fresh per attempt.
#[derive(Debug, Clone)]
pub struct ReservationRequest {
    pub venue_id: String,
    pub date: NaiveDate,
    pub party_size: u32,
    /// Strict priority order: earlier entries win.
    pub preferred_times: Vec<NaiveDateTime>,
    /// Optional case-insensitive slot type filter, e.g. `["Dining Room", "Bar"]`.
    pub reservation_types: Vec<String>,
    pub contact: ContactInfo,
}

impl ReservationRequest {
    pub fn day(&self) -> String {
        self.date.format("%Y-%m-%d").to_string()
    }

    pub fn accepts_type(&self, slot_type: &str) -> bool {
        self.reservation_types.is_empty()
            || self
                .reservation_types
                .iter()
                .any(|t| t.eq_ignore_ascii_case(slot_type.trim()))
    }
}

/// Split a comma-separated list, trimming blanks away.
pub fn split_csv(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

/// Combine wall-clock preferences with the reservation date.
pub fn preferred_instants(date: NaiveDate, times: &[NaiveTime]) -> Vec<NaiveDateTime> {
    times.iter().map(|t| date.and_time(*t)).collect()
}

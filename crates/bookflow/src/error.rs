//! Error taxonomy for the booking engine.

use thiserror::Error;

use crate::jobs::error_codes::ErrorCode;

/// Errors raised by window computation, providers and the attempt cycle.
///
/// The orchestrator turns every one of these into a recorded attempt outcome;
/// none of them escape to the scheduler loop.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Bad job or request parameters. Fatal to job creation.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid time zone: {0}")]
    InvalidTimeZone(String),

    #[error("invalid time format: {0}")]
    InvalidTimeFormat(String),

    /// Provider rejected the credentials.
    #[error("provider auth invalid: {0}")]
    AuthInvalid(String),

    /// Transport failure, timeout or non-2xx outside the booking steps.
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// The provider answered 2xx with a body we could not decode.
    #[error("malformed provider response: {0}")]
    MalformedResponse(String),

    #[error("no matching slots: provider returned no available slots")]
    NoSlotsFound,

    #[error("no matching slots for preferred times")]
    NoMatch,

    /// Non-2xx during a booking step; `body` is kept as diagnostic text.
    #[error("booking rejected (status={status}): {body}")]
    BookingRejected { status: u16, body: String },

    #[error("attempt window ended without success")]
    WindowExpired,

    /// Shutdown began before the attempt reached a result.
    #[error("attempt cancelled by shutdown")]
    Cancelled,

    #[error("job store: {0}")]
    Store(String),
}

impl EngineError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidInput(_) => ErrorCode::InvalidInput,
            Self::InvalidTimeZone(_) => ErrorCode::InvalidTimeZone,
            Self::InvalidTimeFormat(_) => ErrorCode::InvalidTimeFormat,
            Self::AuthInvalid(_) => ErrorCode::AuthInvalid,
            Self::ProviderUnavailable(_) => ErrorCode::ProviderUnavailable,
            Self::MalformedResponse(_) => ErrorCode::MalformedResponse,
            Self::NoSlotsFound => ErrorCode::NoSlotsFound,
            Self::NoMatch => ErrorCode::NoMatch,
            Self::BookingRejected { .. } => ErrorCode::BookingRejected,
            Self::WindowExpired => ErrorCode::WindowExpired,
            Self::Cancelled => ErrorCode::Cancelled,
            Self::Store(_) => ErrorCode::Store,
        }
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            EngineError::MalformedResponse(e.to_string())
        } else {
            // connect, timeout, body and redirect failures are all transient from our side
            EngineError::ProviderUnavailable(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_availability_reads_as_no_matching_slots() {
        assert!(EngineError::NoSlotsFound
            .to_string()
            .contains("no matching slots"));
        assert!(EngineError::NoMatch.to_string().contains("no matching slots"));
    }

    #[test]
    fn rejected_booking_keeps_provider_body() {
        let e = EngineError::BookingRejected {
            status: 412,
            body: "{\"message\":\"slot taken\"}".into(),
        };
        assert_eq!(e.code(), ErrorCode::BookingRejected);
        assert!(e.to_string().contains("slot taken"));
        assert!(e.to_string().contains("412"));
    }
}

// crates/bookflow/src/jobs/error_codes.rs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    InvalidInput,
    InvalidTimeZone,
    InvalidTimeFormat,
    AuthInvalid,
    ProviderUnavailable,
    MalformedResponse,
    NoSlotsFound,
    NoMatch,
    BookingRejected,
    WindowExpired,
    Cancelled,
    Store,
    Unknown,
}

impl ErrorCode {
    pub fn from_str(s: &str) -> Self {
        match s.trim().to_uppercase().as_str() {
            "INVALID_INPUT" => Self::InvalidInput,
            "INVALID_TIME_ZONE" => Self::InvalidTimeZone,
            "INVALID_TIME_FORMAT" => Self::InvalidTimeFormat,
            "AUTH_INVALID" => Self::AuthInvalid,
            "PROVIDER_UNAVAILABLE" => Self::ProviderUnavailable,
            "MALFORMED_RESPONSE" => Self::MalformedResponse,
            "NO_SLOTS_FOUND" => Self::NoSlotsFound,
            "NO_MATCH" => Self::NoMatch,
            "BOOKING_REJECTED" => Self::BookingRejected,
            "WINDOW_EXPIRED" => Self::WindowExpired,
            "CANCELLED" => Self::Cancelled,
            "STORE" => Self::Store,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidInput => "INVALID_INPUT",
            Self::InvalidTimeZone => "INVALID_TIME_ZONE",
            Self::InvalidTimeFormat => "INVALID_TIME_FORMAT",
            Self::AuthInvalid => "AUTH_INVALID",
            Self::ProviderUnavailable => "PROVIDER_UNAVAILABLE",
            Self::MalformedResponse => "MALFORMED_RESPONSE",
            Self::NoSlotsFound => "NO_SLOTS_FOUND",
            Self::NoMatch => "NO_MATCH",
            Self::BookingRejected => "BOOKING_REJECTED",
            Self::WindowExpired => "WINDOW_EXPIRED",
            Self::Cancelled => "CANCELLED",
            Self::Store => "STORE",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Terminal codes end the job; everything else is retried on the next interval.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::WindowExpired)
    }
}

pub fn suggested_action(code: &str) -> &'static str {
    match ErrorCode::from_str(code) {
        ErrorCode::InvalidInput => {
            "Fix the job or contact details. Retrying the same input will fail the same way."
        }
        ErrorCode::InvalidTimeZone => "Use an IANA zone name such as America/New_York.",
        ErrorCode::InvalidTimeFormat => "Use HH:MM (24h) for release and preferred times.",
        ErrorCode::AuthInvalid => {
            "Refresh the provider credentials (API key / auth token / CSRF token) from a logged-in browser session."
        }
        ErrorCode::ProviderUnavailable => {
            "Retry is automatic. Check provider status and network egress if it persists across the window."
        }
        ErrorCode::MalformedResponse => {
            "Provider response shape changed. Inspect error_message and update the client mapping."
        }
        ErrorCode::NoSlotsFound => {
            "Retry is automatic. Inventory may not be released yet; confirm days-out and release time."
        }
        ErrorCode::NoMatch => {
            "Retry is automatic. Consider adding more preferred times or widening reservation types."
        }
        ErrorCode::BookingRejected => {
            "Retry is automatic. Inspect the provider body: payment method, duplicate booking or a taken slot."
        }
        ErrorCode::WindowExpired => {
            "Terminal. Create a new job with a later window or different venue/date."
        }
        ErrorCode::Cancelled => {
            "Retry is automatic once a worker is running again inside the window."
        }
        ErrorCode::Store => "Check database connectivity and pool saturation.",
        ErrorCode::Unknown => {
            "Inspect error_message + logs. Decide if retryable; add mapping once understood."
        }
    }
}

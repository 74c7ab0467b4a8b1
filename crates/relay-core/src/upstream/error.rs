//! Upstream error taxonomy
//!
//! The forwarder's retry and fallback decisions hang off this
//! classification, so it must stay faithful to what the backend actually
//! sends - including the deployments that leak auth and throttling
//! failures as generic 500s with a telltale body.

use reqwest::StatusCode;

/// Classified failure from a Copilot backend call.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    /// The API token was rejected; one forced refresh is worth a retry.
    #[error("upstream rejected the API token")]
    TokenExpired,

    /// The backend is throttling; a model fallback may still succeed.
    #[error("upstream rate limit hit")]
    RateLimit {
        /// Seconds from the Retry-After header, when present.
        retry_after: Option<u64>,
    },

    /// Any other non-2xx response.
    #[error("upstream call failed ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("upstream request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("failed to parse upstream response: {0}")]
    Json(#[from] serde_json::Error),
}

pub type UpstreamResult<T> = Result<T, UpstreamError>;

/// Body fragments that mark a 500 as an auth failure in disguise.
const AUTH_MARKERS: &[&str] = &[
    "timeout",
    "expired",
    "unauthorized",
    "authentication",
    "invalid token",
    "token expired",
    "access denied",
    "forbidden",
    "credential",
];

/// Body fragments that mark a 500 as throttling in disguise.
const RATE_MARKERS: &[&str] = &[
    "rate limit",
    "quota exceeded",
    "too many requests",
    "429",
    "throttled",
    "usage limit",
];

impl UpstreamError {
    /// Classify a non-success response.
    ///
    /// 401 and 429 are taken at face value. Some deployments surface token
    /// expiry or throttling as a 500 whose body names the real cause, so
    /// 500 bodies are sniffed for both marker sets (auth first).
    pub fn classify(status: StatusCode, retry_after: Option<u64>, body: &str) -> Self {
        if status == StatusCode::UNAUTHORIZED {
            return Self::TokenExpired;
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Self::RateLimit { retry_after };
        }
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            let lowered = body.to_lowercase();
            if AUTH_MARKERS.iter().any(|m| lowered.contains(m)) {
                return Self::TokenExpired;
            }
            if RATE_MARKERS.iter().any(|m| lowered.contains(m)) {
                return Self::RateLimit { retry_after };
            }
        }
        Self::Api {
            status: status.as_u16(),
            message: body.to_string(),
        }
    }
}

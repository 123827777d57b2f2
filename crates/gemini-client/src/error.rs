use insight_core::InsightError;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// How the dispatcher reacts to a failed provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Quota signal from the provider. On the grounded path this flags the
    /// credential's search quota and falls back to a plain call.
    RateLimited,
    /// Timeout, network, or any non-quota status. Cools the credential down.
    Transient,
}

/// Body fragments the provider uses to signal quota exhaustion.
const QUOTA_MARKERS: &[&str] = &["resource_exhausted", "quota", "rate limit", "ratelimit"];

/// Single place where provider failures are sorted into quota vs transient.
///
/// The provider's error shape is an external contract; keep every check on
/// it in this function.
///
/// - HTTP 429 is always a quota signal.
/// - Any other status whose body carries `RESOURCE_EXHAUSTED`, `quota` or
///   `rate limit` (case-insensitive) is a quota signal too; the API reports
///   search-tool exhaustion as 400/403 on some plans.
/// - Timeouts, transport errors, undecodable bodies and the remaining
///   statuses are transient.
pub fn classify(err: &ProviderError) -> FailureClass {
    match err {
        ProviderError::Status { status: 429, .. } => FailureClass::RateLimited,
        ProviderError::Status { body, .. } => {
            let body = body.to_lowercase();
            if QUOTA_MARKERS.iter().any(|m| body.contains(m)) {
                FailureClass::RateLimited
            } else {
                FailureClass::Transient
            }
        }
        ProviderError::RequestFailed(e) if e.status().map(|s| s.as_u16()) == Some(429) => {
            FailureClass::RateLimited
        }
        _ => FailureClass::Transient,
    }
}

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("no API credentials configured")]
    NoCredentials,

    #[error("all credentials exhausted after {attempts} attempt(s): {last_error}")]
    AllCredentialsExhausted { attempts: usize, last_error: String },
}

impl From<DispatchError> for InsightError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::NoCredentials => InsightError::Config(err.to_string()),
            DispatchError::AllCredentialsExhausted { attempts, last_error } => InsightError::QuotaExhausted(
                format!("{} attempt(s), last error: {}", attempts, last_error),
            ),
        }
    }
}

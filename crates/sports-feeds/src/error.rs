use insight_core::InsightError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("{feed} returned HTTP {status}")]
    Status { feed: &'static str, status: u16 },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type FeedResult<T> = Result<T, FeedError>;

impl From<FeedError> for InsightError {
    fn from(err: FeedError) -> Self {
        InsightError::Feed(err.to_string())
    }
}

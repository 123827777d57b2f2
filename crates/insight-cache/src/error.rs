use insight_core::InsightError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid timestamp '{0}'")]
    InvalidTimestamp(String),
}

pub type CacheResult<T> = Result<T, CacheError>;

impl From<CacheError> for InsightError {
    fn from(err: CacheError) -> Self {
        InsightError::Cache(err.to_string())
    }
}

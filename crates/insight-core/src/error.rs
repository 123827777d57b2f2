use thiserror::Error;

/// Failure classes that can reach the orchestrator boundary.
///
/// Soft quota exhaustion and malformed model output never show up here: the
/// first is recovered inside the dispatcher, the second is not an error.
#[derive(Error, Debug)]
pub enum InsightError {
    #[error("All credentials exhausted: {0}")]
    QuotaExhausted(String),

    #[error("Supplemental feed error: {0}")]
    Feed(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::CacheResult;

/// One row of the shared cache table.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEntry {
    pub key: String,
    pub payload: Value,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl StoredEntry {
    /// Expired strictly after `expires_at`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

/// Backing store for the analysis cache. Implementations report their own
/// failures; the [`crate::AnalysisCache`] facade decides what to absorb.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> CacheResult<Option<StoredEntry>>;

    /// Insert or replace the row for `entry.key`.
    async fn upsert(&self, entry: StoredEntry) -> CacheResult<()>;

    async fn delete(&self, key: &str) -> CacheResult<()>;

    /// Rows whose embedded match snapshot names `team` on either side
    /// (case-insensitive substring), newest first.
    async fn search_by_team(&self, team: &str, limit: usize) -> CacheResult<Vec<StoredEntry>>;

    async fn count(&self) -> CacheResult<u64>;

    /// Newest rows first.
    async fn recent(&self, limit: usize) -> CacheResult<Vec<StoredEntry>>;
}

/// Whether a payload's `match` snapshot has `team` as home or away side.
pub(crate) fn payload_mentions_team(payload: &Value, team: &str) -> bool {
    ["/match/homeTeam/name", "/match/awayTeam/name"]
        .iter()
        .filter_map(|pointer| payload.pointer(pointer).and_then(Value::as_str))
        .any(|name| name_mentions_team(name, team))
}

/// Unicode case-insensitive substring match of `team` in a stored name.
pub(crate) fn name_mentions_team(name: &str, team: &str) -> bool {
    let needle = team.trim().to_lowercase();
    !needle.is_empty() && name.to_lowercase().contains(&needle)
}

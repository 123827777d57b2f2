//! Shared analysis cache.
//!
//! [`AnalysisCache`] sits in front of a [`CacheStore`] and never fails: a
//! store error is logged and treated as a miss (or a skipped write), and a
//! cache built without a store is a pass-through no-op.

pub mod error;
pub mod memory;
pub mod sqlite;
pub mod store;

pub use error::{CacheError, CacheResult};
pub use memory::MemoryCacheStore;
pub use sqlite::SqlCacheStore;
pub use store::{CacheStore, StoredEntry};

use chrono::{DateTime, Duration, Utc};
use insight_core::{CachedAnalysis, Clock, HistoricalRecord, SystemClock};
use serde::Serialize;
use std::sync::Arc;

/// Rows shown in the live feed.
pub const LIVE_FEED_SIZE: usize = 5;

/// Global activity snapshot for the live feed.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LiveStats {
    pub count: u64,
    pub recent: Vec<HistoricalRecord>,
}

#[derive(Clone)]
pub struct AnalysisCache {
    store: Option<Arc<dyn CacheStore>>,
    clock: Arc<dyn Clock>,
}

impl AnalysisCache {
    pub fn new(store: Arc<dyn CacheStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store: Some(store),
            clock,
        }
    }

    /// Cache with no backing store: every read misses, every write is dropped.
    pub fn disabled() -> Self {
        Self {
            store: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Connect to the configured database. A missing URL or a failed
    /// connection yields a disabled cache rather than an error.
    pub async fn connect(database_url: Option<&str>) -> Self {
        let Some(url) = database_url.filter(|u| !u.trim().is_empty()) else {
            tracing::warn!("CACHE_DATABASE_URL not set, analysis cache disabled");
            return Self::disabled();
        };

        match SqlCacheStore::connect(url).await {
            Ok(store) => {
                tracing::info!("analysis cache connected");
                Self::new(Arc::new(store), Arc::new(SystemClock))
            }
            Err(e) => {
                tracing::warn!("analysis cache unavailable, continuing without it: {}", e);
                Self::disabled()
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    /// Unexpired analysis for `key`. An expired row is deleted on the way out.
    pub async fn get(&self, key: &str) -> Option<CachedAnalysis> {
        let store = self.store.as_ref()?;

        let entry = match store.get(key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(key, "cache read failed: {}", e);
                return None;
            }
        };

        if entry.is_expired(self.clock.now()) {
            tracing::debug!(key, "cache entry expired");
            if let Err(e) = store.delete(key).await {
                tracing::warn!(key, "failed to delete expired cache entry: {}", e);
            }
            return None;
        }

        match serde_json::from_value(entry.payload) {
            Ok(cached) => Some(cached),
            Err(e) => {
                tracing::warn!(key, "cached payload is not an analysis: {}", e);
                None
            }
        }
    }

    pub async fn set(&self, key: &str, value: &CachedAnalysis, ttl: std::time::Duration) {
        let Some(store) = self.store.as_ref() else {
            return;
        };

        let payload = match serde_json::to_value(value) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(key, "failed to serialize analysis for cache: {}", e);
                return;
            }
        };

        let created_at = self.clock.now();
        let entry = StoredEntry {
            key: key.to_string(),
            payload,
            expires_at: Duration::from_std(ttl)
                .ok()
                .and_then(|ttl| created_at.checked_add_signed(ttl))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            created_at,
        };

        match store.upsert(entry).await {
            Ok(()) => tracing::info!(key, "analysis saved to cache"),
            Err(e) => tracing::warn!(key, "cache write failed: {}", e),
        }
    }

    /// Past analyses involving `team`, newest first. Expired rows still
    /// count as history.
    pub async fn search_by_team(&self, team: &str, limit: usize) -> Vec<HistoricalRecord> {
        let Some(store) = self.store.as_ref() else {
            return Vec::new();
        };

        match store.search_by_team(team, limit).await {
            Ok(entries) => entries.into_iter().filter_map(to_record).collect(),
            Err(e) => {
                tracing::warn!(team, "team history search failed: {}", e);
                Vec::new()
            }
        }
    }

    pub async fn live_stats(&self) -> LiveStats {
        let Some(store) = self.store.as_ref() else {
            return LiveStats::default();
        };

        let (count, recent) = tokio::join!(store.count(), store.recent(LIVE_FEED_SIZE));

        let count = count.unwrap_or_else(|e| {
            tracing::warn!("cache count failed: {}", e);
            0
        });
        let recent = match recent {
            Ok(entries) => entries.into_iter().filter_map(to_record).collect(),
            Err(e) => {
                tracing::warn!("recent cache fetch failed: {}", e);
                Vec::new()
            }
        };

        LiveStats { count, recent }
    }
}

fn to_record(entry: StoredEntry) -> Option<HistoricalRecord> {
    match serde_json::from_value::<CachedAnalysis>(entry.payload) {
        Ok(cached) => Some(HistoricalRecord {
            analysis: cached.analysis,
            match_snapshot: cached.match_snapshot,
            created_at: entry.created_at,
        }),
        Err(e) => {
            tracing::debug!(key = %entry.key, "skipping undecodable cache row: {}", e);
            None
        }
    }
}

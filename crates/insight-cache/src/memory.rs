use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::CacheResult;
use crate::store::{payload_mentions_team, CacheStore, StoredEntry};

/// Process-local store for embedders that want caching without a database.
/// `AnalysisCache::connect(None)` does not use it; that yields the disabled
/// cache.
#[derive(Default)]
pub struct MemoryCacheStore {
    entries: DashMap<String, StoredEntry>,
    deletes: AtomicUsize,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of delete calls that removed a row.
    pub fn delete_count(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn newest_first(mut entries: Vec<StoredEntry>, limit: usize) -> Vec<StoredEntry> {
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        entries.truncate(limit);
        entries
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> CacheResult<Option<StoredEntry>> {
        Ok(self.entries.get(key).map(|e| e.value().clone()))
    }

    async fn upsert(&self, entry: StoredEntry) -> CacheResult<()> {
        self.entries.insert(entry.key.clone(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        if self.entries.remove(key).is_some() {
            self.deletes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn search_by_team(&self, team: &str, limit: usize) -> CacheResult<Vec<StoredEntry>> {
        let hits = self
            .entries
            .iter()
            .filter(|e| payload_mentions_team(&e.value().payload, team))
            .map(|e| e.value().clone())
            .collect();
        Ok(Self::newest_first(hits, limit))
    }

    async fn count(&self) -> CacheResult<u64> {
        Ok(self.entries.len() as u64)
    }

    async fn recent(&self, limit: usize) -> CacheResult<Vec<StoredEntry>> {
        let all = self.entries.iter().map(|e| e.value().clone()).collect();
        Ok(Self::newest_first(all, limit))
    }
}

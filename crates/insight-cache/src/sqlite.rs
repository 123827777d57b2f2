use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

use crate::error::{CacheError, CacheResult};
use crate::store::{name_mentions_team, CacheStore, StoredEntry};

type EntryRow = (String, String, String, String);

const SELECT_COLUMNS: &str = "SELECT key, payload, expires_at, created_at FROM global_cache";

/// Fixed-width UTC timestamps so that TEXT ordering is chronological.
fn encode_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_time(raw: &str) -> CacheResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| CacheError::InvalidTimestamp(raw.to_string()))
}

fn decode_row((key, payload, expires_at, created_at): EntryRow) -> CacheResult<StoredEntry> {
    Ok(StoredEntry {
        key,
        payload: serde_json::from_str(&payload)?,
        expires_at: decode_time(&expires_at)?,
        created_at: decode_time(&created_at)?,
    })
}

/// SQL-backed store over the `global_cache` table.
#[derive(Clone)]
pub struct SqlCacheStore {
    pool: SqlitePool,
}

impl SqlCacheStore {
    pub async fn connect(database_url: &str) -> CacheResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // Each in-memory connection is its own database.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> CacheResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS global_cache (
                key TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_global_cache_created_at ON global_cache (created_at)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl CacheStore for SqlCacheStore {
    async fn get(&self, key: &str) -> CacheResult<Option<StoredEntry>> {
        let row: Option<EntryRow> = sqlx::query_as(&format!("{} WHERE key = ? LIMIT 1", SELECT_COLUMNS))
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        row.map(decode_row).transpose()
    }

    async fn upsert(&self, entry: StoredEntry) -> CacheResult<()> {
        sqlx::query(
            "INSERT INTO global_cache (key, payload, expires_at, created_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET
                payload = excluded.payload,
                expires_at = excluded.expires_at,
                created_at = excluded.created_at",
        )
        .bind(&entry.key)
        .bind(serde_json::to_string(&entry.payload)?)
        .bind(encode_time(entry.expires_at))
        .bind(encode_time(entry.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        sqlx::query("DELETE FROM global_cache WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn search_by_team(&self, team: &str, limit: usize) -> CacheResult<Vec<StoredEntry>> {
        if team.trim().is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        // SQLite's lower() and LIKE only fold ASCII, so names are matched here.
        let candidates: Vec<(String, Option<String>, Option<String>)> = sqlx::query_as(
            "SELECT key,
                    json_extract(payload, '$.match.homeTeam.name'),
                    json_extract(payload, '$.match.awayTeam.name')
             FROM global_cache
             ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        let keys: Vec<String> = candidates
            .into_iter()
            .filter(|(_, home, away)| {
                [home, away]
                    .into_iter()
                    .flatten()
                    .any(|name| name_mentions_team(name, team))
            })
            .map(|(key, _, _)| key)
            .take(limit)
            .collect();

        let mut entries = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(entry) = self.get(&key).await? {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    async fn count(&self) -> CacheResult<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM global_cache")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn recent(&self, limit: usize) -> CacheResult<Vec<StoredEntry>> {
        let rows: Vec<EntryRow> =
            sqlx::query_as(&format!("{} ORDER BY created_at DESC LIMIT ?", SELECT_COLUMNS))
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(decode_row).collect()
    }
}

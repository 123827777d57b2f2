//! Player-prop projection market (PrizePicks JSON:API document).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use insight_core::{Clock, Projection, SystemClock};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::error::{FeedError, FeedResult};

pub const DEFAULT_PROJECTIONS_URL: &str = "https://api.prizepicks.com/projections";

const UNKNOWN: &str = "Unknown";
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Anything that can hand out the current projection board.
#[async_trait]
pub trait ProjectionSource: Send + Sync {
    async fn projections(&self) -> FeedResult<Vec<Projection>>;
}

#[derive(Debug, Default, Deserialize)]
struct ProjectionDocument {
    #[serde(default)]
    data: Vec<ProjectionResource>,
    #[serde(default)]
    included: Vec<IncludedResource>,
}

#[derive(Debug, Default, Deserialize)]
struct ProjectionResource {
    #[serde(default)]
    attributes: ProjectionAttributes,
    #[serde(default)]
    relationships: ProjectionRelationships,
}

#[derive(Debug, Default, Deserialize)]
struct ProjectionAttributes {
    #[serde(default)]
    line_score: Option<Value>,
    #[serde(default)]
    stat_type: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ProjectionRelationships {
    #[serde(default)]
    new_player: Option<Relationship>,
    #[serde(default)]
    league: Option<Relationship>,
}

#[derive(Debug, Default, Deserialize)]
struct Relationship {
    #[serde(default)]
    data: Option<ResourceRef>,
}

#[derive(Debug, Deserialize)]
struct ResourceRef {
    id: Value,
}

#[derive(Debug, Deserialize)]
struct IncludedResource {
    #[serde(rename = "type")]
    kind: String,
    id: Value,
    #[serde(default)]
    attributes: HashMap<String, Value>,
}

fn id_string(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// First non-empty string attribute among `names`.
fn first_text(attrs: Option<&HashMap<String, Value>>, names: &[&str]) -> Option<String> {
    let attrs = attrs?;
    names.iter().find_map(|name| match attrs.get(*name) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.clone()),
        _ => None,
    })
}

fn line_text(line: Option<&Value>) -> String {
    match line {
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
        _ => "0".to_string(),
    }
}

/// Join each projection with its player and league from `included`.
/// Missing references resolve to "Unknown" rather than dropping the entry.
pub fn parse_projections(document: Value) -> FeedResult<Vec<Projection>> {
    let doc: ProjectionDocument = serde_json::from_value(document)?;

    let mut players: HashMap<String, HashMap<String, Value>> = HashMap::new();
    let mut leagues: HashMap<String, HashMap<String, Value>> = HashMap::new();
    for item in doc.included {
        match item.kind.as_str() {
            "new_player" => {
                players.insert(id_string(&item.id), item.attributes);
            }
            "league" => {
                leagues.insert(id_string(&item.id), item.attributes);
            }
            _ => {}
        }
    }

    let projections = doc
        .data
        .into_iter()
        .map(|proj| {
            let player = proj
                .relationships
                .new_player
                .and_then(|r| r.data)
                .and_then(|r| players.get(&id_string(&r.id)));
            let league = proj
                .relationships
                .league
                .and_then(|r| r.data)
                .and_then(|r| leagues.get(&id_string(&r.id)));

            Projection {
                player: first_text(player, &["display_name", "name"])
                    .unwrap_or_else(|| UNKNOWN.to_string()),
                line: line_text(proj.attributes.line_score.as_ref()),
                stat: proj
                    .attributes
                    .stat_type
                    .filter(|s| !s.trim().is_empty())
                    .unwrap_or_else(|| UNKNOWN.to_string()),
                team: first_text(player, &["team"]).unwrap_or_else(|| UNKNOWN.to_string()),
                league: first_text(league, &["name", "abbreviation"])
                    .unwrap_or_else(|| UNKNOWN.to_string()),
            }
        })
        .collect();

    Ok(projections)
}

struct CachedBoard {
    fetched_at: DateTime<Utc>,
    projections: Arc<Vec<Projection>>,
}

/// Projection board client with its own TTL cache. A failed refresh serves
/// the last good board, however old.
pub struct PrizePicksClient {
    client: Client,
    url: String,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    cache: RwLock<Option<CachedBoard>>,
}

impl PrizePicksClient {
    pub fn new(url: Option<String>, ttl: Duration) -> Self {
        Self::with_clock(url, ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(url: Option<String>, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            url: url.unwrap_or_else(|| DEFAULT_PROJECTIONS_URL.to_string()),
            ttl,
            clock,
            cache: RwLock::new(None),
        }
    }

    async fn fetch(&self) -> FeedResult<Vec<Projection>> {
        let response = self
            .client
            .get(&self.url)
            .header("Accept", "application/json")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(FeedError::Status {
                feed: "projections",
                status: response.status().as_u16(),
            });
        }

        let body: Value = response.json().await?;
        parse_projections(body)
    }

    async fn store(&self, projections: Vec<Projection>) -> Arc<Vec<Projection>> {
        let projections = Arc::new(projections);
        *self.cache.write().await = Some(CachedBoard {
            fetched_at: self.clock.now(),
            projections: projections.clone(),
        });
        projections
    }

    async fn fresh(&self) -> Option<Arc<Vec<Projection>>> {
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::MAX);
        let now = self.clock.now();
        self.cache
            .read()
            .await
            .as_ref()
            .filter(|board| now - board.fetched_at < ttl)
            .map(|board| board.projections.clone())
    }
}

#[async_trait]
impl ProjectionSource for PrizePicksClient {
    async fn projections(&self) -> FeedResult<Vec<Projection>> {
        if let Some(board) = self.fresh().await {
            tracing::debug!(count = board.len(), "serving cached projection board");
            return Ok(board.as_ref().clone());
        }

        match self.fetch().await {
            Ok(projections) => {
                tracing::info!(count = projections.len(), "projection board refreshed");
                Ok(self.store(projections).await.as_ref().clone())
            }
            Err(e) => {
                let stale = self.cache.read().await.as_ref().map(|b| b.projections.clone());
                match stale {
                    Some(board) => {
                        tracing::warn!("projection refresh failed, serving stale board: {}", e);
                        Ok(board.as_ref().clone())
                    }
                    None => Err(e),
                }
            }
        }
    }
}

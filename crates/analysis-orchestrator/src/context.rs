use insight_cache::AnalysisCache;
use insight_core::{AnalysisRequest, HistoricalRecord, MatchDescriptor, Projection, SupplementalContext};
use sports_feeds::{MatchSource, ProjectionSource};
use std::sync::Arc;

/// Market entries kept per prompt.
pub const MAX_MARKET_ENTRIES: usize = 25;

/// Rows fetched per team history lookup; one survives after dropping the
/// current match.
const HISTORY_LOOKUP_LIMIT: usize = 3;

/// Case-insensitive substring containment in either direction. Blank and
/// "Unknown" names never match.
pub fn names_match(a: &str, b: &str) -> bool {
    let a = a.trim().to_lowercase();
    let b = b.trim().to_lowercase();
    if a.is_empty() || b.is_empty() || a == "unknown" || b == "unknown" {
        return false;
    }
    a.contains(&b) || b.contains(&a)
}

/// Entries whose player or team matches either side of the fixture.
pub fn filter_projections(projections: Vec<Projection>, home: &str, away: &str) -> Vec<Projection> {
    projections
        .into_iter()
        .filter(|p| {
            [home, away]
                .iter()
                .any(|side| names_match(&p.team, side) || names_match(&p.player, side))
        })
        .take(MAX_MARKET_ENTRIES)
        .collect()
}

/// Copies live status and result onto history snapshots taken before
/// kick-off. Records absent from the live slate are left as stored.
pub fn refresh_history(history: &mut [HistoricalRecord], live: &[MatchDescriptor]) {
    for record in history.iter_mut() {
        let snapshot = &mut record.match_snapshot;
        if let Some(current) = live.iter().find(|m| m.id == snapshot.id) {
            snapshot.status = current.status;
            snapshot.result = current.result.clone();
        }
    }
}

/// Gathers best-effort enrichment for a prompt. Every branch that fails
/// comes back empty.
pub struct ContextAssembler {
    projections: Option<Arc<dyn ProjectionSource>>,
    matches: Option<Arc<dyn MatchSource>>,
    cache: AnalysisCache,
}

impl ContextAssembler {
    pub fn new(projections: Option<Arc<dyn ProjectionSource>>, cache: AnalysisCache) -> Self {
        Self {
            projections,
            matches: None,
            cache,
        }
    }

    /// Live scoreboard used to fill in final results on team history.
    pub fn with_matches(mut self, matches: Arc<dyn MatchSource>) -> Self {
        self.matches = Some(matches);
        self
    }

    pub async fn build_context(&self, request: &AnalysisRequest) -> SupplementalContext {
        let (market, live, home_history, away_history) = tokio::join!(
            self.market_context(request),
            self.live_matches(),
            self.team_history(request.home_team_name(), request.match_id()),
            self.team_history(request.away_team_name(), request.match_id()),
        );

        let mut team_history = home_history;
        for record in away_history {
            let duplicate = team_history.iter().any(|r| {
                r.match_snapshot.id == record.match_snapshot.id && r.created_at == record.created_at
            });
            if !duplicate {
                team_history.push(record);
            }
        }
        refresh_history(&mut team_history, &live);

        tracing::debug!(
            match_id = request.match_id(),
            market = market.len(),
            history = team_history.len(),
            "supplemental context assembled"
        );

        SupplementalContext {
            market_projections: market,
            team_history,
        }
    }

    async fn market_context(&self, request: &AnalysisRequest) -> Vec<Projection> {
        let Some(source) = self.projections.as_ref() else {
            return Vec::new();
        };

        match source.projections().await {
            Ok(board) => filter_projections(board, request.home_team_name(), request.away_team_name()),
            Err(e) => {
                tracing::warn!("market feed unavailable, continuing without it: {}", e);
                Vec::new()
            }
        }
    }

    async fn live_matches(&self) -> Vec<MatchDescriptor> {
        match self.matches.as_ref() {
            Some(source) => source.live_matches().await,
            None => Vec::new(),
        }
    }

    /// Most recent prior analysis involving `team`, other than this match.
    async fn team_history(&self, team: &str, match_id: &str) -> Vec<HistoricalRecord> {
        self.cache
            .search_by_team(team, HISTORY_LOOKUP_LIMIT)
            .await
            .into_iter()
            .filter(|r| r.match_snapshot.id != match_id)
            .take(1)
            .collect()
    }
}

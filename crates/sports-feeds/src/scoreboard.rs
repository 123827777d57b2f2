//! Public ESPN scoreboards mapped onto [`MatchDescriptor`].

use async_trait::async_trait;
use chrono::DateTime;
use futures_util::future::join_all;
use insight_core::{MatchDescriptor, MatchOdds, MatchResult, MatchStatus, Team};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

use crate::error::{FeedError, FeedResult};

pub const DEFAULT_SCOREBOARD_URL: &str = "https://site.api.espn.com/apis/site/v2/sports";

const FOOTBALL_LEAGUES: &[(&str, &str)] = &[
    ("soccer/eng.1", "Premier League"),
    ("soccer/uefa.champions", "Champions League"),
    ("soccer/por.1", "Liga Portugal"),
    ("soccer/esp.1", "La Liga"),
];

const FOOTBALL_ODDS: MatchOdds = MatchOdds { home: 1.90, draw: Some(3.50), away: 3.80 };
const NBA_ODDS: MatchOdds = MatchOdds { home: 1.95, draw: None, away: 1.95 };
const TENNIS_ODDS: MatchOdds = MatchOdds { home: 1.80, draw: None, away: 2.10 };

/// Current fixtures and results.
#[async_trait]
pub trait MatchSource: Send + Sync {
    /// Never fails; feeds that cannot be reached contribute nothing.
    async fn live_matches(&self) -> Vec<MatchDescriptor>;
}

#[derive(Clone, Copy)]
enum Board {
    Football(&'static str),
    Nba,
    Tennis,
}

fn status_from_state(state: &str) -> MatchStatus {
    match state {
        "post" => MatchStatus::Finished,
        "in" => MatchStatus::Live,
        _ => MatchStatus::Upcoming,
    }
}

fn text<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value.pointer(pointer).and_then(Value::as_str)
}

fn id_text(value: &Value, pointer: &str) -> Option<String> {
    match value.pointer(pointer)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn score(competitor: &Value) -> u32 {
    match competitor.get("score") {
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0) as u32,
        _ => 0,
    }
}

fn display_date(status: MatchStatus, short_detail: Option<&str>, scheduled: Option<&str>) -> String {
    match status {
        MatchStatus::Finished => "Full Time".to_string(),
        MatchStatus::Live => "Live Now".to_string(),
        MatchStatus::Upcoming => short_detail
            .map(str::to_string)
            .or_else(|| {
                scheduled
                    .and_then(|d| DateTime::parse_from_rfc3339(d).ok())
                    .map(|d| d.format("%Y-%m-%d %H:%M UTC").to_string())
            })
            .unwrap_or_else(|| "Upcoming".to_string()),
    }
}

fn result_for(state: &str, home: &Value, away: &Value) -> Option<MatchResult> {
    (state != "pre").then(|| MatchResult {
        home_score: score(home),
        away_score: score(away),
        scorers: Vec::new(),
    })
}

fn club(competitor: &Value) -> Team {
    let id = id_text(competitor, "/team/id")
        .or_else(|| id_text(competitor, "/id"))
        .unwrap_or_default();
    Team {
        name: text(competitor, "/team/displayName").unwrap_or("TBD").to_string(),
        logo: Some(
            text(competitor, "/team/logo")
                .map(str::to_string)
                .unwrap_or_else(|| format!("https://api.dicebear.com/7.x/identicon/svg?seed={}", id)),
        ),
        id: format!("t_espn_{}", id),
    }
}

fn athlete(competitor: &Value) -> Team {
    let id = id_text(competitor, "/athlete/id")
        .or_else(|| id_text(competitor, "/id"))
        .unwrap_or_default();
    Team {
        name: text(competitor, "/athlete/displayName").unwrap_or("TBD").to_string(),
        logo: Some(
            text(competitor, "/athlete/headshot/href")
                .map(str::to_string)
                .unwrap_or_else(|| format!("https://api.dicebear.com/7.x/avataaars/svg?seed={}", id)),
        ),
        id: format!("t_espn_{}", id),
    }
}

/// Map a team-sport event (football or NBA). Events without both a home and
/// an away competitor are skipped.
fn parse_team_event(
    event: &Value,
    competition: &str,
    id_prefix: &str,
    odds: MatchOdds,
) -> Option<MatchDescriptor> {
    let competitors = event.pointer("/competitions/0/competitors")?.as_array()?;
    let side = |which: &str| {
        competitors
            .iter()
            .find(|c| c.get("homeAway").and_then(Value::as_str) == Some(which))
    };
    let home = side("home")?;
    let away = side("away")?;

    let state = text(event, "/status/type/state").unwrap_or("pre");
    let status = status_from_state(state);

    Some(MatchDescriptor {
        id: format!("{}{}", id_prefix, id_text(event, "/id")?),
        competition: competition.to_string(),
        home_team: club(home),
        away_team: club(away),
        date: display_date(
            status,
            text(event, "/status/type/shortDetail"),
            text(event, "/date"),
        ),
        status,
        odds: Some(odds),
        result: result_for(state, home, away),
    })
}

/// Tennis nests matches under `groupings[].competitions[]`; the first two
/// competitors play as home and away.
fn parse_tennis_event(event: &Value) -> Vec<MatchDescriptor> {
    let event_id = id_text(event, "/id").unwrap_or_default();
    let groupings = event
        .get("groupings")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    groupings
        .iter()
        .flat_map(|g| {
            g.get("competitions")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default()
        })
        .filter_map(|comp| {
            let competitors = comp.get("competitors")?.as_array()?;
            if competitors.len() < 2 {
                return None;
            }
            let (p1, p2) = (&competitors[0], &competitors[1]);
            let state = text(comp, "/status/type/state").unwrap_or("pre");
            let status = status_from_state(state);
            let comp_id = id_text(comp, "/id").unwrap_or_else(|| event_id.clone());
            let p1_id = id_text(p1, "/id").unwrap_or_default();

            Some(MatchDescriptor {
                id: format!("m_espn_atp_{}_{}", comp_id, p1_id),
                competition: "ATP Tour".to_string(),
                home_team: athlete(p1),
                away_team: athlete(p2),
                date: display_date(status, text(comp, "/status/type/shortDetail"), None),
                status,
                odds: Some(TENNIS_ODDS),
                result: result_for(state, p1, p2),
            })
        })
        .collect()
}

fn parse_board(board: Board, document: &Value) -> Vec<MatchDescriptor> {
    let events = document
        .get("events")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    match board {
        Board::Football(competition) => events
            .iter()
            .filter_map(|e| parse_team_event(e, competition, "m_espn_", FOOTBALL_ODDS))
            .collect(),
        Board::Nba => events
            .iter()
            .filter_map(|e| parse_team_event(e, "NBA", "m_espn_nba_", NBA_ODDS))
            .collect(),
        Board::Tennis => events.iter().flat_map(parse_tennis_event).collect(),
    }
}

#[derive(Clone)]
pub struct ScoreboardClient {
    client: Client,
    base_url: String,
}

impl ScoreboardClient {
    pub fn new(base_url: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_SCOREBOARD_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
        }
    }

    async fn fetch_board(&self, endpoint: &str, board: Board) -> FeedResult<Vec<MatchDescriptor>> {
        let url = format!("{}/{}/scoreboard", self.base_url, endpoint);
        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(FeedError::Status {
                feed: "scoreboard",
                status: response.status().as_u16(),
            });
        }

        let body: Value = response.json().await?;
        Ok(parse_board(board, &body))
    }
}

#[async_trait]
impl MatchSource for ScoreboardClient {
    async fn live_matches(&self) -> Vec<MatchDescriptor> {
        let mut boards: Vec<(&str, Board)> = FOOTBALL_LEAGUES
            .iter()
            .map(|(endpoint, competition)| (*endpoint, Board::Football(competition)))
            .collect();
        boards.push(("basketball/nba", Board::Nba));
        boards.push(("tennis/atp", Board::Tennis));

        let results = join_all(
            boards
                .iter()
                .map(|(endpoint, board)| self.fetch_board(endpoint, *board)),
        )
        .await;

        let mut matches = Vec::new();
        for ((endpoint, _), result) in boards.iter().zip(results) {
            match result {
                Ok(found) => matches.extend(found),
                Err(e) => tracing::warn!(endpoint = %endpoint, "scoreboard fetch failed: {}", e),
            }
        }
        tracing::debug!(count = matches.len(), "scoreboard refreshed");
        matches
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn soccer_board() -> Value {
        json!({
            "events": [
                {
                    "id": "704321",
                    "date": "2024-05-19T15:00Z",
                    "status": {"type": {"state": "post", "shortDetail": "FT"}},
                    "competitions": [{
                        "competitors": [
                            {"homeAway": "home", "score": "2", "team": {"id": "359", "displayName": "Arsenal", "logo": "https://a.espncdn.com/arsenal.png"}},
                            {"homeAway": "away", "score": "1", "team": {"id": "363", "displayName": "Chelsea"}}
                        ]
                    }]
                },
                {
                    "id": "704322",
                    "status": {"type": {"state": "pre", "shortDetail": "Sat, May 25th at 3:00 PM EDT"}},
                    "competitions": [{
                        "competitors": [
                            {"homeAway": "home", "team": {"id": "1", "displayName": "Liverpool"}},
                            {"homeAway": "away", "team": {"id": "2", "displayName": "Man City"}}
                        ]
                    }]
                },
                {
                    "id": "broken",
                    "competitions": [{"competitors": [{"homeAway": "home"}]}]
                }
            ]
        })
    }

    #[test]
    fn test_football_events_map_to_matches() {
        let matches = parse_board(Board::Football("Premier League"), &soccer_board());
        assert_eq!(matches.len(), 2);

        let finished = &matches[0];
        assert_eq!(finished.id, "m_espn_704321");
        assert_eq!(finished.competition, "Premier League");
        assert_eq!(finished.status, MatchStatus::Finished);
        assert_eq!(finished.date, "Full Time");
        assert_eq!(finished.home_team.name, "Arsenal");
        assert_eq!(finished.home_team.id, "t_espn_359");
        assert_eq!(finished.away_team.logo.as_deref(), Some("https://api.dicebear.com/7.x/identicon/svg?seed=363"));
        assert_eq!(finished.result.as_ref().map(|r| (r.home_score, r.away_score)), Some((2, 1)));
        assert_eq!(finished.odds.and_then(|o| o.draw), Some(3.50));

        let upcoming = &matches[1];
        assert_eq!(upcoming.status, MatchStatus::Upcoming);
        assert_eq!(upcoming.date, "Sat, May 25th at 3:00 PM EDT");
        assert!(upcoming.result.is_none());
    }

    #[test]
    fn test_nba_events_use_two_way_odds() {
        let board = json!({
            "events": [{
                "id": "401",
                "status": {"type": {"state": "in", "shortDetail": "Q3 4:12"}},
                "competitions": [{
                    "competitors": [
                        {"homeAway": "away", "score": "77", "team": {"id": "2", "displayName": "Boston Celtics"}},
                        {"homeAway": "home", "score": "80", "team": {"id": "20", "displayName": "Philadelphia 76ers"}}
                    ]
                }]
            }]
        });
        let matches = parse_board(Board::Nba, &board);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].id, "m_espn_nba_401");
        assert_eq!(matches[0].home_team.name, "Philadelphia 76ers");
        assert_eq!(matches[0].date, "Live Now");
        assert_eq!(matches[0].odds, Some(NBA_ODDS));
        assert_eq!(matches[0].result.as_ref().map(|r| r.home_score), Some(80));
    }

    #[test]
    fn test_tennis_groupings_flatten() {
        let board = json!({
            "events": [{
                "id": "ev1",
                "groupings": [{
                    "competitions": [
                        {
                            "id": "c9",
                            "status": {"type": {"state": "pre", "shortDetail": "Tomorrow"}},
                            "competitors": [
                                {"id": "p1", "athlete": {"id": "11", "displayName": "Jannik Sinner"}},
                                {"id": "p2", "athlete": {"id": "12", "displayName": "Carlos Alcaraz", "headshot": {"href": "https://img/alcaraz.png"}}}
                            ]
                        },
                        {"id": "c10", "competitors": [{"id": "p3"}]}
                    ]
                }]
            }]
        });
        let matches = parse_board(Board::Tennis, &board);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].id, "m_espn_atp_c9_p1");
        assert_eq!(matches[0].competition, "ATP Tour");
        assert_eq!(matches[0].home_team.id, "t_espn_11");
        assert_eq!(matches[0].away_team.logo.as_deref(), Some("https://img/alcaraz.png"));
        assert_eq!(matches[0].date, "Tomorrow");
    }

    #[test]
    fn test_upcoming_without_detail_formats_schedule() {
        assert_eq!(
            display_date(MatchStatus::Upcoming, None, Some("2024-05-19T15:00:00Z")),
            "2024-05-19 15:00 UTC"
        );
        assert_eq!(display_date(MatchStatus::Upcoming, None, None), "Upcoming");
    }

    #[test]
    fn test_missing_events_is_empty() {
        assert!(parse_board(Board::Nba, &json!({})).is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_boards_yield_nothing() {
        let client = ScoreboardClient::new(Some("http://127.0.0.1:9/sports".to_string()));
        assert!(client.live_matches().await.is_empty());
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Prediction text used when no analysis could be produced.
pub const ANALYSIS_UNAVAILABLE: &str = "Oracle Hub Connection Issue";

/// Scoreline marker paired with [`ANALYSIS_UNAVAILABLE`].
pub const ERROR_SCORELINE: &str = "ERR";

/// Match lifecycle as reported by the scoreboard feed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchStatus {
    #[default]
    Upcoming,
    Live,
    Finished,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Team {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo: Option<String>,
}

impl Team {
    pub fn named(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            logo: None,
        }
    }
}

/// Decimal odds for the match outcome
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchOdds {
    pub home: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draw: Option<f64>,
    pub away: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResult {
    pub home_score: u32,
    pub away_score: u32,
    #[serde(default)]
    pub scorers: Vec<String>,
}

/// A fixture as the UI collaborator knows it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchDescriptor {
    pub id: String,
    pub competition: String,
    pub home_team: Team,
    pub away_team: Team,
    /// Scheduled date as displayed ("2024-05-18 20:30", "Live Now", ...)
    pub date: String,
    #[serde(default)]
    pub status: MatchStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub odds: Option<MatchOdds>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<MatchResult>,
}

impl MatchDescriptor {
    /// Final score, only once the match is over.
    pub fn final_result(&self) -> Option<&MatchResult> {
        match self.status {
            MatchStatus::Finished => self.result.as_ref(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PropDirection {
    More,
    Less,
}

impl PropDirection {
    pub fn label(&self) -> &'static str {
        match self {
            PropDirection::More => "MORE",
            PropDirection::Less => "LESS",
        }
    }
}

/// A player prop the user picked. Passed through to the prompt unmodified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropSelection {
    pub player: String,
    pub stat_type: String,
    pub line: String,
    pub direction: PropDirection,
}

/// Everything needed to ask for one analysis. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRequest {
    #[serde(rename = "match")]
    match_info: MatchDescriptor,
    user_hunch: String,
    #[serde(default)]
    player_props: Vec<PropSelection>,
}

impl AnalysisRequest {
    pub fn new(
        match_info: MatchDescriptor,
        user_hunch: impl Into<String>,
        player_props: Vec<PropSelection>,
    ) -> Self {
        Self {
            match_info,
            user_hunch: user_hunch.into(),
            player_props,
        }
    }

    pub fn match_info(&self) -> &MatchDescriptor {
        &self.match_info
    }

    pub fn match_id(&self) -> &str {
        &self.match_info.id
    }

    pub fn competition_name(&self) -> &str {
        &self.match_info.competition
    }

    pub fn home_team_name(&self) -> &str {
        &self.match_info.home_team.name
    }

    pub fn away_team_name(&self) -> &str {
        &self.match_info.away_team.name
    }

    pub fn match_date(&self) -> &str {
        &self.match_info.date
    }

    pub fn user_hunch(&self) -> &str {
        &self.user_hunch
    }

    pub fn player_props(&self) -> &[PropSelection] {
        &self.player_props
    }
}

/// One entry of the player-prop market feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Projection {
    pub player: String,
    pub line: String,
    pub stat: String,
    pub team: String,
    pub league: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub title: String,
    pub uri: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuickPick {
    pub selection: String,
    pub market: String,
    /// 0-100
    pub confidence: u32,
    pub rationale: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NarrativeSignal {
    pub source: String,
    pub headline: String,
    pub sentiment: String,
    pub impact: String,
}

/// Structured betting analysis.
///
/// Every field defaults to empty. Consumers check emptiness, never absence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Analysis {
    pub prediction: String,
    pub scoreline: String,
    pub likely_scorers: Vec<String>,
    pub suggested_play: String,
    pub reasoning: String,
    pub player_prop_insights: String,
    pub quick_picks: Vec<QuickPick>,
    pub narrative_signals: Vec<NarrativeSignal>,
    pub sources: Vec<Source>,
}

impl Analysis {
    /// Synthetic analysis returned when the pipeline could not produce one.
    pub fn unavailable(diagnostic: impl Into<String>) -> Self {
        let mut reasoning = diagnostic.into();
        if reasoning.trim().is_empty() {
            reasoning = "The analysis service did not return a response.".to_string();
        }
        Self {
            prediction: ANALYSIS_UNAVAILABLE.to_string(),
            scoreline: ERROR_SCORELINE.to_string(),
            reasoning,
            ..Default::default()
        }
    }

    pub fn is_unavailable(&self) -> bool {
        self.prediction == ANALYSIS_UNAVAILABLE
    }
}

/// Cache payload: the analysis plus the match it was produced for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedAnalysis {
    #[serde(flatten)]
    pub analysis: Analysis,
    #[serde(rename = "match")]
    pub match_snapshot: MatchDescriptor,
}

/// A past analysis for a team, read back so the model can check its own
/// earlier calls against what happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoricalRecord {
    pub analysis: Analysis,
    pub match_snapshot: MatchDescriptor,
    pub created_at: DateTime<Utc>,
}

/// Per-request enrichment, discarded after the prompt is rendered.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SupplementalContext {
    pub market_projections: Vec<Projection>,
    pub team_history: Vec<HistoricalRecord>,
}

/// Where a returned analysis came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Cache,
    /// Model call with web-search grounding
    Grounded,
    /// Model call restricted to internal knowledge after a quota hit
    Degraded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisOutcome {
    pub analysis: Analysis,
    pub provenance: Provenance,
}

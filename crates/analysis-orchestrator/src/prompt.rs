use chrono::NaiveDate;
use gemini_client::SEARCH_DIRECTIVE_PREFIX;
use insight_core::{AnalysisRequest, HistoricalRecord, MatchStatus, Projection, PropSelection, SupplementalContext};

const NO_PROPS: &str = "No specific player props provided.";
const NO_MARKET: &str = "No live market projections matched this fixture.";

const OUTPUT_FORMAT: &str = "\
Format EXACTLY as tags:
[PREDICTION] summary verdict [/PREDICTION]
[SCORELINE] 2-1 [/SCORELINE]
[SCORERS] name1, name2 [/SCORERS]
[PLAY] specific suggested betting market [/PLAY]
[PROP_INSIGHTS] analysis of the user's picks [/PROP_INSIGHTS]
[REASONING] core logic with source citations [/REASONING]
[QUICKPICKS]
selection | market | confidence 0-100 | one-line rationale
(up to 5 lines, one pick per line)
[/QUICKPICKS]
[SIGNALS]
source | headline | positive/negative/neutral | impact on this match
(one line per news item)
[/SIGNALS]";

fn render_props(props: &[PropSelection]) -> String {
    if props.is_empty() {
        return NO_PROPS.to_string();
    }
    props
        .iter()
        .map(|p| format!("- {}: {} {} {}", p.player, p.direction.label(), p.line, p.stat_type))
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_market(projections: &[Projection]) -> String {
    if projections.is_empty() {
        return NO_MARKET.to_string();
    }
    projections
        .iter()
        .map(|p| format!("- {} ({}, {}): {} {}", p.player, p.team, p.league, p.line, p.stat))
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_memory_entry(record: &HistoricalRecord) -> String {
    let snapshot = &record.match_snapshot;
    let mut entry = format!(
        "- {} vs {} ({}), analysed {}: predicted \"{}\" with scoreline {}",
        snapshot.home_team.name,
        snapshot.away_team.name,
        snapshot.competition,
        record.created_at.format("%Y-%m-%d"),
        record.analysis.prediction,
        if record.analysis.scoreline.is_empty() { "n/a" } else { record.analysis.scoreline.as_str() },
    );

    match snapshot.final_result() {
        Some(result) => entry.push_str(&format!(
            ". ACTUAL RESULT: {} {}-{} {}",
            snapshot.home_team.name, result.home_score, result.away_score, snapshot.away_team.name
        )),
        None if snapshot.status == MatchStatus::Live => entry.push_str(". Match was still in play."),
        None => entry.push_str(". Result not yet known."),
    }
    entry
}

fn render_memory(history: &[HistoricalRecord]) -> Option<String> {
    if history.is_empty() {
        return None;
    }
    let entries = history.iter().map(render_memory_entry).collect::<Vec<_>>().join("\n");
    Some(format!(
        "ORACLE MEMORY (your previous calls on these teams):\n{}\n\
         Where an actual result differs from what you predicted, say so and explain what you misjudged before making this call.",
        entries
    ))
}

/// Full prompt for one analysis request.
pub fn render_prompt(request: &AnalysisRequest, context: &SupplementalContext, today: NaiveDate) -> String {
    let mut sections = vec![
        format!("TODAY'S DATE: {}", today.format("%Y-%m-%d")),
        format!(
            "ANALYZE THIS MATCH FOR EXPERT BETTING INSIGHTS:\n\
             Competition: {}\n\
             Home Team: {}\n\
             Away Team: {}\n\
             Match Date: {}",
            request.competition_name(),
            request.home_team_name(),
            request.away_team_name(),
            request.match_date(),
        ),
        format!("User context/hunch: {}", request.user_hunch()),
        format!("User specific bets:\n{}", render_props(request.player_props())),
        format!("PLAYER PROP MARKET (live lines):\n{}", render_market(&context.market_projections)),
    ];

    if let Some(memory) = render_memory(&context.team_history) {
        sections.push(memory);
    }

    sections.push(format!(
        "{} Use Google Search for TODAY'S latest team news, injuries, lineup leaks and manager quotes before answering.",
        SEARCH_DIRECTIVE_PREFIX
    ));
    sections.push(
        "TASKS:\n\
         1. Check the last 3 matches of form for both teams.\n\
         2. Give an expert verdict on the likely winner or draw.\n\
         3. Predict the exact scoreline.\n\
         4. Validate whether the user's bets and props make sense on current stats.\n\
         5. List your best quick picks with a confidence score.\n\
         6. Summarise the news signals that move this match."
            .to_string(),
    );
    sections.push(OUTPUT_FORMAT.to_string());

    sections.join("\n\n")
}

//! Tag micro-format reader for model output.
//!
//! The model answers in blocks like `[PREDICTION] ... [/PREDICTION]`. Tags
//! match case-insensitively and a block without its closing tag runs to the
//! end of the text. `QUICKPICKS` and `SIGNALS` hold one pipe-delimited row
//! per line. Nothing here fails: missing or malformed pieces come back empty.

use insight_core::{Analysis, NarrativeSignal, QuickPick, Source};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

pub const MAX_QUICK_PICKS: usize = 3;

const ROW_FIELDS: usize = 4;

const KNOWN_TAGS: [&str; 8] = [
    "PREDICTION",
    "SCORELINE",
    "SCORERS",
    "PLAY",
    "REASONING",
    "PROP_INSIGHTS",
    "QUICKPICKS",
    "SIGNALS",
];

static TAG_PATTERNS: LazyLock<HashMap<&'static str, Regex>> = LazyLock::new(|| {
    KNOWN_TAGS
        .iter()
        .filter_map(|tag| tag_pattern(tag).ok().map(|re| (*tag, re)))
        .collect()
});

fn tag_pattern(tag: &str) -> Result<Regex, regex::Error> {
    let tag = regex::escape(tag);
    Regex::new(&format!(r"(?is)\[{tag}\](.*?)(?:\[/{tag}\]|\z)"))
}

/// Contents of the first `[tag]` block, trimmed. Empty when absent.
pub fn extract_tag(raw: &str, tag: &str) -> String {
    let capture = |re: &Regex| {
        re.captures(raw)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default()
    };

    if let Some(re) = TAG_PATTERNS.get(tag.to_ascii_uppercase().as_str()) {
        return capture(re);
    }
    match tag_pattern(tag) {
        Ok(re) => capture(&re),
        Err(e) => {
            tracing::warn!("bad tag pattern for {}: {}", tag, e);
            String::new()
        }
    }
}

/// A single leading `-`, `*` or `•` list marker followed by whitespace.
fn strip_list_marker(line: &str) -> &str {
    let mut chars = line.chars();
    match (chars.next(), chars.next()) {
        (Some('-' | '*' | '•'), Some(c)) if c.is_whitespace() => chars.as_str().trim_start(),
        _ => line,
    }
}

/// Pipe-delimited rows with at least four fields. Leading list markers are
/// ignored; a fifth or later field is folded back into the fourth.
fn pipe_rows(block: &str) -> Vec<[String; ROW_FIELDS]> {
    block
        .lines()
        .map(|line| strip_list_marker(line.trim()).trim())
        .filter(|line| !line.is_empty())
        .filter_map(|line| {
            let fields: Vec<&str> = line.split('|').map(str::trim).collect();
            if fields.len() < ROW_FIELDS {
                tracing::debug!(line, "dropping malformed row");
                return None;
            }
            Some([
                fields[0].to_string(),
                fields[1].to_string(),
                fields[2].to_string(),
                fields[3..].join(" | "),
            ])
        })
        .collect()
}

/// Accepts `87`, `87%` and `0.87`. Anything unreadable is 0; the result is
/// clamped to 0-100.
pub fn parse_confidence(raw: &str) -> u32 {
    let cleaned = raw.trim().trim_end_matches('%').trim();
    let Ok(value) = cleaned.parse::<f64>() else {
        return 0;
    };
    if !value.is_finite() {
        return 0;
    }
    let pct = if cleaned.contains('.') && value > 0.0 && value <= 1.0 {
        value * 100.0
    } else {
        value
    };
    pct.round().clamp(0.0, 100.0) as u32
}

fn split_list(block: &str) -> Vec<String> {
    block
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Best picks first, at most [`MAX_QUICK_PICKS`]. Ties keep model order.
fn quick_picks(block: &str) -> Vec<QuickPick> {
    let mut picks: Vec<QuickPick> = pipe_rows(block)
        .into_iter()
        .map(|[selection, market, confidence, rationale]| QuickPick {
            selection,
            market,
            confidence: parse_confidence(&confidence),
            rationale,
        })
        .collect();
    picks.sort_by(|a, b| b.confidence.cmp(&a.confidence));
    picks.truncate(MAX_QUICK_PICKS);
    picks
}

fn narrative_signals(block: &str) -> Vec<NarrativeSignal> {
    pipe_rows(block)
        .into_iter()
        .map(|[source, headline, sentiment, impact]| NarrativeSignal {
            source,
            headline,
            sentiment,
            impact,
        })
        .collect()
}

pub fn parse_analysis(raw: &str) -> Analysis {
    Analysis {
        prediction: extract_tag(raw, "PREDICTION"),
        scoreline: extract_tag(raw, "SCORELINE"),
        likely_scorers: split_list(&extract_tag(raw, "SCORERS")),
        suggested_play: extract_tag(raw, "PLAY"),
        reasoning: extract_tag(raw, "REASONING"),
        player_prop_insights: extract_tag(raw, "PROP_INSIGHTS"),
        quick_picks: quick_picks(&extract_tag(raw, "QUICKPICKS")),
        narrative_signals: narrative_signals(&extract_tag(raw, "SIGNALS")),
        sources: Vec::new(),
    }
}

/// Drop sources without a URI and repeats of one already seen.
pub fn dedupe_sources(sources: Vec<Source>) -> Vec<Source> {
    let mut seen = HashSet::new();
    sources
        .into_iter()
        .filter(|s| !s.uri.trim().is_empty() && seen.insert(s.uri.clone()))
        .collect()
}

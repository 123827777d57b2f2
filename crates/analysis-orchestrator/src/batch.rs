use insight_core::{Analysis, AnalysisRequest, MatchDescriptor, MatchStatus, Provenance};
use rand::Rng;
use serde::Serialize;
use std::time::Duration;

use crate::AnalysisOrchestrator;

/// Hunch sent with each automatic daily pick.
pub const DAILY_TIP_HUNCH: &str =
    "Identify the single most valuable betting angle in this match for today's tip sheet.";

pub const DAILY_PICK_COUNT: usize = 3;

/// Competitions preferred when choosing daily picks.
const MAJOR_COMPETITIONS: &[&str] = &["Premier League", "NBA", "Champions League"];

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItem {
    pub match_id: String,
    pub analysis: Analysis,
}

/// Up to [`DAILY_PICK_COUNT`] unfinished matches, taken from the major
/// competitions when any are on the board, otherwise from the whole slate.
pub fn select_daily_candidates(matches: &[MatchDescriptor]) -> Vec<MatchDescriptor> {
    let open = || matches.iter().filter(|m| m.status != MatchStatus::Finished);

    let major: Vec<MatchDescriptor> = open()
        .filter(|m| {
            MAJOR_COMPETITIONS
                .iter()
                .any(|c| m.competition.eq_ignore_ascii_case(c))
        })
        .take(DAILY_PICK_COUNT)
        .cloned()
        .collect();
    if !major.is_empty() {
        return major;
    }
    open().take(DAILY_PICK_COUNT).cloned().collect()
}

fn jittered_delay(base: Duration, jitter: Duration) -> Duration {
    let jitter_ms = u64::try_from(jitter.as_millis()).unwrap_or(u64::MAX);
    if jitter_ms == 0 {
        return base;
    }
    base + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
}

impl AnalysisOrchestrator {
    /// Analyse matches one at a time, in order. After any item that reached
    /// the provider the next one waits `batch_delay` plus jitter, so provider
    /// calls from a batch never overlap and never burst. Failed items carry
    /// the unavailable sentinel; the batch itself never fails.
    pub async fn analyze_batch(&self, matches: &[MatchDescriptor], hunch: &str) -> Vec<BatchItem> {
        let mut items = Vec::with_capacity(matches.len());
        let mut pace_next = false;

        for (position, match_info) in matches.iter().enumerate() {
            if pace_next {
                let pause = jittered_delay(self.settings().batch_delay, self.settings().batch_jitter);
                tracing::debug!(
                    position,
                    pause_ms = pause.as_millis() as u64,
                    "pacing batch before next analysis"
                );
                tokio::time::sleep(pause).await;
            }

            let request = AnalysisRequest::new(match_info.clone(), hunch, Vec::new());
            let analysis = match self.analyze(&request).await {
                Ok(outcome) => {
                    pace_next = outcome.provenance != Provenance::Cache;
                    outcome.analysis
                }
                Err(e) => {
                    tracing::warn!(match_id = %match_info.id, "batch item failed: {}", e);
                    pace_next = true;
                    Analysis::unavailable(e.to_string())
                }
            };

            items.push(BatchItem {
                match_id: match_info.id.clone(),
                analysis,
            });
        }

        tracing::info!(count = items.len(), "batch analysis finished");
        items
    }

    /// Automatic tips for the current slate.
    pub async fn daily_predictions(&self, matches: &[MatchDescriptor]) -> Vec<BatchItem> {
        let candidates = select_daily_candidates(matches);
        if candidates.is_empty() {
            tracing::info!("no open matches for daily picks");
            return Vec::new();
        }
        self.analyze_batch(&candidates, DAILY_TIP_HUNCH).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{harness, sample_match, CountingModel, REPLY};
    use crate::OrchestratorSettings;
    use std::sync::atomic::Ordering;

    fn fixture(id: &str, competition: &str, status: MatchStatus) -> MatchDescriptor {
        let mut m = sample_match();
        m.id = id.to_string();
        m.competition = competition.to_string();
        m.status = status;
        m
    }

    fn settings() -> OrchestratorSettings {
        OrchestratorSettings {
            batch_delay: Duration::from_secs(8),
            batch_jitter: Duration::from_secs(2),
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_calls_are_serialized_and_spaced() {
        let model = CountingModel::replying(REPLY).with_latency(Duration::from_secs(1));
        let h = harness(model, 2, settings());
        let matches = vec![
            fixture("m_a", "Premier League", MatchStatus::Upcoming),
            fixture("m_b", "Premier League", MatchStatus::Upcoming),
            fixture("m_c", "La Liga", MatchStatus::Upcoming),
        ];

        let items = h.orchestrator.analyze_batch(&matches, "").await;

        let ids: Vec<&str> = items.iter().map(|i| i.match_id.as_str()).collect();
        assert_eq!(ids, vec!["m_a", "m_b", "m_c"]);
        assert!(items.iter().all(|i| i.analysis.prediction == "Arsenal edge it"));

        assert_eq!(h.model.calls(), 3);
        assert_eq!(h.model.max_in_flight.load(Ordering::SeqCst), 1);
        let started = h.model.started.lock().unwrap().clone();
        for pair in started.windows(2) {
            // one second of latency plus at least the fixed delay
            assert!(pair[1] - pair[0] >= Duration::from_secs(9));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_item_keeps_batch_going() {
        let h = harness(CountingModel::failing(500), 1, settings());
        let matches = vec![
            fixture("m_a", "Premier League", MatchStatus::Upcoming),
            fixture("m_b", "Premier League", MatchStatus::Upcoming),
        ];

        let items = h.orchestrator.analyze_batch(&matches, "").await;
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|i| i.analysis.is_unavailable()));
    }

    #[test]
    fn test_daily_candidates_prefer_major_competitions() {
        let matches = vec![
            fixture("m_ligue", "Ligue 1", MatchStatus::Upcoming),
            fixture("m_done", "Premier League", MatchStatus::Finished),
            fixture("m_nba", "NBA", MatchStatus::Live),
            fixture("m_ucl", "Champions League", MatchStatus::Upcoming),
        ];
        let ids: Vec<String> = select_daily_candidates(&matches).into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["m_nba", "m_ucl"]);
    }

    #[test]
    fn test_daily_candidates_fall_back_to_any_open_match() {
        let matches = vec![
            fixture("m_1", "Serie A", MatchStatus::Finished),
            fixture("m_2", "Serie A", MatchStatus::Upcoming),
            fixture("m_3", "Bundesliga", MatchStatus::Upcoming),
            fixture("m_4", "ATP", MatchStatus::Live),
            fixture("m_5", "La Liga", MatchStatus::Upcoming),
        ];
        let ids: Vec<String> = select_daily_candidates(&matches).into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["m_2", "m_3", "m_4"]);
    }

    #[test]
    fn test_jitter_stays_in_range() {
        for _ in 0..50 {
            let d = jittered_delay(Duration::from_secs(8), Duration::from_secs(2));
            assert!(d >= Duration::from_secs(8) && d <= Duration::from_secs(10));
        }
        assert_eq!(jittered_delay(Duration::from_secs(1), Duration::ZERO), Duration::from_secs(1));
    }
}

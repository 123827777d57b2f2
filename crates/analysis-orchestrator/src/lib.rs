//! Analysis request pipeline: cache lookup, context enrichment, prompt,
//! rate-limited dispatch, tag parsing and cache write.

use gemini_client::{CallPath, Dispatcher, KeyPool};
use insight_cache::AnalysisCache;
use insight_core::{
    Analysis, AnalysisOutcome, AnalysisRequest, CachedAnalysis, Clock, InsightError,
    MatchDescriptor, PropSelection, Provenance,
};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

pub mod batch;
pub mod context;
pub mod parser;
pub mod prompt;

#[cfg(test)]
mod test_support;

pub use batch::{select_daily_candidates, BatchItem, DAILY_PICK_COUNT, DAILY_TIP_HUNCH};
pub use context::{filter_projections, names_match, refresh_history, ContextAssembler, MAX_MARKET_ENTRIES};
pub use parser::{dedupe_sources, extract_tag, parse_analysis, parse_confidence, MAX_QUICK_PICKS};
pub use prompt::render_prompt;

const CACHE_KEY_PREFIX: &str = "analysis:v2";

/// Hex characters of the request fingerprint kept in the cache key.
const FINGERPRINT_LEN: usize = 16;

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub analysis_ttl: Duration,
    /// Fixed pause between provider calls in a batch
    pub batch_delay: Duration,
    /// Upper bound of the random extra pause added to `batch_delay`
    pub batch_jitter: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            analysis_ttl: Duration::from_secs(4 * 60 * 60),
            batch_delay: Duration::from_secs(8),
            batch_jitter: Duration::from_secs(2),
        }
    }
}

/// Cache key for a request: the match plus a fingerprint of the hunch and
/// prop selections, so different questions about one match never collide.
pub fn cache_key(request: &AnalysisRequest) -> String {
    let mut hasher = Sha256::new();
    hasher.update(request.user_hunch().trim().as_bytes());
    for prop in request.player_props() {
        hasher.update(b"\n");
        hasher.update(
            format!(
                "{}|{}|{}|{}",
                prop.player,
                prop.stat_type,
                prop.line,
                prop.direction.label()
            )
            .as_bytes(),
        );
    }
    let digest = hex::encode(hasher.finalize());
    format!("{}:{}:{}", CACHE_KEY_PREFIX, request.match_id(), &digest[..FINGERPRINT_LEN])
}

pub struct AnalysisOrchestrator {
    dispatcher: Dispatcher,
    context: ContextAssembler,
    cache: AnalysisCache,
    clock: Arc<dyn Clock>,
    settings: OrchestratorSettings,
}

impl AnalysisOrchestrator {
    pub fn new(
        dispatcher: Dispatcher,
        context: ContextAssembler,
        cache: AnalysisCache,
        clock: Arc<dyn Clock>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            dispatcher,
            context,
            cache,
            clock,
            settings,
        }
    }

    pub fn key_pool(&self) -> &Arc<KeyPool> {
        self.dispatcher.pool()
    }

    pub fn cache(&self) -> &AnalysisCache {
        &self.cache
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Run one request through the pipeline, reporting where the answer
    /// came from. Only a dispatch failure is an error.
    pub async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisOutcome, InsightError> {
        let key = cache_key(request);

        if let Some(cached) = self.cache.get(&key).await {
            tracing::info!(match_id = request.match_id(), "serving analysis from cache");
            return Ok(AnalysisOutcome {
                analysis: cached.analysis,
                provenance: Provenance::Cache,
            });
        }

        let context = self.context.build_context(request).await;
        let prompt = render_prompt(request, &context, self.clock.now().date_naive());

        tracing::info!(
            match_id = request.match_id(),
            home = request.home_team_name(),
            away = request.away_team_name(),
            "requesting analysis"
        );
        let dispatched = self.dispatcher.dispatch(&prompt).await?;

        let mut analysis = parse_analysis(&dispatched.response.text);
        analysis.sources = dedupe_sources(dispatched.response.sources);

        let provenance = match dispatched.path {
            CallPath::Grounded => Provenance::Grounded,
            CallPath::Degraded => Provenance::Degraded,
        };

        if analysis.prediction.trim().is_empty() {
            tracing::warn!(
                match_id = request.match_id(),
                "model reply had no prediction, not caching it"
            );
        } else {
            let entry = CachedAnalysis {
                analysis: analysis.clone(),
                match_snapshot: request.match_info().clone(),
            };
            self.cache.set(&key, &entry, self.settings.analysis_ttl).await;
        }

        Ok(AnalysisOutcome {
            analysis,
            provenance,
        })
    }

    /// Never fails. Any error becomes [`Analysis::unavailable`] carrying the
    /// diagnostic in `reasoning`.
    pub async fn get_analysis(
        &self,
        match_info: MatchDescriptor,
        hunch: &str,
        props: Vec<PropSelection>,
    ) -> Analysis {
        let request = AnalysisRequest::new(match_info, hunch, props);
        match self.analyze(&request).await {
            Ok(outcome) => outcome.analysis,
            Err(e) => {
                tracing::error!(match_id = request.match_id(), "analysis failed: {}", e);
                Analysis::unavailable(e.to_string())
            }
        }
    }
}

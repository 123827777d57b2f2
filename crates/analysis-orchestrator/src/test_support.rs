use async_trait::async_trait;
use gemini_client::{
    DispatchSettings, Dispatcher, GenerationRequest, GenerativeModel, KeyPool, KeyPoolSettings,
    ProviderError, ProviderResult, RawModelResponse,
};
use insight_cache::{AnalysisCache, MemoryCacheStore};
use insight_core::{
    ManualClock, MatchDescriptor, MatchOdds, MatchStatus, Projection, Source, Team,
};
use sports_feeds::{FeedError, FeedResult, MatchSource, ProjectionSource};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::{AnalysisOrchestrator, ContextAssembler, OrchestratorSettings};

pub const REPLY: &str = "\
[PREDICTION] Arsenal edge it [/PREDICTION]
[SCORELINE] 2-1 [/SCORELINE]
[SCORERS] Saka, Havertz [/SCORERS]
[PLAY] Arsenal to win [/PLAY]
[REASONING] Chelsea missing three defenders [/REASONING]
[QUICKPICKS]
Arsenal | 1X2 | 72 | form
[/QUICKPICKS]";

pub fn sample_match() -> MatchDescriptor {
    MatchDescriptor {
        id: "m_pl1".to_string(),
        competition: "Premier League".to_string(),
        home_team: Team::named("t_arsenal", "Arsenal"),
        away_team: Team::named("t_chelsea", "Chelsea"),
        date: "2024-05-19 16:30".to_string(),
        status: MatchStatus::Upcoming,
        odds: Some(MatchOdds { home: 1.9, draw: Some(3.5), away: 3.8 }),
        result: None,
    }
}

pub enum StaticProjections {
    Board(Vec<Projection>),
    Down,
}

#[async_trait]
impl ProjectionSource for StaticProjections {
    async fn projections(&self) -> FeedResult<Vec<Projection>> {
        match self {
            StaticProjections::Board(board) => Ok(board.clone()),
            StaticProjections::Down => Err(FeedError::InvalidResponse("feed down".to_string())),
        }
    }
}

pub struct StaticMatches(pub Vec<MatchDescriptor>);

#[async_trait]
impl MatchSource for StaticMatches {
    async fn live_matches(&self) -> Vec<MatchDescriptor> {
        self.0.clone()
    }
}

/// Model double that records call counts, overlap and start times.
pub struct CountingModel {
    reply: String,
    sources: Vec<Source>,
    fail_status: Option<u16>,
    latency: Duration,
    pub calls: AtomicUsize,
    pub grounded_calls: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub started: Mutex<Vec<tokio::time::Instant>>,
}

impl CountingModel {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            sources: Vec::new(),
            fail_status: None,
            latency: Duration::ZERO,
            calls: AtomicUsize::new(0),
            grounded_calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            started: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(status: u16) -> Self {
        Self {
            fail_status: Some(status),
            ..Self::replying("")
        }
    }

    pub fn with_sources(mut self, sources: Vec<Source>) -> Self {
        self.sources = sources;
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerativeModel for CountingModel {
    async fn generate(
        &self,
        _api_key: &str,
        request: &GenerationRequest,
    ) -> ProviderResult<RawModelResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if request.grounded {
            self.grounded_calls.fetch_add(1, Ordering::SeqCst);
        }
        self.started.lock().unwrap().push(tokio::time::Instant::now());
        let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match self.fail_status {
            Some(status) => Err(ProviderError::Status {
                status,
                body: "scripted failure".to_string(),
            }),
            None => Ok(RawModelResponse {
                text: self.reply.clone(),
                sources: self.sources.clone(),
            }),
        }
    }

    fn model_name(&self) -> &str {
        "counting"
    }
}

pub struct Harness {
    pub orchestrator: AnalysisOrchestrator,
    pub model: Arc<CountingModel>,
    pub pool: Arc<KeyPool>,
    pub store: Arc<MemoryCacheStore>,
}

pub fn harness(model: CountingModel, keys: usize, settings: OrchestratorSettings) -> Harness {
    let clock = Arc::new(ManualClock::default());
    let model = Arc::new(model);
    let pool = Arc::new(KeyPool::new(
        (0..keys).map(|i| format!("test-key-{i}")).collect(),
        KeyPoolSettings::default(),
        clock.clone(),
    ));
    let store = Arc::new(MemoryCacheStore::new());
    let cache = AnalysisCache::new(store.clone(), clock.clone());

    let dispatcher = Dispatcher::new(pool.clone(), model.clone(), DispatchSettings::default());
    let context = ContextAssembler::new(None, cache.clone());
    let orchestrator = AnalysisOrchestrator::new(dispatcher, context, cache, clock, settings);

    Harness {
        orchestrator,
        model,
        pool,
        store,
    }
}

//! Rate-limited request dispatch across the key pool.
//!
//! Web-search grounding is the scarce capability (a couple of calls per key
//! per minute), plain generation is comparatively cheap. Each attempt tries
//! a grounded call first and drops to a plain "internal knowledge" call when
//! the key's search quota is gone, so a quota hit costs grounding, not the
//! answer.

use std::sync::Arc;
use std::time::Duration;

use crate::client::{GenerationRequest, GenerativeModel, RawModelResponse};
use crate::error::{classify, DispatchError, FailureClass, ProviderError, ProviderResult};
use crate::key_pool::{Credential, KeyPool};

/// Prompt lines starting with this marker ask the model to search the web.
pub const SEARCH_DIRECTIVE_PREFIX: &str = "SEARCH DIRECTIVE:";

/// Replacement for the search directive on degraded calls.
pub const KNOWLEDGE_DIRECTIVE: &str = "KNOWLEDGE DIRECTIVE: Live web search is unavailable for this request. \
Do not attempt to search. Rely on your internal knowledge only and flag anything that may be out of date.";

/// Strip the search directive from a prompt and put the internal-knowledge
/// directive in its place. Prompts without the directive get it prepended.
pub fn degrade_prompt(prompt: &str) -> String {
    let mut replaced = false;
    let mut lines = Vec::new();
    for line in prompt.lines() {
        if line.trim_start().starts_with(SEARCH_DIRECTIVE_PREFIX) {
            if !replaced {
                lines.push(KNOWLEDGE_DIRECTIVE);
                replaced = true;
            }
            continue;
        }
        lines.push(line);
    }

    if replaced {
        lines.join("\n")
    } else {
        format!("{}\n{}", KNOWLEDGE_DIRECTIVE, prompt)
    }
}

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// Deadline for a single provider call
    pub request_timeout: Duration,
    /// Pause after a failed attempt before trying the next key
    pub retry_backoff: Duration,
    /// Upper bound on attempts regardless of pool size
    pub max_attempts_cap: usize,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(90),
            retry_backoff: Duration::from_millis(1500),
            max_attempts_cap: 6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPath {
    Grounded,
    Degraded,
}

#[derive(Debug, Clone)]
pub struct Dispatched {
    pub response: RawModelResponse,
    pub path: CallPath,
    pub credential_index: usize,
    pub attempts: usize,
}

pub struct Dispatcher {
    pool: Arc<KeyPool>,
    model: Arc<dyn GenerativeModel>,
    settings: DispatchSettings,
}

impl Dispatcher {
    pub fn new(pool: Arc<KeyPool>, model: Arc<dyn GenerativeModel>, settings: DispatchSettings) -> Self {
        Self {
            pool,
            model,
            settings,
        }
    }

    pub fn pool(&self) -> &Arc<KeyPool> {
        &self.pool
    }

    pub fn max_attempts(&self) -> usize {
        (2 * self.pool.len()).min(self.settings.max_attempts_cap).max(1)
    }

    /// Run one prompt to completion, or fail once every attempt is spent.
    ///
    /// Attempts are strictly sequential: each one may change key state the
    /// next selection depends on.
    pub async fn dispatch(&self, prompt: &str) -> Result<Dispatched, DispatchError> {
        if self.pool.is_empty() {
            return Err(DispatchError::NoCredentials);
        }

        self.run_attempts(prompt).await
    }

    async fn run_attempts(&self, prompt: &str) -> Result<Dispatched, DispatchError> {
        let max_attempts = self.max_attempts();
        let mut attempts = 0;
        let mut last_error = "every credential is in hard cooldown".to_string();
        let mut degraded_prompt: Option<String> = None;

        for attempt in 1..=max_attempts {
            let selected = if attempt == 1 {
                self.pool.select_first(true)
            } else {
                self.pool.select_credential(true)
            };
            let Some(credential) = selected else {
                tracing::warn!(attempt, "no credential out of cooldown, giving up");
                break;
            };
            attempts = attempt;

            if self.pool.try_consume_search(credential.index()) {
                match self.call(&credential, GenerationRequest::grounded(prompt)).await {
                    Ok(response) => {
                        tracing::info!(
                            credential = %credential.masked(),
                            attempt,
                            "grounded analysis call succeeded"
                        );
                        return Ok(Dispatched {
                            response,
                            path: CallPath::Grounded,
                            credential_index: credential.index(),
                            attempts,
                        });
                    }
                    Err(e) => match classify(&e) {
                        FailureClass::RateLimited => {
                            self.pool.mark_search_exhausted(credential.index());
                        }
                        FailureClass::Transient => {
                            tracing::warn!(
                                credential = %credential.masked(),
                                attempt,
                                "grounded call failed: {}",
                                e
                            );
                            last_error = e.to_string();
                            self.fail_over(&credential, attempt, max_attempts).await;
                            continue;
                        }
                    },
                }
            } else {
                tracing::debug!(
                    credential = %credential.masked(),
                    "search quota spent this window, skipping grounded call"
                );
            }

            let degraded = degraded_prompt.get_or_insert_with(|| degrade_prompt(prompt));
            match self
                .call(&credential, GenerationRequest::plain(degraded.as_str()))
                .await
            {
                Ok(response) => {
                    tracing::info!(
                        credential = %credential.masked(),
                        attempt,
                        "degraded analysis call succeeded"
                    );
                    return Ok(Dispatched {
                        response,
                        path: CallPath::Degraded,
                        credential_index: credential.index(),
                        attempts,
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        credential = %credential.masked(),
                        attempt,
                        "degraded call failed: {}",
                        e
                    );
                    last_error = e.to_string();
                    self.fail_over(&credential, attempt, max_attempts).await;
                }
            }
        }

        Err(DispatchError::AllCredentialsExhausted {
            attempts,
            last_error,
        })
    }

    async fn call(
        &self,
        credential: &Credential,
        request: GenerationRequest,
    ) -> ProviderResult<RawModelResponse> {
        match tokio::time::timeout(
            self.settings.request_timeout,
            self.model.generate(credential.key(), &request),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(self.settings.request_timeout)),
        }
    }

    async fn fail_over(&self, credential: &Credential, attempt: usize, max_attempts: usize) {
        self.pool.cool_down(credential.index());
        if attempt < max_attempts {
            tokio::time::sleep(self.settings.retry_backoff).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key_pool::{CredentialStatus, KeyPoolSettings};
    use async_trait::async_trait;
    use insight_core::ManualClock;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    enum Step {
        Reply(&'static str),
        Fail(u16, &'static str),
        Slow(&'static str, Duration),
        Hang,
    }

    #[derive(Default)]
    struct ScriptedModel {
        steps: Mutex<VecDeque<Step>>,
        calls: Mutex<Vec<(String, bool, String)>>,
    }

    impl ScriptedModel {
        fn with_steps(steps: Vec<Step>) -> Arc<Self> {
            Arc::new(Self {
                steps: Mutex::new(steps.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<(String, bool)> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|(k, g, _)| (k.clone(), *g))
                .collect()
        }

        fn prompts(&self) -> Vec<String> {
            self.calls.lock().unwrap().iter().map(|(_, _, p)| p.clone()).collect()
        }
    }

    #[async_trait]
    impl GenerativeModel for ScriptedModel {
        async fn generate(
            &self,
            api_key: &str,
            request: &GenerationRequest,
        ) -> ProviderResult<RawModelResponse> {
            self.calls.lock().unwrap().push((
                api_key.to_string(),
                request.grounded,
                request.prompt.clone(),
            ));
            let step = self.steps.lock().unwrap().pop_front();
            match step {
                Some(Step::Reply(text)) => Ok(RawModelResponse {
                    text: text.to_string(),
                    sources: Vec::new(),
                }),
                Some(Step::Fail(status, body)) => Err(ProviderError::Status {
                    status,
                    body: body.to_string(),
                }),
                Some(Step::Slow(text, latency)) => {
                    tokio::time::sleep(latency).await;
                    Ok(RawModelResponse {
                        text: text.to_string(),
                        sources: Vec::new(),
                    })
                }
                Some(Step::Hang) => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(RawModelResponse::default())
                }
                None => Ok(RawModelResponse {
                    text: "[PREDICTION] Home win [/PREDICTION]".to_string(),
                    sources: Vec::new(),
                }),
            }
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    const PROMPT: &str = "MATCH: Arsenal vs Chelsea\nSEARCH DIRECTIVE: Use Google Search for team news.\nTASKS: predict";

    fn setup(keys: usize, model: Arc<ScriptedModel>) -> (Dispatcher, Arc<KeyPool>) {
        let clock = Arc::new(ManualClock::default());
        let pool = Arc::new(KeyPool::new(
            (0..keys).map(|i| format!("key-{i}")).collect(),
            KeyPoolSettings::default(),
            clock,
        ));
        let dispatcher = Dispatcher::new(pool.clone(), model, DispatchSettings::default());
        (dispatcher, pool)
    }

    #[test]
    fn test_degrade_prompt_replaces_search_directive() {
        let degraded = degrade_prompt(PROMPT);
        assert!(!degraded.contains(SEARCH_DIRECTIVE_PREFIX));
        assert!(degraded.contains(KNOWLEDGE_DIRECTIVE));
        assert!(degraded.starts_with("MATCH: Arsenal vs Chelsea"));
        assert!(degraded.ends_with("TASKS: predict"));

        let bare = degrade_prompt("no directive here");
        assert!(bare.starts_with(KNOWLEDGE_DIRECTIVE));
        assert!(bare.ends_with("no directive here"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_grounded_success_short_circuits() {
        let model = ScriptedModel::with_steps(vec![Step::Reply("[PREDICTION] Draw [/PREDICTION]")]);
        let (dispatcher, pool) = setup(2, model.clone());

        let out = dispatcher.dispatch(PROMPT).await.unwrap();
        assert_eq!(out.path, CallPath::Grounded);
        assert_eq!(out.credential_index, 0);
        assert_eq!(out.attempts, 1);
        assert_eq!(model.calls(), vec![("key-0".to_string(), true)]);
        assert_eq!(pool.snapshot()[0].search_used, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_degrades_on_same_credential() {
        let model = ScriptedModel::with_steps(vec![
            Step::Fail(429, "RESOURCE_EXHAUSTED"),
            Step::Reply("[PREDICTION] Away win [/PREDICTION]"),
        ]);
        let (dispatcher, pool) = setup(2, model.clone());

        let out = dispatcher.dispatch(PROMPT).await.unwrap();
        assert_eq!(out.path, CallPath::Degraded);
        assert_eq!(out.credential_index, 0);
        assert_eq!(
            model.calls(),
            vec![("key-0".to_string(), true), ("key-0".to_string(), false)]
        );
        assert!(model.prompts()[1].contains(KNOWLEDGE_DIRECTIVE));
        assert!(!model.prompts()[1].contains(SEARCH_DIRECTIVE_PREFIX));
        assert_eq!(pool.status(0), Some(CredentialStatus::SoftExhausted));
    }

    #[tokio::test(start_paused = true)]
    async fn test_spent_search_quota_skips_grounded_call() {
        let model = ScriptedModel::with_steps(vec![]);
        let (dispatcher, pool) = setup(1, model.clone());
        assert!(pool.try_consume_search(0));
        assert!(pool.try_consume_search(0));

        let out = dispatcher.dispatch(PROMPT).await.unwrap();
        assert_eq!(out.path, CallPath::Degraded);
        assert!(!out.response.text.is_empty());
        assert_eq!(model.calls(), vec![("key-0".to_string(), false)]);
        assert_eq!(pool.snapshot()[0].search_used, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_cools_down_and_moves_on() {
        let model = ScriptedModel::with_steps(vec![Step::Fail(503, "unavailable")]);
        let (dispatcher, pool) = setup(2, model.clone());

        let out = dispatcher.dispatch(PROMPT).await.unwrap();
        assert_eq!(out.path, CallPath::Grounded);
        assert_eq!(out.credential_index, 1);
        assert_eq!(out.attempts, 2);
        assert_eq!(
            model.calls(),
            vec![("key-0".to_string(), true), ("key-1".to_string(), true)]
        );
        assert_eq!(pool.status(0), Some(CredentialStatus::HardCooldown));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_treated_as_transient() {
        let model = ScriptedModel::with_steps(vec![Step::Hang]);
        let (dispatcher, pool) = setup(2, model.clone());

        let out = dispatcher.dispatch(PROMPT).await.unwrap();
        assert_eq!(out.credential_index, 1);
        assert_eq!(pool.status(0), Some(CredentialStatus::HardCooldown));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_degraded_call_cools_down() {
        let model = ScriptedModel::with_steps(vec![
            Step::Fail(429, "quota"),
            Step::Fail(429, "quota"),
            Step::Reply("[PREDICTION] Home [/PREDICTION]"),
        ]);
        let (dispatcher, pool) = setup(2, model.clone());

        let out = dispatcher.dispatch(PROMPT).await.unwrap();
        assert_eq!(out.credential_index, 1);
        assert_eq!(out.path, CallPath::Grounded);
        assert_eq!(pool.status(0), Some(CredentialStatus::HardCooldown));
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_credentials_exhausted() {
        let model = ScriptedModel::with_steps(vec![
            Step::Fail(500, "boom"),
            Step::Fail(500, "boom"),
            Step::Fail(500, "boom"),
        ]);
        let (dispatcher, pool) = setup(2, model.clone());

        let err = dispatcher.dispatch(PROMPT).await.unwrap_err();
        match err {
            DispatchError::AllCredentialsExhausted { attempts, last_error } => {
                assert_eq!(attempts, 2);
                assert!(last_error.contains("500"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(model.calls().len(), 2);
        assert_eq!(pool.available_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_bounded_by_cap() {
        let model = ScriptedModel::with_steps(vec![
            Step::Fail(500, "boom"),
            Step::Fail(500, "boom"),
        ]);
        let clock = Arc::new(ManualClock::default());
        let pool = Arc::new(KeyPool::new(
            vec!["a".into(), "b".into(), "c".into()],
            KeyPoolSettings::default(),
            clock,
        ));
        let dispatcher = Dispatcher::new(
            pool,
            model.clone(),
            DispatchSettings {
                max_attempts_cap: 1,
                ..Default::default()
            },
        );

        assert_eq!(dispatcher.max_attempts(), 1);
        assert!(dispatcher.dispatch(PROMPT).await.is_err());
        assert_eq!(model.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_call_when_every_key_cooling_down() {
        let model = ScriptedModel::with_steps(vec![]);
        let (dispatcher, pool) = setup(2, model.clone());
        pool.cool_down(0);
        pool.cool_down(1);

        let err = dispatcher.dispatch(PROMPT).await.unwrap_err();
        assert!(matches!(err, DispatchError::AllCredentialsExhausted { attempts: 0, .. }));
        assert!(model.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_consecutive_requests_start_on_different_keys() {
        let model = ScriptedModel::with_steps(vec![]);
        let (dispatcher, _pool) = setup(3, model.clone());

        for _ in 0..3 {
            dispatcher.dispatch(PROMPT).await.unwrap();
        }
        let keys: Vec<String> = model.calls().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["key-0", "key-1", "key-2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_requests_start_on_different_keys() {
        let slow = Duration::from_secs(5);
        let model = ScriptedModel::with_steps(vec![
            Step::Slow("[PREDICTION] A [/PREDICTION]", slow),
            Step::Slow("[PREDICTION] B [/PREDICTION]", slow),
        ]);
        let (dispatcher, _pool) = setup(3, model.clone());

        let (first, second) = tokio::join!(dispatcher.dispatch(PROMPT), dispatcher.dispatch(PROMPT));
        assert_ne!(first.unwrap().credential_index, second.unwrap().credential_index);

        let keys: Vec<String> = model.calls().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["key-0", "key-1"]);
    }

    #[tokio::test]
    async fn test_empty_pool_is_an_error() {
        let model = ScriptedModel::with_steps(vec![]);
        let (dispatcher, _) = setup(0, model);
        assert!(matches!(
            dispatcher.dispatch(PROMPT).await,
            Err(DispatchError::NoCredentials)
        ));
    }
}

//! Environment-driven configuration.

use analysis_orchestrator::OrchestratorSettings;
use anyhow::{bail, Context, Result};
use gemini_client::{DispatchSettings, KeyPoolSettings};
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
const DEFAULT_PROJECTIONS_TTL_SECS: u64 = 15 * 60;

/// Numbered key variables checked after the list form.
const NUMBERED_KEY_SLOTS: usize = 5;

#[derive(Debug, Clone)]
pub struct InsightConfig {
    pub api_keys: Vec<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub cache_database_url: Option<String>,
    pub projections_url: Option<String>,
    pub projections_ttl: Duration,
    pub scoreboard_url: Option<String>,
    pub key_pool: KeyPoolSettings,
    pub dispatch: DispatchSettings,
    pub orchestrator: OrchestratorSettings,
    pub bind_addr: SocketAddr,
}

impl InsightConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let api_keys = collect_api_keys(&var);
        if api_keys.is_empty() {
            bail!("no Gemini API key configured: set GEMINI_API_KEYS or GEMINI_API_KEY");
        }

        let key_defaults = KeyPoolSettings::default();
        let key_pool = KeyPoolSettings {
            search_quota_per_window: parse_or(&var, "SEARCH_QUOTA_PER_WINDOW", key_defaults.search_quota_per_window)?,
            search_window: secs_or(&var, "SEARCH_WINDOW_SECS", key_defaults.search_window)?,
            hard_cooldown: secs_or(&var, "HARD_COOLDOWN_SECS", key_defaults.hard_cooldown)?,
        };
        if key_pool.search_window.is_zero() {
            bail!("SEARCH_WINDOW_SECS must be greater than zero");
        }

        let dispatch_defaults = DispatchSettings::default();
        let dispatch = DispatchSettings {
            request_timeout: secs_or(&var, "REQUEST_TIMEOUT_SECS", dispatch_defaults.request_timeout)?,
            retry_backoff: millis_or(&var, "RETRY_BACKOFF_MS", dispatch_defaults.retry_backoff)?,
            max_attempts_cap: parse_or(&var, "MAX_ATTEMPTS", dispatch_defaults.max_attempts_cap)?,
        };
        if dispatch.request_timeout.is_zero() {
            bail!("REQUEST_TIMEOUT_SECS must be greater than zero");
        }
        if dispatch.max_attempts_cap == 0 {
            bail!("MAX_ATTEMPTS must be at least 1");
        }

        let orchestrator_defaults = OrchestratorSettings::default();
        let orchestrator = OrchestratorSettings {
            analysis_ttl: secs_or(&var, "ANALYSIS_TTL_SECS", orchestrator_defaults.analysis_ttl)?,
            batch_delay: millis_or(&var, "BATCH_DELAY_MS", orchestrator_defaults.batch_delay)?,
            batch_jitter: millis_or(&var, "BATCH_JITTER_MS", orchestrator_defaults.batch_jitter)?,
        };

        let bind_addr = var("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = SocketAddr::from_str(&bind_addr)
            .with_context(|| format!("BIND_ADDR is not a socket address: {}", bind_addr))?;

        Ok(Self {
            api_keys,
            model: var("GEMINI_MODEL"),
            base_url: var("GEMINI_BASE_URL"),
            cache_database_url: var("CACHE_DATABASE_URL"),
            projections_url: var("PROJECTIONS_URL"),
            projections_ttl: secs_or(
                &var,
                "PROJECTIONS_TTL_SECS",
                Duration::from_secs(DEFAULT_PROJECTIONS_TTL_SECS),
            )?,
            scoreboard_url: var("SCOREBOARD_URL"),
            key_pool,
            dispatch,
            orchestrator,
            bind_addr,
        })
    }
}

/// `GEMINI_API_KEYS` (comma list), then `GEMINI_API_KEY`, the numbered
/// slots and `API_KEY`. Duplicates are dropped, first position wins.
fn collect_api_keys(var: &impl Fn(&str) -> Option<String>) -> Vec<String> {
    let mut candidates: Vec<String> = var("GEMINI_API_KEYS")
        .map(|list| list.split(',').map(|k| k.trim().to_string()).collect())
        .unwrap_or_default();

    candidates.extend(var("GEMINI_API_KEY"));
    for slot in 1..=NUMBERED_KEY_SLOTS {
        candidates.extend(var(&format!("GEMINI_API_KEY_{}", slot)));
    }
    candidates.extend(var("API_KEY"));

    let mut keys: Vec<String> = Vec::new();
    for key in candidates {
        if !key.is_empty() && !keys.contains(&key) {
            keys.push(key);
        }
    }
    keys
}

fn parse_or<T>(var: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(name) {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("{} has an invalid value: {}", name, raw)),
        None => Ok(default),
    }
}

fn secs_or(var: &impl Fn(&str) -> Option<String>, name: &str, default: Duration) -> Result<Duration> {
    parse_or(var, name, default.as_secs()).map(Duration::from_secs)
}

fn millis_or(var: &impl Fn(&str) -> Option<String>, name: &str, default: Duration) -> Result<Duration> {
    let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
    parse_or(var, name, default_ms).map(Duration::from_millis)
}

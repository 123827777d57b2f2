//! API credential rotation with per-key quota state.
//!
//! Each credential carries two independent limits:
//! - a hard cooldown, set when the provider rejects a call outright; the key
//!   is not handed out again until it expires;
//! - a soft search quota, a fixed-window counter of grounded (web-search)
//!   calls. A key without search quota left is still usable for plain calls.
//!
//! The rotation pointer moves when a top-level request picks its first key
//! ([`KeyPool::select_first`]), under the same lock as the selection, so
//! overlapping requests start on different keys. Retries inside a request
//! use [`KeyPool::select_credential`], which leaves the pointer alone.

use chrono::{DateTime, Duration, Utc};
use insight_core::Clock;
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone)]
pub struct KeyPoolSettings {
    /// Grounded calls allowed per credential per window
    pub search_quota_per_window: u32,
    pub search_window: std::time::Duration,
    pub hard_cooldown: std::time::Duration,
}

impl Default for KeyPoolSettings {
    fn default() -> Self {
        Self {
            search_quota_per_window: 2,
            search_window: std::time::Duration::from_secs(60),
            hard_cooldown: std::time::Duration::from_secs(150),
        }
    }
}

fn to_chrono(d: std::time::Duration) -> Duration {
    Duration::from_std(d).unwrap_or(Duration::MAX)
}

/// Fixed-window counter: `limit` units per `window`, starting with the first
/// unit taken after a reset.
#[derive(Debug, Clone)]
pub struct QuotaWindow {
    limit: u32,
    window: Duration,
    used: u32,
    resets_at: Option<DateTime<Utc>>,
}

impl QuotaWindow {
    pub fn new(limit: u32, window: std::time::Duration) -> Self {
        Self {
            limit,
            window: to_chrono(window),
            used: 0,
            resets_at: None,
        }
    }

    fn roll(&mut self, now: DateTime<Utc>) {
        if let Some(reset) = self.resets_at {
            if now >= reset {
                self.used = 0;
                self.resets_at = None;
            }
        }
    }

    pub fn remaining(&mut self, now: DateTime<Utc>) -> u32 {
        self.roll(now);
        self.limit.saturating_sub(self.used)
    }

    /// Take one unit if any is left in the current window.
    pub fn try_acquire(&mut self, now: DateTime<Utc>) -> bool {
        self.roll(now);
        if self.used >= self.limit {
            return false;
        }
        if self.resets_at.is_none() {
            self.resets_at = now.checked_add_signed(self.window);
        }
        self.used += 1;
        true
    }

    /// Mark the rest of the current window as spent.
    pub fn exhaust(&mut self, now: DateTime<Utc>) {
        self.roll(now);
        if self.resets_at.is_none() {
            self.resets_at = now.checked_add_signed(self.window);
        }
        self.used = self.limit;
    }

    pub fn used(&self) -> u32 {
        self.used
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialStatus {
    Available,
    /// Search quota spent for this window; plain calls still allowed
    SoftExhausted,
    HardCooldown,
}

/// A credential handed out by the pool.
#[derive(Clone)]
pub struct Credential {
    index: usize,
    key: String,
}

impl Credential {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn masked(&self) -> String {
        mask_key(&self.key)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("index", &self.index)
            .field("key", &self.masked())
            .finish()
    }
}

fn mask_key(key: &str) -> String {
    let tail: String = key
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("****{}", tail)
}

/// Observability view of one credential
#[derive(Debug, Clone, Serialize)]
pub struct CredentialReport {
    pub index: usize,
    pub key: String,
    pub status: CredentialStatus,
    pub search_used: u32,
    pub search_limit: u32,
    pub cooldown_remaining_secs: i64,
}

struct Slot {
    key: String,
    cooldown_until: Option<DateTime<Utc>>,
    search: QuotaWindow,
}

impl Slot {
    fn in_cooldown(&mut self, now: DateTime<Utc>) -> bool {
        match self.cooldown_until {
            Some(until) if now < until => true,
            Some(_) => {
                self.cooldown_until = None;
                false
            }
            None => false,
        }
    }

    fn status(&mut self, now: DateTime<Utc>) -> CredentialStatus {
        if self.in_cooldown(now) {
            CredentialStatus::HardCooldown
        } else if self.search.remaining(now) == 0 {
            CredentialStatus::SoftExhausted
        } else {
            CredentialStatus::Available
        }
    }
}

struct PoolState {
    slots: Vec<Slot>,
    next: usize,
}

pub struct KeyPool {
    state: Mutex<PoolState>,
    settings: KeyPoolSettings,
    clock: Arc<dyn Clock>,
}

impl KeyPool {
    pub fn new(keys: Vec<String>, settings: KeyPoolSettings, clock: Arc<dyn Clock>) -> Self {
        let slots = keys
            .into_iter()
            .map(|key| Slot {
                key,
                cooldown_until: None,
                search: QuotaWindow::new(settings.search_quota_per_window, settings.search_window),
            })
            .collect();

        Self {
            state: Mutex::new(PoolState { slots, next: 0 }),
            settings,
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn settings(&self) -> &KeyPoolSettings {
        &self.settings
    }

    /// Pick the credential for the next call.
    ///
    /// Scans from the rotation pointer. With `prefer_search_capable`, the
    /// first key that is out of cooldown and still has search quota wins;
    /// failing that, the first key out of cooldown. `None` means every key
    /// is in hard cooldown.
    pub fn select_credential(&self, prefer_search_capable: bool) -> Option<Credential> {
        let now = self.clock.now();
        let mut guard = self.lock();
        let state = &mut *guard;
        let index = Self::pick(state, now, prefer_search_capable)?;
        Some(Credential {
            index,
            key: state.slots[index].key.clone(),
        })
    }

    /// Like [`select_credential`](Self::select_credential), and moves the
    /// rotation pointer past the chosen key before releasing the lock.
    pub fn select_first(&self, prefer_search_capable: bool) -> Option<Credential> {
        let now = self.clock.now();
        let mut guard = self.lock();
        let state = &mut *guard;
        let index = Self::pick(state, now, prefer_search_capable)?;
        state.next = (index + 1) % state.slots.len();
        Some(Credential {
            index,
            key: state.slots[index].key.clone(),
        })
    }

    fn pick(state: &mut PoolState, now: DateTime<Utc>, prefer_search_capable: bool) -> Option<usize> {
        let n = state.slots.len();
        if n == 0 {
            return None;
        }
        let start = state.next % n;

        if prefer_search_capable {
            for offset in 0..n {
                let i = (start + offset) % n;
                let slot = &mut state.slots[i];
                if !slot.in_cooldown(now) && slot.search.remaining(now) > 0 {
                    return Some(i);
                }
            }
        }

        for offset in 0..n {
            let i = (start + offset) % n;
            if !state.slots[i].in_cooldown(now) {
                return Some(i);
            }
        }
        None
    }

    /// Reserve one grounded call. Returns `false`, taking nothing, when the
    /// key's search quota for this window is already spent.
    pub fn try_consume_search(&self, index: usize) -> bool {
        let now = self.clock.now();
        let mut state = self.lock();
        match state.slots.get_mut(index) {
            Some(slot) => slot.search.try_acquire(now),
            None => false,
        }
    }

    pub fn mark_search_exhausted(&self, index: usize) {
        let now = self.clock.now();
        let mut state = self.lock();
        if let Some(slot) = state.slots.get_mut(index) {
            slot.search.exhaust(now);
            tracing::warn!(
                credential = %mask_key(&slot.key),
                "search quota exhausted for this window, degrading to plain generation"
            );
        }
    }

    /// Put a key into hard cooldown. Returns when it becomes usable again.
    pub fn cool_down(&self, index: usize) -> Option<DateTime<Utc>> {
        let now = self.clock.now();
        let until = now
            .checked_add_signed(to_chrono(self.settings.hard_cooldown))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let mut state = self.lock();
        let slot = state.slots.get_mut(index)?;
        slot.cooldown_until = Some(until);
        tracing::warn!(
            credential = %mask_key(&slot.key),
            cooldown_secs = self.settings.hard_cooldown.as_secs(),
            "credential entering hard cooldown"
        );
        Some(until)
    }

    pub fn status(&self, index: usize) -> Option<CredentialStatus> {
        let now = self.clock.now();
        let mut state = self.lock();
        state.slots.get_mut(index).map(|slot| slot.status(now))
    }

    /// Keys that are not in hard cooldown right now.
    pub fn available_count(&self) -> usize {
        let now = self.clock.now();
        let mut state = self.lock();
        state.slots.iter_mut().map(|s| s.in_cooldown(now)).filter(|cooling| !cooling).count()
    }

    pub fn snapshot(&self) -> Vec<CredentialReport> {
        let now = self.clock.now();
        let mut state = self.lock();
        state
            .slots
            .iter_mut()
            .enumerate()
            .map(|(index, slot)| {
                let status = slot.status(now);
                let cooldown_remaining_secs = slot
                    .cooldown_until
                    .map(|until| (until - now).num_seconds().max(0))
                    .unwrap_or(0);
                CredentialReport {
                    index,
                    key: mask_key(&slot.key),
                    status,
                    search_used: slot.search.used(),
                    search_limit: slot.search.limit(),
                    cooldown_remaining_secs,
                }
            })
            .collect()
    }
}

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use datapilot_core::config::CacheConfig;
use datapilot_core::ToolResult;

#[derive(Clone, Debug)]
struct CacheEntry {
    value: ToolResult,
    created_at: Instant,
    last_used: u64,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    clock: u64,
}

impl CacheState {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn evict_lru(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_used)
            .map(|(key, _)| key.clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }
}

/// TTL cache of successful query results keyed by normalized SQL text.
///
/// Expiry is checked on read. When full, the least recently used entry is
/// dropped to make room. Entries are written whole under the lock, so a
/// reader never observes a partial value.
pub struct QueryCache {
    ttl: Duration,
    max_entries: usize,
    state: Mutex<CacheState>,
}

impl QueryCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self { ttl, max_entries: max_entries.max(1), state: Mutex::new(CacheState::default()) }
    }

    pub fn from_config(config: &CacheConfig) -> Option<Self> {
        config.enabled.then(|| Self::new(config.ttl(), config.max_entries))
    }

    pub async fn get(&self, key: &str) -> Option<ToolResult> {
        let mut state = self.state.lock().await;
        let expired = state
            .entries
            .get(key)
            .map(|entry| entry.created_at.elapsed() >= self.ttl)?;
        if expired {
            state.entries.remove(key);
            return None;
        }

        let tick = state.tick();
        let entry = state.entries.get_mut(key)?;
        entry.last_used = tick;
        Some(entry.value.clone())
    }

    pub async fn set(&self, key: impl Into<String>, value: ToolResult) {
        let key = key.into();
        let mut state = self.state.lock().await;
        if !state.entries.contains_key(&key) && state.entries.len() >= self.max_entries {
            state.evict_lru();
        }

        let last_used = state.tick();
        state.entries.insert(key, CacheEntry { value, created_at: Instant::now(), last_used });
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn clear(&self) {
        self.state.lock().await.entries.clear();
    }
}

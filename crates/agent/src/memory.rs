use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use tokio::sync::RwLock;

use datapilot_core::config::MemoryConfig;
use datapilot_core::{ApplicationError, Exchange, SessionMemory};

/// Session-keyed conversation memory with a per-thread writer lease.
pub struct SessionStore {
    enabled: bool,
    max_history: usize,
    sessions: RwLock<HashMap<String, SessionMemory>>,
    active: Arc<StdMutex<HashSet<String>>>,
}

/// Exclusive right to run a turn for one thread id. Released on drop.
#[derive(Debug)]
pub struct ThreadLease {
    thread_id: String,
    active: Arc<StdMutex<HashSet<String>>>,
}

impl ThreadLease {
    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }
}

impl Drop for ThreadLease {
    fn drop(&mut self) {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        active.remove(&self.thread_id);
    }
}

impl SessionStore {
    pub fn new(enabled: bool, max_history: usize) -> Self {
        Self {
            enabled,
            max_history: max_history.max(1),
            sessions: RwLock::new(HashMap::new()),
            active: Arc::new(StdMutex::new(HashSet::new())),
        }
    }

    pub fn from_config(config: &MemoryConfig) -> Self {
        Self::new(config.enabled, config.max_history)
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn max_history(&self) -> usize {
        self.max_history
    }

    /// Claims the single-writer lease for `thread_id`.
    ///
    /// The lease set is a plain mutex held only for the insert, never across
    /// an await.
    pub fn acquire(&self, thread_id: &str) -> Result<ThreadLease, ApplicationError> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if !active.insert(thread_id.to_string()) {
            return Err(ApplicationError::ThreadBusy { thread_id: thread_id.to_string() });
        }
        Ok(ThreadLease { thread_id: thread_id.to_string(), active: Arc::clone(&self.active) })
    }

    pub async fn history(&self, thread_id: &str) -> Option<SessionMemory> {
        if !self.enabled {
            return None;
        }
        self.sessions.read().await.get(thread_id).cloned()
    }

    /// Appends a completed exchange. Requires the thread's lease so writes
    /// for one thread id are never concurrent.
    pub async fn record(&self, lease: &ThreadLease, exchange: Exchange) {
        if !self.enabled {
            return;
        }
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(lease.thread_id.clone())
            .or_insert_with(|| SessionMemory::new(lease.thread_id.clone()))
            .push(exchange, self.max_history);
    }

    pub async fn clear(&self, thread_id: &str) -> bool {
        self.sessions.write().await.remove(thread_id).is_some()
    }

    pub async fn checkpoint(&self, thread_id: &str) -> Option<SessionMemory> {
        self.sessions.read().await.get(thread_id).cloned()
    }

    /// Installs a previously checkpointed session, trimmed to this store's limit.
    pub async fn restore(&self, mut memory: SessionMemory) {
        if !self.enabled {
            return;
        }
        memory.trim(self.max_history);
        self.sessions.write().await.insert(memory.thread_id.clone(), memory);
    }
}

#[cfg(test)]
mod tests {
    use datapilot_core::{ApplicationError, Exchange, SessionMemory};

    use super::SessionStore;

    #[tokio::test]
    async fn history_keeps_most_recent_pairs() {
        let store = SessionStore::new(true, 3);
        let lease = store.acquire("t-1").expect("lease");

        for turn in 0..5 {
            store.record(&lease, Exchange::new(format!("q{turn}"), format!("a{turn}"))).await;
        }

        let history = store.history("t-1").await.expect("history");
        let questions = history.exchanges.iter().map(|e| e.question.as_str()).collect::<Vec<_>>();
        assert_eq!(questions, vec!["q2", "q3", "q4"]);
    }

    #[tokio::test]
    async fn lease_is_exclusive_until_dropped() {
        let store = SessionStore::new(true, 3);

        let lease = store.acquire("t-1").expect("first lease");
        let busy = store.acquire("t-1");
        let other = store.acquire("t-2");

        assert!(matches!(
            busy,
            Err(ApplicationError::ThreadBusy { ref thread_id }) if thread_id == "t-1"
        ));
        assert!(other.is_ok());

        drop(lease);
        assert!(store.acquire("t-1").is_ok());
    }

    #[tokio::test]
    async fn disabled_store_records_nothing() {
        let store = SessionStore::new(false, 3);
        let lease = store.acquire("t-1").expect("lease");

        store.record(&lease, Exchange::new("q", "a")).await;

        assert!(store.history("t-1").await.is_none());
        assert!(store.checkpoint("t-1").await.is_none());
    }

    #[tokio::test]
    async fn checkpoint_restore_and_clear() {
        let source = SessionStore::new(true, 5);
        let lease = source.acquire("t-9").expect("lease");
        for turn in 0..4 {
            source.record(&lease, Exchange::new(format!("q{turn}"), "a")).await;
        }
        let checkpoint = source.checkpoint("t-9").await.expect("checkpoint");

        let target = SessionStore::new(true, 2);
        target.restore(checkpoint).await;
        let restored = target.history("t-9").await.expect("restored");

        assert_eq!(restored.len(), 2);
        assert_eq!(restored.exchanges.back().map(|e| e.question.as_str()), Some("q3"));
        assert!(target.clear("t-9").await);
        assert!(!target.clear("t-9").await);
        target.restore(SessionMemory::new("t-empty")).await;
        assert!(target.history("t-empty").await.is_some_and(|memory| memory.is_empty()));
    }
}

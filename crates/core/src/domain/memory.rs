use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One completed question/answer pair.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exchange {
    pub question: String,
    pub answer: String,
    pub recorded_at: DateTime<Utc>,
}

impl Exchange {
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self { question: question.into(), answer: answer.into(), recorded_at: Utc::now() }
    }
}

/// Trimmed conversation history for one thread id. Also the checkpoint
/// format used to resume a session in another process.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMemory {
    pub thread_id: String,
    pub exchanges: VecDeque<Exchange>,
    pub updated_at: DateTime<Utc>,
}

impl SessionMemory {
    pub fn new(thread_id: impl Into<String>) -> Self {
        Self { thread_id: thread_id.into(), exchanges: VecDeque::new(), updated_at: Utc::now() }
    }

    /// Appends `exchange`, evicting the oldest pairs beyond `max_len`.
    pub fn push(&mut self, exchange: Exchange, max_len: usize) {
        self.updated_at = exchange.recorded_at;
        self.exchanges.push_back(exchange);
        self.trim(max_len);
    }

    pub fn trim(&mut self, max_len: usize) {
        while self.exchanges.len() > max_len {
            self.exchanges.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.exchanges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exchanges.is_empty()
    }
}

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use datapilot_core::config::AppConfig;
use datapilot_core::{
    ApplicationError, Exchange, InterfaceError, QueryBackend, SchemaSnapshot, SessionMemory,
};

use crate::cache::QueryCache;
use crate::llm::{LlmClient, ModelRequest};
use crate::memory::{SessionStore, ThreadLease};
use crate::prompt::{history_messages, system_prompt};
use crate::rate_limit::RateLimiter;
use crate::state::{ConversationState, Termination, TurnBudget};
use crate::stream::{answer_chunks, AnswerChunk, TurnStream};
use crate::tools::{SqlSettings, ToolArtifact, ToolDependencies, ToolRegistry};

/// Rate-limit key for callers that do not supply a thread id.
pub const ANONYMOUS_CALLER: &str = "anonymous";

const STREAM_CAPACITY: usize = 32;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TurnOutcome {
    pub answer: String,
    pub termination: Termination,
    pub iterations: u32,
    pub artifacts: Vec<ToolArtifact>,
    pub correlation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
}

/// Caller-facing entry point. Cheap to clone; clones share the tool
/// registry, cache, rate limiter and session store.
#[derive(Clone)]
pub struct AgentRuntime {
    inner: Arc<RuntimeInner>,
}

struct RuntimeInner {
    llm: Arc<dyn LlmClient>,
    registry: ToolRegistry,
    schema: Arc<SchemaSnapshot>,
    system_prompt: String,
    budget: TurnBudget,
    sessions: SessionStore,
    rate_limiter: Option<RateLimiter>,
}

impl AgentRuntime {
    /// Freezes the relevant parts of `config` and binds the tool registry to
    /// `backend` and `schema`.
    pub fn new(
        config: &AppConfig,
        llm: Arc<dyn LlmClient>,
        backend: Arc<dyn QueryBackend>,
        schema: Arc<SchemaSnapshot>,
    ) -> Self {
        let cache = QueryCache::from_config(&config.cache).map(Arc::new);
        let sql = SqlSettings::from_config(&config.agent);
        let dependencies = ToolDependencies { backend, schema: Arc::clone(&schema), cache, sql };
        let registry = ToolRegistry::build(&dependencies, config.features.visualization);
        let system_prompt = system_prompt(&schema, &registry.names(), sql.max_rows);

        Self {
            inner: Arc::new(RuntimeInner {
                llm,
                registry,
                schema,
                system_prompt,
                budget: TurnBudget {
                    max_iterations: config.agent.max_iterations,
                    max_duration: config.agent.max_execution_time(),
                },
                sessions: SessionStore::from_config(&config.memory),
                rate_limiter: RateLimiter::from_config(&config.rate_limit),
            }),
        }
    }

    pub fn schema(&self) -> &SchemaSnapshot {
        &self.inner.schema
    }

    pub fn tool_names(&self) -> Vec<&'static str> {
        self.inner.registry.names()
    }

    pub async fn query(&self, question: &str) -> Result<String, InterfaceError> {
        self.run_turn(question, None).await.map(|outcome| outcome.answer)
    }

    pub async fn run_turn(
        &self,
        question: &str,
        thread_id: Option<&str>,
    ) -> Result<TurnOutcome, InterfaceError> {
        self.execute_turn(question, thread_id, None).await
    }

    /// Runs the turn on a background task and streams progress, answer and
    /// error chunks. The stream always ends with exactly one final chunk.
    pub fn stream_query(
        &self,
        question: impl Into<String>,
        thread_id: Option<String>,
    ) -> TurnStream {
        let (sender, stream) = TurnStream::channel(STREAM_CAPACITY);
        let runtime = self.clone();
        let question = question.into();

        tokio::spawn(async move {
            let outcome =
                runtime.execute_turn(&question, thread_id.as_deref(), Some(&sender)).await;
            let chunks = match outcome {
                Ok(outcome) => answer_chunks(&outcome.answer),
                Err(error) => vec![AnswerChunk::error(error.user_message())],
            };
            for chunk in chunks {
                if sender.send(chunk).await.is_err() {
                    break;
                }
            }
        });

        stream
    }

    pub async fn clear_history(&self, thread_id: &str) -> bool {
        let cleared = self.inner.sessions.clear(thread_id).await;
        tracing::info!(event_name = "agent.memory.cleared", thread_id, cleared, "history cleared");
        cleared
    }

    pub async fn checkpoint(&self, thread_id: &str) -> Option<SessionMemory> {
        self.inner.sessions.checkpoint(thread_id).await
    }

    pub async fn restore(&self, memory: SessionMemory) {
        self.inner.sessions.restore(memory).await;
    }

    async fn execute_turn(
        &self,
        question: &str,
        thread_id: Option<&str>,
        progress: Option<&mpsc::Sender<AnswerChunk>>,
    ) -> Result<TurnOutcome, InterfaceError> {
        let correlation_id = Uuid::new_v4().to_string();
        let question = question.trim();
        if question.is_empty() {
            return Err(InterfaceError::BadRequest {
                message: "question must not be empty".to_string(),
                correlation_id,
            });
        }

        // Lease first so a busy thread never spends a rate-limit slot.
        let lease = match thread_id {
            Some(thread_id) => Some(
                self.inner
                    .sessions
                    .acquire(thread_id)
                    .map_err(|error| error.into_interface(correlation_id.clone()))?,
            ),
            None => None,
        };

        let caller = thread_id.unwrap_or(ANONYMOUS_CALLER);
        if let Some(limiter) = &self.inner.rate_limiter {
            let decision = limiter.check(caller).await;
            if !decision.allowed {
                return Err(ApplicationError::RateLimited {
                    retry_after_secs: decision.retry_after_secs(),
                }
                .into_interface(correlation_id));
            }
        }

        tracing::info!(
            event_name = "agent.turn.started",
            correlation_id = %correlation_id,
            thread_id = caller,
            "turn started"
        );

        let history = match thread_id {
            Some(thread_id) => self
                .inner
                .sessions
                .history(thread_id)
                .await
                .map(|memory| history_messages(&memory))
                .unwrap_or_default(),
            None => Vec::new(),
        };

        let mut state = ConversationState::new(question, history, self.inner.budget);
        let declarations = self.inner.registry.declarations();

        let (answer, termination) = loop {
            if let Err(termination) = state.begin_model_call() {
                tracing::warn!(
                    event_name = "agent.turn.budget_exhausted",
                    correlation_id = %correlation_id,
                    thread_id = caller,
                    iterations = state.iterations(),
                    elapsed_ms = u64::try_from(state.elapsed().as_millis()).unwrap_or(u64::MAX),
                    termination = ?termination,
                    "turn budget exhausted, returning best-effort answer"
                );
                break (state.best_effort_answer(), termination);
            }

            tracing::debug!(
                event_name = "agent.turn.model_call",
                correlation_id = %correlation_id,
                iteration = state.iterations(),
                "calling language model"
            );
            let request = ModelRequest {
                system_prompt: self.inner.system_prompt.clone(),
                messages: state.messages().to_vec(),
                tools: declarations.clone(),
            };
            let response = self.inner.llm.complete(&request).await.map_err(|error| {
                tracing::error!(
                    event_name = "agent.turn.model_failed",
                    correlation_id = %correlation_id,
                    error = %error,
                    "language model call failed"
                );
                ApplicationError::Model(error.to_string()).into_interface(correlation_id.clone())
            })?;

            if let Some(answer) = state.record_response(response) {
                state.finish();
                let answer =
                    if answer.is_empty() { state.best_effort_answer() } else { answer };
                break (answer, Termination::Answered);
            }

            for call in state.pending_calls() {
                let call = state.complete_arguments(&call);
                tracing::info!(
                    event_name = "agent.tool.dispatched",
                    correlation_id = %correlation_id,
                    tool = %call.name,
                    call_id = %call.id,
                    "dispatching tool call"
                );
                if let Some(sender) = progress {
                    let chunk = AnswerChunk::progress(format!("Running {}", call.name));
                    let _ = sender.send(chunk).await;
                }
                let output = self.inner.registry.dispatch(&call).await;
                state.record_tool_output(&call, output);
            }
        };

        self.remember(lease.as_ref(), question, &answer).await;

        tracing::info!(
            event_name = "agent.turn.completed",
            correlation_id = %correlation_id,
            thread_id = caller,
            iterations = state.iterations(),
            termination = ?termination,
            "turn completed"
        );

        Ok(TurnOutcome {
            answer,
            termination,
            iterations: state.iterations(),
            artifacts: state.take_artifacts(),
            correlation_id,
            thread_id: thread_id.map(str::to_string),
        })
    }

    async fn remember(&self, lease: Option<&ThreadLease>, question: &str, answer: &str) {
        if let Some(lease) = lease {
            self.inner.sessions.record(lease, Exchange::new(question, answer)).await;
        }
    }
}

//! Agent runtime - the bounded reasoning loop behind every question.
//!
//! A turn alternates between the language model and the tool registry:
//! 1. **Model call** (`llm`) - the model sees the schema-aware system prompt,
//!    the thread history and the turn's messages so far.
//! 2. **Tool dispatch** (`tools`) - requested tools run in order and their
//!    results are appended to the conversation.
//! 3. **Answer** - the first response without tool calls ends the turn.
//!
//! Budgets (`state`) cap model calls and wall-clock time; when either runs
//! out the caller still gets a best-effort answer.
//!
//! # Key Types
//!
//! - `AgentRuntime` - caller-facing entry point (see `runtime`)
//! - `LlmClient` - pluggable model transport
//! - `ToolRegistry` - name-indexed tools handed to the model
//!
//! # Safety Principle
//!
//! The model only ever proposes SQL. Every statement passes the read-only
//! guard before it reaches the database, and rejections go back to the
//! model as ordinary tool errors.

pub mod cache;
pub mod llm;
pub mod memory;
pub mod prompt;
pub mod rate_limit;
pub mod runtime;
pub mod state;
pub mod stream;
pub mod tools;

pub use cache::QueryCache;
pub use llm::{
    LlmClient, LlmError, ModelRequest, ModelResponse, OpenAiCompatibleClient, ToolDeclaration,
};
pub use memory::{SessionStore, ThreadLease};
pub use rate_limit::{RateDecision, RateLimiter};
pub use runtime::{AgentRuntime, TurnOutcome, ANONYMOUS_CALLER};
pub use state::{ConversationState, Termination, TurnBudget, TurnPhase};
pub use stream::{AnswerChunk, ChunkKind, TurnStream};
pub use tools::{
    Tool, ToolArtifact, ToolDependencies, ToolError, ToolOutput, ToolRegistry, BASE_TOOLS,
    VISUALIZATION_TOOL,
};

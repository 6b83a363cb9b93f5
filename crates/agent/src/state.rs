use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;

use datapilot_core::{Message, ToolCall, ToolResult};

use crate::llm::ModelResponse;
use crate::tools::{ToolArtifact, ToolOutput};

const CONTEXT_QUESTION: &str = "question";
const CONTEXT_LAST_RESULT: &str = "last_sql_result";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TurnPhase {
    Start,
    ModelCall,
    ToolDispatch,
    AnswerReady,
    End,
}

impl TurnPhase {
    /// Legal edges of the turn state machine. `ModelCall -> End` is the
    /// budget guard edge.
    pub fn can_transition(self, next: TurnPhase) -> bool {
        matches!(
            (self, next),
            (Self::Start, Self::ModelCall)
                | (Self::Start, Self::End)
                | (Self::ModelCall, Self::ToolDispatch)
                | (Self::ModelCall, Self::AnswerReady)
                | (Self::ModelCall, Self::End)
                | (Self::ToolDispatch, Self::ModelCall)
                | (Self::ToolDispatch, Self::End)
                | (Self::AnswerReady, Self::End)
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    Answered,
    IterationBudget,
    TimeBudget,
}

impl Termination {
    pub fn is_budget(self) -> bool {
        !matches!(self, Self::Answered)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TurnBudget {
    pub max_iterations: u32,
    pub max_duration: Duration,
}

/// Working state of one turn, exclusively owned by the running turn.
///
/// Messages are append-only. `iterations` counts model calls and never
/// exceeds the budget: [`ConversationState::begin_model_call`] refuses the
/// call that would.
#[derive(Debug)]
pub struct ConversationState {
    messages: Vec<Message>,
    turn_start: usize,
    iterations: u32,
    started_at: Instant,
    budget: TurnBudget,
    phase: TurnPhase,
    context: HashMap<String, Value>,
    last_success: Option<ToolResult>,
    artifacts: Vec<ToolArtifact>,
}

impl ConversationState {
    pub fn new(question: &str, history: Vec<Message>, budget: TurnBudget) -> Self {
        let mut messages = history;
        let turn_start = messages.len();
        messages.push(Message::user(question));
        let mut context = HashMap::new();
        context.insert(CONTEXT_QUESTION.to_string(), Value::String(question.to_string()));

        Self {
            messages,
            turn_start,
            iterations: 0,
            started_at: Instant::now(),
            budget,
            phase: TurnPhase::Start,
            context,
            last_success: None,
            artifacts: Vec::new(),
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn context(&self, key: &str) -> Option<&Value> {
        self.context.get(key)
    }

    pub fn set_context(&mut self, key: impl Into<String>, value: Value) {
        self.context.insert(key.into(), value);
    }

    pub fn take_artifacts(&mut self) -> Vec<ToolArtifact> {
        std::mem::take(&mut self.artifacts)
    }

    /// Budget guard in front of every model call.
    pub fn begin_model_call(&mut self) -> Result<(), Termination> {
        if self.iterations >= self.budget.max_iterations {
            self.advance(TurnPhase::End);
            return Err(Termination::IterationBudget);
        }
        if self.elapsed() >= self.budget.max_duration {
            self.advance(TurnPhase::End);
            return Err(Termination::TimeBudget);
        }

        self.iterations += 1;
        self.advance(TurnPhase::ModelCall);
        Ok(())
    }

    /// Applies a model response. Returns the final answer when the response
    /// carries no tool calls.
    pub fn record_response(&mut self, response: ModelResponse) -> Option<String> {
        if response.tool_calls.is_empty() {
            let answer = response.content.trim().to_string();
            self.messages.push(Message::assistant(answer.clone(), Vec::new()));
            self.advance(TurnPhase::AnswerReady);
            return Some(answer);
        }

        self.messages.push(Message::assistant(response.content, response.tool_calls));
        self.advance(TurnPhase::ToolDispatch);
        None
    }

    /// Tool calls of the latest assistant message, in the order requested.
    pub fn pending_calls(&self) -> Vec<ToolCall> {
        self.messages.last().map(|message| message.tool_calls.clone()).unwrap_or_default()
    }

    /// Fills arguments the model may omit from scratch context: the latest
    /// SQL result and the turn's question for `analyze_results`.
    pub fn complete_arguments(&self, call: &ToolCall) -> ToolCall {
        let mut call = call.clone();
        if call.name != "analyze_results" {
            return call;
        }
        let Value::Object(arguments) = &mut call.arguments else {
            return call;
        };

        let fills = [("result_text", CONTEXT_LAST_RESULT), ("question", CONTEXT_QUESTION)];
        for (argument, context_key) in fills {
            let missing = arguments.get(argument).map_or(true, Value::is_null);
            if missing {
                if let Some(value) = self.context.get(context_key) {
                    arguments.insert(argument.to_string(), value.clone());
                }
            }
        }
        call
    }

    pub fn record_tool_output(&mut self, call: &ToolCall, output: ToolOutput) {
        let (text, artifact) = output.into_parts();
        if let Some(ToolArtifact::QueryResult { result, .. }) = &artifact {
            if result.is_success() {
                self.context.insert(CONTEXT_LAST_RESULT.to_string(), Value::String(text.clone()));
                self.last_success = Some(result.clone());
            }
        }
        if let Some(artifact) = artifact {
            self.artifacts.push(artifact);
        }
        self.messages.push(Message::tool_result(call, text));
    }

    pub fn finish(&mut self) {
        self.advance(TurnPhase::End);
    }

    /// Answer used when a budget ends the turn early. Never empty.
    pub fn best_effort_answer(&self) -> String {
        let last_assistant = self.messages[self.turn_start..]
            .iter()
            .rev()
            .filter(|message| message.role == datapilot_core::Role::Assistant)
            .map(|message| message.content.trim())
            .find(|content| !content.is_empty());
        if let Some(content) = last_assistant {
            return content.to_string();
        }

        match &self.last_success {
            Some(result) => format!(
                "I ran out of steps before finishing the analysis. {}",
                summarize(result)
            ),
            None => format!(
                "I could not complete the analysis within {} steps. Please narrow the question \
                 or ask about a specific table.",
                self.iterations
            ),
        }
    }

    fn advance(&mut self, next: TurnPhase) {
        debug_assert!(
            self.phase == next || self.phase.can_transition(next),
            "illegal transition {:?} -> {next:?}",
            self.phase
        );
        self.phase = next;
    }
}

fn summarize(result: &ToolResult) -> String {
    match result {
        ToolResult::Success { columns, row_count, .. } => match result.scalar() {
            Some(value) if *row_count == 1 && columns.len() == 1 => {
                format!("The latest query returned {}: {}.", columns[0], plain(value))
            }
            _ => format!(
                "The latest query returned {row_count} rows with columns {}.",
                columns.join(", ")
            ),
        },
        ToolResult::Error { message, .. } => format!("The latest query failed: {message}."),
    }
}

fn plain(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use datapilot_core::{ToolCall, ToolResult};
    use serde_json::json;

    use super::{ConversationState, Termination, TurnBudget, TurnPhase};
    use crate::llm::ModelResponse;
    use crate::tools::{ToolArtifact, ToolOutput};

    fn budget(max_iterations: u32) -> TurnBudget {
        TurnBudget { max_iterations, max_duration: Duration::from_secs(30) }
    }

    fn sql_output(value: i64) -> ToolOutput {
        let result = ToolResult::success(vec!["n".to_string()], vec![vec![json!(value)]], false);
        ToolOutput::WithArtifact {
            text: result.to_text(),
            artifact: ToolArtifact::QueryResult { sql: "SELECT 1".to_string(), result },
        }
    }

    #[test]
    fn transitions_follow_the_turn_graph() {
        assert!(TurnPhase::Start.can_transition(TurnPhase::ModelCall));
        assert!(TurnPhase::ModelCall.can_transition(TurnPhase::End));
        assert!(TurnPhase::ToolDispatch.can_transition(TurnPhase::ModelCall));
        assert!(!TurnPhase::AnswerReady.can_transition(TurnPhase::ModelCall));
        assert!(!TurnPhase::End.can_transition(TurnPhase::Start));
    }

    #[test]
    fn iteration_budget_is_never_exceeded() {
        let mut state = ConversationState::new("q", Vec::new(), budget(2));

        assert!(state.begin_model_call().is_ok());
        state.record_response(ModelResponse::tool_calls(vec![ToolCall::new("c1", "x", json!({}))]));
        assert!(state.begin_model_call().is_ok());
        state.record_response(ModelResponse::tool_calls(vec![ToolCall::new("c2", "x", json!({}))]));

        assert_eq!(state.begin_model_call(), Err(Termination::IterationBudget));
        assert_eq!(state.iterations(), 2);
        assert_eq!(state.phase(), TurnPhase::End);
    }

    #[tokio::test(start_paused = true)]
    async fn time_budget_is_checked_before_model_calls() {
        let mut state = ConversationState::new(
            "q",
            Vec::new(),
            TurnBudget { max_iterations: 10, max_duration: Duration::from_secs(5) },
        );
        assert!(state.begin_model_call().is_ok());
        state.record_response(ModelResponse::tool_calls(vec![ToolCall::new("c1", "x", json!({}))]));

        tokio::time::advance(Duration::from_secs(5)).await;

        assert_eq!(state.begin_model_call(), Err(Termination::TimeBudget));
    }

    #[test]
    fn final_answer_is_trimmed_and_appended() {
        let mut state = ConversationState::new("q", Vec::new(), budget(3));
        state.begin_model_call().expect("budget");

        let answer = state.record_response(ModelResponse::text("  There are 20 scenarios. "));

        assert_eq!(answer.as_deref(), Some("There are 20 scenarios."));
        assert_eq!(state.messages().len(), 2);
        assert_eq!(state.phase(), TurnPhase::AnswerReady);
    }

    #[test]
    fn analysis_arguments_are_filled_from_context() {
        let mut state = ConversationState::new("How many scenarios?", Vec::new(), budget(3));
        let sql_call = ToolCall::new("c1", "execute_sql", json!({ "query": "SELECT 1" }));
        state.record_tool_output(&sql_call, sql_output(20));

        let filled = state.complete_arguments(&ToolCall::new("c2", "analyze_results", json!({})));
        let untouched = state.complete_arguments(&sql_call);

        assert_eq!(filled.arguments["question"], "How many scenarios?");
        assert!(filled.arguments["result_text"].as_str().is_some_and(|text| text.contains("20")));
        assert_eq!(untouched, sql_call);
    }

    #[test]
    fn best_effort_answer_falls_back_to_last_result() {
        let mut state = ConversationState::new("q", Vec::new(), budget(1));
        state.begin_model_call().expect("budget");
        let call = ToolCall::new("c1", "execute_sql", json!({ "query": "SELECT 1" }));
        state.record_response(ModelResponse::tool_calls(vec![call.clone()]));
        state.record_tool_output(&call, sql_output(20));

        let answer = state.best_effort_answer();

        assert!(answer.contains("n: 20"), "{answer}");
        assert_eq!(state.take_artifacts().len(), 1);
    }

    #[test]
    fn best_effort_answer_ignores_previous_turns() {
        let history = vec![
            datapilot_core::Message::user("earlier"),
            datapilot_core::Message::assistant("earlier answer", Vec::new()),
        ];
        let state = ConversationState::new("q", history, budget(1));

        assert_ne!(state.best_effort_answer(), "earlier answer");
    }

    #[test]
    fn best_effort_answer_is_never_empty() {
        let state = ConversationState::new("q", Vec::new(), budget(1));

        assert!(!state.best_effort_answer().is_empty());
    }
}

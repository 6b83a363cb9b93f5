use std::sync::Arc;

use datapilot_agent::{AgentRuntime, ChunkKind, LlmClient, OpenAiCompatibleClient, TurnOutcome};
use datapilot_core::config::{AppConfig, LoadOptions};
use datapilot_core::InterfaceError;
use datapilot_db::{connect_read_only, load_snapshot, DbPool, SqliteQueryBackend};
use futures::StreamExt;
use serde_json::json;

use crate::commands::{prepare, CommandResult, Failure};
use crate::session;

#[derive(Clone, Debug, Default)]
pub struct AskArgs {
    pub question: String,
    pub thread: Option<String>,
    pub stream: bool,
}

pub fn run(options: LoadOptions, args: AskArgs) -> CommandResult {
    run_with(options, args, |config| {
        OpenAiCompatibleClient::from_config(&config.llm)
            .map(|client| Arc::new(client) as Arc<dyn LlmClient>)
            .map_err(|error| ("llm_client", format!("language model client: {error}"), 3u8))
    })
}

/// Same as [`run`] with the language model client supplied by `make_client`.
pub fn run_with(
    options: LoadOptions,
    args: AskArgs,
    make_client: impl FnOnce(&AppConfig) -> Result<Arc<dyn LlmClient>, Failure>,
) -> CommandResult {
    let (config, runtime) = match prepare("ask", options) {
        Ok(prepared) => prepared,
        Err(result) => return result,
    };

    let llm = match make_client(&config) {
        Ok(llm) => llm,
        Err(failure) => return CommandResult::from_failure("ask", failure),
    };

    runtime.block_on(async {
        let pool = match connect_read_only(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        {
            Ok(pool) => pool,
            Err(error) => {
                return CommandResult::failure("ask", "db_connectivity", error.to_string(), 4)
            }
        };

        let result = ask(&config, llm, &pool, &args).await;
        pool.close().await;
        result
    })
}

async fn ask(
    config: &AppConfig,
    llm: Arc<dyn LlmClient>,
    pool: &DbPool,
    args: &AskArgs,
) -> CommandResult {
    let schema = match load_snapshot(pool).await {
        Ok(schema) => Arc::new(schema),
        Err(error) => return CommandResult::failure("ask", "schema_load", error.to_string(), 4),
    };
    let backend = Arc::new(SqliteQueryBackend::new(pool.clone()));
    let agent = AgentRuntime::new(config, llm, backend, schema);

    let session_dir = &config.memory.session_dir;
    if let (Some(thread), true) = (args.thread.as_deref(), config.memory.enabled) {
        match session::load(session_dir, thread) {
            Ok(Some(memory)) => agent.restore(memory).await,
            Ok(None) => {}
            Err(error) => {
                return CommandResult::failure("ask", "session_restore", format!("{error:#}"), 6)
            }
        }
    }

    let result = if args.stream {
        stream_answer(&agent, args).await
    } else {
        match agent.run_turn(&args.question, args.thread.as_deref()).await {
            Ok(outcome) => outcome_result(&outcome),
            Err(error) => turn_failure(&error),
        }
    };

    if result.exit_code == 0 {
        if let (Some(thread), true) = (args.thread.as_deref(), config.memory.enabled) {
            if let Some(memory) = agent.checkpoint(thread).await {
                if let Err(error) = session::save(session_dir, &memory) {
                    return CommandResult::failure(
                        "ask",
                        "session_persist",
                        format!("{error:#}"),
                        6,
                    );
                }
            }
        }
    }
    result
}

async fn stream_answer(agent: &AgentRuntime, args: &AskArgs) -> CommandResult {
    let mut stream = agent.stream_query(args.question.clone(), args.thread.clone());
    let mut lines = Vec::new();
    let mut answer = String::new();
    let mut failure = None;

    while let Some(chunk) = stream.next().await {
        match chunk.kind {
            ChunkKind::Answer => answer.push_str(&chunk.text),
            ChunkKind::Error => failure = Some(chunk.text.clone()),
            ChunkKind::Progress => {}
        }
        lines.push(serde_json::to_string(&chunk).unwrap_or_default());
    }

    let result = match failure {
        Some(message) => CommandResult::failure("ask", "turn_failed", message, 6),
        None => CommandResult::success_with(
            "ask",
            answer,
            Some(json!({ "thread_id": args.thread, "streamed": true })),
        ),
    };
    result.with_preamble(&lines)
}

fn outcome_result(outcome: &TurnOutcome) -> CommandResult {
    CommandResult::success_with(
        "ask",
        outcome.answer.clone(),
        Some(json!({
            "termination": outcome.termination,
            "iterations": outcome.iterations,
            "correlation_id": outcome.correlation_id,
            "thread_id": outcome.thread_id,
            "artifacts": outcome.artifacts,
        })),
    )
}

fn turn_failure(error: &InterfaceError) -> CommandResult {
    let message = format!("{} (correlation id {})", error.user_message(), error.correlation_id());
    match error {
        InterfaceError::RateLimited { .. } => {
            CommandResult::failure("ask", "rate_limited", message, 7)
        }
        InterfaceError::BadRequest { .. } => {
            CommandResult::failure("ask", "bad_request", message, 6)
        }
        InterfaceError::ServiceUnavailable { .. } | InterfaceError::Internal { .. } => {
            CommandResult::failure("ask", "turn_failed", message, 6)
        }
    }
}

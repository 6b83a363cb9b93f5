use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use datapilot_core::config::AgentConfig;
use datapilot_core::sql::{cache_key, prepare_query};
use datapilot_core::{
    DatabaseError, DbErrorKind, QueryBackend, SchemaSnapshot, ToolErrorKind, ToolResult,
};

use super::{required_str, Tool, ToolArtifact, ToolDependencies, ToolError, ToolOutput};
use crate::cache::QueryCache;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SqlSettings {
    pub max_rows: usize,
    pub query_timeout: Duration,
    pub max_attempts: u32,
    pub retry_base_delay: Duration,
}

impl Default for SqlSettings {
    fn default() -> Self {
        Self {
            max_rows: 1000,
            query_timeout: Duration::from_secs(30),
            max_attempts: 3,
            retry_base_delay: Duration::from_millis(200),
        }
    }
}

impl SqlSettings {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            max_rows: config.max_query_rows,
            query_timeout: config.query_timeout(),
            max_attempts: config.sql_max_attempts.max(1),
            retry_base_delay: config.retry_base_delay(),
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.retry_base_delay.saturating_mul(2_u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

/// What the SQL tool did with one candidate statement.
#[derive(Clone, Debug, PartialEq)]
pub struct QueryExecution {
    /// Statement as sent to the database, or the raw input when rejected.
    pub sql: String,
    pub result: ToolResult,
    pub attempts: u32,
    pub cached: bool,
}

/// Guards, caps, executes and retries model-written SQL.
pub struct SqlExecutionTool {
    backend: Arc<dyn QueryBackend>,
    schema: Arc<SchemaSnapshot>,
    cache: Option<Arc<QueryCache>>,
    settings: SqlSettings,
}

impl SqlExecutionTool {
    pub fn new(dependencies: &ToolDependencies) -> Self {
        Self {
            backend: Arc::clone(&dependencies.backend),
            schema: Arc::clone(&dependencies.schema),
            cache: dependencies.cache.clone(),
            settings: dependencies.sql,
        }
    }

    pub fn settings(&self) -> SqlSettings {
        self.settings
    }

    pub async fn execute_query(&self, raw: &str) -> QueryExecution {
        let prepared = match prepare_query(raw, self.settings.max_rows) {
            Ok(prepared) => prepared,
            Err(rejection) => {
                tracing::info!(
                    event_name = "agent.sql.rejected",
                    reason = %rejection,
                    "query rejected before execution"
                );
                return QueryExecution {
                    sql: raw.trim().to_string(),
                    result: ToolResult::rejected(&rejection),
                    attempts: 0,
                    cached: false,
                };
            }
        };

        let key = cache_key(&prepared.sql);
        if let Some(cache) = &self.cache {
            if let Some(result) = cache.get(&key).await {
                tracing::debug!(event_name = "agent.sql.cache_hit", "query served from cache");
                return QueryExecution { sql: prepared.sql, result, attempts: 0, cached: true };
            }
        }

        let (result, attempts) = self.run_with_retry(&prepared.sql).await;
        if result.is_success() {
            if let Some(cache) = &self.cache {
                cache.set(key, result.clone()).await;
            }
        }

        QueryExecution { sql: prepared.sql, result, attempts, cached: false }
    }

    async fn run_with_retry(&self, sql: &str) -> (ToolResult, u32) {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let outcome = tokio::time::timeout(
                self.settings.query_timeout,
                self.backend.fetch(sql, self.settings.max_rows),
            )
            .await;

            let error = match outcome {
                Ok(Ok(rows)) => {
                    let mut data = rows.rows;
                    let truncated = rows.truncated || data.len() > self.settings.max_rows;
                    data.truncate(self.settings.max_rows);
                    return (ToolResult::success(rows.columns, data, truncated), attempt);
                }
                Ok(Err(error)) => error,
                Err(_) => DatabaseError::new(
                    DbErrorKind::Timeout,
                    format!(
                        "query exceeded the {}s execution limit and was abandoned",
                        self.settings.query_timeout.as_secs()
                    ),
                ),
            };

            if error.kind.is_retryable() && attempt < self.settings.max_attempts {
                let delay = self.settings.backoff(attempt);
                tracing::warn!(
                    event_name = "agent.sql.retry",
                    attempt,
                    max_attempts = self.settings.max_attempts,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %error,
                    "transient database failure, retrying"
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            return (self.error_result(&error, attempt), attempt);
        }
    }

    fn error_result(&self, error: &DatabaseError, attempts: u32) -> ToolResult {
        let hint = match error.kind {
            DbErrorKind::MissingObject => Some(self.missing_object_hint(&error.message)),
            DbErrorKind::Transient => Some(format!(
                "The database stayed busy after {attempts} attempts. Try again shortly."
            )),
            DbErrorKind::Syntax => Some(
                "Check the SQL syntax against SQLite rules and the schema column names."
                    .to_string(),
            ),
            DbErrorKind::Permission => {
                Some("Only read-only queries are permitted on this database.".to_string())
            }
            DbErrorKind::Timeout => Some(
                "Narrow the query with filters or aggregate before selecting rows.".to_string(),
            ),
            DbErrorKind::Other => None,
        };
        ToolResult::error(ToolErrorKind::from(error.kind), error.message.clone(), hint)
    }

    fn missing_object_hint(&self, message: &str) -> String {
        match missing_identifier(message) {
            Some((MissingObject::Table, name)) => {
                let suggestions = self.schema.suggest_tables(&name);
                if suggestions.is_empty() {
                    let available = self
                        .schema
                        .tables()
                        .iter()
                        .map(|table| table.name.as_str())
                        .collect::<Vec<_>>()
                        .join(", ");
                    format!("Unknown table `{name}`. Available tables: {available}.")
                } else {
                    format!("Unknown table `{name}`. Did you mean: {}?", suggestions.join(", "))
                }
            }
            Some((MissingObject::Column, name)) => {
                let suggestions = self.schema.suggest_columns(&name);
                if suggestions.is_empty() {
                    format!("Unknown column `{name}`. Call describe_schema to list columns.")
                } else {
                    format!("Unknown column `{name}`. Did you mean: {}?", suggestions.join(", "))
                }
            }
            None => "Call describe_schema to list the available tables and columns.".to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum MissingObject {
    Table,
    Column,
}

/// Pulls the offending name out of SQLite's "no such table: x" style messages.
fn missing_identifier(message: &str) -> Option<(MissingObject, String)> {
    let lowered = message.to_ascii_lowercase();
    let (kind, marker) = if lowered.contains("no such table:") {
        (MissingObject::Table, "no such table:")
    } else if lowered.contains("no such column:") {
        (MissingObject::Column, "no such column:")
    } else {
        return None;
    };

    let start = lowered.find(marker)? + marker.len();
    let name = message[start..]
        .split_whitespace()
        .next()?
        .trim_matches(|c: char| matches!(c, '"' | '`' | '\'' | ',' | ';'));
    let name = match kind {
        MissingObject::Table => name.strip_prefix("main.").unwrap_or(name),
        MissingObject::Column => name,
    };
    (!name.is_empty()).then(|| (kind, name.to_string()))
}

#[async_trait]
impl Tool for SqlExecutionTool {
    fn name(&self) -> &'static str {
        "execute_sql"
    }

    fn description(&self) -> &'static str {
        "Execute one read-only SQLite SELECT statement against the analytical database and \
         return columns and rows as JSON."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "A single SELECT (or WITH ... SELECT) statement."
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, input: Value) -> Result<ToolOutput, ToolError> {
        let query = required_str(&input, "query")?;
        let execution = self.execute_query(query).await;
        Ok(ToolOutput::WithArtifact {
            text: execution.result.to_text(),
            artifact: ToolArtifact::QueryResult { sql: execution.sql, result: execution.result },
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use datapilot_core::{
        ColumnInfo, DatabaseError, DbErrorKind, QueryBackend, QueryRows, SchemaSnapshot,
        TableInfo, ToolErrorKind, ToolResult,
    };
    use serde_json::json;

    use super::{missing_identifier, MissingObject, SqlExecutionTool, SqlSettings};
    use crate::cache::QueryCache;
    use crate::tools::ToolDependencies;

    /// Replays scripted failures, then answers with a single `(20,)` row.
    #[derive(Default)]
    struct ScriptedBackend {
        failures: Mutex<VecDeque<DatabaseError>>,
        calls: AtomicUsize,
        executed: Mutex<Vec<String>>,
        delay: Option<Duration>,
        flood: Option<usize>,
    }

    impl ScriptedBackend {
        fn failing(failures: Vec<DatabaseError>) -> Self {
            Self { failures: Mutex::new(failures.into()), ..Self::default() }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn executed(&self) -> Vec<String> {
            self.executed.lock().expect("executed lock").clone()
        }
    }

    #[async_trait]
    impl QueryBackend for ScriptedBackend {
        async fn fetch(&self, sql: &str, _row_limit: usize) -> Result<QueryRows, DatabaseError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.executed.lock().expect("executed lock").push(sql.to_string());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(error) = self.failures.lock().expect("failures lock").pop_front() {
                return Err(error);
            }
            if let Some(count) = self.flood {
                return Ok(QueryRows {
                    columns: vec!["scenario_id".to_string()],
                    rows: (0..count).map(|id| vec![json!(id)]).collect(),
                    truncated: false,
                });
            }
            Ok(QueryRows {
                columns: vec!["COUNT(*)".to_string()],
                rows: vec![vec![json!(20)]],
                truncated: false,
            })
        }
    }

    fn schema() -> Arc<SchemaSnapshot> {
        Arc::new(SchemaSnapshot::new(vec![TableInfo {
            name: "dim_scenario".to_string(),
            is_view: false,
            columns: vec![
                ColumnInfo {
                    name: "scenario_id".to_string(),
                    data_type: "INTEGER".to_string(),
                    primary_key: true,
                },
                ColumnInfo {
                    name: "scenario_name".to_string(),
                    data_type: "TEXT".to_string(),
                    primary_key: false,
                },
            ],
            row_count: Some(20),
        }]))
    }

    fn tool(backend: Arc<ScriptedBackend>, cache: Option<Arc<QueryCache>>) -> SqlExecutionTool {
        SqlExecutionTool::new(&ToolDependencies {
            backend,
            schema: schema(),
            cache,
            sql: SqlSettings {
                max_rows: 100,
                query_timeout: Duration::from_secs(5),
                max_attempts: 3,
                retry_base_delay: Duration::from_millis(100),
            },
        })
    }

    #[tokio::test]
    async fn executed_statement_carries_exactly_one_limit() {
        let backend = Arc::new(ScriptedBackend::default());
        let sql_tool = tool(Arc::clone(&backend), None);

        let execution = sql_tool.execute_query("```sql\nSELECT * FROM dim_scenario;\n```").await;

        assert!(execution.result.is_success());
        let executed = backend.executed();
        assert_eq!(executed.len(), 1);
        assert_eq!(executed[0].to_ascii_uppercase().matches("LIMIT").count(), 1);
        assert!(executed[0].ends_with("LIMIT 100"));
    }

    #[tokio::test]
    async fn rows_beyond_the_cap_are_dropped_and_flagged() {
        let backend = Arc::new(ScriptedBackend { flood: Some(500), ..ScriptedBackend::default() });
        let sql_tool = tool(Arc::clone(&backend), None);

        let execution = sql_tool.execute_query("SELECT scenario_id FROM dim_scenario").await;

        match execution.result {
            ToolResult::Success { rows, row_count, truncated, .. } => {
                assert_eq!(row_count, 100);
                assert_eq!(rows.len(), 100);
                assert_eq!(rows[99], vec![json!(99)]);
                assert!(truncated);
            }
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn denylisted_statements_never_reach_the_backend() {
        let backend = Arc::new(ScriptedBackend::default());
        let sql_tool = tool(Arc::clone(&backend), None);

        for statement in [
            "DROP TABLE dim_scenario",
            "DELETE FROM dim_scenario",
            "update dim_scenario set scenario_name = 'x'",
            "WITH x AS (SELECT 1) INSERT INTO dim_scenario SELECT * FROM x",
            "SELECT 1; DROP TABLE dim_scenario",
        ] {
            let execution = sql_tool.execute_query(statement).await;
            assert_eq!(
                execution.result.error_kind(),
                Some(ToolErrorKind::Validation),
                "{statement}"
            );
            assert_eq!(execution.attempts, 0);
        }

        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn repeated_query_is_served_from_cache_byte_identical() {
        let backend = Arc::new(ScriptedBackend::default());
        let cache = Arc::new(QueryCache::new(Duration::from_secs(60), 16));
        let sql_tool = tool(Arc::clone(&backend), Some(cache));

        let first = sql_tool.execute_query("SELECT COUNT(*) FROM dim_scenario").await;
        let second = sql_tool.execute_query("SELECT  COUNT(*)\nFROM dim_scenario ;").await;

        assert_eq!(backend.calls(), 1);
        assert!(!first.cached);
        assert!(second.cached);
        assert_eq!(first.result.to_text(), second.result.to_text());
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried_within_the_bound() {
        let backend = Arc::new(ScriptedBackend::failing(vec![
            DatabaseError::transient("database is locked"),
            DatabaseError::transient("database is locked"),
        ]));
        let sql_tool = tool(Arc::clone(&backend), None);

        let execution = sql_tool.execute_query("SELECT COUNT(*) FROM dim_scenario").await;

        assert!(execution.result.is_success());
        assert_eq!(execution.attempts, 3);
        assert_eq!(backend.calls(), 3);
        assert_eq!(execution.result.scalar(), Some(&json!(20)));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_return_a_transient_error() {
        let backend = Arc::new(ScriptedBackend::failing(
            (0..10).map(|_| DatabaseError::transient("database is locked")).collect(),
        ));
        let cache = Arc::new(QueryCache::new(Duration::from_secs(60), 16));
        let sql_tool = tool(Arc::clone(&backend), Some(Arc::clone(&cache)));

        let execution = sql_tool.execute_query("SELECT COUNT(*) FROM dim_scenario").await;

        assert_eq!(execution.result.error_kind(), Some(ToolErrorKind::Transient));
        assert_eq!(execution.result.row_count(), 0);
        assert_eq!(backend.calls(), 3);
        assert!(cache.is_empty().await, "failures must not be cached");
        assert!(execution.result.to_text().contains("Try again"));
    }

    #[tokio::test]
    async fn semantic_errors_are_not_retried_and_carry_suggestions() {
        let backend = Arc::new(ScriptedBackend::failing(vec![DatabaseError::missing_object(
            "no such table: dim_scenarios",
        )]));
        let sql_tool = tool(Arc::clone(&backend), None);

        let execution = sql_tool.execute_query("SELECT COUNT(*) FROM dim_scenarios").await;

        assert_eq!(backend.calls(), 1);
        match execution.result {
            ToolResult::Error { error, message, diagnostic_hint } => {
                assert_eq!(error, ToolErrorKind::MissingObject);
                assert!(message.contains("dim_scenarios"));
                assert_eq!(
                    diagnostic_hint.as_deref(),
                    Some("Unknown table `dim_scenarios`. Did you mean: dim_scenario?")
                );
            }
            other => panic!("expected error result, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_queries_are_abandoned_as_timeouts() {
        let backend = Arc::new(ScriptedBackend {
            delay: Some(Duration::from_secs(60)),
            ..ScriptedBackend::default()
        });
        let sql_tool = tool(Arc::clone(&backend), None);

        let execution = sql_tool.execute_query("SELECT COUNT(*) FROM dim_scenario").await;

        assert_eq!(execution.result.error_kind(), Some(ToolErrorKind::Timeout));
        assert_eq!(backend.calls(), 1, "timeouts are not retried");
    }

    #[test]
    fn missing_identifiers_are_extracted() {
        assert_eq!(
            missing_identifier("no such table: main.dim_scenarios"),
            Some((MissingObject::Table, "dim_scenarios".to_string()))
        );
        assert_eq!(
            missing_identifier("no such column: s.scenario"),
            Some((MissingObject::Column, "s.scenario".to_string()))
        );
        assert_eq!(missing_identifier("near \"FROM\": syntax error"), None);
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let settings =
            SqlSettings { retry_base_delay: Duration::from_millis(200), ..SqlSettings::default() };

        assert_eq!(settings.backoff(1), Duration::from_millis(200));
        assert_eq!(settings.backoff(2), Duration::from_millis(400));
        assert_eq!(settings.backoff(3), Duration::from_millis(800));
        assert!(!DbErrorKind::Timeout.is_retryable());
    }
}

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use datapilot_core::{QueryBackend, SchemaSnapshot, ToolCall, ToolErrorKind, ToolResult};

use crate::cache::QueryCache;
use crate::llm::ToolDeclaration;

pub mod analysis;
pub mod chart;
pub mod schema;
pub mod sql;

pub use analysis::AnalysisTool;
pub use chart::{ChartPoint, ChartSpec, ChartTool, ChartType};
pub use schema::DescribeSchemaTool;
pub use sql::{QueryExecution, SqlExecutionTool, SqlSettings};

/// Tools present in every registry, in declaration order.
pub const BASE_TOOLS: &[&str] = &["execute_sql", "analyze_results", "describe_schema"];
/// Tool appended when the visualization feature is enabled.
pub const VISUALIZATION_TOOL: &str = "chart";

/// Structured output a non-model caller can consume alongside the text.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolArtifact {
    QueryResult { sql: String, result: ToolResult },
    Chart { spec: ChartSpec },
}

#[derive(Clone, Debug, PartialEq)]
pub enum ToolOutput {
    Text(String),
    WithArtifact { text: String, artifact: ToolArtifact },
}

impl ToolOutput {
    pub fn text(&self) -> &str {
        match self {
            Self::Text(text) | Self::WithArtifact { text, .. } => text,
        }
    }

    pub fn artifact(&self) -> Option<&ToolArtifact> {
        match self {
            Self::Text(_) => None,
            Self::WithArtifact { artifact, .. } => Some(artifact),
        }
    }

    pub fn into_parts(self) -> (String, Option<ToolArtifact>) {
        match self {
            Self::Text(text) => (text, None),
            Self::WithArtifact { text, artifact } => (text, Some(artifact)),
        }
    }
}

/// Failure raised inside a tool; reported to the model as a [`ToolResult`] error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolError {
    pub kind: ToolErrorKind,
    pub message: String,
    pub hint: Option<String>,
}

impl ToolError {
    pub fn new(kind: ToolErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), hint: None }
    }

    pub fn invalid_arguments(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::InvalidArguments, message)
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl From<ToolError> for ToolResult {
    fn from(error: ToolError) -> Self {
        ToolResult::error(error.kind, error.message, error.hint)
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    /// JSON schema of the argument object.
    fn input_schema(&self) -> Value;
    async fn execute(&self, input: Value) -> Result<ToolOutput, ToolError>;
}

/// Everything a tool may be bound to at construction time.
#[derive(Clone)]
pub struct ToolDependencies {
    pub backend: Arc<dyn QueryBackend>,
    pub schema: Arc<SchemaSnapshot>,
    pub cache: Option<Arc<QueryCache>>,
    pub sql: SqlSettings,
}

/// Builds the named tool over `dependencies`, or `None` for an unknown name.
pub fn create_tool(name: &str, dependencies: &ToolDependencies) -> Option<Arc<dyn Tool>> {
    let tool: Arc<dyn Tool> = match name {
        "execute_sql" => Arc::new(SqlExecutionTool::new(dependencies)),
        "analyze_results" => Arc::new(AnalysisTool),
        "describe_schema" => Arc::new(DescribeSchemaTool::new(Arc::clone(&dependencies.schema))),
        VISUALIZATION_TOOL => Arc::new(ChartTool::new(SqlExecutionTool::new(dependencies))),
        _ => return None,
    };
    Some(tool)
}

/// A registered tool with its argument schema compiled once up front.
struct RegisteredTool {
    tool: Arc<dyn Tool>,
    schema: Value,
    validator: Result<jsonschema::Validator, String>,
}

impl RegisteredTool {
    fn new(tool: Arc<dyn Tool>) -> Self {
        let schema = tool.input_schema();
        let validator = jsonschema::validator_for(&schema).map_err(|error| error.to_string());
        if let Err(error) = &validator {
            tracing::warn!(
                event_name = "agent.tool.schema_invalid",
                tool = tool.name(),
                error = %error,
                "tool input schema does not compile"
            );
        }
        Self { tool, schema, validator }
    }

    /// Joins every schema violation of `arguments` into one message.
    fn validate(&self, arguments: &Value) -> Result<(), String> {
        let validator = match &self.validator {
            Ok(validator) => validator,
            Err(error) => return Err(format!("declared schema is unusable: {error}")),
        };
        let errors: Vec<String> =
            validator.iter_errors(arguments).map(|error| error.to_string()).collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.join(", "))
        }
    }
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    /// Base tools always; the chart tool only when `visualization` is set.
    pub fn build(dependencies: &ToolDependencies, visualization: bool) -> Self {
        let mut registry = Self::default();
        let optional = visualization.then_some(VISUALIZATION_TOOL);
        for name in BASE_TOOLS.iter().copied().chain(optional) {
            if let Some(tool) = create_tool(name, dependencies) {
                registry.register_shared(tool);
            }
        }
        registry
    }

    pub fn register<T>(&mut self, tool: T)
    where
        T: Tool + 'static,
    {
        self.register_shared(Arc::new(tool));
    }

    pub fn register_shared(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        let entry = RegisteredTool::new(tool);
        match self.index.get(&name) {
            Some(&position) => self.tools[position] = entry,
            None => {
                self.index.insert(name, self.tools.len());
                self.tools.push(entry);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.tools.iter().map(|entry| entry.tool.name()).collect()
    }

    pub fn declarations(&self) -> Vec<ToolDeclaration> {
        self.tools
            .iter()
            .map(|entry| ToolDeclaration {
                name: entry.tool.name().to_string(),
                description: entry.tool.description().to_string(),
                parameters: entry.schema.clone(),
            })
            .collect()
    }

    /// Routes `call` to its tool after validating the arguments. Unknown
    /// tools, invalid arguments and tool failures all come back as error
    /// text for the model rather than as a Rust error.
    pub async fn dispatch(&self, call: &ToolCall) -> ToolOutput {
        let Some(entry) = self.index.get(&call.name).map(|&position| &self.tools[position]) else {
            let result = ToolResult::error(
                ToolErrorKind::UnknownTool,
                format!("unknown tool `{}`", call.name),
                Some(format!("Available tools: {}", self.names().join(", "))),
            );
            return ToolOutput::Text(result.to_text());
        };

        if let Err(message) = entry.validate(&call.arguments) {
            let result = ToolResult::error(
                ToolErrorKind::InvalidArguments,
                format!("invalid arguments for `{}`: {message}", call.name),
                Some(format!("Arguments must match this JSON schema: {}", entry.schema)),
            );
            return ToolOutput::Text(result.to_text());
        }

        match entry.tool.execute(call.arguments.clone()).await {
            Ok(output) => output,
            Err(error) => ToolOutput::Text(ToolResult::from(error).to_text()),
        }
    }
}

pub(crate) fn required_str<'a>(input: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    input
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::invalid_arguments(format!("missing string argument `{key}`")))
}

pub(crate) fn optional_str<'a>(input: &'a Value, key: &str) -> Option<&'a str> {
    input.get(key).and_then(Value::as_str).map(str::trim).filter(|value| !value.is_empty())
}

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{DbErrorKind, QueryRejection};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    Validation,
    InvalidArguments,
    UnknownTool,
    Syntax,
    MissingObject,
    Transient,
    Permission,
    Timeout,
    Execution,
}

impl From<DbErrorKind> for ToolErrorKind {
    fn from(kind: DbErrorKind) -> Self {
        match kind {
            DbErrorKind::Syntax => Self::Syntax,
            DbErrorKind::MissingObject => Self::MissingObject,
            DbErrorKind::Transient => Self::Transient,
            DbErrorKind::Permission => Self::Permission,
            DbErrorKind::Timeout => Self::Timeout,
            DbErrorKind::Other => Self::Execution,
        }
    }
}

/// Outcome of a tool invocation. Immutable once built; appended verbatim
/// (as its JSON text) to the conversation history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolResult {
    Success {
        columns: Vec<String>,
        rows: Vec<Vec<Value>>,
        row_count: usize,
        truncated: bool,
    },
    Error {
        error: ToolErrorKind,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        diagnostic_hint: Option<String>,
    },
}

impl ToolResult {
    pub fn success(columns: Vec<String>, rows: Vec<Vec<Value>>, truncated: bool) -> Self {
        let row_count = rows.len();
        Self::Success { columns, rows, row_count, truncated }
    }

    pub fn error(
        kind: ToolErrorKind,
        message: impl Into<String>,
        diagnostic_hint: Option<String>,
    ) -> Self {
        Self::Error { error: kind, message: message.into(), diagnostic_hint }
    }

    pub fn rejected(rejection: &QueryRejection) -> Self {
        Self::error(
            ToolErrorKind::Validation,
            rejection.to_string(),
            Some("Only a single read-only SELECT statement is allowed.".to_string()),
        )
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn error_kind(&self) -> Option<ToolErrorKind> {
        match self {
            Self::Success { .. } => None,
            Self::Error { error, .. } => Some(*error),
        }
    }

    pub fn row_count(&self) -> usize {
        match self {
            Self::Success { row_count, .. } => *row_count,
            Self::Error { .. } => 0,
        }
    }

    /// First cell of the first row, the usual shape of aggregate answers.
    pub fn scalar(&self) -> Option<&Value> {
        match self {
            Self::Success { rows, .. } => rows.first().and_then(|row| row.first()),
            Self::Error { .. } => None,
        }
    }

    /// JSON text handed to the language model.
    pub fn to_text(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|error| {
            format!("{{\"status\":\"error\",\"error\":\"execution\",\"message\":\"{error}\"}}")
        })
    }
}

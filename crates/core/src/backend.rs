use async_trait::async_trait;
use serde_json::Value;

use crate::errors::DatabaseError;

/// Rows materialized from one statement. `truncated` is set when the
/// statement produced more rows than the requested limit.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub truncated: bool,
}

/// Database boundary: executes an already-validated read-only statement.
///
/// Implementations must materialize at most `row_limit` rows and report
/// failures with a [`crate::errors::DbErrorKind`] so callers can decide
/// whether to retry.
#[async_trait]
pub trait QueryBackend: Send + Sync {
    async fn fetch(&self, sql: &str, row_limit: usize) -> Result<QueryRows, DatabaseError>;
}

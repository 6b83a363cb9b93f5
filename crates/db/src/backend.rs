use async_trait::async_trait;
use datapilot_core::{DatabaseError, DbErrorKind, QueryBackend, QueryRows};
use futures::TryStreamExt;
use serde_json::{Number, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Executor, Row, Statement, TypeInfo, ValueRef};

use crate::DbPool;

const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;
const SQLITE_READONLY: i32 = 8;
const SQLITE_INTERRUPT: i32 = 9;
const SQLITE_AUTH: i32 = 23;

/// [`QueryBackend`] over a SQLite pool. Rows are streamed and at most
/// `row_limit + 1` are pulled, the extra one only to detect truncation.
#[derive(Clone)]
pub struct SqliteQueryBackend {
    pool: DbPool,
}

impl SqliteQueryBackend {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    async fn column_names(&self, sql: &str) -> Result<Vec<String>, sqlx::Error> {
        let statement = (&self.pool).prepare(sql).await?;
        Ok(statement.columns().iter().map(|column| column.name().to_string()).collect())
    }
}

#[async_trait]
impl QueryBackend for SqliteQueryBackend {
    async fn fetch(&self, sql: &str, row_limit: usize) -> Result<QueryRows, DatabaseError> {
        let mut columns = Vec::new();
        let mut rows = Vec::new();
        let mut truncated = false;

        let mut stream = sqlx::query(sql).fetch(&self.pool);
        while let Some(row) = stream.try_next().await.map_err(|error| classify_error(&error))? {
            if rows.len() == row_limit {
                truncated = true;
                break;
            }
            if columns.is_empty() {
                columns = row.columns().iter().map(|column| column.name().to_string()).collect();
            }
            rows.push(decode_row(&row).map_err(|error| classify_error(&error))?);
        }
        drop(stream);

        tracing::debug!(
            event_name = "db.query.fetched",
            row_count = rows.len(),
            truncated,
            "query rows materialized"
        );

        if columns.is_empty() {
            columns = self.column_names(sql).await.map_err(|error| classify_error(&error))?;
        }

        Ok(QueryRows { columns, rows, truncated })
    }
}

fn decode_row(row: &SqliteRow) -> Result<Vec<Value>, sqlx::Error> {
    (0..row.len()).map(|index| decode_value(row, index)).collect()
}

fn decode_value(row: &SqliteRow, index: usize) -> Result<Value, sqlx::Error> {
    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let type_name = raw.type_info().name().to_ascii_uppercase();

    let value = match type_name.as_str() {
        "INTEGER" | "BOOLEAN" => Value::from(row.try_get_unchecked::<i64, _>(index)?),
        "REAL" | "NUMERIC" => Number::from_f64(row.try_get_unchecked::<f64, _>(index)?)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        "BLOB" => {
            let bytes = row.try_get_unchecked::<Vec<u8>, _>(index)?;
            Value::String(format!("<blob {} bytes>", bytes.len()))
        }
        _ => Value::String(row.try_get_unchecked::<String, _>(index)?),
    };
    Ok(value)
}

/// Maps a driver error onto the shared [`DbErrorKind`] taxonomy.
pub fn classify_error(error: &sqlx::Error) -> DatabaseError {
    match error {
        sqlx::Error::Database(db_error) => {
            let message = db_error.message().to_string();
            let lowered = message.to_ascii_lowercase();
            let primary_code = db_error
                .code()
                .and_then(|code| code.parse::<i32>().ok())
                .map(|code| code & 0xff);

            let kind = if lowered.contains("no such table")
                || lowered.contains("no such column")
                || lowered.contains("no such function")
            {
                DbErrorKind::MissingObject
            } else if lowered.contains("syntax error")
                || lowered.contains("incomplete input")
                || lowered.contains("unrecognized token")
                || lowered.contains("ambiguous column")
            {
                DbErrorKind::Syntax
            } else if matches!(primary_code, Some(SQLITE_BUSY | SQLITE_LOCKED))
                || lowered.contains("database is locked")
            {
                DbErrorKind::Transient
            } else if matches!(primary_code, Some(SQLITE_READONLY | SQLITE_AUTH))
                || lowered.contains("readonly")
                || lowered.contains("not authorized")
            {
                DbErrorKind::Permission
            } else if matches!(primary_code, Some(SQLITE_INTERRUPT)) {
                DbErrorKind::Timeout
            } else {
                DbErrorKind::Other
            };
            DatabaseError::new(kind, message)
        }
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Io(_)
        | sqlx::Error::WorkerCrashed => DatabaseError::transient(error.to_string()),
        other => DatabaseError::new(DbErrorKind::Other, other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use datapilot_core::{DbErrorKind, QueryBackend};
    use serde_json::json;
    use tempfile::TempDir;

    use super::SqliteQueryBackend;
    use crate::{
        connect_read_only, connect_with_settings, fixtures::DemoDataset, migrations::run_pending,
    };

    async fn seeded_backend() -> SqliteQueryBackend {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("migrate");
        DemoDataset::load(&pool).await.expect("seed");
        SqliteQueryBackend::new(pool)
    }

    #[tokio::test]
    async fn counts_scenarios() {
        let backend = seeded_backend().await;

        let result =
            backend.fetch("SELECT COUNT(*) AS n FROM dim_scenario", 10).await.expect("fetch");

        assert_eq!(result.columns, vec!["n".to_string()]);
        assert_eq!(result.rows, vec![vec![json!(20)]]);
        assert!(!result.truncated);
    }

    #[tokio::test]
    async fn truncation_is_reported_only_past_the_limit() {
        let backend = seeded_backend().await;
        let sql = "SELECT scenario_id FROM dim_scenario ORDER BY scenario_id";

        let capped = backend.fetch(sql, 5).await.expect("capped");
        let exact = backend.fetch(sql, 20).await.expect("exact");

        assert_eq!(capped.rows.len(), 5);
        assert!(capped.truncated);
        assert_eq!(exact.rows.len(), 20);
        assert!(!exact.truncated);
    }

    #[tokio::test]
    async fn empty_result_still_carries_column_names() {
        let backend = seeded_backend().await;

        let result = backend
            .fetch("SELECT scenario_name, pathway FROM dim_scenario WHERE 1 = 0", 10)
            .await
            .expect("fetch");

        assert_eq!(result.columns, vec!["scenario_name".to_string(), "pathway".to_string()]);
        assert!(result.rows.is_empty());
    }

    #[tokio::test]
    async fn values_keep_their_storage_types() {
        let backend = seeded_backend().await;

        let result =
            backend.fetch("SELECT 7, 1.5, 'text', NULL, x'00ff'", 1).await.expect("fetch");

        assert_eq!(
            result.rows[0],
            vec![json!(7), json!(1.5), json!("text"), json!(null), json!("<blob 2 bytes>")]
        );
    }

    #[tokio::test]
    async fn failures_are_classified() {
        let backend = seeded_backend().await;

        let missing_table = backend.fetch("SELECT * FROM dim_scenarios", 10).await;
        let missing_column = backend.fetch("SELECT scenario FROM dim_scenario", 10).await;
        let syntax = backend.fetch("SELECT FROM WHERE", 10).await;

        assert_eq!(missing_table.map_err(|e| e.kind), Err(DbErrorKind::MissingObject));
        assert_eq!(missing_column.map_err(|e| e.kind), Err(DbErrorKind::MissingObject));
        assert_eq!(syntax.map_err(|e| e.kind), Err(DbErrorKind::Syntax));
    }

    #[tokio::test]
    async fn writes_on_read_only_pool_are_permission_errors() {
        let dir = TempDir::new().expect("tempdir");
        let url = format!("sqlite://{}", dir.path().join("demo.db").display());
        let writer = connect_with_settings(&url, 1, 5).await.expect("writer");
        run_pending(&writer).await.expect("migrate");
        DemoDataset::load(&writer).await.expect("seed");
        writer.close().await;

        let backend = SqliteQueryBackend::new(connect_read_only(&url, 1, 5).await.expect("reader"));

        let read = backend.fetch("SELECT COUNT(*) FROM dim_region", 1).await.expect("read");
        let write = backend.fetch("DELETE FROM dim_region", 1).await;

        assert_eq!(read.rows, vec![vec![json!(4)]]);
        assert_eq!(write.map(|_| ()).map_err(|e| e.kind), Err(DbErrorKind::Permission));
    }
}

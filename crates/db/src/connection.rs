use std::str::FromStr;
use std::time::Duration;

use datapilot_core::config::DatabaseConfig;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

pub type DbPool = sqlx::SqlitePool;

pub async fn connect(database_url: &str) -> Result<DbPool, sqlx::Error> {
    connect_with_settings(database_url, 5, 30).await
}

pub async fn connect_with_settings(
    database_url: &str,
    max_connections: u32,
    timeout_secs: u64,
) -> Result<DbPool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
    pool_options(max_connections, timeout_secs, false).connect_with(options).await
}

/// Opens the database so that no connection in the pool can modify it: the
/// file is opened read-only and every connection runs with `query_only` set.
pub async fn connect_read_only(
    database_url: &str,
    max_connections: u32,
    timeout_secs: u64,
) -> Result<DbPool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?.read_only(true);
    pool_options(max_connections, timeout_secs, true).connect_with(options).await
}

pub async fn connect_from_config(config: &DatabaseConfig) -> Result<DbPool, sqlx::Error> {
    if config.read_only {
        connect_read_only(&config.url, config.max_connections, config.timeout_secs).await
    } else {
        connect_with_settings(&config.url, config.max_connections, config.timeout_secs).await
    }
}

fn pool_options(max_connections: u32, timeout_secs: u64, read_only: bool) -> SqlitePoolOptions {
    SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .acquire_timeout(Duration::from_secs(timeout_secs.max(1)))
        .after_connect(move |conn, _meta| {
            Box::pin(async move {
                sqlx::query("PRAGMA foreign_keys = ON").execute(&mut *conn).await?;
                sqlx::query("PRAGMA busy_timeout = 5000").execute(&mut *conn).await?;
                if read_only {
                    sqlx::query("PRAGMA query_only = ON").execute(&mut *conn).await?;
                } else {
                    sqlx::query("PRAGMA journal_mode = WAL").execute(&mut *conn).await?;
                }
                Ok(())
            })
        })
}

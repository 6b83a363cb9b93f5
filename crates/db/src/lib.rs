//! SQLite access for the analytical dataset: pooled connections, migrations,
//! demo fixtures, schema introspection, and the row-capped query backend.

use thiserror::Error;

pub mod backend;
pub mod connection;
pub mod fixtures;
pub mod migrations;
pub mod schema;

pub use backend::{classify_error, SqliteQueryBackend};
pub use connection::{
    connect, connect_from_config, connect_read_only, connect_with_settings, DbPool,
};
pub use fixtures::{DemoDataset, SeedResult, VerificationResult};
pub use schema::load_snapshot;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("decode error: {0}")]
    Decode(String),
}

//! Shared building blocks for the datapilot workspace: configuration, the
//! error taxonomy, conversation and tool-result types, the schema snapshot
//! and the read-only SQL guard.

pub mod backend;
pub mod config;
pub mod domain;
pub mod errors;
pub mod sql;

pub use backend::{QueryBackend, QueryRows};
pub use domain::conversation::{Message, Role, ToolCall};
pub use domain::memory::{Exchange, SessionMemory};
pub use domain::schema::{ColumnInfo, SchemaSnapshot, TableInfo};
pub use domain::tool_result::{ToolErrorKind, ToolResult};
pub use errors::{ApplicationError, DatabaseError, DbErrorKind, InterfaceError, QueryRejection};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reasons the SQL guard refuses a candidate statement before it reaches the database.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum QueryRejection {
    #[error("query is empty after removing comments and markdown fencing")]
    Empty,
    #[error("only a single statement may be executed per call")]
    MultipleStatements,
    #[error("only read-only SELECT/WITH statements are allowed, found `{leading}`")]
    NotReadOnly { leading: String },
    #[error("statement contains disallowed keyword `{keyword}`")]
    DisallowedKeyword { keyword: String },
    #[error("unterminated string literal or quoted identifier")]
    Unterminated,
}

/// Machine-readable category attached to every database failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DbErrorKind {
    Syntax,
    MissingObject,
    Transient,
    Permission,
    Timeout,
    Other,
}

impl DbErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Transient)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Syntax => "syntax",
            Self::MissingObject => "missing_object",
            Self::Transient => "transient",
            Self::Permission => "permission",
            Self::Timeout => "timeout",
            Self::Other => "other",
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{} database error: {message}", kind.as_str())]
pub struct DatabaseError {
    pub kind: DbErrorKind,
    pub message: String,
}

impl DatabaseError {
    pub fn new(kind: DbErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(DbErrorKind::Transient, message)
    }

    pub fn missing_object(message: impl Into<String>) -> Self {
        Self::new(DbErrorKind::MissingObject, message)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error("language model failure: {0}")]
    Model(String),
    #[error(transparent)]
    Database(#[from] DatabaseError),
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    #[error("a turn is already running for thread `{thread_id}`")]
    ThreadBusy { thread_id: String },
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> String {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again.".to_string()
            }
            Self::RateLimited { retry_after_secs, .. } => format!(
                "Too many questions in a short period. Please wait {retry_after_secs} seconds and try again."
            ),
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly.".to_string()
            }
            Self::Internal { .. } => "An unexpected internal error occurred.".to_string(),
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::RateLimited { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::RateLimited { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let correlation_id = "unassigned".to_owned();
        match value {
            ApplicationError::RateLimited { retry_after_secs } => {
                Self::RateLimited { retry_after_secs, correlation_id }
            }
            ApplicationError::ThreadBusy { thread_id } => Self::BadRequest {
                message: format!("thread `{thread_id}` already has a turn in progress"),
                correlation_id,
            },
            ApplicationError::Model(message) | ApplicationError::Persistence(message) => {
                Self::ServiceUnavailable { message, correlation_id }
            }
            ApplicationError::Database(error) => {
                Self::ServiceUnavailable { message: error.to_string(), correlation_id }
            }
            ApplicationError::Configuration(message) => Self::Internal { message, correlation_id },
        }
    }
}

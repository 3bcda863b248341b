// Error taxonomy for engine operations.

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Bad input, rejected before any write.
    #[error("validation error: {0}")]
    Validation(String),

    /// A referenced record is missing; the whole operation is aborted.
    #[error("not found: {0}")]
    NotFound(String),

    /// Write contention or a state transition lost a race. Retryable.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The store (or another collaborator) is unavailable. Retryable.
    #[error("dependency unavailable: {0}")]
    Dependency(String),

    /// The caller's deadline expired before the operation finished.
    #[error("operation timed out after {0}s")]
    Timeout(u64),
}

impl EngineError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Conflict(_) | Self::Dependency(_) | Self::Timeout(_)
        )
    }

    /// Short machine-readable code for API responses and metric labels.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Dependency(_) => "dependency",
            Self::Timeout(_) => "timeout",
        }
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::RowNotFound => Self::NotFound(e.to_string()),
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Self::Conflict(db.message().to_string())
            }
            sqlx::Error::Database(db) if db.message().contains("database is locked") => {
                Self::Conflict(db.message().to_string())
            }
            _ => Self::Dependency(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        Self::Dependency(format!("corrupt stored document: {e}"))
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Non-fatal problem reported alongside a successful result, e.g. a
/// cooldown lookup that failed open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsistencyWarning {
    pub code: String,
    pub message: String,
}

impl ConsistencyWarning {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

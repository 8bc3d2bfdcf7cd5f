//! Error types for query planning and execution

use thiserror::Error;

/// Errors that can occur while planning, generating or executing a dynamic query
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Metadata not found: {0}")]
    MetadataNotFound(String),

    #[error("Invalid field path: {0}")]
    InvalidFieldPath(String),

    #[error("No path from {from} to {to}")]
    NoPath { from: String, to: String },

    #[error("Join plan cannot progress: {0}")]
    CyclicOrUnreachablePlan(String),

    #[error("Unsupported operator: {0}")]
    UnsupportedOperator(String),

    #[error("Ambiguous alias: {0}")]
    AmbiguousAlias(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl QueryError {
    pub fn metadata_not_found(msg: impl Into<String>) -> Self {
        Self::MetadataNotFound(msg.into())
    }

    pub fn invalid_field_path(msg: impl Into<String>) -> Self {
        Self::InvalidFieldPath(msg.into())
    }

    pub fn no_path(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::NoPath {
            from: from.into(),
            to: to.into(),
        }
    }

    pub fn unsupported_operator(msg: impl Into<String>) -> Self {
        Self::UnsupportedOperator(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// True for deterministic request/metadata failures raised before any SQL exists.
    pub fn is_planning_error(&self) -> bool {
        !matches!(
            self,
            QueryError::Sql(_) | QueryError::Connection(_) | QueryError::Json(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, QueryError>;

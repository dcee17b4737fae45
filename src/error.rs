//! Error types shared across the memory engine.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, MemoryError>;

/// The primary error type for all store, pipeline, and backend operations.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// Fact extraction failed after its retry (model call error, not empty output).
    #[error("extraction failed: {detail}")]
    ExtractionFailed { detail: String },

    /// Embedding backend failed after its retry.
    #[error("embedding failed: {detail}")]
    EmbeddingFailed { detail: String },

    /// A document replace lost its race twice and was abandoned.
    #[error("document upsert conflict for '{document_id}'")]
    DocumentUpsertConflict { document_id: String },

    /// A referenced record does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// The store cannot be reached or the connection pool is closed.
    #[error("store unavailable: {detail}")]
    StoreUnavailable { detail: String },

    /// Chat or scoring backend errors (API failure, bad status, empty response).
    #[error("backend error: {detail}")]
    Backend { detail: String },

    /// SQLite-level errors surfaced directly.
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Configuration errors (invalid TOML, bad values).
    #[error("configuration error: {0}")]
    Config(String),

    /// The background task queue has shut down and cannot accept work.
    #[error("task queue closed")]
    TaskQueueClosed,

    /// Internal or unexpected errors (poisoned locks, join failures).
    #[error("internal error: {0}")]
    Internal(String),
}

impl MemoryError {
    /// True when retrying the same call might succeed (transient store contention).
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Storage(rusqlite::Error::SqliteFailure(e, _)) => {
                matches!(
                    e.code,
                    rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
                )
            }
            Self::StoreUnavailable { .. } => true,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for MemoryError {
    fn from(e: serde_json::Error) -> Self {
        Self::Internal(format!("json serialization: {e}"))
    }
}

impl From<reqwest::Error> for MemoryError {
    fn from(e: reqwest::Error) -> Self {
        Self::Backend {
            detail: e.to_string(),
        }
    }
}

impl From<tokio::task::JoinError> for MemoryError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Internal(format!("blocking task failed: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_storage_errors_are_retryable() {
        let err = MemoryError::Storage(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        ));
        assert!(err.is_retryable());
    }

    #[test]
    fn not_found_is_not_retryable() {
        let err = MemoryError::NotFound {
            kind: "fact",
            id: "abc".into(),
        };
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "fact not found: abc");
    }
}

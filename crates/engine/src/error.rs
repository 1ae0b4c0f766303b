use quorum_core::error::CoreError;
use quorum_core::types::DbId;

/// PostgreSQL SQLSTATE for `unique_violation`.
const UNIQUE_VIOLATION: &str = "23505";

/// Error returned by every engine operation.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    pub fn not_found(entity: &'static str, id: DbId) -> Self {
        Self::Core(CoreError::NotFound { entity, id })
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Core(CoreError::Validation(message.into()))
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Core(CoreError::Conflict(message.into()))
    }

    /// Whether the underlying database error is a unique constraint violation.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Self::Database(sqlx::Error::Database(db)) => {
                db.code().as_deref() == Some(UNIQUE_VIOLATION)
            }
            _ => false,
        }
    }

    /// Errors caused by the caller's input rather than the system.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Core(CoreError::NotFound { .. })
                | Self::Core(CoreError::Validation(_))
                | Self::Core(CoreError::Conflict(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_errors_are_client_errors() {
        assert!(EngineError::not_found("task", 1).is_client_error());
        assert!(EngineError::validation("bad").is_client_error());
        assert!(!EngineError::Database(sqlx::Error::RowNotFound).is_client_error());
    }

    #[test]
    fn row_not_found_is_not_unique_violation() {
        assert!(!EngineError::Database(sqlx::Error::RowNotFound).is_unique_violation());
    }

    #[test]
    fn display_passes_core_message_through() {
        let err = EngineError::not_found("project", 9);
        assert_eq!(err.to_string(), "Entity not found: project with id 9");
    }
}

use thiserror::Error;
use uuid::Uuid;

/// Failure taxonomy for every gateway operation.
///
/// `Validation`, `NotFound` and `Unauthorized` are reported with zero partial
/// effect. `Transient` means the outcome is unknown to the caller (timeout,
/// pool exhaustion); callers must reconcile by re-fetching, never by blind
/// rollback. `Invariant` aborts a transaction that would have persisted a
/// non-contiguous ordering.
#[derive(Debug, Error)]
pub enum MenuError {
    #[error("{field}: {message}")]
    Validation { field: &'static str, message: String },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("operator {0} is not allowed to mutate menu data")]
    Unauthorized(i64),

    #[error("transient storage failure: {0}")]
    Transient(String),

    #[error("ordering invariant violated: {0}")]
    Invariant(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl MenuError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: Uuid) -> Self {
        Self::NotFound { entity, id }
    }
}

impl From<sqlx::Error> for MenuError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => Self::Transient(err.to_string()),
            sqlx::Error::RowNotFound => Self::Storage("row vanished mid-transaction".to_string()),
            _ => Self::Storage(err.to_string()),
        }
    }
}

/// Postgres unique-constraint violation (SQLSTATE 23505). The create/rename
/// paths turn these into `Validation` instead of `Storage`.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.code().as_deref() == Some("23505"),
        _ => false,
    }
}

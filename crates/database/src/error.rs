use core_types::StrategyId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Failed to load environment variables for database connection: {0}")]
    ConnectionConfigError(String),

    /// The backend could not be reached or timed out. Always retried with backoff.
    #[error("The state store is unavailable: {0}")]
    Unavailable(String),

    #[error("Database query failed: {0}")]
    QueryError(sqlx::Error),

    #[error("Database migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("An error occurred during JSON serialization/deserialization: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Strategy {0} was not found in the store.")]
    NotFound(StrategyId),

    #[error("Strategy {0} already exists in the store.")]
    AlreadyExists(StrategyId),

    /// The optimistic-concurrency check failed: someone else wrote first.
    #[error("Version conflict on strategy {strategy_id}: expected {expected}, found {actual}")]
    VersionConflict {
        strategy_id: StrategyId,
        expected: u64,
        actual: u64,
    },

    #[error("Invalid page token: {0}")]
    InvalidPageToken(String),

    #[error("Stored data is corrupt: {0}")]
    Corrupt(String),
}

impl DbError {
    /// Whether the operation may succeed if simply tried again later.
    pub fn is_transient(&self) -> bool {
        matches!(self, DbError::Unavailable(_))
    }
}

impl From<sqlx::Error> for DbError {
    fn from(error: sqlx::Error) -> Self {
        match &error {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => DbError::Unavailable(error.to_string()),
            // serialization_failure / deadlock_detected are safe to retry
            sqlx::Error::Database(db)
                if matches!(db.code().as_deref(), Some("40001") | Some("40P01")) =>
            {
                DbError::Unavailable(error.to_string())
            }
            _ => DbError::QueryError(error),
        }
    }
}

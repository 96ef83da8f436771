use thiserror::Error;
use uuid::Uuid;

/// Result type for router operations.
pub type Result<T> = std::result::Result<T, RouterError>;

/// Errors that can occur in the routing engine.
#[derive(Debug, Error)]
pub enum RouterError {
    /// Request not found
    #[error("request not found: {0}")]
    RequestNotFound(Uuid),

    /// Operation is not legal for the request's current state
    #[error("request {id} is {actual}, expected {expected}")]
    InvalidState {
        id: Uuid,
        actual: &'static str,
        expected: &'static str,
    },

    /// The dispatcher task is gone; commands can no longer be delivered
    #[error("router dispatcher is not running")]
    DispatcherGone,

    /// Snapshot store failed
    #[error("snapshot store error: {0}")]
    Storage(#[source] anyhow::Error),

    /// Database operation failed
    #[cfg(feature = "postgres")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// JSON serialization/deserialization failed
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

//! Error types for the metadata store.

use thiserror::Error;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur talking to the metadata store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store transport error: {0}")]
    Transport(#[from] redis::RedisError),

    #[error("malformed record: {0}")]
    Deserialize(#[from] serde_json::Error),

    #[error("malformed instance entry: {0}")]
    BadInstance(String),

    #[error("invalidation subscription ended")]
    SubscriptionLost,
}

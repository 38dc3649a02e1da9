use thiserror::Error;

/// Errors raised by the queue engine and the message codec.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The message type tag is not part of the registry.
    #[error(
        "unknown message type `{message_type}`; register it with the queue's MessageRegistry"
    )]
    UnknownMessageType { message_type: String },

    /// A stored document does not match the schema of its declared type.
    #[error("malformed `{message_type}` payload: {reason}")]
    MalformedPayload { message_type: String, reason: String },

    /// A message value could not be serialized into a document.
    #[error("failed to serialize message: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid queue configuration: {0}")]
    InvalidConfig(String),

    /// Store failures are passed through untouched.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl QueueError {
    pub fn unknown_type(message_type: impl Into<String>) -> Self {
        Self::UnknownMessageType {
            message_type: message_type.into(),
        }
    }

    pub fn malformed(message_type: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedPayload {
            message_type: message_type.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised by a [`JobStore`](crate::store::JobStore) backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[cfg(feature = "postgres")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[cfg(feature = "postgres")]
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// A stored row could not be mapped back into a [`JobRow`](crate::job::JobRow).
    #[error("corrupt job row: {0}")]
    Corrupt(String),

    /// Backend-specific failure that has no dedicated variant.
    #[error("storage error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::Corrupt(msg.into())
    }
}

pub type QueueResult<T> = Result<T, QueueError>;

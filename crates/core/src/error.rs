//! Error types for the notification dispatcher's core domain logic

use thiserror::Error;
use uuid::Uuid;

/// Core dispatcher domain errors.
///
/// Delivery failures (transport transient/permanent) never surface here —
/// they are absorbed by the retry/fallback machinery. This enum covers the
/// conditions that legitimately abort a repository or ingress operation.
#[derive(Error, Debug)]
pub enum DispatcherError {
    #[error("notification not found: {0}")]
    NotificationNotFound(Uuid),

    #[error("outbox message not found: {0}")]
    OutboxMessageNotFound(Uuid),

    #[error("invalid notification title: {0}")]
    InvalidTitle(String),

    #[error("methods list must not be empty")]
    EmptyMethods,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Result type alias for dispatcher operations.
pub type DispatcherResult<T> = Result<T, DispatcherError>;

//! Outbox/CDC Bridge leaf errors.

use crate::errors::CoreError;

#[derive(Debug, thiserror::Error)]
pub enum OutboxError {
    #[error("failed to serialize outbox payload: {0}")]
    Serialization(String),
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl From<OutboxError> for CoreError {
    fn from(err: OutboxError) -> Self {
        match err {
            OutboxError::Serialization(msg) => CoreError::System(msg),
            OutboxError::Core(inner) => inner,
        }
    }
}

//! Order Service leaf errors.

use crate::errors::CoreError;

#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("illegal order state transition: {0}")]
    State(String),
    #[error("order not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl From<OrderError> for CoreError {
    fn from(err: OrderError) -> Self {
        match err {
            OrderError::Validation(msg) => CoreError::Validation(msg),
            OrderError::State(msg) => CoreError::State(msg),
            OrderError::NotFound(msg) => CoreError::NotFound(msg),
            OrderError::Core(inner) => inner,
        }
    }
}

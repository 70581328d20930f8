//! Account Service leaf errors, folding into `CoreError` at the saga
//! boundary.

use rust_decimal::Decimal;

use crate::errors::{BusinessReason, CoreError};

#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    #[error("insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: Decimal, available: Decimal },
    #[error("insufficient shares: required {required}, available {available}")]
    InsufficientShares { required: Decimal, available: Decimal },
    #[error("lock acquisition timed out")]
    LockTimeout,
    #[error("account or holding not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl From<AccountError> for CoreError {
    fn from(err: AccountError) -> Self {
        match err {
            AccountError::InsufficientBalance { required, available } => {
                CoreError::Business(BusinessReason::InsufficientBalance { required: required.to_string(), available: available.to_string() })
            }
            AccountError::InsufficientShares { required, available } => {
                CoreError::Business(BusinessReason::InsufficientShares { required: required.to_string(), available: available.to_string() })
            }
            AccountError::LockTimeout => CoreError::Technical("lock acquisition timed out".to_string()),
            AccountError::NotFound(msg) => CoreError::NotFound(msg),
            AccountError::Core(inner) => inner,
        }
    }
}

use loyalty_common::Points;
use thiserror::Error;

use crate::traits::StorageError;

#[derive(Debug, Error)]
pub enum AccountApiError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] StorageError),
    #[error("Invalid order number: {0}")]
    InvalidOrderNumber(String),
    #[error("Logins cannot be empty")]
    EmptyLogin,
    #[error("User account {0} does not exist")]
    UnknownAccount(i64),
    #[error("Insufficient funds. The balance is {balance}, but {requested} was requested")]
    InsufficientFunds { balance: Points, requested: Points },
}

impl AccountApiError {
    /// Lifts the storage errors that callers are expected to handle into their own variants.
    pub(crate) fn from_storage(e: StorageError) -> Self {
        match e {
            StorageError::AccountNotFound(id) => Self::UnknownAccount(id),
            StorageError::InsufficientFunds { balance, requested } => Self::InsufficientFunds { balance, requested },
            e => Self::DatabaseError(e),
        }
    }
}

use loyalty_common::Points;
use thiserror::Error;

use crate::db_types::OrderNumber;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database driver error: {0}")]
    DriverError(#[from] sqlx::Error),
    #[error("Database migration error: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),
    #[error("Order {0} does not exist")]
    OrderNotFound(OrderNumber),
    #[error("Account not found: {0}")]
    AccountNotFound(i64),
    #[error("The login '{0}' is already taken")]
    LoginTaken(String),
    #[error("Insufficient funds. The balance is {balance}, but {requested} was requested")]
    InsufficientFunds { balance: Points, requested: Points },
    #[error("Invalid amount: {0}. Amounts must be positive")]
    InvalidAmount(Points),
}

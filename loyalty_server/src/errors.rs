use loyalty_engine::accrual::PoolError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Could not initialize server. {0}")]
    InitializeError(String),
    #[error("Invalid server configuration. {0}")]
    ConfigurationError(String),
    #[error("An I/O error happened in the server. {0}")]
    IOError(#[from] std::io::Error),
    #[error("The accrual worker did not shut down cleanly. {0}")]
    AccrualWorkerError(#[from] PoolError),
    #[error("UnspecifiedError. {0}")]
    Unspecified(String),
}

use std::time::Duration;

use thiserror::Error;

use crate::db_types::OrderNumber;

#[derive(Debug, Error)]
pub enum AccrualError {
    #[error("Order {0} is not registered with the accrual service")]
    NotRegistered(OrderNumber),
    #[error("The accrual service is rate limiting requests. Retry after {0:?}")]
    RateLimited(Duration),
    #[error("Could not reach the accrual service: {0}")]
    Transport(String),
    #[error("The accrual service replied with an unexpected status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },
    #[error("The accrual service reply for order {order} could not be decoded: {reason}")]
    Malformed { order: OrderNumber, reason: String },
    #[error("Gave up on order {order} after {attempts} attempts. {last}")]
    RetriesExhausted {
        order: OrderNumber,
        attempts: u32,
        #[source]
        last: Box<AccrualError>,
    },
    #[error("Polling was cancelled")]
    Cancelled,
}

impl AccrualError {
    pub fn is_not_registered(&self) -> bool {
        matches!(self, Self::NotRegistered(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// The order this error relates to, where known
    pub fn order(&self) -> Option<&OrderNumber> {
        match self {
            Self::NotRegistered(order) => Some(order),
            Self::Malformed { order, .. } => Some(order),
            Self::RetriesExhausted { order, .. } => Some(order),
            _ => None,
        }
    }
}

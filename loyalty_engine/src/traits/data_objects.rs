use loyalty_common::Points;
use serde::Serialize;

use crate::db_types::Order;

/// The outcome of uploading an order number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum InsertOrderResult {
    /// The order is new and now belongs to the user.
    Inserted(Order),
    /// The same user uploaded this order number before.
    AlreadyUploaded(Order),
    /// Another user owns this order number.
    OwnedByAnotherUser(Order),
}

/// The outcome of the balance update transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum AccrualUpdate {
    /// The order moved to a new state and `credited` points were added to the owner's balance, which is now
    /// `balance`.
    Applied { order: Order, credited: Points, balance: Points },
    /// The order could not move to the requested state (it is terminal, or the result is stale), so nothing changed.
    Unchanged(Order),
}

impl AccrualUpdate {
    pub fn order(&self) -> &Order {
        match self {
            Self::Applied { order, .. } => order,
            Self::Unchanged(order) => order,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

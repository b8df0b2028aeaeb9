use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Utc};
use log::error;
use loyalty_common::Points;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[error("Conversion error: {0}")]
pub struct ConversionError(String);

//--------------------------------------      OrderNumber      ---------------------------------------------------------
/// The purchase order number a user uploads. It is unique across all users.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct OrderNumber(pub String);

impl FromStr for OrderNumber {
    type Err = ConversionError;

    /// Parses a user supplied order number. Only non-empty, all-digit strings are accepted.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit()) {
            return Err(ConversionError(format!("'{s}' is not a numeric order number")));
        }
        Ok(Self(s.to_string()))
    }
}

impl From<String> for OrderNumber {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for OrderNumber {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Display for OrderNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl OrderNumber {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

//--------------------------------------      OrderStatus      ---------------------------------------------------------
/// Order processing state. Orders only ever move forward:
/// `New -> Registered -> Processing -> (Processed | Invalid)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    /// The order was uploaded, but the accrual system has not picked it up yet.
    New,
    /// The accrual system knows about the order, but has not started calculating the reward.
    Registered,
    /// The reward for the order is being calculated.
    Processing,
    /// The accrual system refused to calculate a reward for the order.
    Invalid,
    /// The reward was calculated and credited.
    Processed,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 5] = [Self::New, Self::Registered, Self::Processing, Self::Invalid, Self::Processed];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Registered => "REGISTERED",
            Self::Processing => "PROCESSING",
            Self::Invalid => "INVALID",
            Self::Processed => "PROCESSED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Invalid | Self::Processed)
    }

    fn rank(&self) -> u8 {
        match self {
            Self::New => 0,
            Self::Registered => 1,
            Self::Processing => 2,
            Self::Invalid | Self::Processed => 3,
        }
    }

    /// Whether an order currently in this state may be moved to `next`. Terminal states accept nothing, and no state
    /// may move backwards. Re-applying the current (non-terminal) state is allowed.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        !self.is_terminal() && next.rank() >= self.rank()
    }

    /// All the states from which an order may move to `next`.
    pub fn predecessors_of(next: OrderStatus) -> Vec<OrderStatus> {
        Self::ALL.into_iter().filter(|s| s.can_transition_to(next)).collect()
    }
}

impl Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEW" => Ok(Self::New),
            "REGISTERED" => Ok(Self::Registered),
            "PROCESSING" => Ok(Self::Processing),
            "INVALID" => Ok(Self::Invalid),
            "PROCESSED" => Ok(Self::Processed),
            s => Err(ConversionError(format!("Invalid order status: {s}"))),
        }
    }
}

impl TryFrom<String> for OrderStatus {
    type Error = ConversionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse().map_err(|e| {
            error!("🗃️ Unknown order status '{value}' found in the database");
            e
        })
    }
}

//--------------------------------------         Order         ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct Order {
    pub id: i64,
    pub order_number: OrderNumber,
    pub user_id: i64,
    pub accrual: Points,
    #[sqlx(try_from = "String")]
    pub status: OrderStatus,
    pub uploaded_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

//--------------------------------------      UserAccount      ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct UserAccount {
    pub id: i64,
    pub login: String,
    pub current_balance: Points,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

//--------------------------------------       LedgerKind      ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerKind {
    /// Points earned for an order
    Accrual,
    /// Points spent by the user
    Withdraw,
}

impl LedgerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accrual => "accrual",
            Self::Withdraw => "withdraw",
        }
    }
}

impl Display for LedgerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for LedgerKind {
    type Error = ConversionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "accrual" => Ok(Self::Accrual),
            "withdraw" => Ok(Self::Withdraw),
            s => Err(ConversionError(format!("Invalid ledger entry type: {s}"))),
        }
    }
}

//--------------------------------------      LedgerEntry      ---------------------------------------------------------
/// An append-only record of a balance change. Credits are positive, withdrawals are negative.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct LedgerEntry {
    pub id: i64,
    pub user_id: i64,
    pub order_number: OrderNumber,
    pub amount: Points,
    #[sqlx(try_from = "String")]
    pub kind: LedgerKind,
    pub updated_at: DateTime<Utc>,
}

//--------------------------------------        Balance        ---------------------------------------------------------
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Balance {
    pub current: Points,
    /// The sum of all withdrawals, as a positive number.
    pub withdrawn: Points,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn order_numbers_must_be_numeric() {
        assert_eq!("7601295780".parse::<OrderNumber>().unwrap().as_str(), "7601295780");
        assert!("".parse::<OrderNumber>().is_err());
        assert!("12a4".parse::<OrderNumber>().is_err());
        assert_eq!(OrderNumber::from("42").to_string(), "#42");
    }

    #[test]
    fn status_round_trip() {
        for status in OrderStatus::ALL {
            assert_eq!(status.as_str().parse::<OrderStatus>().unwrap(), status);
        }
        assert!("processed".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn statuses_only_move_forward() {
        use OrderStatus::*;
        assert!(New.can_transition_to(Registered));
        assert!(New.can_transition_to(Processed));
        assert!(Processing.can_transition_to(Processing));
        assert!(!Processing.can_transition_to(Registered));
        assert!(!Processed.can_transition_to(Processed));
        assert!(!Invalid.can_transition_to(Processed));
        assert_eq!(OrderStatus::predecessors_of(Processed), vec![New, Registered, Processing]);
        assert_eq!(OrderStatus::predecessors_of(Registered), vec![New, Registered]);
    }
}

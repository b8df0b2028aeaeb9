use std::time::Duration;

use loyalty_common::Points;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::{
    accrual::AccrualError,
    db_types::{OrderNumber, OrderStatus},
};

/// The order states reported by the accrual service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccrualStatus {
    Registered,
    Processing,
    Invalid,
    Processed,
}

impl From<AccrualStatus> for OrderStatus {
    fn from(value: AccrualStatus) -> Self {
        match value {
            AccrualStatus::Registered => OrderStatus::Registered,
            AccrualStatus::Processing => OrderStatus::Processing,
            AccrualStatus::Invalid => OrderStatus::Invalid,
            AccrualStatus::Processed => OrderStatus::Processed,
        }
    }
}

/// The body of a successful reply from the accrual service, e.g.
/// `{"order": "2377225624", "status": "PROCESSED", "accrual": 500}`.
/// `accrual` is only present for processed orders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccrualResult {
    pub order: OrderNumber,
    pub status: AccrualStatus,
    #[serde(default)]
    pub accrual: Points,
}

/// The classified outcome of a single polling attempt
#[derive(Debug)]
pub enum PollOutcome {
    /// 200, with a body that decoded
    Success(AccrualResult),
    /// 204. The order is unknown to the accrual service. Final.
    NotRegistered,
    /// 429, with the delay the service asked for
    RateLimited(Duration),
    /// Any other status, or a transport failure. Worth retrying.
    Transient(AccrualError),
    /// 200, but the body did not decode. Not worth retrying.
    Malformed(String),
}

/// One order to poll during a reconciliation cycle, along with the channels the outcome must be delivered on.
#[derive(Debug)]
pub struct Task {
    pub base_url: String,
    pub order_number: OrderNumber,
    pub results: mpsc::Sender<AccrualResult>,
    pub errors: mpsc::Sender<AccrualError>,
}

impl Task {
    pub fn new(
        base_url: impl Into<String>,
        order_number: OrderNumber,
        results: mpsc::Sender<AccrualResult>,
        errors: mpsc::Sender<AccrualError>,
    ) -> Self {
        Self { base_url: base_url.into(), order_number, results, errors }
    }
}

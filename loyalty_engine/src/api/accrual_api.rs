//! The storage side of accrual reconciliation.

use std::fmt::Debug;

use log::*;

use crate::{
    accrual::AccrualResult,
    db_types::{OrderNumber, OrderStatus},
    traits::{AccrualManagement, AccrualUpdate, StorageError},
};

/// `AccrualApi` sits between the reconciliation driver and the storage backend. It finds the orders that still need
/// polling, and turns accrual results into balance updates.
#[derive(Clone)]
pub struct AccrualApi<B> {
    db: B,
}

impl<B: Debug> Debug for AccrualApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AccrualApi ({:?})", self.db)
    }
}

impl<B> AccrualApi<B>
where B: AccrualManagement
{
    pub fn new(db: B) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &B {
        &self.db
    }

    /// The numbers of all orders that are neither `PROCESSED` nor `INVALID`
    pub async fn unfinished_orders(&self) -> Result<Vec<OrderNumber>, StorageError> {
        let orders = self.db.fetch_unfinished_orders().await?;
        trace!("🔄️ {} unfinished orders in storage", orders.len());
        Ok(orders)
    }

    /// Applies an accrual result. Results for orders that already reached a terminal state are discarded, and
    /// reported as [`AccrualUpdate::Unchanged`]. The storage transaction repeats the check, so a result that races
    /// with another one for the same order is also harmless.
    pub async fn process_result(&self, result: &AccrualResult) -> Result<AccrualUpdate, StorageError> {
        let order =
            self.db.fetch_order(&result.order).await?.ok_or_else(|| StorageError::OrderNotFound(result.order.clone()))?;
        if order.status.is_terminal() {
            debug!("🔄️ Order {} is already {}. Discarding the accrual result", order.order_number, order.status);
            return Ok(AccrualUpdate::Unchanged(order));
        }
        let status = OrderStatus::from(result.status);
        self.db.apply_accrual(&result.order, status, result.accrual).await
    }
}

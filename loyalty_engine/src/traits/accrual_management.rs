use std::future::Future;

use loyalty_common::Points;

use crate::{
    db_types::{Order, OrderNumber, OrderStatus},
    traits::{AccrualUpdate, StorageError},
};

/// The storage behaviour the accrual reconciliation loop depends on.
pub trait AccrualManagement: Clone + Send + Sync + 'static {
    /// Returns the numbers of all orders that are not yet `PROCESSED` or `INVALID`.
    fn fetch_unfinished_orders(&self) -> impl Future<Output = Result<Vec<OrderNumber>, StorageError>> + Send;

    fn fetch_order(
        &self,
        order_number: &OrderNumber,
    ) -> impl Future<Output = Result<Option<Order>, StorageError>> + Send;

    /// Applies an accrual decision to an order in a single atomic transaction:
    /// * the order moves to `status`, but only if its current status may still move there,
    /// * if `status` is `PROCESSED` and `accrual` is positive, an `accrual` ledger entry is appended and the owner's
    ///   balance is credited with `accrual`.
    ///
    /// Any failure rolls the whole transaction back. Applying the same result twice is a no-op the second time, and
    /// returns [`AccrualUpdate::Unchanged`].
    fn apply_accrual(
        &self,
        order_number: &OrderNumber,
        status: OrderStatus,
        accrual: Points,
    ) -> impl Future<Output = Result<AccrualUpdate, StorageError>> + Send;
}

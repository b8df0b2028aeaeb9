use std::future::Future;

use loyalty_common::Points;

use crate::{
    db_types::{Balance, LedgerEntry, Order, OrderNumber, UserAccount},
    traits::{InsertOrderResult, StorageError},
};

/// The `AccountManagement` trait defines the behaviour for managing users, their orders and their balances.
pub trait AccountManagement: Clone + Send + Sync + 'static {
    /// Creates a new user with a zero balance. Logins are unique.
    fn create_user(&self, login: &str) -> impl Future<Output = Result<UserAccount, StorageError>> + Send;

    fn fetch_user_account(&self, user_id: i64) -> impl Future<Output = Result<Option<UserAccount>, StorageError>> + Send;

    fn fetch_user_by_login(&self, login: &str) -> impl Future<Output = Result<Option<UserAccount>, StorageError>> + Send;

    /// Records a freshly uploaded order in the `NEW` state. Uploading the same number twice is idempotent for the
    /// owner and reported as a conflict for everyone else.
    fn insert_order(
        &self,
        user_id: i64,
        order_number: &OrderNumber,
    ) -> impl Future<Output = Result<InsertOrderResult, StorageError>> + Send;

    /// All orders of the user, newest first.
    fn fetch_orders_for_user(&self, user_id: i64) -> impl Future<Output = Result<Vec<Order>, StorageError>> + Send;

    fn fetch_balance(&self, user_id: i64) -> impl Future<Output = Result<Balance, StorageError>> + Send;

    /// Spends `amount` points against `order_number` in a single atomic transaction. The withdrawal is rejected with
    /// [`StorageError::InsufficientFunds`] if it would make the balance negative; nothing is written in that case.
    fn withdraw(
        &self,
        user_id: i64,
        order_number: &OrderNumber,
        amount: Points,
    ) -> impl Future<Output = Result<LedgerEntry, StorageError>> + Send;

    /// All withdrawals of the user, newest first.
    fn fetch_withdrawals(&self, user_id: i64) -> impl Future<Output = Result<Vec<LedgerEntry>, StorageError>> + Send;
}

//! Unifies API for accessing accounts, orders and balances.

use std::fmt::Debug;

use log::*;
use loyalty_common::Points;

use crate::{
    api::errors::AccountApiError,
    db_types::{Balance, LedgerEntry, Order, OrderNumber, UserAccount},
    traits::{AccountManagement, InsertOrderResult},
};

/// The `AccountApi` provides a unified API for accessing user accounts.
#[derive(Clone)]
pub struct AccountApi<B> {
    db: B,
}

impl<B: Debug> Debug for AccountApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AccountApi ({:?})", self.db)
    }
}

impl<B> AccountApi<B>
where B: AccountManagement
{
    pub fn new(db: B) -> Self {
        Self { db }
    }

    pub async fn register_user(&self, login: &str) -> Result<UserAccount, AccountApiError> {
        let login = login.trim();
        if login.is_empty() {
            return Err(AccountApiError::EmptyLogin);
        }
        self.db.create_user(login).await.map_err(AccountApiError::from_storage)
    }

    /// Fetches the user account for the given id. If no account exists, `None` is returned.
    pub async fn account_by_id(&self, user_id: i64) -> Result<Option<UserAccount>, AccountApiError> {
        Ok(self.db.fetch_user_account(user_id).await?)
    }

    pub async fn account_by_login(&self, login: &str) -> Result<Option<UserAccount>, AccountApiError> {
        Ok(self.db.fetch_user_by_login(login).await?)
    }

    /// Records an order number for the user. The number must be numeric. The result tells the caller whether the
    /// order is new, was uploaded by this user before, or belongs to someone else.
    pub async fn upload_order(&self, user_id: i64, order_number: &str) -> Result<InsertOrderResult, AccountApiError> {
        let order_number =
            order_number.parse::<OrderNumber>().map_err(|e| AccountApiError::InvalidOrderNumber(e.to_string()))?;
        let result = self.db.insert_order(user_id, &order_number).await.map_err(AccountApiError::from_storage)?;
        if let InsertOrderResult::OwnedByAnotherUser(order) = &result {
            debug!("Order {order_number} was uploaded by user #{user_id}, but it belongs to user #{}", order.user_id);
        }
        Ok(result)
    }

    pub async fn orders(&self, user_id: i64) -> Result<Vec<Order>, AccountApiError> {
        Ok(self.db.fetch_orders_for_user(user_id).await?)
    }

    pub async fn balance(&self, user_id: i64) -> Result<Balance, AccountApiError> {
        self.db.fetch_balance(user_id).await.map_err(AccountApiError::from_storage)
    }

    /// Spends `amount` points against `order_number`. Overdrafts are rejected with
    /// [`AccountApiError::InsufficientFunds`] and leave the balance untouched.
    pub async fn withdraw(&self, user_id: i64, order_number: &str, amount: Points) -> Result<LedgerEntry, AccountApiError> {
        let order_number =
            order_number.parse::<OrderNumber>().map_err(|e| AccountApiError::InvalidOrderNumber(e.to_string()))?;
        self.db.withdraw(user_id, &order_number, amount).await.map_err(AccountApiError::from_storage)
    }

    /// The user's withdrawals, newest first
    pub async fn withdrawals(&self, user_id: i64) -> Result<Vec<LedgerEntry>, AccountApiError> {
        Ok(self.db.fetch_withdrawals(user_id).await?)
    }
}

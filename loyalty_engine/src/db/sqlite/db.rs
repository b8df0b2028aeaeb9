use std::fmt::Debug;

use log::*;
use loyalty_common::Points;
use sqlx::SqlitePool;

use super::{ledger, new_pool, orders, run_migrations, users};
use crate::{
    db_types::{Balance, LedgerEntry, LedgerKind, Order, OrderNumber, OrderStatus, UserAccount},
    traits::{AccountManagement, AccrualManagement, AccrualUpdate, InsertOrderResult, StorageError},
};

#[derive(Clone)]
pub struct SqliteDatabase {
    url: String,
    pool: SqlitePool,
}

impl Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "SqliteDatabase ({:?})", self.pool)
    }
}

impl SqliteDatabase {
    /// Creates a new database API object
    pub async fn new_with_url(url: &str, max_connections: u32) -> Result<Self, StorageError> {
        let pool = new_pool(url, max_connections).await?;
        trace!("🗃️ Created new SQLite connection pool for {url}");
        Ok(Self { url: url.to_string(), pool })
    }

    pub fn url(&self) -> &str {
        self.url.as_str()
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Brings the schema up to date
    pub async fn migrate(&self) -> Result<(), StorageError> {
        run_migrations(&self.pool).await
    }

    pub async fn close(&self) {
        self.pool.close().await;
        debug!("🗃️ Connection pool for {} closed", self.url);
    }

    /// The ledger rows recorded against an order
    pub async fn fetch_ledger_for_order(&self, order_number: &OrderNumber) -> Result<Vec<LedgerEntry>, StorageError> {
        let mut conn = self.pool.acquire().await?;
        ledger::fetch_entries_for_order(order_number, &mut conn).await
    }
}

impl AccrualManagement for SqliteDatabase {
    async fn fetch_unfinished_orders(&self) -> Result<Vec<OrderNumber>, StorageError> {
        let mut conn = self.pool.acquire().await?;
        orders::fetch_unfinished_order_numbers(&mut conn).await
    }

    async fn fetch_order(&self, order_number: &OrderNumber) -> Result<Option<Order>, StorageError> {
        let mut conn = self.pool.acquire().await?;
        orders::fetch_order_by_number(order_number, &mut conn).await
    }

    /// In a single atomic transaction:
    /// * the order moves to `status` if its current status allows it. If it does not, nothing else happens.
    /// * the order's accrual is recorded. Only `PROCESSED` orders carry an accrual.
    /// * for a positive accrual, a ledger row is appended and the owner's balance is credited.
    ///
    /// The conditional update runs first, so the transaction takes the write lock before it reads anything.
    async fn apply_accrual(
        &self,
        order_number: &OrderNumber,
        status: OrderStatus,
        accrual: Points,
    ) -> Result<AccrualUpdate, StorageError> {
        if accrual < Points::default() {
            return Err(StorageError::InvalidAmount(accrual));
        }
        let credited = if status == OrderStatus::Processed { accrual } else { Points::default() };
        let mut tx = self.pool.begin().await?;
        let order = match orders::guarded_status_update(order_number, status, credited, &mut tx).await? {
            Some(order) => order,
            None => {
                let existing = orders::fetch_order_by_number(order_number, &mut tx)
                    .await?
                    .ok_or_else(|| StorageError::OrderNotFound(order_number.clone()))?;
                tx.commit().await?;
                debug!(
                    "🗃️ Order {order_number} is {}. It cannot move to {status}, so the update is ignored",
                    existing.status
                );
                return Ok(AccrualUpdate::Unchanged(existing));
            },
        };
        let balance = if credited.is_positive() {
            ledger::append(order.user_id, order_number, credited, LedgerKind::Accrual, &mut tx).await?;
            users::credit_balance(order.user_id, credited, &mut tx).await?
        } else {
            users::user_account_by_id(order.user_id, &mut tx)
                .await?
                .map(|u| u.current_balance)
                .ok_or(StorageError::AccountNotFound(order.user_id))?
        };
        tx.commit().await?;
        debug!("🗃️ Order {order_number} is now {status}. {credited} points credited to user #{}", order.user_id);
        Ok(AccrualUpdate::Applied { order, credited, balance })
    }
}

impl AccountManagement for SqliteDatabase {
    async fn create_user(&self, login: &str) -> Result<UserAccount, StorageError> {
        let mut conn = self.pool.acquire().await?;
        users::create_user(login, &mut conn).await
    }

    async fn fetch_user_account(&self, user_id: i64) -> Result<Option<UserAccount>, StorageError> {
        let mut conn = self.pool.acquire().await?;
        users::user_account_by_id(user_id, &mut conn).await
    }

    async fn fetch_user_by_login(&self, login: &str) -> Result<Option<UserAccount>, StorageError> {
        let mut conn = self.pool.acquire().await?;
        users::user_account_by_login(login, &mut conn).await
    }

    async fn insert_order(&self, user_id: i64, order_number: &OrderNumber) -> Result<InsertOrderResult, StorageError> {
        let mut tx = self.pool.begin().await?;
        let result = orders::idempotent_insert(user_id, order_number, &mut tx).await?;
        tx.commit().await?;
        Ok(result)
    }

    async fn fetch_orders_for_user(&self, user_id: i64) -> Result<Vec<Order>, StorageError> {
        let mut conn = self.pool.acquire().await?;
        orders::fetch_orders_for_user(user_id, &mut conn).await
    }

    async fn fetch_balance(&self, user_id: i64) -> Result<Balance, StorageError> {
        let mut conn = self.pool.acquire().await?;
        let account =
            users::user_account_by_id(user_id, &mut conn).await?.ok_or(StorageError::AccountNotFound(user_id))?;
        let withdrawn = ledger::total_withdrawn(user_id, &mut conn).await?;
        Ok(Balance { current: account.current_balance, withdrawn })
    }

    /// In a single atomic transaction:
    /// * the balance is reduced by `amount`, provided it covers the amount,
    /// * a negative `withdraw` ledger row is appended.
    async fn withdraw(&self, user_id: i64, order_number: &OrderNumber, amount: Points) -> Result<LedgerEntry, StorageError> {
        if !amount.is_positive() {
            return Err(StorageError::InvalidAmount(amount));
        }
        let mut tx = self.pool.begin().await?;
        let Some(balance) = users::debit_balance(user_id, amount, &mut tx).await? else {
            let account = users::user_account_by_id(user_id, &mut tx).await?;
            tx.rollback().await?;
            return match account {
                Some(account) => {
                    Err(StorageError::InsufficientFunds { balance: account.current_balance, requested: amount })
                },
                None => Err(StorageError::AccountNotFound(user_id)),
            };
        };
        let entry = ledger::append(user_id, order_number, -amount, LedgerKind::Withdraw, &mut tx).await?;
        tx.commit().await?;
        info!("🗃️ User #{user_id} withdrew {amount} points against order {order_number}. New balance: {balance}");
        Ok(entry)
    }

    async fn fetch_withdrawals(&self, user_id: i64) -> Result<Vec<LedgerEntry>, StorageError> {
        let mut conn = self.pool.acquire().await?;
        ledger::fetch_entries(user_id, LedgerKind::Withdraw, &mut conn).await
    }
}

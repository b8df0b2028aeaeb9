use loyalty_common::Points;
use sqlx::SqliteConnection;

use crate::{
    db_types::{LedgerEntry, LedgerKind, OrderNumber},
    traits::StorageError,
};

/// Appends a row to the ledger. Ledger rows are never updated or deleted.
pub(crate) async fn append(
    user_id: i64,
    order_number: &OrderNumber,
    amount: Points,
    kind: LedgerKind,
    conn: &mut SqliteConnection,
) -> Result<LedgerEntry, StorageError> {
    let entry = sqlx::query_as(
        "INSERT INTO ledger (user_id, order_number, amount, kind) VALUES ($1, $2, $3, $4) RETURNING *",
    )
    .bind(user_id)
    .bind(order_number)
    .bind(amount)
    .bind(kind.as_str())
    .fetch_one(conn)
    .await?;
    Ok(entry)
}

pub async fn fetch_entries(
    user_id: i64,
    kind: LedgerKind,
    conn: &mut SqliteConnection,
) -> Result<Vec<LedgerEntry>, StorageError> {
    let entries = sqlx::query_as("SELECT * FROM ledger WHERE user_id = $1 AND kind = $2 ORDER BY updated_at DESC, id DESC")
        .bind(user_id)
        .bind(kind.as_str())
        .fetch_all(conn)
        .await?;
    Ok(entries)
}

/// The sum of all withdrawals, as a positive number
pub async fn total_withdrawn(user_id: i64, conn: &mut SqliteConnection) -> Result<Points, StorageError> {
    let total: i64 = sqlx::query_scalar("SELECT COALESCE(-SUM(amount), 0) FROM ledger WHERE user_id = $1 AND kind = $2")
        .bind(user_id)
        .bind(LedgerKind::Withdraw.as_str())
        .fetch_one(conn)
        .await?;
    Ok(Points::from(total))
}

/// All ledger rows for an order, oldest first
pub async fn fetch_entries_for_order(
    order_number: &OrderNumber,
    conn: &mut SqliteConnection,
) -> Result<Vec<LedgerEntry>, StorageError> {
    let entries = sqlx::query_as("SELECT * FROM ledger WHERE order_number = $1 ORDER BY id ASC")
        .bind(order_number)
        .fetch_all(conn)
        .await?;
    Ok(entries)
}

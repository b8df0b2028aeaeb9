use log::debug;
use loyalty_common::Points;
use sqlx::SqliteConnection;

use crate::{db_types::UserAccount, traits::StorageError};

pub async fn create_user(login: &str, conn: &mut SqliteConnection) -> Result<UserAccount, StorageError> {
    let user: Option<UserAccount> = sqlx::query_as(
        "INSERT INTO users (login) VALUES ($1) ON CONFLICT (login) DO NOTHING RETURNING *",
    )
    .bind(login)
    .fetch_optional(conn)
    .await?;
    let user = user.ok_or_else(|| StorageError::LoginTaken(login.to_string()))?;
    debug!("🗃️ Created user account #{} for '{login}'", user.id);
    Ok(user)
}

pub async fn user_account_by_id(user_id: i64, conn: &mut SqliteConnection) -> Result<Option<UserAccount>, StorageError> {
    let user = sqlx::query_as("SELECT * FROM users WHERE id = $1").bind(user_id).fetch_optional(conn).await?;
    Ok(user)
}

pub async fn user_account_by_login(login: &str, conn: &mut SqliteConnection) -> Result<Option<UserAccount>, StorageError> {
    let user = sqlx::query_as("SELECT * FROM users WHERE login = $1").bind(login).fetch_optional(conn).await?;
    Ok(user)
}

/// Adds `amount` to the user's balance and returns the new balance. The arithmetic happens in SQL, so concurrent
/// credits cannot overwrite each other.
pub(crate) async fn credit_balance(
    user_id: i64,
    amount: Points,
    conn: &mut SqliteConnection,
) -> Result<Points, StorageError> {
    let balance: Option<Points> = sqlx::query_scalar(
        r#"UPDATE users SET current_balance = current_balance + $1, updated_at = CURRENT_TIMESTAMP
           WHERE id = $2 RETURNING current_balance"#,
    )
    .bind(amount)
    .bind(user_id)
    .fetch_optional(conn)
    .await?;
    balance.ok_or(StorageError::AccountNotFound(user_id))
}

/// Subtracts `amount` from the user's balance, but only if the balance covers it. Returns the new balance, or `None`
/// if no row was touched.
pub(crate) async fn debit_balance(
    user_id: i64,
    amount: Points,
    conn: &mut SqliteConnection,
) -> Result<Option<Points>, StorageError> {
    let balance = sqlx::query_scalar(
        r#"UPDATE users SET current_balance = current_balance - $1, updated_at = CURRENT_TIMESTAMP
           WHERE id = $2 AND current_balance >= $1 RETURNING current_balance"#,
    )
    .bind(amount)
    .bind(user_id)
    .fetch_optional(conn)
    .await?;
    Ok(balance)
}

use log::{debug, trace};
use loyalty_common::Points;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

use crate::{
    db_types::{Order, OrderNumber, OrderStatus},
    traits::{InsertOrderResult, StorageError},
};

/// Inserts a new order in the `NEW` state, unless the order number is already known. The insert is the first
/// statement, so when this runs inside a transaction, the transaction holds the write lock from the start.
pub async fn idempotent_insert(
    user_id: i64,
    order_number: &OrderNumber,
    conn: &mut SqliteConnection,
) -> Result<InsertOrderResult, StorageError> {
    let inserted: Option<Order> = sqlx::query_as(
        r#"
            INSERT INTO orders (order_number, user_id) VALUES ($1, $2)
            ON CONFLICT (order_number) DO NOTHING
            RETURNING *;
        "#,
    )
    .bind(order_number)
    .bind(user_id)
    .fetch_optional(&mut *conn)
    .await?;
    if let Some(order) = inserted {
        debug!("🗃️ Order {order_number} uploaded by user #{user_id}");
        return Ok(InsertOrderResult::Inserted(order));
    }
    let existing =
        fetch_order_by_number(order_number, conn).await?.ok_or_else(|| StorageError::OrderNotFound(order_number.clone()))?;
    if existing.user_id == user_id {
        Ok(InsertOrderResult::AlreadyUploaded(existing))
    } else {
        Ok(InsertOrderResult::OwnedByAnotherUser(existing))
    }
}

pub async fn fetch_order_by_number(
    order_number: &OrderNumber,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, StorageError> {
    let order = sqlx::query_as("SELECT * FROM orders WHERE order_number = $1")
        .bind(order_number)
        .fetch_optional(conn)
        .await?;
    Ok(order)
}

/// All orders belonging to the user, newest first
pub async fn fetch_orders_for_user(user_id: i64, conn: &mut SqliteConnection) -> Result<Vec<Order>, StorageError> {
    let orders = sqlx::query_as("SELECT * FROM orders WHERE user_id = $1 ORDER BY uploaded_at DESC, id DESC")
        .bind(user_id)
        .fetch_all(conn)
        .await?;
    Ok(orders)
}

/// The order numbers of every order that has not reached a terminal state, oldest first.
pub async fn fetch_unfinished_order_numbers(conn: &mut SqliteConnection) -> Result<Vec<OrderNumber>, StorageError> {
    let mut builder = QueryBuilder::<Sqlite>::new("SELECT order_number FROM orders WHERE status NOT IN (");
    let mut statuses = builder.separated(", ");
    OrderStatus::ALL.iter().filter(|s| s.is_terminal()).for_each(|s| {
        statuses.push_bind(s.as_str());
    });
    builder.push(") ORDER BY uploaded_at ASC, id ASC");
    trace!("🗃️ Executing query: {}", builder.sql());
    let numbers = builder.build_query_scalar::<OrderNumber>().fetch_all(conn).await?;
    Ok(numbers)
}

/// Moves the order to `status` and sets its accrual, but only if its current status may still move to `status`.
/// Returns the updated order, or `None` if no row was touched (the order is missing, or the transition is not
/// allowed).
pub(crate) async fn guarded_status_update(
    order_number: &OrderNumber,
    status: OrderStatus,
    accrual: Points,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, StorageError> {
    let mut builder = QueryBuilder::<Sqlite>::new("UPDATE orders SET status = ");
    builder.push_bind(status.as_str());
    builder.push(", accrual = ");
    builder.push_bind(accrual);
    builder.push(", updated_at = CURRENT_TIMESTAMP WHERE order_number = ");
    builder.push_bind(order_number);
    builder.push(" AND status IN (");
    let mut allowed = builder.separated(", ");
    for s in OrderStatus::predecessors_of(status) {
        allowed.push_bind(s.as_str());
    }
    builder.push(") RETURNING *");
    trace!("🗃️ Executing query: {}", builder.sql());
    let order = builder.build_query_as::<Order>().fetch_optional(conn).await?;
    Ok(order)
}

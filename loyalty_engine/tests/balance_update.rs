use loyalty_common::Points;
use loyalty_engine::{
    accrual::{AccrualResult, AccrualStatus},
    db_types::{LedgerKind, OrderNumber, OrderStatus},
    test_utils::prepare_env::{prepare_test_env, random_db_path},
    AccountManagement,
    AccrualApi,
    AccrualManagement,
    AccrualUpdate,
    SqliteDatabase,
    StorageError,
};

async fn new_db() -> SqliteDatabase {
    let url = random_db_path();
    prepare_test_env(&url).await;
    SqliteDatabase::new_with_url(&url, 5).await.expect("Error creating database")
}

/// Gives the user `amount` points by processing a throwaway order
async fn fund(db: &SqliteDatabase, user_id: i64, order: &str, amount: Points) {
    db.insert_order(user_id, &order.into()).await.unwrap();
    let update = db.apply_accrual(&order.into(), OrderStatus::Processed, amount).await.unwrap();
    assert!(update.is_applied());
}

#[tokio::test]
async fn processed_accrual_is_credited_once() {
    let db = new_db().await;
    let user = db.create_user("alice").await.unwrap();
    fund(&db, user.id, "1111", Points::from_points(100)).await;
    let order_number = OrderNumber::from("2377225624");
    db.insert_order(user.id, &order_number).await.unwrap();

    let update = db.apply_accrual(&order_number, OrderStatus::Processed, Points::from_points(50)).await.unwrap();
    match update {
        AccrualUpdate::Applied { order, credited, balance } => {
            assert_eq!(order.status, OrderStatus::Processed);
            assert_eq!(order.accrual, Points::from_points(50));
            assert_eq!(credited, Points::from_points(50));
            assert_eq!(balance, Points::from_points(150));
        },
        AccrualUpdate::Unchanged(order) => panic!("Expected the update to apply. Order: {order:?}"),
    }
    let ledger = db.fetch_ledger_for_order(&order_number).await.unwrap();
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].kind, LedgerKind::Accrual);
    assert_eq!(ledger[0].amount, Points::from_points(50));
    assert_eq!(ledger[0].user_id, user.id);

    // The same terminal result again changes nothing
    let again = db.apply_accrual(&order_number, OrderStatus::Processed, Points::from_points(50)).await.unwrap();
    assert!(!again.is_applied());
    assert_eq!(again.order().status, OrderStatus::Processed);
    assert_eq!(db.fetch_ledger_for_order(&order_number).await.unwrap().len(), 1);
    assert_eq!(db.fetch_balance(user.id).await.unwrap().current, Points::from_points(150));
}

#[tokio::test]
async fn only_forward_transitions_apply() {
    let db = new_db().await;
    let user = db.create_user("bob").await.unwrap();
    let order_number = OrderNumber::from("4561261212");
    db.insert_order(user.id, &order_number).await.unwrap();

    let update = db.apply_accrual(&order_number, OrderStatus::Processing, Points::default()).await.unwrap();
    assert!(update.is_applied());
    assert_eq!(update.order().status, OrderStatus::Processing);

    let backwards = db.apply_accrual(&order_number, OrderStatus::Registered, Points::default()).await.unwrap();
    assert!(!backwards.is_applied());
    assert_eq!(backwards.order().status, OrderStatus::Processing);

    // Accruals reported for non-processed states are not credited
    let invalid = db.apply_accrual(&order_number, OrderStatus::Invalid, Points::from_points(10)).await.unwrap();
    match invalid {
        AccrualUpdate::Applied { order, credited, balance } => {
            assert_eq!(order.status, OrderStatus::Invalid);
            assert!(order.accrual.is_zero());
            assert!(credited.is_zero());
            assert!(balance.is_zero());
        },
        AccrualUpdate::Unchanged(_) => panic!("INVALID should have been applied"),
    }
    let late = db.apply_accrual(&order_number, OrderStatus::Processed, Points::from_points(10)).await.unwrap();
    assert!(!late.is_applied());
    assert!(db.fetch_ledger_for_order(&order_number).await.unwrap().is_empty());
    assert!(db.fetch_balance(user.id).await.unwrap().current.is_zero());
}

#[tokio::test]
async fn failed_credit_rolls_back_the_whole_update() {
    let db = new_db().await;
    let user = db.create_user("erin").await.unwrap();
    let other = db.create_user("frank").await.unwrap();
    let order_number = OrderNumber::from("42");
    db.insert_order(user.id, &order_number).await.unwrap();
    // A stray accrual row for the order makes the ledger append violate the single-accrual index
    sqlx::query("INSERT INTO ledger (user_id, order_number, amount, kind) VALUES ($1, $2, $3, 'accrual')")
        .bind(other.id)
        .bind(order_number.as_str())
        .bind(100i64)
        .execute(db.pool())
        .await
        .unwrap();

    let err = db.apply_accrual(&order_number, OrderStatus::Processed, Points::from_points(50)).await.unwrap_err();
    assert!(matches!(err, StorageError::DriverError(_)), "Unexpected error: {err:?}");

    let order = db.fetch_order(&order_number).await.unwrap().expect("Order should still exist");
    assert_eq!(order.status, OrderStatus::New);
    assert!(order.accrual.is_zero());
    assert!(db.fetch_balance(user.id).await.unwrap().current.is_zero());
    let ledger = db.fetch_ledger_for_order(&order_number).await.unwrap();
    assert!(ledger.iter().all(|e| e.user_id != user.id), "The owner was given a ledger row: {ledger:?}");
    assert_eq!(ledger.len(), 1);
    // Still unfinished, so it will be polled again
    let unfinished = db.fetch_unfinished_orders().await.unwrap();
    assert!(unfinished.contains(&order_number));
}

#[tokio::test]
async fn unknown_orders_are_reported() {
    let db = new_db().await;
    let err = db.apply_accrual(&"999".into(), OrderStatus::Processed, Points::from_points(1)).await.unwrap_err();
    assert!(matches!(err, StorageError::OrderNotFound(n) if n.as_str() == "999"));
}

#[tokio::test]
async fn unfinished_orders_exclude_terminal_states() {
    let db = new_db().await;
    let user = db.create_user("carol").await.unwrap();
    for n in ["100", "200", "300", "400"] {
        db.insert_order(user.id, &n.into()).await.unwrap();
    }
    db.apply_accrual(&"100".into(), OrderStatus::Processed, Points::from_points(5)).await.unwrap();
    db.apply_accrual(&"200".into(), OrderStatus::Invalid, Points::default()).await.unwrap();
    db.apply_accrual(&"300".into(), OrderStatus::Processing, Points::default()).await.unwrap();
    let unfinished = db.fetch_unfinished_orders().await.unwrap();
    let unfinished = unfinished.iter().map(|n| n.as_str()).collect::<Vec<_>>();
    assert_eq!(unfinished, vec!["300", "400"]);
}

#[tokio::test]
async fn racing_duplicate_results_credit_once() {
    let db = new_db().await;
    let user = db.create_user("dave").await.unwrap();
    let order_number = OrderNumber::from("12345678903");
    db.insert_order(user.id, &order_number).await.unwrap();

    let handles = (0..5)
        .map(|_| {
            let db = db.clone();
            let order_number = order_number.clone();
            tokio::spawn(async move {
                db.apply_accrual(&order_number, OrderStatus::Processed, Points::from_points(50)).await.unwrap()
            })
        })
        .collect::<Vec<_>>();
    let mut applied = 0;
    for handle in handles {
        if handle.await.unwrap().is_applied() {
            applied += 1;
        }
    }
    assert_eq!(applied, 1);
    assert_eq!(db.fetch_balance(user.id).await.unwrap().current, Points::from_points(50));
    assert_eq!(db.fetch_ledger_for_order(&order_number).await.unwrap().len(), 1);
}

#[tokio::test]
async fn results_for_terminal_orders_are_discarded() {
    let db = new_db().await;
    let api = AccrualApi::new(db.clone());
    let user = db.create_user("erin").await.unwrap();
    db.insert_order(user.id, &"5000".into()).await.unwrap();

    let result = AccrualResult { order: "5000".into(), status: AccrualStatus::Processed, accrual: Points::from_points(20) };
    let update = api.process_result(&result).await.unwrap();
    assert!(update.is_applied());
    let update = api.process_result(&result).await.unwrap();
    assert!(!update.is_applied());

    let invalid = AccrualResult { order: "5000".into(), status: AccrualStatus::Invalid, accrual: Points::default() };
    let update = api.process_result(&invalid).await.unwrap();
    assert_eq!(update.order().status, OrderStatus::Processed);
    assert_eq!(db.fetch_balance(user.id).await.unwrap().current, Points::from_points(20));

    let unknown = AccrualResult { order: "6000".into(), status: AccrualStatus::Processed, accrual: Points::from_points(1) };
    assert!(matches!(api.process_result(&unknown).await, Err(StorageError::OrderNotFound(_))));
}

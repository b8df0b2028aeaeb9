mod misc {
    use actix_web::{body::MessageBody, test, test::TestRequest, App};

    use crate::routes::health;

    #[actix_web::test]
    async fn health_endpoint() {
        let app = test::init_service(App::new().service(health)).await;
        let req = TestRequest::get().uri("/health").to_request();
        let (_req, res) = test::call_service(&app, req).await.into_parts();
        let status = res.status();
        let body = res.into_body().try_into_bytes().unwrap();
        assert!(status.is_success());
        assert_eq!(body, "👍️\n");
    }
}

mod worker {
    use std::time::Duration;

    use loyalty_common::Points;
    use loyalty_engine::{
        accrual::{AccrualResult, AccrualStatus, PollOutcome, ReconciliationConfig},
        db_types::OrderStatus,
        test_utils::{
            prepare_env::{prepare_test_env, random_db_path},
            scripted_fetcher::ScriptedFetcher,
        },
        AccountManagement,
        AccrualManagement,
        SqliteDatabase,
    };
    use tokio_util::sync::CancellationToken;

    use crate::accrual_worker::start_accrual_worker;

    #[tokio::test]
    async fn worker_credits_points_and_stops_on_shutdown() {
        let url = random_db_path();
        prepare_test_env(&url).await;
        let db = SqliteDatabase::new_with_url(&url, 5).await.unwrap();
        let user = db.create_user("alice").await.unwrap();
        db.insert_order(user.id, &"2377225624".into()).await.unwrap();

        let fetcher = ScriptedFetcher::new();
        fetcher.script("2377225624", [PollOutcome::Success(AccrualResult {
            order: "2377225624".into(),
            status: AccrualStatus::Processed,
            accrual: Points::from_points(500),
        })]);
        let mut config = ReconciliationConfig::new("http://accrual.test");
        config.poll_interval = Duration::from_millis(50);
        let shutdown = CancellationToken::new();
        let worker = start_accrual_worker(db.clone(), fetcher, config, shutdown.clone());

        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let order = db.fetch_order(&"2377225624".into()).await.unwrap().unwrap();
            if order.status == OrderStatus::Processed {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "Order was never processed");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        shutdown.cancel();
        worker.await.unwrap().unwrap();
        assert_eq!(db.fetch_balance(user.id).await.unwrap().current, Points::from_points(500));
    }
}

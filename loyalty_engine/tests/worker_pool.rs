use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use loyalty_common::Points;
use loyalty_engine::{
    accrual::{
        AccrualError,
        AccrualFetcher,
        AccrualResult,
        AccrualStatus,
        PollOutcome,
        PoolError,
        Task,
        WorkerPool,
        WorkerPoolConfig,
    },
    db_types::OrderNumber,
    test_utils::scripted_fetcher::ScriptedFetcher,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const ACCRUAL_URL: &str = "http://accrual.test";

struct Channels {
    results_tx: mpsc::Sender<AccrualResult>,
    errors_tx: mpsc::Sender<AccrualError>,
    results: mpsc::Receiver<AccrualResult>,
    errors: mpsc::Receiver<AccrualError>,
}

impl Channels {
    fn new() -> Self {
        let (results_tx, results) = mpsc::channel(100);
        let (errors_tx, errors) = mpsc::channel(100);
        Self { results_tx, errors_tx, results, errors }
    }

    fn task(&self, order_number: &str) -> Task {
        Task::new(ACCRUAL_URL, order_number.into(), self.results_tx.clone(), self.errors_tx.clone())
    }
}

fn processed(order_number: &str, points: i64) -> PollOutcome {
    PollOutcome::Success(AccrualResult {
        order: order_number.into(),
        status: AccrualStatus::Processed,
        accrual: Points::from_points(points),
    })
}

fn config(workers: usize, queue_capacity: usize) -> WorkerPoolConfig {
    WorkerPoolConfig { workers, queue_capacity, ..Default::default() }
}

#[tokio::test(start_paused = true)]
async fn outcomes_are_delivered_on_the_task_channels() {
    let fetcher = ScriptedFetcher::new();
    fetcher.script("2377225624", [processed("2377225624", 500)]);
    let shutdown = CancellationToken::new();
    let pool = WorkerPool::new(fetcher.clone(), WorkerPoolConfig::default(), &shutdown, "test::pool");
    pool.start();
    let mut channels = Channels::new();

    pool.add_task(channels.task("2377225624")).await.unwrap();
    pool.add_task(channels.task("7601295780")).await.unwrap();
    pool.wait().await;
    assert_eq!(pool.in_flight(), 0);

    let result = channels.results.try_recv().unwrap();
    assert_eq!(result.order.as_str(), "2377225624");
    assert_eq!(result.accrual, Points::from_points(500));
    assert!(channels.results.try_recv().is_err());

    // 204 is final: one attempt, and exactly one delivery
    let err = channels.errors.try_recv().unwrap();
    assert!(matches!(err, AccrualError::NotRegistered(ref n) if n.as_str() == "7601295780"));
    assert!(channels.errors.try_recv().is_err());
    assert_eq!(fetcher.calls_for("7601295780").len(), 1);

    pool.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_are_reported() {
    let fetcher = ScriptedFetcher::new();
    let failure = || PollOutcome::Transient(AccrualError::Transport("connection refused".into()));
    fetcher.script("1", [failure(), failure(), failure()]);
    let shutdown = CancellationToken::new();
    let pool = WorkerPool::new(fetcher.clone(), WorkerPoolConfig::default(), &shutdown, "test::pool");
    pool.start();
    let mut channels = Channels::new();
    pool.add_task(channels.task("1")).await.unwrap();
    pool.wait().await;
    let err = channels.errors.try_recv().unwrap();
    assert!(matches!(err, AccrualError::RetriesExhausted { attempts: 3, .. }));
    assert_eq!(fetcher.calls_for("1").len(), 3);
    pool.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn concurrency_is_capped_at_the_worker_count() {
    let fetcher = ScriptedFetcher::new().with_delay(Duration::from_millis(100));
    let orders = ["1", "2", "3", "4", "5", "6"];
    for n in orders {
        fetcher.script(n, [processed(n, 1)]);
    }
    let shutdown = CancellationToken::new();
    let pool = WorkerPool::new(fetcher.clone(), config(2, 10), &shutdown, "test::pool");
    pool.start();
    let mut channels = Channels::new();
    for n in orders {
        pool.add_task(channels.task(n)).await.unwrap();
    }
    pool.wait().await;

    let mut calls = orders.iter().flat_map(|n| fetcher.calls_for(n)).collect::<Vec<_>>();
    calls.sort();
    let first = calls[0];
    let started_together = calls.iter().filter(|t| **t - first < Duration::from_millis(50)).count();
    assert_eq!(started_together, 2);
    let last = *calls.last().unwrap() - first;
    assert!(last >= Duration::from_millis(200) && last < Duration::from_millis(250));

    let mut delivered = 0;
    while channels.results.try_recv().is_ok() {
        delivered += 1;
    }
    assert_eq!(delivered, 6);
    pool.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn stop_settles_every_accepted_task() {
    let fetcher = ScriptedFetcher::new().with_delay(Duration::from_secs(5));
    let shutdown = CancellationToken::new();
    let pool = WorkerPool::new(fetcher.clone(), config(2, 10), &shutdown, "test::pool");
    pool.start();
    let mut channels = Channels::new();
    for n in ["1", "2", "3", "4", "5"] {
        pool.add_task(channels.task(n)).await.unwrap();
    }
    while fetcher.call_count() < 2 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(pool.in_flight(), 5);

    pool.stop().await.unwrap();
    assert_eq!(pool.in_flight(), 0);
    // Two tasks were cancelled mid-flight, three never started
    assert_eq!(fetcher.call_count(), 2);
    assert!(channels.results.try_recv().is_err());
    assert!(channels.errors.try_recv().is_err());

    // Stopping twice is harmless, and a stopped pool rejects new work
    pool.stop().await.unwrap();
    let err = pool.add_task(channels.task("6")).await.unwrap_err();
    assert!(matches!(err, PoolError::Closed(ref t) if t.order_number.as_str() == "6"));
    assert_eq!(pool.in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn blocked_submissions_give_up_on_shutdown() {
    let fetcher = ScriptedFetcher::new();
    let shutdown = CancellationToken::new();
    // Never started, so the single queue slot stays full
    let pool = WorkerPool::new(fetcher, config(1, 1), &shutdown, "test::pool");
    let channels = Channels::new();
    pool.add_task(channels.task("1")).await.unwrap();

    let trigger = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });
    let err = pool.add_task(channels.task("2")).await.unwrap_err();
    assert!(matches!(err, PoolError::Cancelled(ref t) if t.order_number.as_str() == "2"));
    assert_eq!(pool.in_flight(), 1);

    pool.stop().await.unwrap();
    assert_eq!(pool.in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn starting_twice_is_harmless() {
    let fetcher = ScriptedFetcher::new();
    fetcher.script("1", [processed("1", 3)]);
    let shutdown = CancellationToken::new();
    let pool = WorkerPool::new(fetcher.clone(), config(1, 1), &shutdown, "test::pool");
    pool.start();
    pool.start();
    let mut channels = Channels::new();
    pool.add_task(channels.task("1")).await.unwrap();
    pool.wait().await;
    assert!(channels.results.try_recv().is_ok());
    assert_eq!(fetcher.call_count(), 1);
    pool.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn results_for_another_order_are_rejected() {
    let fetcher = ScriptedFetcher::new();
    fetcher.script("1", [processed("2", 40)]);
    let shutdown = CancellationToken::new();
    let pool = WorkerPool::new(fetcher.clone(), WorkerPoolConfig::default(), &shutdown, "test::pool");
    pool.start();
    let mut channels = Channels::new();
    pool.add_task(channels.task("1")).await.unwrap();
    pool.wait().await;

    assert!(channels.results.try_recv().is_err());
    let err = channels.errors.try_recv().unwrap();
    assert!(matches!(err, AccrualError::Malformed { ref order, .. } if order.as_str() == "1"));
    assert_eq!(fetcher.call_count(), 1);
    pool.stop().await.unwrap();
}

/// Blocks its thread for the whole attempt, so cancellation cannot interrupt it
#[derive(Clone, Default)]
struct BlockingFetcher {
    started: Arc<AtomicUsize>,
}

impl AccrualFetcher for BlockingFetcher {
    async fn fetch(&self, _base_url: &str, _order_number: &OrderNumber) -> PollOutcome {
        self.started.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(500));
        PollOutcome::NotRegistered
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stop_gives_up_after_the_shutdown_timeout() {
    let fetcher = BlockingFetcher::default();
    let shutdown = CancellationToken::new();
    let pool_config = WorkerPoolConfig { shutdown_timeout: Duration::from_millis(50), ..config(2, 10) };
    let pool = WorkerPool::new(fetcher.clone(), pool_config, &shutdown, "test::pool");
    pool.start();
    let channels = Channels::new();
    pool.add_task(channels.task("1")).await.unwrap();
    pool.add_task(channels.task("2")).await.unwrap();
    while fetcher.started.load(Ordering::SeqCst) < 2 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let err = pool.stop().await.unwrap_err();
    assert!(matches!(err, PoolError::ShutdownTimedOut(t) if t == Duration::from_millis(50)));
    assert_eq!(pool.in_flight(), 2);

    // The stuck attempts still settle eventually
    tokio::time::timeout(Duration::from_secs(5), pool.wait()).await.unwrap();
    assert_eq!(pool.in_flight(), 0);
}

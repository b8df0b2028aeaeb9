use log::*;
use loyalty_engine::{
    accrual::{AccrualFetcher, PoolError, ReconciliationConfig, ReconciliationDriver},
    AccrualApi,
    SqliteDatabase,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Starts the accrual worker. It polls the accrual service for unfinished orders on every tick, and applies the
/// results, until `shutdown` is cancelled. It then stops its worker pool and waits for in-flight polls, so only await
/// the returned JoinHandle after cancelling `shutdown`.
pub fn start_accrual_worker<F: AccrualFetcher>(
    db: SqliteDatabase,
    fetcher: F,
    config: ReconciliationConfig,
    shutdown: CancellationToken,
) -> JoinHandle<Result<(), PoolError>> {
    tokio::spawn(async move {
        let api = AccrualApi::new(db);
        info!("🕰️ Accrual worker started. Polling {} every {:?}", config.base_url, config.poll_interval);
        let driver = ReconciliationDriver::new(api, fetcher, config, shutdown);
        let result = driver.run().await;
        match &result {
            Ok(()) => info!("🕰️ Accrual worker stopped"),
            Err(e) => error!("🕰️ Accrual worker did not stop cleanly. {e}"),
        }
        result
    })
}

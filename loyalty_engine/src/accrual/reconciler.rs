use std::time::Duration;

use log::*;
use tokio::{sync::mpsc, task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{
    accrual::{AccrualError, AccrualFetcher, AccrualResult, PoolError, Task, WorkerPool, WorkerPoolConfig},
    traits::{AccrualManagement, AccrualUpdate, StorageError},
    AccrualApi,
};

#[derive(Debug, Clone)]
pub struct ReconciliationConfig {
    /// Where the accrual service lives, e.g. `http://localhost:8081`
    pub base_url: String,
    pub poll_interval: Duration,
    /// Capacity of the result and error channels
    pub channel_capacity: usize,
    pub pool: WorkerPoolConfig,
    /// The log target used by the driver and its worker pool
    pub log_target: String,
}

impl ReconciliationConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            poll_interval: Duration::from_secs(10),
            channel_capacity: 100,
            pool: WorkerPoolConfig::default(),
            log_target: "loyalty::accrual".to_string(),
        }
    }
}

/// Periodically polls the accrual service for every unfinished order and applies the results.
///
/// The driver owns the worker pool and both output channels. Results are applied through [`AccrualApi`] by a
/// dedicated consumer task. Failures are logged by another. Neither schedules a retry: the next tick submits every
/// order that is still unfinished.
pub struct ReconciliationDriver<B, F> {
    api: AccrualApi<B>,
    pool: WorkerPool<F>,
    config: ReconciliationConfig,
    shutdown: CancellationToken,
    results_tx: mpsc::Sender<AccrualResult>,
    errors_tx: mpsc::Sender<AccrualError>,
    outputs: Option<(mpsc::Receiver<AccrualResult>, mpsc::Receiver<AccrualError>)>,
}

impl<B, F> ReconciliationDriver<B, F>
where
    B: AccrualManagement,
    F: AccrualFetcher,
{
    /// Creates a driver. The driver, and the worker pool it owns, wind down when `shutdown` is cancelled.
    pub fn new(api: AccrualApi<B>, fetcher: F, config: ReconciliationConfig, shutdown: CancellationToken) -> Self {
        let pool = WorkerPool::new(fetcher, config.pool.clone(), &shutdown, config.log_target.clone());
        let (results_tx, results_rx) = mpsc::channel(config.channel_capacity.max(1));
        let (errors_tx, errors_rx) = mpsc::channel(config.channel_capacity.max(1));
        Self { api, pool, config, shutdown, results_tx, errors_tx, outputs: Some((results_rx, errors_rx)) }
    }

    pub fn pool(&self) -> &WorkerPool<F> {
        &self.pool
    }

    fn target(&self) -> &str {
        self.config.log_target.as_str()
    }

    /// Runs a single reconciliation cycle: one task is submitted for every order that is not `PROCESSED` or
    /// `INVALID`. Returns the number of tasks that were accepted by the pool.
    ///
    /// The pool must have been started for the tasks to make progress.
    pub async fn reconcile_once(&self) -> Result<usize, StorageError> {
        let orders = self.api.unfinished_orders().await?;
        if orders.is_empty() {
            trace!(target: self.target(), "🔄️ No unfinished orders");
            return Ok(0);
        }
        let total = orders.len();
        let mut submitted = 0;
        for order_number in orders {
            let task =
                Task::new(&self.config.base_url, order_number, self.results_tx.clone(), self.errors_tx.clone());
            match self.pool.add_task(task).await {
                Ok(()) => submitted += 1,
                Err(PoolError::Closed(task)) => {
                    warn!(target: self.target(), "🔄️ Order {} was not submitted. It will be picked up on the next tick", task.order_number);
                },
                Err(e) => {
                    info!(target: self.target(), "🔄️ {e}. Ending the reconciliation cycle early");
                    break;
                },
            }
        }
        debug!(target: self.target(), "🔄️ Submitted {submitted} of {total} unfinished orders for polling");
        Ok(submitted)
    }

    /// Starts the worker pool and the output consumers, then runs a reconciliation cycle on every tick until the
    /// shutdown token is cancelled.
    ///
    /// On shutdown the pool is stopped and drained, and the consumers finish handling whatever was already
    /// delivered. A [`PoolError::ShutdownTimedOut`] error means in-flight work did not finish in time.
    pub async fn run(mut self) -> Result<(), PoolError> {
        self.pool.start();
        let consumers = self.outputs.take().map(|(results, errors)| {
            let results = spawn_result_consumer(self.api.clone(), results, self.config.log_target.clone());
            let errors = spawn_error_consumer(errors, self.config.log_target.clone());
            (results, errors)
        });
        info!(target: self.target(), "🔄️ Reconciling accruals with {} every {:?}", self.config.base_url, self.config.poll_interval);
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.reconcile_once().await {
                        error!(target: self.target(), "🔄️ Could not fetch unfinished orders: {e}");
                    }
                },
            }
        }
        info!(target: self.target(), "🔄️ Shutdown requested. Stopping accrual reconciliation");
        self.pool.stop().await?;
        self.pool.wait().await;
        let target = self.config.log_target.clone();
        // Consumers stop once every sender is gone
        drop(self);
        if let Some((results, errors)) = consumers {
            for consumer in [results, errors] {
                if let Err(e) = consumer.await {
                    error!(target: target.as_str(), "🔄️ An accrual consumer failed: {e}");
                }
            }
        }
        info!(target: target.as_str(), "🔄️ Accrual reconciliation stopped");
        Ok(())
    }
}

fn spawn_result_consumer<B: AccrualManagement>(
    api: AccrualApi<B>,
    mut results: mpsc::Receiver<AccrualResult>,
    target: String,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let target = target.as_str();
        while let Some(result) = results.recv().await {
            match api.process_result(&result).await {
                Ok(AccrualUpdate::Applied { order, credited, balance }) => {
                    info!(
                        target: target,
                        "💰️ Order {} is now {}. {credited} points credited to user #{}, whose balance is {balance}",
                        order.order_number,
                        order.status,
                        order.user_id
                    );
                },
                Ok(AccrualUpdate::Unchanged(order)) => {
                    debug!(target: target, "💰️ Order {} is {}. The {:?} result was ignored", order.order_number, order.status, result.status);
                },
                Err(e) => {
                    error!(target: target, "💰️ Could not apply the accrual result for order {}: {e}. It will be polled again", result.order);
                },
            }
        }
        trace!(target: target, "💰️ Result consumer finished");
    })
}

fn spawn_error_consumer(mut errors: mpsc::Receiver<AccrualError>, target: String) -> JoinHandle<()> {
    tokio::spawn(async move {
        let target = target.as_str();
        while let Some(err) = errors.recv().await {
            match err {
                AccrualError::NotRegistered(order) => {
                    info!(target: target, "🔄️ Order {order} is not registered with the accrual service yet");
                },
                e => error!(target: target, "🔄️ Accrual polling failed. {e}"),
            }
        }
        trace!(target: target, "🔄️ Error consumer finished");
    })
}

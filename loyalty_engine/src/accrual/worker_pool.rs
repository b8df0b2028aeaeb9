use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use log::*;
use thiserror::Error;
use tokio::{
    sync::{mpsc, watch, Mutex, OwnedSemaphorePermit, Semaphore},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::accrual::{AccrualError, AccrualFetcher, RetryPolicy, Task};

#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// The number of tasks that are polled concurrently
    pub workers: usize,
    /// Tasks that can be queued before `add_task` has to wait
    pub queue_capacity: usize,
    /// How long `stop` waits for in-flight tasks before giving up
    pub shutdown_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            workers: 10,
            queue_capacity: 100,
            shutdown_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("The worker pool is closed. The task for order {} was rejected", .0.order_number)]
    Closed(Box<Task>),
    #[error("The worker pool is shutting down. The task for order {} was abandoned", .0.order_number)]
    Cancelled(Box<Task>),
    #[error("Tasks were still running {0:?} after the worker pool was told to stop")]
    ShutdownTimedOut(Duration),
}

/// Decrements the in-flight counter when dropped, however the task ends.
struct InFlight(Arc<watch::Sender<usize>>);

impl InFlight {
    fn new(counter: &Arc<watch::Sender<usize>>) -> Self {
        counter.send_modify(|n| *n += 1);
        Self(Arc::clone(counter))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.send_modify(|n| *n = n.saturating_sub(1));
    }
}

struct QueuedTask {
    task: Task,
    _in_flight: InFlight,
}

struct QueueState {
    sender: Option<mpsc::Sender<QueuedTask>>,
    closed: bool,
}

/// State shared between the pool handle, its workers and the units they dispatch.
struct Shared<F> {
    fetcher: F,
    policy: RetryPolicy,
    queue: Mutex<mpsc::Receiver<QueuedTask>>,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
    log_target: String,
}

/// A fixed number of workers polling the accrual service for queued [`Task`]s.
///
/// Every task pulled off the queue runs on its own spawned unit, and a semaphore caps the number of units running at
/// once to the worker count. Successful results are sent to the task's result channel. Failures, including
/// "not registered", are sent to its error channel. A reply for a different order than the one polled counts as
/// malformed. A task that is cancelled is logged, and nothing is delivered.
///
/// All log lines use the log target the pool was created with.
pub struct WorkerPool<F> {
    shared: Arc<Shared<F>>,
    state: Mutex<QueueState>,
    in_flight: Arc<watch::Sender<usize>>,
    workers: std::sync::Mutex<Vec<JoinHandle<()>>>,
    config: WorkerPoolConfig,
    started: AtomicBool,
    stopping: AtomicBool,
}

impl<F: AccrualFetcher> WorkerPool<F> {
    /// Creates a pool that stops polling when `shutdown` is cancelled, or when [`WorkerPool::stop`] is called.
    pub fn new(fetcher: F, config: WorkerPoolConfig, shutdown: &CancellationToken, log_target: impl Into<String>) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let (in_flight, _) = watch::channel(0usize);
        let shared = Shared {
            fetcher,
            policy: config.retry,
            queue: Mutex::new(receiver),
            permits: Arc::new(Semaphore::new(config.workers.max(1))),
            cancel: shutdown.child_token(),
            log_target: log_target.into(),
        };
        Self {
            shared: Arc::new(shared),
            state: Mutex::new(QueueState { sender: Some(sender), closed: false }),
            in_flight: Arc::new(in_flight),
            workers: std::sync::Mutex::new(Vec::new()),
            config,
            started: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
        }
    }

    fn target(&self) -> &str {
        self.shared.log_target.as_str()
    }

    /// The number of tasks that have been accepted, but have not finished yet
    pub fn in_flight(&self) -> usize {
        *self.in_flight.borrow()
    }

    /// Launches the workers. Calling this more than once has no effect.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!(target: self.target(), "⚙️ The worker pool has already been started");
            return;
        }
        let handles = (0..self.config.workers.max(1))
            .map(|id| tokio::spawn(worker_loop(id, Arc::clone(&self.shared))))
            .collect::<Vec<_>>();
        info!(target: self.target(), "⚙️ Started {} accrual workers", handles.len());
        if let Ok(mut workers) = self.workers.lock() {
            workers.extend(handles);
        }
    }

    /// Queues a task. If the queue is full, this waits for space, but gives up as soon as the pool is cancelled.
    ///
    /// Tasks submitted after [`WorkerPool::stop`] are rejected with [`PoolError::Closed`].
    pub async fn add_task(&self, task: Task) -> Result<(), PoolError> {
        let in_flight = InFlight::new(&self.in_flight);
        let state = self.state.lock().await;
        let sender = match (&state.sender, state.closed) {
            (Some(sender), false) => sender,
            _ => {
                warn!(target: self.target(), "⚙️ The worker pool is closed. Rejecting the task for order {}", task.order_number);
                return Err(PoolError::Closed(Box::new(task)));
            },
        };
        let permit = tokio::select! {
            biased;
            _ = self.shared.cancel.cancelled() => {
                info!(target: self.target(), "⚙️ Submission of order {} abandoned. The pool is shutting down", task.order_number);
                return Err(PoolError::Cancelled(Box::new(task)));
            },
            permit = sender.reserve() => permit,
        };
        match permit {
            Ok(permit) => {
                trace!(target: self.target(), "⚙️ Queued order {}", task.order_number);
                permit.send(QueuedTask { task, _in_flight: in_flight });
                Ok(())
            },
            Err(_) => {
                warn!(target: self.target(), "⚙️ The task queue is closed. Rejecting the task for order {}", task.order_number);
                Err(PoolError::Closed(Box::new(task)))
            },
        }
    }

    /// Waits until every task submitted so far has finished, or was dropped.
    pub async fn wait(&self) {
        let mut counter = self.in_flight.subscribe();
        let _ = counter.wait_for(|n| *n == 0).await.map(|_| ());
    }

    /// Shuts the pool down:
    /// 1. polling is cancelled, so in-flight tasks wind down and blocked submissions give up,
    /// 2. the queue is closed, and tasks that never started are drained and logged,
    /// 3. the call waits up to the shutdown timeout for the in-flight tasks and the workers to finish.
    ///
    /// Only the first call does anything. [`PoolError::ShutdownTimedOut`] means work was still running when the
    /// timeout expired.
    pub async fn stop(&self) -> Result<(), PoolError> {
        if self.stopping.swap(true, Ordering::SeqCst) {
            debug!(target: self.target(), "⚙️ The worker pool is already stopping");
            return Ok(());
        }
        info!(target: self.target(), "⚙️ Stopping the worker pool");
        self.shared.cancel.cancel();
        {
            let mut state = self.state.lock().await;
            state.closed = true;
            state.sender = None;
        }
        let drained = self.drain_queue().await;
        if drained > 0 {
            info!(target: self.target(), "⚙️ {drained} queued tasks were cancelled before they started");
        }
        let workers = self.workers.lock().map(|mut w| std::mem::take(&mut *w)).unwrap_or_default();
        let quiescent = async {
            for handle in workers {
                if let Err(e) = handle.await {
                    error!(target: self.target(), "⚙️ An accrual worker failed: {e}");
                }
            }
            self.wait().await;
        };
        let timeout = self.config.shutdown_timeout;
        match tokio::time::timeout(timeout, quiescent).await {
            Ok(()) => {
                info!(target: self.target(), "⚙️ Worker pool stopped");
                Ok(())
            },
            Err(_) => {
                error!(target: self.target(), "⚙️ {} tasks were still running {timeout:?} after shutdown began", self.in_flight());
                Err(PoolError::ShutdownTimedOut(timeout))
            },
        }
    }

    async fn drain_queue(&self) -> usize {
        let mut queue = self.shared.queue.lock().await;
        queue.close();
        let mut drained = 0;
        while let Some(queued) = queue.recv().await {
            info!(target: self.target(), "⚙️ Task for order {} cancelled", queued.task.order_number);
            drained += 1;
        }
        drained
    }
}

async fn worker_loop<F: AccrualFetcher>(id: usize, shared: Arc<Shared<F>>) {
    let target = shared.log_target.as_str();
    trace!(target: target, "⚙️ Worker {id} started");
    loop {
        let next = {
            let mut queue = shared.queue.lock().await;
            tokio::select! {
                biased;
                _ = shared.cancel.cancelled() => None,
                next = queue.recv() => next,
            }
        };
        let Some(QueuedTask { task, _in_flight: in_flight }) = next else {
            break;
        };
        let permit: OwnedSemaphorePermit = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => {
                info!(target: target, "⚙️ Task for order {} cancelled", task.order_number);
                continue;
            },
            permit = Arc::clone(&shared.permits).acquire_owned() => match permit {
                Ok(p) => p,
                Err(_) => break,
            },
        };
        let unit = Arc::clone(&shared);
        tokio::spawn(async move {
            unit.process(task).await;
            drop(permit);
            drop(in_flight);
        });
    }
    trace!(target: target, "⚙️ Worker {id} stopped");
}

impl<F: AccrualFetcher> Shared<F> {
    async fn process(&self, task: Task) {
        let target = self.log_target.as_str();
        let fetcher = &self.fetcher;
        let base_url = task.base_url.as_str();
        let order_number = &task.order_number;
        let outcome = self.policy.run(order_number, &self.cancel, move || fetcher.fetch(base_url, order_number)).await;
        match outcome {
            Ok(result) if result.order != *order_number => {
                let reason = format!("the reply was for order {}", result.order);
                warn!(target: target, "⚙️ Polling of order {order_number} returned a result for another order. {reason}");
                let err = AccrualError::Malformed { order: order_number.clone(), reason };
                self.deliver(&task.errors, err, order_number.as_str()).await;
            },
            Ok(result) => {
                debug!(target: target, "⚙️ Order {order_number} is {:?}", result.status);
                self.deliver(&task.results, result, order_number.as_str()).await;
            },
            Err(e) if e.is_cancelled() => {
                info!(target: target, "⚙️ Polling of order {order_number} was cancelled");
            },
            Err(e) => {
                debug!(target: target, "⚙️ Polling of order {order_number} failed. {e}");
                self.deliver(&task.errors, e, order_number.as_str()).await;
            },
        }
    }

    /// Sends `value`, unless the pool is cancelled while waiting for room in the channel.
    async fn deliver<T>(&self, channel: &mpsc::Sender<T>, value: T, order: &str) {
        let target = self.log_target.as_str();
        tokio::select! {
            biased;
            sent = channel.send(value) => if sent.is_err() {
                warn!(target: target, "⚙️ Nobody is listening for the outcome of order #{order}. It was dropped");
            },
            _ = self.cancel.cancelled() => {
                info!(target: target, "⚙️ Delivery of the outcome for order #{order} was cancelled");
            },
        }
    }
}

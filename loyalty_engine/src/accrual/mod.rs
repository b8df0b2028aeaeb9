//! # Accrual reconciliation
//!
//! Orders are rewarded by an external accrual service. This module polls that service for every order that has not
//! reached a terminal state yet, and feeds the answers back into storage.
//!
//! * [`AccrualClient`] makes a single polling attempt and classifies the reply ([`PollOutcome`]).
//! * [`RetryPolicy`] retries transient failures with exponential backoff, and honours `Retry-After`.
//! * [`WorkerPool`] runs polling tasks on a bounded number of workers, and delivers the results and failures onto
//!   the channels carried by each [`Task`].
//! * [`ReconciliationDriver`] ties it all together: on every tick it submits one task per unfinished order, and
//!   applies the results through [`crate::AccrualApi`].
mod client;
mod errors;
mod objects;
mod reconciler;
mod retry;
mod worker_pool;

pub use client::{parse_retry_after, parse_retry_after_at, AccrualClient, AccrualFetcher, DEFAULT_RETRY_AFTER};
pub use errors::AccrualError;
pub use objects::{AccrualResult, AccrualStatus, PollOutcome, Task};
pub use reconciler::{ReconciliationConfig, ReconciliationDriver};
pub use retry::RetryPolicy;
pub use worker_pool::{PoolError, WorkerPool, WorkerPoolConfig};

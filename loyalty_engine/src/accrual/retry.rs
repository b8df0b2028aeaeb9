use std::{future::Future, time::Duration};

use tokio_util::sync::CancellationToken;

use crate::{
    accrual::{AccrualError, AccrualResult, PollOutcome},
    db_types::OrderNumber,
};

/// Bounded retries with exponential backoff.
///
/// Attempt `i` (counting from zero) that fails transiently is followed by a pause of `base_delay * 2^i`, unless the
/// service asked for a specific delay with `Retry-After`, which then applies to that pause only. No pause follows the
/// final attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, base_delay: Duration::from_secs(1) }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self { max_attempts, base_delay }
    }

    /// The pause after the failed attempt with index `attempt`
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(1u32 << attempt.min(16))
    }

    /// Polls `order_number` using `poll` until it succeeds, fails permanently, or the attempt budget runs out.
    ///
    /// * `Success` and `NotRegistered` end the loop at once.
    /// * `Malformed` replies are not retried.
    /// * When the budget runs out, the last failure is returned inside [`AccrualError::RetriesExhausted`].
    ///
    /// `cancel` is watched while a poll is in flight and while pausing. Cancellation returns
    /// [`AccrualError::Cancelled`] immediately.
    pub async fn run<F, Fut>(
        &self,
        order_number: &OrderNumber,
        cancel: &CancellationToken,
        mut poll: F,
    ) -> Result<AccrualResult, AccrualError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = PollOutcome>,
    {
        let mut attempt = 0;
        loop {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AccrualError::Cancelled),
                outcome = poll() => outcome,
            };
            let (error, delay) = match outcome {
                PollOutcome::Success(result) => return Ok(result),
                PollOutcome::NotRegistered => return Err(AccrualError::NotRegistered(order_number.clone())),
                PollOutcome::Malformed(reason) => {
                    return Err(AccrualError::Malformed { order: order_number.clone(), reason })
                },
                PollOutcome::RateLimited(after) => {
                    let delay = if after.is_zero() { self.backoff_delay(attempt) } else { after };
                    (AccrualError::RateLimited(after), delay)
                },
                PollOutcome::Transient(e) => (e, self.backoff_delay(attempt)),
            };
            attempt += 1;
            if attempt >= self.max_attempts {
                return Err(AccrualError::RetriesExhausted {
                    order: order_number.clone(),
                    attempts: attempt,
                    last: Box::new(error),
                });
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AccrualError::Cancelled),
                _ = tokio::time::sleep(delay) => {},
            }
        }
    }
}

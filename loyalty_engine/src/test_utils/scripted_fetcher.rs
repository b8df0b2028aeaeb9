use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use tokio::time::Instant;

use crate::{
    accrual::{AccrualFetcher, PollOutcome},
    db_types::OrderNumber,
};

#[derive(Default)]
struct Script {
    outcomes: HashMap<OrderNumber, VecDeque<PollOutcome>>,
    calls: Vec<(OrderNumber, Instant)>,
}

/// An [`AccrualFetcher`] that replays canned outcomes per order, and records every call.
///
/// Orders without a script, or whose script has run out, are reported as not registered.
#[derive(Clone, Default)]
pub struct ScriptedFetcher {
    script: Arc<Mutex<Script>>,
    delay: Duration,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every attempt takes `delay` to complete
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn script<I: IntoIterator<Item = PollOutcome>>(&self, order_number: &str, outcomes: I) {
        self.lock().outcomes.entry(OrderNumber::from(order_number)).or_default().extend(outcomes);
    }

    pub fn call_count(&self) -> usize {
        self.lock().calls.len()
    }

    pub fn calls_for(&self, order_number: &str) -> Vec<Instant> {
        self.lock().calls.iter().filter(|(n, _)| n.as_str() == order_number).map(|(_, t)| *t).collect()
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl AccrualFetcher for ScriptedFetcher {
    async fn fetch(&self, _base_url: &str, order_number: &OrderNumber) -> PollOutcome {
        let outcome = {
            let mut script = self.lock();
            script.calls.push((order_number.clone(), Instant::now()));
            script.outcomes.get_mut(order_number).and_then(|q| q.pop_front()).unwrap_or(PollOutcome::NotRegistered)
        };
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        outcome
    }
}

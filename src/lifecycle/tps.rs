//! Confirmed-throughput estimation
//!
//! Confirmations are binned into fixed ticks and the rate is computed over a
//! short lookback window, so the figure reacts quickly without jittering on
//! single notifications.

use crate::lifecycle::timers::ScheduledTask;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const TICK_PERIOD: Duration = Duration::from_millis(250);
const LOOKBACK_TICKS: usize = 4;

#[derive(Default)]
pub struct TpsEstimator {
    pending: AtomicUsize,
    buckets: Mutex<VecDeque<usize>>,
}

impl TpsEstimator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Count confirmations toward the current tick
    pub fn record(&self, count: usize) {
        self.pending.fetch_add(count, Ordering::AcqRel);
    }

    /// Close the current tick
    pub fn tick(&self) {
        let count = self.pending.swap(0, Ordering::AcqRel);
        let mut buckets = self.buckets.lock();
        buckets.push_back(count);
        while buckets.len() > LOOKBACK_TICKS {
            buckets.pop_front();
        }
    }

    /// Transactions per second over the lookback window
    pub fn tps(&self) -> f64 {
        let buckets = self.buckets.lock();
        if buckets.is_empty() {
            return 0.0;
        }
        let total: usize = buckets.iter().sum();
        total as f64 / (buckets.len() as f64 * TICK_PERIOD.as_secs_f64())
    }

    /// Spawn the tick loop. The estimator stops when the returned task is
    /// dropped.
    pub fn start(self: &Arc<Self>) -> ScheduledTask {
        let estimator = Arc::clone(self);
        ScheduledTask::interval(TICK_PERIOD, move || {
            let estimator = Arc::clone(&estimator);
            async move {
                estimator.tick();
            }
        })
    }
}

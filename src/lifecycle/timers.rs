//! Cancellable background timers
//!
//! Wraps spawned timer tasks so the owner can cancel them exactly once and
//! dropping the handle never leaks a ticking task.

use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;

pub struct ScheduledTask {
    cancelled: AtomicBool,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ScheduledTask {
    /// Run `tick` every `period` until cancelled
    pub fn interval<F, Fut>(period: Duration, tick: F) -> Self
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                tick().await;
            }
        });
        Self {
            cancelled: AtomicBool::new(false),
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Run `action` once after `delay` unless cancelled first
    pub fn deadline<Fut>(delay: Duration, action: Fut) -> Self
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            action.await;
        });
        Self {
            cancelled: AtomicBool::new(false),
            handle: Mutex::new(Some(handle)),
        }
    }

    /// A handle with no backing task
    #[cfg(test)]
    pub fn noop() -> Self {
        Self {
            cancelled: AtomicBool::new(false),
            handle: Mutex::new(None),
        }
    }

    /// Abort the underlying task. Idempotent; later calls are no-ops.
    pub fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[tokio::test]
    async fn interval_ticks_until_cancelled() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let task = ScheduledTask::interval(Duration::from_millis(10), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(55)).await;
        task.cancel();
        let seen = ticks.load(Ordering::SeqCst);
        assert!(seen >= 2, "expected at least 2 ticks, saw {seen}");

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), seen);
    }

    #[tokio::test]
    async fn deadline_fires_once() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let _task = ScheduledTask::deadline(Duration::from_millis(10), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancel_before_deadline_suppresses_action() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let task = ScheduledTask::deadline(Duration::from_millis(30), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        task.cancel();
        assert!(task.is_cancelled());
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn drop_cancels() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        {
            let _task = ScheduledTask::deadline(Duration::from_millis(30), async move {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}

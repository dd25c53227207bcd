//! Transaction lifecycle
//!
//! Creation, commitment tracking, timers, and throughput estimation for
//! every transaction the service dispatches. All state transitions flow
//! through one dispatch queue, so no two notifications ever race on the
//! same record.

pub mod create;
pub mod subscriptions;
pub mod timers;
pub mod tps;
pub mod tracker;

pub use create::{BlockhashCache, TransactionCreator};
pub use timers::ScheduledTask;
pub use tps::TpsEstimator;
pub use tracker::{Action, CommitmentTiming, PendingHandles, TransactionRecord, TransactionTracker};

use crate::config::LifecycleConfig;
use crate::relay::TpuRelay;
use parking_lot::Mutex;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::{pubkey::Pubkey, signature::Keypair};
use std::sync::Arc;
use tokio::sync::mpsc;

struct Shared {
    tracker: Mutex<TransactionTracker>,
    tps: Arc<TpsEstimator>,
}

/// Cloneable entry point for submitting lifecycle transitions. Actions are
/// queued and applied in arrival order by a single dispatch task.
#[derive(Clone)]
pub struct LifecycleHandle {
    tx: mpsc::UnboundedSender<Action>,
    shared: Arc<Shared>,
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct LifecycleStats {
    pub tracked: usize,
    pub confirmed: usize,
    pub timed_out: usize,
    pub tps: f64,
    pub average_confirmation_ms: Option<u64>,
}

impl LifecycleHandle {
    pub fn new() -> Self {
        Self::from_tracker(TransactionTracker::new())
    }

    pub fn from_tracker(tracker: TransactionTracker) -> Self {
        let shared = Arc::new(Shared {
            tracker: Mutex::new(tracker),
            tps: TpsEstimator::new(),
        });
        let (tx, mut rx) = mpsc::unbounded_channel();

        let dispatch = Arc::clone(&shared);
        tokio::spawn(async move {
            while let Some(action) = rx.recv().await {
                let mut tracker = dispatch.tracker.lock();
                let before = tracker.confirmed_count();
                tracker.apply(action);
                let newly_confirmed = tracker.confirmed_count() - before;
                drop(tracker);
                if newly_confirmed > 0 {
                    dispatch.tps.record(newly_confirmed);
                }
            }
        });

        Self { tx, shared }
    }

    /// Queue one transition. Dropped silently once the dispatch task is
    /// gone, which only happens at shutdown.
    pub fn apply(&self, action: Action) {
        let _ = self.tx.send(action);
    }

    pub fn tps_estimator(&self) -> Arc<TpsEstimator> {
        Arc::clone(&self.shared.tps)
    }

    pub fn stats(&self) -> LifecycleStats {
        let tracker = self.shared.tracker.lock();
        LifecycleStats {
            tracked: tracker.len(),
            confirmed: tracker.confirmed_count(),
            timed_out: tracker.timed_out_count(),
            tps: self.shared.tps.tps(),
            average_confirmation_ms: tracker
                .average_confirmation_time()
                .map(|d| d.as_millis() as u64),
        }
    }

    /// Run `f` against the tracker. Test-only escape hatch; production
    /// callers go through the dispatch queue.
    #[cfg(test)]
    pub fn with_tracker<R>(&self, f: impl FnOnce(&TransactionTracker) -> R) -> R {
        f(&self.shared.tracker.lock())
    }
}

impl Default for LifecycleHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// The assembled lifecycle component
pub struct Lifecycle {
    pub handle: LifecycleHandle,
    pub creator: Arc<TransactionCreator>,
    _blockhash_refresh: ScheduledTask,
    _tps_tick: ScheduledTask,
}

impl Lifecycle {
    /// Wire up tracking for one set of popped accounts: blockhash cache,
    /// account subscriptions at both commitment levels, the TPS tick, and
    /// the transaction creator.
    pub async fn start(
        rpc: Arc<RpcClient>,
        ws_url: &str,
        relay: Arc<TpuRelay>,
        program_id: Pubkey,
        partitions: Vec<Pubkey>,
        fee_payers: Vec<Arc<Keypair>>,
        config: &LifecycleConfig,
    ) -> anyhow::Result<Self> {
        let handle = LifecycleHandle::from_tracker(
            TransactionTracker::new().with_retry_until_processed(config.retry_until_processed),
        );
        let (blockhash, blockhash_refresh) = BlockhashCache::start(rpc).await?;

        subscriptions::start(ws_url, &partitions, &handle);
        let tps_tick = handle.tps_estimator().start();

        let creator = Arc::new(TransactionCreator::new(
            relay,
            handle.clone(),
            blockhash,
            program_id,
            partitions,
            fee_payers,
            config,
        ));

        Ok(Self {
            handle,
            creator,
            _blockhash_refresh: blockhash_refresh,
            _tps_tick: tps_tick,
        })
    }
}

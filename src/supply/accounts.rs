//! Generic pre-funded account pool with reservation semantics
//!
//! One `AccountSupply` manages a single pool of funded signing accounts.
//! Accounts move funded -> reserved -> popped; a background replenish loop
//! tops the funded queue back up to its target size in batches.

use crate::metrics::metrics;
use async_trait::async_trait;
use parking_lot::Mutex;
use prometheus::IntGauge;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::signature::Keypair;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, info, warn};

const MAX_REPLENISH_BACKOFF: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum SupplyError {
    /// `pop` asked for more accounts than were reserved
    #[error("Reserve depleted: requested {requested}, available {available}")]
    ReserveDepleted { requested: usize, available: usize },
    #[error("Client balance too low: required {required}, available {available}")]
    InsufficientFunds { required: u64, available: u64 },
    #[error("RPC error: {0}")]
    Rpc(#[from] solana_client::client_error::ClientError),
}

pub type SupplyResult<T> = Result<T, SupplyError>;

/// A funded signing account held by a pool
#[derive(Debug)]
pub struct SupplyAccount {
    keypair: Arc<Keypair>,
    expires_at: Instant,
}

impl SupplyAccount {
    pub fn new(keypair: Keypair, ttl: Duration) -> Self {
        Self {
            keypair: Arc::new(keypair),
            expires_at: Instant::now() + ttl,
        }
    }

    pub fn keypair(&self) -> &Arc<Keypair> {
        &self.keypair
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// The funding primitive supplied by the caller. Implementations fund a
/// fresh keypair through the faucet; the pool never implements funding
/// policy itself.
#[async_trait]
pub trait AccountCreator: Send + Sync {
    async fn create(&self) -> anyhow::Result<Keypair>;
}

#[derive(Default)]
struct Queues {
    funded: VecDeque<SupplyAccount>,
    reserved: VecDeque<SupplyAccount>,
}

impl Queues {
    /// Drop expired entries from the funded queue
    fn prune_expired(&mut self) {
        let before = self.funded.len();
        self.funded.retain(|account| !account.is_expired());
        let expired = before - self.funded.len();
        if expired > 0 {
            metrics().accounts_expired.inc_by(expired as u64);
        }
    }
}

pub struct AccountSupply {
    name: &'static str,
    inner: Mutex<Queues>,
    replenishing: AtomicBool,
    target_size: usize,
    batch_size: usize,
    account_ttl: Duration,
    creator: Arc<dyn AccountCreator>,
    funded_gauge: IntGauge,
}

impl AccountSupply {
    pub fn new(
        name: &'static str,
        creator: Arc<dyn AccountCreator>,
        target_size: usize,
        batch_size: usize,
        account_ttl: Duration,
        funded_gauge: IntGauge,
    ) -> Arc<Self> {
        let supply = Arc::new(Self {
            name,
            inner: Mutex::new(Queues::default()),
            replenishing: AtomicBool::new(false),
            target_size,
            batch_size,
            account_ttl,
            creator,
            funded_gauge,
        });
        supply.trigger_replenish();
        supply
    }

    /// Number of immediately available (funded, unexpired) accounts
    pub fn size(&self) -> usize {
        let mut queues = self.inner.lock();
        queues.prune_expired();
        let size = queues.funded.len();
        self.funded_gauge.set(size as i64);
        size
    }

    /// Move `count` accounts from funded to reserved. Returns false with no
    /// side effect when the funded queue is too shallow.
    pub fn reserve(&self, count: usize) -> bool {
        let mut queues = self.inner.lock();
        queues.prune_expired();
        if queues.funded.len() < count {
            return false;
        }
        for _ in 0..count {
            if let Some(account) = queues.funded.pop_front() {
                queues.reserved.push_back(account);
            }
        }
        self.funded_gauge.set(queues.funded.len() as i64);
        true
    }

    /// Return `count` previously reserved accounts to the funded queue
    pub fn unreserve(&self, count: usize) {
        let mut queues = self.inner.lock();
        let available = queues.reserved.len();
        if available < count {
            warn!(
                pool = self.name,
                requested = count,
                available = available,
                "Unreserve exceeded reserved set"
            );
        }
        for _ in 0..count.min(available) {
            if let Some(account) = queues.reserved.pop_back() {
                queues.funded.push_front(account);
            }
        }
        self.funded_gauge.set(queues.funded.len() as i64);
    }

    /// Irreversibly consume `count` reserved accounts. Expired entries are
    /// discarded rather than handed out; replenishment is triggered on the
    /// way out.
    pub fn pop(self: &Arc<Self>, count: usize) -> SupplyResult<Vec<SupplyAccount>> {
        let popped = {
            let mut queues = self.inner.lock();
            let before = queues.reserved.len();
            queues.reserved.retain(|account| !account.is_expired());
            let expired = before - queues.reserved.len();
            if expired > 0 {
                metrics().accounts_expired.inc_by(expired as u64);
            }

            if queues.reserved.len() < count {
                return Err(SupplyError::ReserveDepleted {
                    requested: count,
                    available: queues.reserved.len(),
                });
            }
            queues.reserved.drain(..count).collect::<Vec<_>>()
        };

        metrics().accounts_popped.inc_by(popped.len() as u64);
        self.trigger_replenish();
        Ok(popped)
    }

    /// Spawn a replenishment run. A no-op when one is already in progress.
    pub fn trigger_replenish(self: &Arc<Self>) {
        let supply = Arc::clone(self);
        tokio::spawn(async move {
            supply.replenish().await;
        });
    }

    /// Top the funded queue up to the target size in batches. Single-flight:
    /// a concurrent trigger while one run is in progress is a no-op.
    /// Per-account creation failures are logged and retried with capped
    /// backoff; they never abort the run.
    async fn replenish(&self) {
        if self
            .replenishing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let mut failure_streak: u32 = 0;
        loop {
            let deficit = self.target_size.saturating_sub(self.size());
            if deficit == 0 {
                break;
            }
            let batch_size = deficit.min(self.batch_size);

            let started = Instant::now();
            let batch =
                futures::future::join_all((0..batch_size).map(|_| self.creator.create())).await;
            metrics()
                .replenish_batch_latency
                .observe(started.elapsed().as_secs_f64());

            let mut created = 0usize;
            let mut failed = 0usize;
            {
                let mut queues = self.inner.lock();
                for result in batch {
                    match result {
                        Ok(keypair) => {
                            queues
                                .funded
                                .push_back(SupplyAccount::new(keypair, self.account_ttl));
                            created += 1;
                        }
                        Err(err) => {
                            error!(pool = self.name, error = %err, "Failed to create supply account");
                            failed += 1;
                        }
                    }
                }
                self.funded_gauge.set(queues.funded.len() as i64);
            }

            metrics().accounts_created.inc_by(created as u64);
            if failed > 0 {
                metrics().replenish_failures.inc_by(failed as u64);
                failure_streak += 1;
                let backoff =
                    (Duration::from_secs(1) * (1u32 << failure_streak.min(4))).min(MAX_REPLENISH_BACKOFF);
                tokio::time::sleep(backoff).await;
            } else {
                failure_streak = 0;
            }

            info!(pool = self.name, size = self.size(), "Replenished supply");
        }

        self.replenishing.store(false, Ordering::Release);
    }

    #[cfg(test)]
    pub fn reserved_len(&self) -> usize {
        self.inner.lock().reserved.len()
    }

    #[cfg(test)]
    pub fn push_funded(&self, account: SupplyAccount) {
        self.inner.lock().funded.push_back(account);
    }
}

/// Rent an account of `space` bytes must carry to survive roughly a week of
/// epochs, with padding. Ported cluster math: 2.5 slots per second.
pub async fn calculate_rent(rpc: &RpcClient, space: usize) -> SupplyResult<u64> {
    let rent_exempt_balance = rpc.get_minimum_balance_for_rent_exemption(space).await?;
    let epoch_schedule = rpc.get_epoch_schedule().await?;
    let slots_per_second = 2.5;
    let slots_per_year = 365.25 * 24.0 * 60.0 * 60.0 * slots_per_second;
    let epochs_per_year = slots_per_year / epoch_schedule.slots_per_epoch as f64;
    let epochs_per_week = epochs_per_year / (365.25 / 7.0);
    let padding_multiplier = 2.0;
    let rent_per_epoch =
        (padding_multiplier * rent_exempt_balance as f64 / (2.0 * epochs_per_year)).round();
    let rent_epochs_to_cover = epochs_per_week.max(2.0);
    Ok((rent_per_epoch * rent_epochs_to_cover).ceil() as u64)
}

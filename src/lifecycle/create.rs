//! Transaction creation and dispatch
//!
//! Builds the program instruction for the next tracking id, signs it with
//! the client's fee payer, fans it out through the relay, and registers the
//! timers that drive retries and the timeout transition.

use crate::bits;
use crate::config::LifecycleConfig;
use crate::lifecycle::timers::ScheduledTask;
use crate::lifecycle::tracker::{Action, PendingHandles};
use crate::lifecycle::LifecycleHandle;
use crate::relay::TpuRelay;
use crate::types::TrackingId;
use anyhow::Context;
use parking_lot::Mutex;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::{
    hash::Hash,
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
    signature::{Keypair, Signer},
    transaction::Transaction,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error};

const BLOCKHASH_REFRESH_INTERVAL: Duration = Duration::from_secs(10);

/// Recent blockhash kept warm so transaction creation never waits on RPC
pub struct BlockhashCache {
    rpc: Arc<RpcClient>,
    current: Mutex<Hash>,
}

impl BlockhashCache {
    pub async fn start(rpc: Arc<RpcClient>) -> anyhow::Result<(Arc<Self>, ScheduledTask)> {
        let initial = rpc
            .get_latest_blockhash()
            .await
            .context("Failed to fetch initial blockhash")?;
        let cache = Arc::new(Self {
            rpc,
            current: Mutex::new(initial),
        });

        let refresher = Arc::clone(&cache);
        let task = ScheduledTask::interval(BLOCKHASH_REFRESH_INTERVAL, move || {
            let cache = Arc::clone(&refresher);
            async move {
                match cache.rpc.get_latest_blockhash().await {
                    Ok(hash) => *cache.current.lock() = hash,
                    Err(err) => error!(error = %err, "Failed to refresh blockhash"),
                }
            }
        });
        Ok((cache, task))
    }

    pub fn latest(&self) -> Hash {
        *self.current.lock()
    }

    #[cfg(test)]
    pub fn fixed(rpc: Arc<RpcClient>, hash: Hash) -> Arc<Self> {
        Arc::new(Self {
            rpc,
            current: Mutex::new(hash),
        })
    }
}

pub struct TransactionCreator {
    relay: Arc<TpuRelay>,
    handle: LifecycleHandle,
    blockhash: Arc<BlockhashCache>,
    program_id: Pubkey,
    /// Program accounts backing the bitmap partitions, in partition order
    partitions: Vec<Pubkey>,
    fee_payers: Vec<Arc<Keypair>>,
    next_tracking_id: AtomicUsize,
    timeout: Duration,
    retry_interval: Option<Duration>,
}

impl TransactionCreator {
    pub fn new(
        relay: Arc<TpuRelay>,
        handle: LifecycleHandle,
        blockhash: Arc<BlockhashCache>,
        program_id: Pubkey,
        partitions: Vec<Pubkey>,
        fee_payers: Vec<Arc<Keypair>>,
        config: &LifecycleConfig,
    ) -> Self {
        let retry_interval = if config.disable_retries {
            None
        } else {
            Some(Duration::from_millis(config.retry_interval_ms))
        };
        Self {
            relay,
            handle,
            blockhash,
            program_id,
            partitions,
            fee_payers,
            next_tracking_id: AtomicUsize::new(0),
            timeout: Duration::from_secs(config.timeout_secs),
            retry_interval,
        }
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Build, dispatch, and start tracking one transaction
    pub async fn create_and_send(&self) -> anyhow::Result<TrackingId> {
        let tracking_id = self.next_tracking_id.fetch_add(1, Ordering::AcqRel);
        let partition = tracking_id % self.partitions.len();
        let bit_id = tracking_id / self.partitions.len();

        let fee_payer = &self.fee_payers[partition % self.fee_payers.len()];
        let transaction = self.build(partition, bit_id, fee_payer)?;
        let signature = transaction.signatures[0];
        let wire = bincode::serialize(&transaction).context("Failed to encode transaction")?;

        let sent_at = Instant::now();
        let delivered = self.relay.send(&wire).await;
        debug!(
            tracking_id = tracking_id,
            endpoints = delivered,
            "Transaction dispatched"
        );

        let timeout_handle = self.handle.clone();
        let timeout = ScheduledTask::deadline(self.timeout, async move {
            timeout_handle.apply(Action::Timeout { tracking_id });
        });

        let retry = self.retry_interval.map(|interval| {
            let relay = Arc::clone(&self.relay);
            let wire = Arc::new(wire);
            Arc::new(ScheduledTask::interval(interval, move || {
                let relay = Arc::clone(&relay);
                let wire = Arc::clone(&wire);
                async move {
                    relay.send(&wire).await;
                }
            }))
        });

        self.handle.apply(Action::New {
            tracking_id,
            signature,
            sent_at,
            handles: PendingHandles {
                timeout: Arc::new(timeout),
                retry,
            },
        });
        Ok(tracking_id)
    }

    fn build(
        &self,
        partition: usize,
        bit_id: usize,
        fee_payer: &Keypair,
    ) -> anyhow::Result<Transaction> {
        let instruction = Instruction {
            program_id: self.program_id,
            accounts: vec![AccountMeta::new(self.partitions[partition], false)],
            data: bits::instruction_data(bit_id),
        };
        let blockhash = self.blockhash.latest();
        Ok(Transaction::new_signed_with_payer(
            &[instruction],
            Some(&fee_payer.pubkey()),
            &[fee_payer],
            blockhash,
        ))
    }
}

//! Resource supply pools
//!
//! Two parallel pools are kept stocked with pre-created accounts: fee payers
//! and program data accounts. A client request always consumes one of each,
//! so reservation is all-or-nothing across both pools.

pub mod accounts;
pub mod fee_accounts;
pub mod program_accounts;

pub use accounts::{AccountCreator, AccountSupply, SupplyAccount, SupplyError, SupplyResult};
pub use fee_accounts::FeeAccountSupply;
pub use program_accounts::ProgramAccountSupply;

use crate::config::SupplyConfig;
use crate::faucet::Faucet;
use crate::metrics::metrics;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::{message::Message, pubkey::Pubkey, system_instruction};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Fallback when the cluster won't quote a fee
const DEFAULT_SIGNATURE_FEE: u64 = 5_000;

/// Accounts handed to a client, one fee payer per program account
#[derive(Debug)]
pub struct PoppedAccounts {
    pub fee_accounts: Vec<SupplyAccount>,
    pub program_accounts: Vec<SupplyAccount>,
}

pub struct Supply {
    fee: FeeAccountSupply,
    program: ProgramAccountSupply,
    signature_fee: u64,
    tx_per_account: usize,
}

impl Supply {
    /// Build both pools, retrying endlessly until the cluster is reachable
    pub async fn init(
        rpc: Arc<RpcClient>,
        faucet: Arc<Faucet>,
        program_id: Pubkey,
        config: &SupplyConfig,
    ) -> Self {
        loop {
            match Self::try_init(&rpc, Arc::clone(&faucet), program_id, config).await {
                Ok(supply) => return supply,
                Err(err) => {
                    error!(error = %err, "Failed to initialize account supply, retrying");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    async fn try_init(
        rpc: &RpcClient,
        faucet: Arc<Faucet>,
        program_id: Pubkey,
        config: &SupplyConfig,
    ) -> SupplyResult<Self> {
        let signature_fee = signature_fee(rpc, &faucet).await;
        let fee =
            FeeAccountSupply::create(rpc, Arc::clone(&faucet), signature_fee, config).await?;
        info!("Fee account supply created");
        let program =
            ProgramAccountSupply::create(rpc, faucet, signature_fee, program_id, config).await?;
        info!("Program account supply created");
        Ok(Self {
            fee,
            program,
            signature_fee,
            tx_per_account: config.tx_per_account,
        })
    }

    /// Transactions each popped account pair can carry
    pub fn account_capacity(&self) -> usize {
        self.tx_per_account
    }

    pub fn program_account_space(&self) -> u64 {
        self.program.account_space
    }

    /// Funded depth of the shallower pool; used for admission control
    pub fn size(&self) -> usize {
        self.fee.supply.size().min(self.program.supply.size())
    }

    /// Reserve `count` accounts in both pools, or neither. The second
    /// pool's failure rolls back the first, so a partial reservation is
    /// never observable.
    pub fn reserve(&self, count: usize) -> bool {
        if !self.fee.supply.reserve(count) {
            metrics().reservations_rejected.inc();
            return false;
        }
        if !self.program.supply.reserve(count) {
            self.fee.supply.unreserve(count);
            metrics().reservations_rejected.inc();
            return false;
        }
        true
    }

    /// Return `count` reserved accounts in both pools to their funded queues
    pub fn unreserve(&self, count: usize) {
        self.fee.supply.unreserve(count);
        self.program.supply.unreserve(count);
    }

    /// Consume `count` reserved account pairs. A pop can fail when expiry
    /// pruning thinned the reserved queue; the surviving reservations in
    /// either pool go back to funded instead of staying stranded.
    pub fn pop(&self, count: usize) -> SupplyResult<PoppedAccounts> {
        let program_accounts = match self.program.supply.pop(count) {
            Ok(accounts) => accounts,
            Err(err) => {
                self.unreserve(count);
                return Err(err);
            }
        };
        let fee_accounts = match self.fee.supply.pop(count) {
            Ok(accounts) => accounts,
            Err(err) => {
                self.fee.supply.unreserve(count);
                return Err(err);
            }
        };
        Ok(PoppedAccounts {
            fee_accounts,
            program_accounts,
        })
    }

    /// Lamports a client must pay for `count` account pairs
    pub fn calculate_cost(&self, count: usize, include_fee: bool) -> u64 {
        let fee = if include_fee { self.signature_fee } else { 0 };
        fee + count as u64 * (self.fee.account_cost + self.program.account_cost)
    }
}

/// Quote the per-signature fee with a sample transfer message
async fn signature_fee(rpc: &RpcClient, faucet: &Faucet) -> u64 {
    let probe = async {
        let blockhash = rpc.get_latest_blockhash().await?;
        let message = Message::new_with_blockhash(
            &[system_instruction::transfer(
                &faucet.address(),
                &faucet.address(),
                1,
            )],
            Some(&faucet.address()),
            &blockhash,
        );
        rpc.get_fee_for_message(&message).await
    };
    match probe.await {
        Ok(fee) => fee,
        Err(err) => {
            error!(error = %err, "Failed to quote signature fee, using default");
            DEFAULT_SIGNATURE_FEE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::accounts::AccountCreator;
    use super::*;
    use async_trait::async_trait;
    use prometheus::IntGauge;
    use solana_sdk::signature::Keypair;

    struct InstantCreator;

    #[async_trait]
    impl AccountCreator for InstantCreator {
        async fn create(&self) -> anyhow::Result<Keypair> {
            Ok(Keypair::new())
        }
    }

    async fn pool(target: usize) -> Arc<AccountSupply> {
        let supply = AccountSupply::new(
            "test",
            Arc::new(InstantCreator),
            target,
            10,
            Duration::from_secs(60),
            IntGauge::new("test_gauge", "test").unwrap(),
        );
        for _ in 0..200 {
            if supply.size() >= target {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(supply.size(), target);
        supply
    }

    fn facade(fee_pool: Arc<AccountSupply>, program_pool: Arc<AccountSupply>) -> Supply {
        Supply {
            fee: FeeAccountSupply {
                supply: fee_pool,
                account_cost: 100,
            },
            program: ProgramAccountSupply {
                supply: program_pool,
                account_space: 125,
                account_cost: 50,
            },
            signature_fee: 7,
            tx_per_account: 1000,
        }
    }

    #[tokio::test]
    async fn reserve_is_atomic_across_pools() {
        // fee pool is deeper than the program pool
        let supply = facade(pool(4).await, pool(2).await);

        // n exceeding the shallower pool fails and leaves both unchanged
        assert!(!supply.reserve(3));
        assert_eq!(supply.fee.supply.size(), 4);
        assert_eq!(supply.program.supply.size(), 2);
        assert_eq!(supply.fee.supply.reserved_len(), 0);
        assert_eq!(supply.program.supply.reserved_len(), 0);

        // n within both pools succeeds in both
        assert!(supply.reserve(2));
        assert_eq!(supply.fee.supply.reserved_len(), 2);
        assert_eq!(supply.program.supply.reserved_len(), 2);
    }

    #[tokio::test]
    async fn unreserve_restores_both_pools() {
        let supply = facade(pool(3).await, pool(3).await);
        assert!(supply.reserve(2));
        supply.unreserve(2);
        assert_eq!(supply.fee.supply.size(), 3);
        assert_eq!(supply.program.supply.size(), 3);
    }

    #[tokio::test]
    async fn pop_returns_paired_accounts() {
        let supply = facade(pool(3).await, pool(3).await);
        assert!(supply.reserve(2));
        let popped = supply.pop(2).unwrap();
        assert_eq!(popped.fee_accounts.len(), 2);
        assert_eq!(popped.program_accounts.len(), 2);
    }

    #[tokio::test]
    async fn reserve_then_pop_scenario() {
        // target size 2: reserve(1) leaves 1 funded, 1 reserved; pop(1)
        // consumes it and replenishment refills the funded queue
        let supply = facade(pool(2).await, pool(2).await);
        assert!(supply.reserve(1));
        assert_eq!(supply.size(), 1);

        let popped = supply.pop(1).unwrap();
        assert_eq!(popped.fee_accounts.len(), 1);
        assert_eq!(supply.fee.supply.reserved_len(), 0);

        for _ in 0..200 {
            if supply.size() >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(supply.size(), 2);
    }

    #[tokio::test]
    async fn failed_pop_returns_surviving_reservations() {
        // fee pool holds one long-lived account plus one that expires
        // between reserve and pop
        let fee_pool = pool(1).await;
        fee_pool.push_funded(SupplyAccount::new(
            Keypair::new(),
            Duration::from_millis(50),
        ));
        let supply = facade(fee_pool, pool(2).await);

        assert!(supply.reserve(2));
        tokio::time::sleep(Duration::from_millis(80)).await;

        // program pop consumes its pair; fee pop fails on the pruned queue
        let err = supply.pop(2).unwrap_err();
        assert!(matches!(err, SupplyError::ReserveDepleted { .. }));

        // the surviving fee reservation went back to funded, not stranded
        assert_eq!(supply.fee.supply.reserved_len(), 0);
        assert_eq!(supply.fee.supply.size(), 1);
    }

    #[tokio::test]
    async fn cost_accounts_for_both_pools() {
        let supply = facade(pool(1).await, pool(1).await);
        assert_eq!(supply.calculate_cost(2, false), 300);
        assert_eq!(supply.calculate_cost(2, true), 307);
    }
}

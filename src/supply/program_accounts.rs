//! Program data account pool
//!
//! Program accounts hold the completion bitmap written by the on-chain
//! program: one bit per transaction, eight transactions per byte.

use super::accounts::{calculate_rent, AccountCreator, AccountSupply, SupplyResult};
use crate::config::SupplyConfig;
use crate::faucet::Faucet;
use crate::metrics::metrics;
use async_trait::async_trait;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::{pubkey::Pubkey, signature::Keypair};
use std::sync::Arc;
use std::time::Duration;

const TX_PER_BYTE: usize = 8;

pub struct ProgramAccountSupply {
    pub supply: Arc<AccountSupply>,
    /// Bitmap size in bytes
    pub account_space: u64,
    /// Total lamports spent creating one program account (rent plus the two
    /// required signatures)
    pub account_cost: u64,
}

impl ProgramAccountSupply {
    pub async fn create(
        rpc: &RpcClient,
        faucet: Arc<Faucet>,
        signature_fee: u64,
        program_id: Pubkey,
        config: &SupplyConfig,
    ) -> SupplyResult<Self> {
        let space = (config.tx_per_account + TX_PER_BYTE - 1) / TX_PER_BYTE;
        let rent = calculate_rent(rpc, space).await?;
        let creator = Arc::new(ProgramAccountCreator {
            faucet,
            space: space as u64,
            rent,
            program_id,
        });
        let supply = AccountSupply::new(
            "program_accounts",
            creator,
            config.target_size,
            config.batch_size,
            Duration::from_secs(config.account_expiry_days * 24 * 60 * 60),
            metrics().program_accounts_funded.clone(),
        );
        Ok(Self {
            supply,
            account_space: space as u64,
            account_cost: rent + 2 * signature_fee,
        })
    }
}

struct ProgramAccountCreator {
    faucet: Arc<Faucet>,
    space: u64,
    rent: u64,
    program_id: Pubkey,
}

#[async_trait]
impl AccountCreator for ProgramAccountCreator {
    async fn create(&self) -> anyhow::Result<Keypair> {
        let account = self
            .faucet
            .create_program_account(self.space, self.rent, &self.program_id)
            .await?;
        Ok(account)
    }
}

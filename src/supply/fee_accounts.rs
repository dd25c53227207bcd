//! Fee payer account pool
//!
//! Each fee account is funded to cover `tx_per_account` signatures plus its
//! own rent, so a client can burn through its allotment without touching the
//! faucet again.

use super::accounts::{calculate_rent, AccountCreator, AccountSupply, SupplyResult};
use crate::config::SupplyConfig;
use crate::faucet::Faucet;
use crate::metrics::metrics;
use async_trait::async_trait;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::signature::{Keypair, Signer};
use std::sync::Arc;
use std::time::Duration;

pub struct FeeAccountSupply {
    pub supply: Arc<AccountSupply>,
    /// Total lamports spent creating one fee account, including the faucet's
    /// own signature fee
    pub account_cost: u64,
}

impl FeeAccountSupply {
    pub async fn create(
        rpc: &RpcClient,
        faucet: Arc<Faucet>,
        signature_fee: u64,
        config: &SupplyConfig,
    ) -> SupplyResult<Self> {
        let rent = calculate_rent(rpc, 0).await?;
        let fund_amount = config.tx_per_account as u64 * (signature_fee + rent) + rent;
        let creator = Arc::new(FeeAccountCreator {
            faucet,
            fund_amount,
        });
        let supply = AccountSupply::new(
            "fee_accounts",
            creator,
            config.target_size,
            config.batch_size,
            Duration::from_secs(config.account_expiry_days * 24 * 60 * 60),
            metrics().fee_accounts_funded.clone(),
        );
        Ok(Self {
            supply,
            account_cost: fund_amount + signature_fee,
        })
    }
}

struct FeeAccountCreator {
    faucet: Arc<Faucet>,
    fund_amount: u64,
}

#[async_trait]
impl AccountCreator for FeeAccountCreator {
    async fn create(&self) -> anyhow::Result<Keypair> {
        let account = Keypair::new();
        self.faucet.fund(&account.pubkey(), self.fund_amount).await?;
        Ok(account)
    }
}

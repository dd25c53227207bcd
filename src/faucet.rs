//! Faucet: the funding primitive behind the account supply pools
//!
//! Owns the fee-paying keypair and performs all transfers and account
//! creations on behalf of the pools. Funding policy lives here and nowhere
//! else; the pools only call `fund` / `create_program_account`.

use base64::Engine;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::{
    native_token::LAMPORTS_PER_SOL,
    pubkey::Pubkey,
    signature::{Keypair, Signer},
    system_instruction,
    transaction::Transaction,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

const AIRDROP_AMOUNT: u64 = 10 * LAMPORTS_PER_SOL;
const LOW_BALANCE_THRESHOLD: u64 = LAMPORTS_PER_SOL;

#[derive(Debug, Error)]
pub enum FaucetError {
    #[error("Invalid payer key: {0}")]
    InvalidKey(String),
    #[error("RPC error: {0}")]
    Rpc(#[from] solana_client::client_error::ClientError),
}

pub type FaucetResult<T> = Result<T, FaucetError>;

pub struct Faucet {
    rpc: Arc<RpcClient>,
    payer: Keypair,
    airdrop_enabled: bool,
    checking_balance: AtomicBool,
}

impl Faucet {
    /// Initialize the faucet from an encoded payer key, or fall back to a
    /// throwaway airdrop-funded key. Airdrop failures are retried until the
    /// cluster cooperates.
    pub async fn init(rpc: Arc<RpcClient>, encoded_payer_key: Option<&str>) -> FaucetResult<Self> {
        let (payer, airdrop_enabled) = match encoded_payer_key {
            Some(encoded) => {
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(encoded)
                    .map_err(|e| FaucetError::InvalidKey(e.to_string()))?;
                let payer = Keypair::from_bytes(&bytes)
                    .map_err(|e| FaucetError::InvalidKey(e.to_string()))?;
                info!(address = %payer.pubkey(), "Faucet loaded from encoded payer key");
                (payer, false)
            }
            None => {
                let payer = Keypair::new();
                info!(address = %payer.pubkey(), "Airdrops enabled, funding throwaway faucet");
                loop {
                    match rpc.request_airdrop(&payer.pubkey(), AIRDROP_AMOUNT).await {
                        Ok(_) => break,
                        Err(err) => {
                            error!(error = %err, "Failed to airdrop to faucet, retrying");
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                    }
                }
                (payer, true)
            }
        };

        Ok(Self {
            rpc,
            payer,
            airdrop_enabled,
            checking_balance: AtomicBool::new(false),
        })
    }

    pub fn address(&self) -> Pubkey {
        self.payer.pubkey()
    }

    /// Transfer `lamports` from the faucet to `to`
    pub async fn fund(&self, to: &Pubkey, lamports: u64) -> FaucetResult<()> {
        let blockhash = self.rpc.get_latest_blockhash().await?;
        let tx = Transaction::new_signed_with_payer(
            &[system_instruction::transfer(
                &self.payer.pubkey(),
                to,
                lamports,
            )],
            Some(&self.payer.pubkey()),
            &[&self.payer],
            blockhash,
        );
        self.rpc.send_and_confirm_transaction(&tx).await?;
        Ok(())
    }

    /// Create a rent-funded account owned by `program_id`, paid by the faucet
    pub async fn create_program_account(
        &self,
        space: u64,
        lamports: u64,
        program_id: &Pubkey,
    ) -> FaucetResult<Keypair> {
        let account = Keypair::new();
        let blockhash = self.rpc.get_latest_blockhash().await?;
        let tx = Transaction::new_signed_with_payer(
            &[system_instruction::create_account(
                &self.payer.pubkey(),
                &account.pubkey(),
                lamports,
                space,
                program_id,
            )],
            Some(&self.payer.pubkey()),
            &[&self.payer, &account],
            blockhash,
        );
        self.rpc.send_and_confirm_transaction(&tx).await?;
        Ok(account)
    }

    /// Collect an inbound payment from a client-supplied payer key
    pub async fn collect_payment(
        &self,
        encoded_payer_key: &str,
        lamports: u64,
    ) -> FaucetResult<()> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded_payer_key)
            .map_err(|e| FaucetError::InvalidKey(e.to_string()))?;
        let from =
            Keypair::from_bytes(&bytes).map_err(|e| FaucetError::InvalidKey(e.to_string()))?;

        let blockhash = self.rpc.get_latest_blockhash().await?;
        let tx = Transaction::new_signed_with_payer(
            &[system_instruction::transfer(
                &from.pubkey(),
                &self.payer.pubkey(),
                lamports,
            )],
            Some(&from.pubkey()),
            &[&from],
            blockhash,
        );
        self.rpc.send_and_confirm_transaction(&tx).await?;
        self.check_balance().await;
        Ok(())
    }

    /// Check the faucet balance and re-airdrop when it runs low. Concurrent
    /// checks collapse into one.
    pub async fn check_balance(&self) {
        if self
            .checking_balance
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        match self.rpc.get_balance(&self.payer.pubkey()).await {
            Ok(balance) => {
                info!(balance = balance, "Faucet balance");
                if self.airdrop_enabled && balance <= LOW_BALANCE_THRESHOLD {
                    if let Err(err) = self
                        .rpc
                        .request_airdrop(&self.payer.pubkey(), AIRDROP_AMOUNT)
                        .await
                    {
                        warn!(error = %err, "Failed to top up faucet");
                    }
                }
            }
            Err(err) => warn!(error = %err, "Failed to check faucet balance"),
        }

        self.checking_balance.store(false, Ordering::Release);
    }
}

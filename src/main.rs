use anyhow::Context;
use clap::Parser;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signer;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use surge::config::Config;
use surge::faucet::Faucet;
use surge::http::{self, ServerState};
use surge::lifecycle::Lifecycle;
use surge::relay::{self, TpuRelay};
use surge::supply::Supply;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "surge", about = "High-rate transaction submission service")]
struct Args {
    /// Path to a TOML config file; localnet defaults when absent
    #[arg(long, env = "SURGE_CONFIG")]
    config: Option<String>,

    /// Override the RPC endpoint
    #[arg(long)]
    rpc_url: Option<String>,

    /// Override the websocket endpoint
    #[arg(long)]
    ws_url: Option<String>,

    /// Override the on-chain program id
    #[arg(long)]
    program_id: Option<String>,

    /// Override the HTTP port
    #[arg(long)]
    port: Option<u16>,

    /// Submit through the RPC path instead of direct leader fan-out
    #[arg(long)]
    disable_relay: bool,

    /// Pop one account pair and drive this many transactions through the
    /// full lifecycle, reporting throughput
    #[arg(long, value_name = "COUNT")]
    drive: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load config from {path}"))?,
        None => Config::localnet(),
    };
    if let Some(url) = args.rpc_url {
        config.rpc.url = url;
    }
    if let Some(ws_url) = args.ws_url {
        config.rpc.ws_url = ws_url;
    }
    if let Some(program_id) = args.program_id {
        config.rpc.program_id = Some(program_id);
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if args.disable_relay {
        config.relay.enabled = false;
    }

    let program_id = config
        .rpc
        .program_id
        .as_deref()
        .context("Program id required (config rpc.program_id or --program-id)")?;
    let program_id = Pubkey::from_str(program_id).context("Invalid program id")?;

    info!(rpc = %config.rpc.url, program = %program_id, "Starting surge");

    let rpc = Arc::new(RpcClient::new(config.rpc.url.clone()));
    let faucet = Arc::new(
        Faucet::init(Arc::clone(&rpc), config.rpc.encoded_payer_key.as_deref())
            .await
            .context("Failed to initialize faucet")?,
    );

    let supply = Arc::new(
        Supply::init(Arc::clone(&rpc), Arc::clone(&faucet), program_id, &config.supply).await,
    );
    info!(size = supply.size(), "Account supply ready");

    let current_slot = rpc.get_slot().await.context("Failed to fetch current slot")?;
    let tpu_relay = relay::start(
        Arc::clone(&rpc),
        &config.rpc.ws_url,
        current_slot,
        &config.relay,
    )
    .await
    .context("Failed to start leader relay")?;

    let state = Arc::new(ServerState {
        supply: Arc::clone(&supply),
        faucet,
        program_id,
        rpc_url: config.rpc.url.clone(),
        require_payment: config.server.require_payment,
    });
    let server_config = config.server.clone();
    tokio::spawn(async move {
        if let Err(err) = http::serve(state, &server_config).await {
            error!(error = %err, "HTTP server exited");
        }
    });

    if let Some(count) = args.drive {
        let rpc = Arc::clone(&rpc);
        let relay = Arc::clone(&tpu_relay);
        let ws_url = config.rpc.ws_url.clone();
        let lifecycle_config = config.lifecycle.clone();
        tokio::spawn(async move {
            if let Err(err) = drive(
                rpc,
                supply,
                relay,
                ws_url,
                program_id,
                count,
                lifecycle_config,
            )
            .await
            {
                error!(error = %err, "Drive round failed");
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    Ok(())
}

/// Pop one account pair and push `count` transactions through the full
/// lifecycle, logging progress until every record is terminal.
async fn drive(
    rpc: Arc<RpcClient>,
    supply: Arc<Supply>,
    relay: Arc<TpuRelay>,
    ws_url: String,
    program_id: Pubkey,
    count: usize,
    config: surge::config::LifecycleConfig,
) -> anyhow::Result<()> {
    if !supply.reserve(1) {
        anyhow::bail!("Account supply not ready");
    }
    let popped = supply.pop(1)?;
    let partitions: Vec<Pubkey> = popped
        .program_accounts
        .iter()
        .map(|account| account.keypair().pubkey())
        .collect();
    let fee_payers = popped
        .fee_accounts
        .iter()
        .map(|account| Arc::clone(account.keypair()))
        .collect();

    let lifecycle = Lifecycle::start(
        rpc,
        &ws_url,
        relay,
        program_id,
        partitions,
        fee_payers,
        &config,
    )
    .await?;

    let count = count.min(supply.account_capacity());
    for _ in 0..count {
        lifecycle.creator.create_and_send().await?;
    }
    info!(count = count, "Drive round dispatched");

    loop {
        tokio::time::sleep(Duration::from_secs(1)).await;
        let stats = lifecycle.handle.stats();
        info!(
            confirmed = stats.confirmed,
            timed_out = stats.timed_out,
            tps = stats.tps,
            avg_ms = stats.average_confirmation_ms,
            "Drive round progress"
        );
        if stats.confirmed + stats.timed_out >= count {
            break;
        }
    }
    Ok(())
}

//! Configuration loading from TOML files with per-field defaults

use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// RPC endpoints configuration
    pub rpc: RpcConfig,

    /// Account supply pools
    #[serde(default)]
    pub supply: SupplyConfig,

    /// Direct-to-leader relay
    #[serde(default)]
    pub relay: RelayConfig,

    /// Transaction lifecycle tracking
    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    /// Inbound HTTP surface and metrics
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    /// HTTP RPC endpoint
    pub url: String,

    /// WebSocket endpoint for pubsub subscriptions
    pub ws_url: String,

    /// Base64-encoded faucet payer key; a throwaway airdrop-funded key is
    /// used when absent
    #[serde(default)]
    pub encoded_payer_key: Option<String>,

    /// Deployed program that records transaction bits
    #[serde(default)]
    pub program_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupplyConfig {
    /// Number of funded accounts each pool keeps on hand
    #[serde(default = "default_supply_size")]
    pub target_size: usize,

    /// Accounts created per replenishment batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Transactions a single fee account is funded to cover
    #[serde(default = "default_tx_per_account")]
    pub tx_per_account: usize,

    /// Funded accounts are discarded after this many days
    #[serde(default = "default_expiry_days")]
    pub account_expiry_days: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// When false, `send` degrades to a single submission over RPC
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum number of live leader sockets
    #[serde(default = "default_fanout")]
    pub fanout: usize,

    /// Upcoming slots scanned when picking leader endpoints
    #[serde(default = "default_lookahead_slots")]
    pub lookahead_slots: u64,

    /// Recently passed slots included in the scan; covers leaders that are
    /// still accepting packets for slots they just produced
    #[serde(default = "default_past_slots")]
    pub past_slots: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Deadline before a pending transaction is marked dropped
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Interval between retransmissions of the identical signed bytes
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,

    /// Disable the retransmission loop entirely
    #[serde(default)]
    pub disable_retries: bool,

    /// Stop retrying as soon as weak commitment is observed instead of
    /// waiting for strong commitment
    #[serde(default)]
    pub retry_until_processed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Port for the inbound API (including /metrics)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Whether account handout requires an attached payment
    #[serde(default)]
    pub require_payment: bool,
}

fn default_supply_size() -> usize {
    50
}
fn default_batch_size() -> usize {
    10
}
fn default_tx_per_account() -> usize {
    1000
}
fn default_expiry_days() -> u64 {
    7
}
fn default_fanout() -> usize {
    10
}
fn default_lookahead_slots() -> u64 {
    40
}
fn default_past_slots() -> u64 {
    4
}
fn default_timeout_secs() -> u64 {
    45
}
fn default_retry_interval_ms() -> u64 {
    500
}
fn default_port() -> u16 {
    8080
}
fn default_true() -> bool {
    true
}

impl Default for SupplyConfig {
    fn default() -> Self {
        Self {
            target_size: default_supply_size(),
            batch_size: default_batch_size(),
            tx_per_account: default_tx_per_account(),
            account_expiry_days: default_expiry_days(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            fanout: default_fanout(),
            lookahead_slots: default_lookahead_slots(),
            past_slots: default_past_slots(),
        }
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            retry_interval_ms: default_retry_interval_ms(),
            disable_retries: false,
            retry_until_processed: false,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            require_payment: false,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Localnet defaults, used when no config file is present
    pub fn localnet() -> Self {
        Self {
            rpc: RpcConfig {
                url: "http://127.0.0.1:8899".to_string(),
                ws_url: "ws://127.0.0.1:8900".to_string(),
                encoded_payer_key: None,
                program_id: None,
            },
            supply: SupplyConfig::default(),
            relay: RelayConfig::default(),
            lifecycle: LifecycleConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

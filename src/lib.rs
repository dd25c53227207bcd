//! surge: high-rate ephemeral transaction submission for Solana clusters
//!
//! Hands out pre-funded account pairs to clients, relays their signed
//! transactions straight to upcoming block producers over UDP, and tracks
//! every transaction through a fork-tolerant commitment lifecycle.

pub mod bits;
pub mod config;
pub mod faucet;
pub mod http;
pub mod lifecycle;
pub mod metrics;
pub mod relay;
pub mod supply;
pub mod types;

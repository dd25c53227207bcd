//! Account and root subscriptions
//!
//! Each program account gets one websocket subscription per commitment
//! level. Notifications carry the full bitmap, so a dropped message never
//! loses a landing; the next notification covers it.

use crate::bits;
use crate::lifecycle::tracker::Action;
use crate::lifecycle::LifecycleHandle;
use crate::types::Commitment;
use futures::StreamExt;
use solana_account_decoder::UiAccountEncoding;
use solana_client::nonblocking::pubsub_client::PubsubClient;
use solana_rpc_client_api::config::RpcAccountInfoConfig;
use solana_sdk::pubkey::Pubkey;
use std::time::{Duration, Instant};
use tracing::{error, warn};

const RECONNECT_INTERVAL: Duration = Duration::from_secs(1);

/// Subscribe to every partition at both commitment levels, plus roots.
/// Tasks run until the handle's tracker is dropped.
pub fn start(ws_url: &str, partitions: &[Pubkey], handle: &LifecycleHandle) {
    let partition_count = partitions.len();
    for (partition, account) in partitions.iter().enumerate() {
        for commitment in Commitment::ALL {
            spawn_account_subscription(
                ws_url.to_string(),
                *account,
                partition,
                partition_count,
                commitment,
                handle.clone(),
            );
        }
    }
    spawn_root_subscription(ws_url.to_string(), handle.clone());
}

fn spawn_account_subscription(
    ws_url: String,
    account: Pubkey,
    partition: usize,
    partition_count: usize,
    commitment: Commitment,
    handle: LifecycleHandle,
) {
    tokio::spawn(async move {
        loop {
            let client = match PubsubClient::new(&ws_url).await {
                Ok(client) => client,
                Err(err) => {
                    error!(error = %err, "Failed to connect account subscription");
                    tokio::time::sleep(RECONNECT_INTERVAL).await;
                    continue;
                }
            };

            let config = RpcAccountInfoConfig {
                commitment: Some(commitment.as_commitment_config()),
                encoding: Some(UiAccountEncoding::Base64),
                data_slice: None,
                min_context_slot: None,
            };
            match client.account_subscribe(&account, Some(config)).await {
                Ok((mut stream, unsubscribe)) => {
                    while let Some(response) = stream.next().await {
                        let Some(data) = response.value.data.decode() else {
                            warn!(account = %account, "Undecodable account notification");
                            continue;
                        };
                        handle.apply(Action::AccountUpdate {
                            active_ids: bits::ids_from_account_data(&data),
                            partition,
                            partition_count,
                            commitment,
                            estimated_slot: response.context.slot,
                            received_at: Instant::now(),
                        });
                    }
                    unsubscribe().await;
                    warn!(
                        account = %account,
                        commitment = %commitment,
                        "Account subscription ended, reconnecting"
                    );
                }
                Err(err) => {
                    error!(error = %err, "Account subscription failed");
                }
            }
            tokio::time::sleep(RECONNECT_INTERVAL).await;
        }
    });
}

fn spawn_root_subscription(ws_url: String, handle: LifecycleHandle) {
    tokio::spawn(async move {
        loop {
            let client = match PubsubClient::new(&ws_url).await {
                Ok(client) => client,
                Err(err) => {
                    error!(error = %err, "Failed to connect root subscription");
                    tokio::time::sleep(RECONNECT_INTERVAL).await;
                    continue;
                }
            };

            match client.root_subscribe().await {
                Ok((mut stream, unsubscribe)) => {
                    while let Some(slot) = stream.next().await {
                        handle.apply(Action::Root { slot });
                    }
                    unsubscribe().await;
                }
                Err(err) => {
                    error!(error = %err, "Root subscription failed");
                }
            }
            tokio::time::sleep(RECONNECT_INTERVAL).await;
        }
    });
}

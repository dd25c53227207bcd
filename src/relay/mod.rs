//! Block producer relay
//!
//! Everything needed to put transactions in front of upcoming leaders:
//! cluster node discovery, slot progression tracking, the epoch leader
//! schedule, and the UDP fan-out itself.

pub mod leader_schedule;
pub mod nodes;
pub mod slot_tracker;
pub mod tpu_relay;

pub use leader_schedule::LeaderScheduleTracker;
pub use nodes::AvailableNodes;
pub use slot_tracker::{SlotObservation, SlotTracker};
pub use tpu_relay::TpuRelay;

use crate::config::RelayConfig;
use crate::types::Slot;
use anyhow::Context;
use futures::StreamExt;
use solana_client::nonblocking::pubsub_client::PubsubClient;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_rpc_client_api::response::SlotUpdate;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};

/// Bring the whole relay stack up: node discovery, leader schedule, the
/// fan-out sockets, and the slot subscription that drives them.
pub async fn start(
    rpc: Arc<RpcClient>,
    ws_url: &str,
    current_slot: Slot,
    config: &RelayConfig,
) -> anyhow::Result<Arc<TpuRelay>> {
    let nodes = AvailableNodes::start(Arc::clone(&rpc)).await;
    info!(nodes = nodes.len(), "Cluster nodes discovered");

    let schedule = LeaderScheduleTracker::new(Arc::clone(&rpc), config.lookahead_slots);
    schedule.start().await;

    let relay = TpuRelay::start(
        rpc,
        nodes,
        schedule,
        current_slot,
        config.enabled,
        config.fanout,
        config.past_slots,
    )
    .await;

    let (tx, rx) = mpsc::unbounded_channel();
    spawn_slot_subscription(ws_url.to_string(), tx).await?;

    let on_slot_relay = Arc::clone(&relay);
    slot_tracker::spawn(SlotTracker::new(current_slot), rx, move |slot| {
        on_slot_relay.on_slot(slot);
    });

    Ok(relay)
}

/// Subscribe to shred-level slot updates and forward them as observations.
/// The subscription is re-established if the stream ends.
async fn spawn_slot_subscription(
    ws_url: String,
    tx: mpsc::UnboundedSender<SlotObservation>,
) -> anyhow::Result<()> {
    let client = PubsubClient::new(&ws_url)
        .await
        .context("Failed to connect slot update subscription")?;

    tokio::spawn(async move {
        let mut client = client;
        loop {
            match client.slot_updates_subscribe().await {
                Ok((mut stream, unsubscribe)) => {
                    while let Some(update) = stream.next().await {
                        let observation = match update {
                            SlotUpdate::FirstShredReceived { slot, .. } => {
                                SlotObservation::FirstShredReceived { slot }
                            }
                            SlotUpdate::Completed { slot, .. } => {
                                SlotObservation::Completed { slot }
                            }
                            SlotUpdate::CreatedBank { slot, .. } => {
                                SlotObservation::CreatedBank { slot }
                            }
                            _ => continue,
                        };
                        if tx.send(observation).is_err() {
                            unsubscribe().await;
                            return;
                        }
                    }
                    unsubscribe().await;
                }
                Err(err) => {
                    error!(error = %err, "Slot update subscription failed");
                }
            }
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;

            match PubsubClient::new(&ws_url).await {
                Ok(reconnected) => client = reconnected,
                Err(err) => {
                    error!(error = %err, "Failed to reconnect slot update subscription");
                }
            }
        }
    });

    Ok(())
}

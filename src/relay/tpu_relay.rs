//! Transaction fan-out to block producer ingress ports
//!
//! Skips the RPC submission path and writes serialized transactions straight
//! to the UDP ingress ports of validators about to produce blocks. The
//! endpoint set follows the leader schedule; endpoints that error are
//! evicted and the set is rebuilt.

use crate::metrics::metrics;
use crate::relay::leader_schedule::LeaderScheduleTracker;
use crate::relay::nodes::AvailableNodes;
use crate::types::Slot;
use parking_lot::Mutex;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_rpc_client_api::config::RpcSendTransactionConfig;
use solana_sdk::commitment_config::CommitmentLevel;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::transaction::Transaction;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::{debug, error, warn};

const CONNECT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

pub struct TpuRelay {
    rpc: Arc<RpcClient>,
    nodes: Arc<AvailableNodes>,
    schedule: Arc<LeaderScheduleTracker>,
    /// Connected sockets in fan-out order, own identity first
    sockets: Mutex<Vec<(SocketAddr, Arc<UdpSocket>)>>,
    connecting: AtomicBool,
    current_slot: AtomicU64,
    /// Identity of the RPC node itself; prioritized so the node relaying
    /// our reads also sees our writes
    rpc_identity: Option<Pubkey>,
    enabled: bool,
    fanout: usize,
    past_slots: u64,
}

impl TpuRelay {
    #[allow(clippy::too_many_arguments)]
    pub async fn start(
        rpc: Arc<RpcClient>,
        nodes: Arc<AvailableNodes>,
        schedule: Arc<LeaderScheduleTracker>,
        current_slot: Slot,
        enabled: bool,
        fanout: usize,
        past_slots: u64,
    ) -> Arc<Self> {
        let rpc_identity = if enabled {
            match rpc.get_identity().await {
                Ok(identity) => Some(identity),
                Err(err) => {
                    warn!(error = %err, "Failed to fetch RPC node identity");
                    None
                }
            }
        } else {
            None
        };

        let relay = Arc::new(Self {
            rpc,
            nodes,
            schedule,
            sockets: Mutex::new(Vec::new()),
            connecting: AtomicBool::new(false),
            current_slot: AtomicU64::new(current_slot),
            rpc_identity,
            enabled,
            fanout,
            past_slots,
        });
        if enabled {
            relay.trigger_connect();
        }
        relay
    }

    /// Called on every slot advance. Rebuilds the endpoint set to follow the
    /// leader schedule and refetches the schedule near the epoch boundary.
    pub fn on_slot(self: &Arc<Self>, slot: Slot) {
        self.current_slot.store(slot, Ordering::Release);
        if !self.enabled {
            return;
        }
        self.schedule.maybe_refresh(slot);
        self.trigger_connect();
    }

    pub fn live_endpoints(&self) -> usize {
        self.sockets.lock().len()
    }

    /// Fan a serialized transaction out to the connected endpoints. Returns
    /// how many endpoints accepted the datagram.
    pub async fn send(self: &Arc<Self>, wire: &[u8]) -> usize {
        if !self.enabled {
            return self.send_via_rpc(wire).await;
        }

        let sockets: Vec<(SocketAddr, Arc<UdpSocket>)> = self.sockets.lock().clone();
        if sockets.is_empty() {
            metrics().relay_dropped_sends.inc();
            warn!("No TPU endpoints connected, dropping transaction");
            self.trigger_connect();
            return 0;
        }

        let mut delivered = 0;
        for (addr, socket) in sockets {
            match socket.send(wire).await {
                Ok(_) => {
                    delivered += 1;
                    metrics().relay_sends.inc();
                }
                Err(err) => {
                    metrics().relay_send_errors.inc();
                    debug!(addr = %addr, error = %err, "TPU send failed, evicting endpoint");
                    self.evict(addr);
                    self.trigger_connect();
                }
            }
        }
        delivered
    }

    /// RPC submission path used when the relay is disabled
    async fn send_via_rpc(&self, wire: &[u8]) -> usize {
        let transaction: Transaction = match bincode::deserialize(wire) {
            Ok(tx) => tx,
            Err(err) => {
                error!(error = %err, "Failed to decode transaction for RPC submission");
                return 0;
            }
        };
        let config = RpcSendTransactionConfig {
            skip_preflight: true,
            preflight_commitment: Some(CommitmentLevel::Confirmed),
            ..RpcSendTransactionConfig::default()
        };
        match self.rpc.send_transaction_with_config(&transaction, config).await {
            Ok(_) => {
                metrics().relay_fallback_sends.inc();
                1
            }
            Err(err) => {
                error!(error = %err, "RPC transaction submission failed");
                0
            }
        }
    }

    fn evict(&self, addr: SocketAddr) {
        self.sockets.lock().retain(|(a, _)| *a != addr);
        metrics()
            .relay_live_endpoints
            .set(self.sockets.lock().len() as i64);
    }

    /// Spawn the (single-flight) endpoint refresh loop. Retries until at
    /// least one endpoint connects.
    fn trigger_connect(self: &Arc<Self>) {
        if self
            .connecting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let relay = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                if relay.refresh_endpoints().await {
                    break;
                }
                tokio::time::sleep(CONNECT_RETRY_INTERVAL).await;
            }
            relay.connecting.store(false, Ordering::Release);
        });
    }

    /// Rebuild the socket set from the producers scheduled around the
    /// current slot. Returns whether any endpoint is connected.
    async fn refresh_endpoints(&self) -> bool {
        // Reach back a few slots so producers still finishing their turn
        // keep receiving our traffic
        let slot = self
            .current_slot
            .load(Ordering::Acquire)
            .saturating_sub(self.past_slots);
        let producers = self.schedule.upcoming_producers(slot);

        let mut addrs: Vec<SocketAddr> = Vec::new();
        for identity in &producers {
            match self.nodes.tpu_addr(identity) {
                Some(addr) => {
                    if Some(*identity) == self.rpc_identity {
                        addrs.insert(0, addr);
                    } else {
                        addrs.push(addr);
                    }
                }
                None => {
                    if self.nodes.mark_delinquent(*identity) {
                        warn!(identity = %identity, "Upcoming producer has no TPU address");
                    }
                }
            }
        }
        let mut seen = std::collections::HashSet::new();
        addrs.retain(|addr| seen.insert(*addr));
        addrs.truncate(self.fanout);

        let existing: HashMap<SocketAddr, Arc<UdpSocket>> =
            self.sockets.lock().iter().cloned().collect();

        let mut connected = Vec::with_capacity(addrs.len());
        for addr in addrs {
            if let Some(socket) = existing.get(&addr) {
                connected.push((addr, Arc::clone(socket)));
                continue;
            }
            match Self::connect(addr).await {
                Ok(socket) => connected.push((addr, Arc::new(socket))),
                Err(err) => {
                    debug!(addr = %addr, error = %err, "Failed to connect TPU socket");
                }
            }
        }

        let live = connected.len();
        *self.sockets.lock() = connected;
        metrics().relay_live_endpoints.set(live as i64);
        live > 0
    }

    async fn connect(addr: SocketAddr) -> std::io::Result<UdpSocket> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(addr).await?;
        Ok(socket)
    }

    #[cfg(test)]
    pub fn install_socket(&self, addr: SocketAddr, socket: UdpSocket) {
        self.sockets.lock().push((addr, Arc::new(socket)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rpc() -> Arc<RpcClient> {
        Arc::new(RpcClient::new("http://127.0.0.1:1".to_string()))
    }

    async fn relay_with_schedule(
        producers: Vec<(Pubkey, Vec<u64>)>,
        current_slot: Slot,
    ) -> (Arc<TpuRelay>, Arc<AvailableNodes>) {
        let rpc = rpc();
        let nodes = AvailableNodes::offline(Arc::clone(&rpc));
        let schedule =
            LeaderScheduleTracker::from_parts(Arc::clone(&rpc), 0, 10_000, producers, 40);
        let relay = Arc::new(TpuRelay {
            rpc,
            nodes: Arc::clone(&nodes),
            schedule,
            sockets: Mutex::new(Vec::new()),
            connecting: AtomicBool::new(false),
            current_slot: AtomicU64::new(current_slot),
            rpc_identity: None,
            enabled: true,
            fanout: 10,
            past_slots: 4,
        });
        (relay, nodes)
    }

    #[tokio::test]
    async fn refresh_connects_to_scheduled_producers() {
        let listener = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let tpu_addr = listener.local_addr().unwrap();

        let producer = Pubkey::new_unique();
        let (relay, nodes) = relay_with_schedule(vec![(producer, vec![100])], 100).await;
        nodes.insert_node(producer, tpu_addr);

        assert!(relay.refresh_endpoints().await);
        assert_eq!(relay.live_endpoints(), 1);

        let delivered = relay.send(b"payload").await;
        assert_eq!(delivered, 1);

        let mut buf = [0u8; 16];
        let (len, _) = listener.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"payload");
    }

    #[tokio::test]
    async fn unknown_producers_are_marked_delinquent() {
        let producer = Pubkey::new_unique();
        let (relay, nodes) = relay_with_schedule(vec![(producer, vec![100])], 100).await;

        assert!(!relay.refresh_endpoints().await);
        assert_eq!(relay.live_endpoints(), 0);
        // first sighting records the delinquent, so a repeat returns false
        assert!(!nodes.mark_delinquent(producer));
    }

    #[tokio::test]
    async fn failing_endpoint_is_evicted_without_blocking_others() {
        let listener = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let good_addr = listener.local_addr().unwrap();

        // keep the good endpoint in the schedule so the reconnect kicked
        // off by the failure retains it
        let producer = Pubkey::new_unique();
        let (relay, nodes) = relay_with_schedule(vec![(producer, vec![100])], 100).await;
        nodes.insert_node(producer, good_addr);

        let good = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        good.connect(good_addr).await.unwrap();
        relay.install_socket(good_addr, good);

        // an unconnected socket fails on send, simulating a dead endpoint
        let bad_addr: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let bad = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        relay.install_socket(bad_addr, bad);

        let delivered = relay.send(b"xyz").await;
        assert_eq!(delivered, 1);

        let mut buf = [0u8; 8];
        let (len, _) = listener.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"xyz");

        // the failing endpoint is gone
        assert_eq!(relay.live_endpoints(), 1);
    }

    #[tokio::test]
    async fn send_with_no_endpoints_drops() {
        let (relay, _nodes) = relay_with_schedule(vec![], 100).await;
        assert_eq!(relay.send(b"abc").await, 0);
    }
}

//! Cluster node discovery
//!
//! Maintains the identity -> TPU address map used by the relay. Nodes leave
//! the cluster or change port configuration, so the map is refreshed on a
//! fixed interval.

use dashmap::{DashMap, DashSet};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::pubkey::Pubkey;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

const REFRESH_INTERVAL: Duration = Duration::from_secs(30);

pub struct AvailableNodes {
    rpc: Arc<RpcClient>,
    nodes: DashMap<Pubkey, SocketAddr>,
    delinquents: DashSet<Pubkey>,
    refreshing: AtomicBool,
}

impl AvailableNodes {
    /// Fetch the initial node set (retrying until the cluster responds) and
    /// start the periodic refresh loop.
    pub async fn start(rpc: Arc<RpcClient>) -> Arc<Self> {
        let service = Arc::new(Self {
            rpc,
            nodes: DashMap::new(),
            delinquents: DashSet::new(),
            refreshing: AtomicBool::new(false),
        });

        while !service.refresh().await {
            tokio::time::sleep(Duration::from_secs(1)).await;
        }

        let refresher = Arc::clone(&service);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(REFRESH_INTERVAL);
            interval.tick().await;
            loop {
                interval.tick().await;
                refresher.refresh().await;
            }
        });

        service
    }

    /// TPU ingress address for a producer identity, if known
    pub fn tpu_addr(&self, identity: &Pubkey) -> Option<SocketAddr> {
        self.nodes.get(identity).map(|entry| *entry.value())
    }

    /// Record an identity with no reachable TPU port. Returns true the
    /// first time so callers can warn exactly once.
    pub fn mark_delinquent(&self, identity: Pubkey) -> bool {
        self.delinquents.insert(identity)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Rebuild the node map from `getClusterNodes`. Single-flight; returns
    /// whether a usable node set was installed.
    pub async fn refresh(&self) -> bool {
        if self
            .refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return !self.nodes.is_empty();
        }

        let result = self.rpc.get_cluster_nodes().await;
        let ok = match result {
            Ok(contact_infos) => {
                self.nodes.clear();
                for info in contact_infos {
                    let Ok(identity) = Pubkey::from_str(&info.pubkey) else {
                        continue;
                    };
                    if let Some(tpu) = info.tpu {
                        self.nodes.insert(identity, tpu);
                        self.delinquents.remove(&identity);
                    }
                }
                !self.nodes.is_empty()
            }
            Err(err) => {
                error!(error = %err, "Failed to fetch cluster nodes");
                false
            }
        };

        self.refreshing.store(false, Ordering::Release);
        ok
    }

    #[cfg(test)]
    pub fn offline(rpc: Arc<RpcClient>) -> Arc<Self> {
        Arc::new(Self {
            rpc,
            nodes: DashMap::new(),
            delinquents: DashSet::new(),
            refreshing: AtomicBool::new(false),
        })
    }

    #[cfg(test)]
    pub fn insert_node(&self, identity: Pubkey, tpu: SocketAddr) {
        self.nodes.insert(identity, tpu);
    }
}

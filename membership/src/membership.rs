use crate::discovery::{DiscoveryError, ServiceDiscovery};
use crate::metrics_defs::{RING_CHANGES, RING_NODES, RING_REFRESH_DURATION, RING_REFRESH_FAILED};
use crate::node::{MembershipError, Node};
use crate::ring::HashRing;
use parking_lot::RwLock;
use shared::{counter, gauge, histogram};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

#[derive(Debug, Default, PartialEq)]
pub struct RefreshSummary {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl RefreshSummary {
    pub fn is_unchanged(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

struct MembershipInner {
    local: Node,
    discovery: Arc<dyn ServiceDiscovery>,
    refresh_interval: Duration,
    ring: RwLock<HashRing>,
    // Set once the first refresh succeeds. Until then nothing is owned locally.
    ready: AtomicBool,
}

/// Cheaply cloneable handle to the shared ring.
///
/// Ownership checks take a read lock; only the refresh task writes.
#[derive(Clone)]
pub struct Membership {
    inner: Arc<MembershipInner>,
}

impl Membership {
    pub fn new(
        local_address: &str,
        discovery: Arc<dyn ServiceDiscovery>,
        refresh_interval: Duration,
    ) -> Result<Self, MembershipError> {
        let local = Node::from_address(local_address)?;

        Ok(Membership {
            inner: Arc::new(MembershipInner {
                local,
                discovery,
                refresh_interval,
                ring: RwLock::new(HashRing::new()),
                ready: AtomicBool::new(false),
            }),
        })
    }

    /// Spawns the periodic refresh loop. The first refresh runs immediately.
    pub fn spawn_refresher(&self) -> JoinHandle<()> {
        let membership = self.clone();
        tokio::spawn(async move {
            membership.run_refresh_loop().await;
        })
    }

    async fn run_refresh_loop(&self) {
        let mut ticker = tokio::time::interval(self.inner.refresh_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            // Errors keep the previous ring and are retried on the next tick.
            if let Err(e) = self.refresh().await {
                tracing::warn!(error = %e, "membership refresh failed, keeping previous ring");
            }
        }
    }

    /// Queries discovery once and reconciles the ring against the result.
    pub async fn refresh(&self) -> Result<RefreshSummary, DiscoveryError> {
        let start = Instant::now();

        let servers = match self.inner.discovery.get_servers().await {
            Ok(servers) => servers,
            Err(e) => {
                counter!(RING_REFRESH_FAILED).increment(1);
                return Err(e);
            }
        };

        let mut current: HashMap<String, Node> = HashMap::new();
        for address in &servers {
            match Node::from_address(address) {
                Ok(node) => {
                    current.insert(node.hash_value.clone(), node);
                }
                Err(e) => tracing::warn!(error = %e, "skipping discovered address"),
            }
        }

        let summary = {
            let mut ring = self.inner.ring.write();
            let mut summary = RefreshSummary::default();

            let stale: Vec<String> = ring
                .nodes()
                .filter(|n| !current.contains_key(&n.hash_value))
                .map(|n| n.hash_value.clone())
                .collect();
            for hash_value in stale {
                ring.remove(&hash_value);
                summary.removed.push(hash_value);
            }

            for (hash_value, node) in current {
                if !ring.contains(&hash_value) {
                    ring.add(node);
                    summary.added.push(hash_value);
                }
            }

            gauge!(RING_NODES).set(ring.len() as f64);
            summary
        };

        self.inner.ready.store(true, Ordering::Relaxed);

        if !summary.is_unchanged() {
            counter!(RING_CHANGES).increment((summary.added.len() + summary.removed.len()) as u64);
            tracing::info!(
                added = ?summary.added,
                removed = ?summary.removed,
                "membership ring changed"
            );
        }
        histogram!(RING_REFRESH_DURATION).record(start.elapsed().as_secs_f64());

        Ok(summary)
    }

    /// Whether this process owns `key` on the current ring.
    pub fn is_owner(&self, key: &str) -> bool {
        let ring = self.inner.ring.read();
        ring.get(key)
            .is_some_and(|node| node.hash_value == self.inner.local.hash_value)
    }

    pub fn owner(&self, key: &str) -> Option<Node> {
        self.inner.ring.read().get(key).cloned()
    }

    pub fn nodes(&self) -> Vec<Node> {
        self.inner.ring.read().nodes().cloned().collect()
    }

    pub fn local_node(&self) -> &Node {
        &self.inner.local
    }

    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::Relaxed)
    }
}

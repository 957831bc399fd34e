//! Local cluster capacity tracking
//!
//! The tracker periodically snapshots per-node available capacity and answers
//! admission queries. The snapshot is replaced wholesale under a write lock,
//! so readers never observe a partially updated view; a failed refresh keeps
//! the previous snapshot authoritative (stale-but-available).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, RwLock};
use tracing::{debug, error, info};

use crate::backend::{BackendError, ClusterBackend};

/// Errors refreshing the capacity snapshot
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("Cluster listing failed: {0}")]
    Backend(#[from] BackendError),
}

/// Resources requested by one invocation
#[derive(Debug, Clone, Copy)]
pub struct ResourceRequest {
    /// Requested CPU in milli-units
    pub cpu_milli: i64,
    /// Requested memory in bytes
    pub memory_bytes: i64,
}

/// Per-node available capacity, rebuilt wholesale on each refresh
#[derive(Debug, Clone)]
struct NodeResourceSnapshot {
    name: String,
    cpu_free_milli: i64,
    memory_free_bytes: i64,
}

/// Tracks local cluster capacity for admission checks
pub struct ResourceTracker {
    backend: Arc<dyn ClusterBackend>,
    snapshot: RwLock<Vec<NodeResourceSnapshot>>,
}

impl ResourceTracker {
    /// Create a tracker with an empty snapshot
    pub fn new(backend: Arc<dyn ClusterBackend>) -> Self {
        Self {
            backend,
            snapshot: RwLock::new(Vec::new()),
        }
    }

    /// Rebuild the capacity snapshot from current node and pod listings
    ///
    /// For each schedulable, ready node: `available = allocatable − Σ requests
    /// of non-terminal pods bound to it`. Fails without touching the snapshot
    /// if either listing fails.
    pub async fn refresh(&self) -> Result<(), TrackerError> {
        let nodes = self.backend.list_nodes().await?;
        let pods = self.backend.list_pods(None).await?;

        let mut fresh = Vec::with_capacity(nodes.len());

        for node in nodes {
            if !node.schedulable || !node.ready {
                continue;
            }

            let mut cpu_free = node.cpu_allocatable_milli;
            let mut memory_free = node.memory_allocatable_bytes;

            for pod in &pods {
                if pod.phase.is_terminal() {
                    continue;
                }
                if pod.node_name.as_deref() == Some(node.name.as_str()) {
                    cpu_free -= pod.cpu_requested_milli;
                    memory_free -= pod.memory_requested_bytes;
                }
            }

            fresh.push(NodeResourceSnapshot {
                name: node.name,
                cpu_free_milli: cpu_free,
                memory_free_bytes: memory_free,
            });
        }

        debug!("Capacity snapshot refreshed: {} schedulable nodes", fresh.len());

        let mut snapshot = self.snapshot.write().await;
        *snapshot = fresh;
        Ok(())
    }

    /// Whether some node can host the request right now
    ///
    /// First-fit over the tracked snapshot, strictly greater than the request
    /// on both axes. This is an admission hint, not a guarantee: the snapshot
    /// is inherently racy against concurrent scheduling.
    pub async fn is_schedulable(&self, request: ResourceRequest) -> bool {
        let snapshot = self.snapshot.read().await;
        match snapshot.iter().find(|node| {
            node.cpu_free_milli > request.cpu_milli
                && node.memory_free_bytes > request.memory_bytes
        }) {
            Some(node) => {
                debug!("Request fits on node '{}'", node.name);
                true
            }
            None => false,
        }
    }

    /// Number of nodes in the current snapshot
    pub async fn tracked_nodes(&self) -> usize {
        self.snapshot.read().await.len()
    }
}

/// Spawn the periodic refresh loop as a background task
///
/// Refresh errors are logged and never abort the loop; the stale snapshot
/// stays authoritative until the next successful refresh. Returns a shutdown
/// sender that stops the loop.
pub fn spawn_resource_tracker(
    tracker: Arc<ResourceTracker>,
    interval: Duration,
) -> watch::Sender<bool> {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        info!(
            "Resource tracker started, refreshing every {}s",
            interval.as_secs()
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = tracker.refresh().await {
                        error!("Capacity refresh failed, keeping stale snapshot: {}", e);
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Resource tracker shutting down");
                        break;
                    }
                }
            }
        }
    });

    shutdown_tx
}

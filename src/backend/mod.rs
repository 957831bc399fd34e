//! Cluster backend seam
//!
//! The delegation core consumes the local cluster through this trait: node
//! and pod listings for the resource tracker, pending-pod scans and service
//! definitions for the rescue loop. Production uses the Kubernetes
//! implementation; tests substitute an in-memory fake.

pub mod kubernetes;

pub use kubernetes::KubernetesBackend;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::delegation::Service;

/// Errors from the cluster backend
#[derive(Debug, Error)]
pub enum BackendError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Service definition missing or incomplete
    #[error("Service '{0}' not found")]
    ServiceNotFound(String),

    /// Service definition present but unparseable
    #[error("Invalid definition for service '{name}': {source}")]
    InvalidDefinition {
        name: String,
        #[source]
        source: serde_yaml::Error,
    },

    /// Backend unreachable or misconfigured
    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

/// Available capacity of one local node
#[derive(Debug, Clone)]
pub struct NodeResources {
    /// Node name
    pub name: String,
    /// Allocatable CPU in milli-units
    pub cpu_allocatable_milli: i64,
    /// Allocatable memory in bytes
    pub memory_allocatable_bytes: i64,
    /// Whether the node accepts new pods
    pub schedulable: bool,
    /// Whether the node reports Ready
    pub ready: bool,
}

/// Phase of a local pod
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    /// Parse a Kubernetes phase string
    pub fn parse(phase: &str) -> Self {
        match phase {
            "Pending" => PodPhase::Pending,
            "Running" => PodPhase::Running,
            "Succeeded" => PodPhase::Succeeded,
            "Failed" => PodPhase::Failed,
            _ => PodPhase::Unknown,
        }
    }

    /// Whether the pod still holds (or will hold) node resources
    pub fn is_terminal(self) -> bool {
        matches!(self, PodPhase::Succeeded | PodPhase::Failed)
    }
}

/// Snapshot of one local pod, as the scheduler core sees it
#[derive(Debug, Clone)]
pub struct PodSnapshot {
    /// Pod name
    pub name: String,
    /// Pod namespace
    pub namespace: String,
    /// Node the pod is bound to, if scheduled
    pub node_name: Option<String>,
    /// Current phase
    pub phase: PodPhase,
    /// Summed CPU requests in milli-units
    pub cpu_requested_milli: i64,
    /// Summed memory requests in bytes
    pub memory_requested_bytes: i64,
    /// Pod labels
    pub labels: HashMap<String, String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Original invocation payload recovered from the container environment
    pub event_payload: Option<String>,
}

/// Access to the local cluster's state
#[async_trait]
pub trait ClusterBackend: Send + Sync {
    /// List all nodes with their allocatable capacity
    async fn list_nodes(&self) -> Result<Vec<NodeResources>, BackendError>;

    /// List pods, cluster-wide (`None`) or within one namespace
    async fn list_pods(&self, namespace: Option<&str>) -> Result<Vec<PodSnapshot>, BackendError>;

    /// Read a service definition by name
    async fn read_service(&self, name: &str) -> Result<Service, BackendError>;

    /// Delete the job backing a stuck invocation
    async fn delete_job(&self, name: &str) -> Result<(), BackendError>;
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Mutex;

    /// In-memory backend for unit tests
    #[derive(Default)]
    pub struct FakeBackend {
        pub nodes: Vec<NodeResources>,
        pub pods: Vec<PodSnapshot>,
        pub services: HashMap<String, Service>,
        pub deleted_jobs: Mutex<Vec<String>>,
        pub fail_listings: AtomicBool,
    }

    #[async_trait]
    impl ClusterBackend for FakeBackend {
        async fn list_nodes(&self) -> Result<Vec<NodeResources>, BackendError> {
            if self.fail_listings.load(Ordering::Relaxed) {
                return Err(BackendError::Unavailable("fake outage".to_string()));
            }
            Ok(self.nodes.clone())
        }

        async fn list_pods(
            &self,
            namespace: Option<&str>,
        ) -> Result<Vec<PodSnapshot>, BackendError> {
            if self.fail_listings.load(Ordering::Relaxed) {
                return Err(BackendError::Unavailable("fake outage".to_string()));
            }
            Ok(self
                .pods
                .iter()
                .filter(|p| namespace.map_or(true, |ns| p.namespace == ns))
                .cloned()
                .collect())
        }

        async fn read_service(&self, name: &str) -> Result<Service, BackendError> {
            self.services
                .get(name)
                .cloned()
                .ok_or_else(|| BackendError::ServiceNotFound(name.to_string()))
        }

        async fn delete_job(&self, name: &str) -> Result<(), BackendError> {
            self.deleted_jobs.lock().await.push(name.to_string());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pod_phase_parse() {
        assert_eq!(PodPhase::parse("Pending"), PodPhase::Pending);
        assert_eq!(PodPhase::parse("Running"), PodPhase::Running);
        assert_eq!(PodPhase::parse("Evicted"), PodPhase::Unknown);
    }

    #[test]
    fn test_terminal_phases() {
        assert!(PodPhase::Succeeded.is_terminal());
        assert!(PodPhase::Failed.is_terminal());
        assert!(!PodPhase::Pending.is_terminal());
        assert!(!PodPhase::Running.is_terminal());
    }
}

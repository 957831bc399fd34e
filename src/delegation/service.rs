//! Service, replica, and cluster definitions for delegation
//!
//! These types mirror the service definitions exchanged between cooperating
//! clusters. They are owned by the surrounding CRUD layer and read-only
//! within the delegation core; replica priorities are the one exception,
//! recomputed by the ranking strategies on every delegation attempt.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A service that can be invoked asynchronously and delegated between clusters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    /// Service name, unique within a cluster
    pub name: String,

    /// CPU request in decimal cores (e.g. "1.5") or milli-units (e.g. "250m")
    #[serde(default)]
    pub cpu: String,

    /// Memory request (e.g. "256Mi")
    #[serde(default)]
    pub memory: String,

    /// Invocation token for this service on its home cluster
    #[serde(default)]
    pub token: String,

    /// Identifier of the cluster this definition belongs to
    #[serde(rename = "cluster_id")]
    #[serde(default)]
    pub cluster_id: String,

    /// Strategy used to rank delegation targets
    #[serde(default)]
    pub delegation: DelegationMode,

    /// Ordered delegation targets
    #[serde(default)]
    pub replicas: Vec<Replica>,

    /// Known clusters indexed by cluster id
    #[serde(default)]
    pub clusters: HashMap<String, Cluster>,
}

impl Service {
    /// Create a minimal service definition
    pub fn new(name: impl Into<String>, cluster_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cpu: String::new(),
            memory: String::new(),
            token: String::new(),
            cluster_id: cluster_id.into(),
            delegation: DelegationMode::default(),
            replicas: Vec::new(),
            clusters: HashMap::new(),
        }
    }

    /// Set the delegation mode
    pub fn with_delegation(mut self, mode: DelegationMode) -> Self {
        self.delegation = mode;
        self
    }

    /// Add a delegation target
    pub fn with_replica(mut self, replica: Replica) -> Self {
        self.replicas.push(replica);
        self
    }

    /// Register a known cluster
    pub fn with_cluster(mut self, id: impl Into<String>, cluster: Cluster) -> Self {
        self.clusters.insert(id.into(), cluster);
        self
    }

    /// CPU request in milli-units
    ///
    /// An empty or unparseable request counts as zero, so services without a
    /// CPU request never fail capacity checks on that account.
    pub fn cpu_milli(&self) -> u64 {
        parse_cpu_quantity(&self.cpu).unwrap_or(0)
    }
}

/// Strategy used to assign priorities to delegation targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DelegationMode {
    /// Keep externally assigned priorities, only sort before dispatch
    #[default]
    Static,
    /// Uniform random priority for clusters with enough free CPU
    Random,
    /// Priority proportional to the cluster's total free CPU
    LoadBased,
    /// Multi-criteria TOPSIS ranking over probe measurements
    Topsis,
}

/// Kind of delegation target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplicaKind {
    /// A service instance on a cooperating cluster
    Oscar,
    /// An arbitrary external HTTP endpoint
    Endpoint,
}

/// A delegation target: either a cooperating cluster's service or a raw endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Replica {
    /// Target kind
    #[serde(rename = "type")]
    pub kind: ReplicaKind,

    /// Cluster id for `oscar` targets, resolved via `Service::clusters`
    #[serde(rename = "cluster_id")]
    #[serde(default)]
    pub cluster_id: String,

    /// Remote service name for `oscar` targets
    #[serde(rename = "service_name")]
    #[serde(default)]
    pub service_name: String,

    /// Target URL for `endpoint` targets
    #[serde(default)]
    pub url: String,

    /// Dispatch priority, lower is preferred; `NO_DELEGATE_PRIORITY` excludes
    /// the target entirely
    #[serde(default)]
    pub priority: u32,

    /// Extra HTTP headers forwarded with the delegated job
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Verify the target's TLS certificate
    #[serde(rename = "ssl_verify")]
    #[serde(default = "default_true")]
    pub ssl_verify: bool,
}

impl Replica {
    /// Create an `oscar` replica targeting a service on a cooperating cluster
    pub fn oscar(cluster_id: impl Into<String>, service_name: impl Into<String>) -> Self {
        Self {
            kind: ReplicaKind::Oscar,
            cluster_id: cluster_id.into(),
            service_name: service_name.into(),
            url: String::new(),
            priority: 0,
            headers: HashMap::new(),
            ssl_verify: true,
        }
    }

    /// Create an `endpoint` replica targeting a raw URL
    pub fn endpoint(url: impl Into<String>) -> Self {
        Self {
            kind: ReplicaKind::Endpoint,
            cluster_id: String::new(),
            service_name: String::new(),
            url: url.into(),
            priority: 0,
            headers: HashMap::new(),
            ssl_verify: true,
        }
    }

    /// Set the dispatch priority
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// Add a forwarded header
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// Credentials and address of a cooperating cluster
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    /// Base URL of the cluster API (e.g. "https://cluster.example.com")
    pub endpoint: String,

    /// Basic-auth user, used only to resolve bearer tokens and probe status
    #[serde(rename = "auth_user")]
    #[serde(default)]
    pub auth_user: String,

    /// Basic-auth password
    #[serde(rename = "auth_password")]
    #[serde(default)]
    pub auth_password: String,

    /// Verify the cluster's TLS certificate
    #[serde(rename = "ssl_verify")]
    #[serde(default = "default_true")]
    pub ssl_verify: bool,
}

impl Cluster {
    /// Create a cluster entry with basic-auth credentials
    pub fn new(
        endpoint: impl Into<String>,
        auth_user: impl Into<String>,
        auth_password: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            auth_user: auth_user.into(),
            auth_password: auth_password.into(),
            ssl_verify: true,
        }
    }

    /// Disable TLS verification for this cluster only
    pub fn insecure(mut self) -> Self {
        self.ssl_verify = false;
        self
    }
}

fn default_true() -> bool {
    true
}

/// Errors parsing resource quantities
#[derive(Debug, Error)]
pub enum QuantityError {
    #[error("Invalid CPU quantity '{0}'")]
    InvalidCpu(String),
}

/// Parse a CPU quantity into milli-units
///
/// Accepts decimal cores ("1.5") and milli-units ("500m"). An empty string
/// parses to zero.
pub fn parse_cpu_quantity(quantity: &str) -> Result<u64, QuantityError> {
    let quantity = quantity.trim();
    if quantity.is_empty() {
        return Ok(0);
    }

    if let Some(milli) = quantity.strip_suffix('m') {
        return milli
            .parse::<u64>()
            .map_err(|_| QuantityError::InvalidCpu(quantity.to_string()));
    }

    quantity
        .parse::<f64>()
        .map(|cores| (cores * 1000.0).round() as u64)
        .map_err(|_| QuantityError::InvalidCpu(quantity.to_string()))
}

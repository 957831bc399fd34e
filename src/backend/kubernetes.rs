//! Kubernetes implementation of the cluster backend
//!
//! Nodes and pods are read through the core API; service definitions live in
//! per-service ConfigMaps in the services namespace; stuck jobs are deleted
//! through the batch API with background propagation.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Node, Pod};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::{Api, DeleteParams, ListParams};
use kube::Client;
use tracing::debug;

use super::{BackendError, ClusterBackend, NodeResources, PodPhase, PodSnapshot};
use crate::delegation::service::parse_cpu_quantity;
use crate::delegation::Service;

/// ConfigMap key holding a service definition
pub const SERVICE_DEFINITION_KEY: &str = "service.yaml";

/// Cluster backend over the Kubernetes API
pub struct KubernetesBackend {
    client: Client,
    namespace: String,
    event_variable: String,
}

impl KubernetesBackend {
    /// Connect using the ambient kubeconfig or in-cluster credentials
    pub async fn connect(
        namespace: impl Into<String>,
        event_variable: impl Into<String>,
    ) -> Result<Self, BackendError> {
        let client = Client::try_default().await?;
        Ok(Self {
            client,
            namespace: namespace.into(),
            event_variable: event_variable.into(),
        })
    }

    /// Wrap an existing client (used by tests against mock API servers)
    pub fn with_client(
        client: Client,
        namespace: impl Into<String>,
        event_variable: impl Into<String>,
    ) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            event_variable: event_variable.into(),
        }
    }
}

#[async_trait]
impl ClusterBackend for KubernetesBackend {
    async fn list_nodes(&self) -> Result<Vec<NodeResources>, BackendError> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let list = nodes.list(&ListParams::default()).await?;
        Ok(list.items.iter().map(node_resources).collect())
    }

    async fn list_pods(&self, namespace: Option<&str>) -> Result<Vec<PodSnapshot>, BackendError> {
        let pods: Api<Pod> = match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        };
        let list = pods.list(&ListParams::default()).await?;
        Ok(list
            .items
            .iter()
            .map(|pod| pod_snapshot(pod, &self.event_variable))
            .collect())
    }

    async fn read_service(&self, name: &str) -> Result<Service, BackendError> {
        let configmaps: Api<ConfigMap> = Api::namespaced(self.client.clone(), &self.namespace);
        let configmap = match configmaps.get(name).await {
            Ok(cm) => cm,
            Err(kube::Error::Api(e)) if e.code == 404 => {
                return Err(BackendError::ServiceNotFound(name.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let definition = configmap
            .data
            .as_ref()
            .and_then(|data| data.get(SERVICE_DEFINITION_KEY))
            .ok_or_else(|| BackendError::ServiceNotFound(name.to_string()))?;

        serde_yaml::from_str(definition).map_err(|source| BackendError::InvalidDefinition {
            name: name.to_string(),
            source,
        })
    }

    async fn delete_job(&self, name: &str) -> Result<(), BackendError> {
        let jobs: Api<Job> = Api::namespaced(self.client.clone(), &self.namespace);
        let _ = jobs.delete(name, &DeleteParams::background()).await?;
        debug!("Deleted job '{}' in namespace '{}'", name, self.namespace);
        Ok(())
    }
}

/// Extract the capacity view the resource tracker needs from a node
fn node_resources(node: &Node) -> NodeResources {
    let name = node.metadata.name.clone().unwrap_or_default();
    let schedulable = !node
        .spec
        .as_ref()
        .and_then(|s| s.unschedulable)
        .unwrap_or(false);

    let status = node.status.as_ref();
    let ready = status
        .and_then(|s| s.conditions.as_ref())
        .map(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
        .unwrap_or(false);

    let allocatable = status.and_then(|s| s.allocatable.as_ref());
    let cpu_allocatable_milli = allocatable
        .and_then(|a| a.get("cpu"))
        .map(cpu_milli)
        .unwrap_or(0);
    let memory_allocatable_bytes = allocatable
        .and_then(|a| a.get("memory"))
        .map(memory_bytes)
        .unwrap_or(0);

    NodeResources {
        name,
        cpu_allocatable_milli,
        memory_allocatable_bytes,
        schedulable,
        ready,
    }
}

/// Extract the scheduler-facing view of a pod
fn pod_snapshot(pod: &Pod, event_variable: &str) -> PodSnapshot {
    let spec = pod.spec.as_ref();

    let mut cpu_requested_milli = 0;
    let mut memory_requested_bytes = 0;
    let mut event_payload = None;

    if let Some(spec) = spec {
        for container in &spec.containers {
            if let Some(requests) = container.resources.as_ref().and_then(|r| r.requests.as_ref()) {
                cpu_requested_milli += requests.get("cpu").map(cpu_milli).unwrap_or(0);
                memory_requested_bytes += requests.get("memory").map(memory_bytes).unwrap_or(0);
            }
            if event_payload.is_none() {
                event_payload = container
                    .env
                    .iter()
                    .flatten()
                    .find(|e| e.name == event_variable)
                    .and_then(|e| e.value.clone());
            }
        }
    }

    let phase = pod
        .status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .map(PodPhase::parse)
        .unwrap_or(PodPhase::Unknown);

    let labels: HashMap<String, String> = pod
        .metadata
        .labels
        .as_ref()
        .map(|l| l.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default();

    PodSnapshot {
        name: pod.metadata.name.clone().unwrap_or_default(),
        namespace: pod.metadata.namespace.clone().unwrap_or_default(),
        node_name: spec.and_then(|s| s.node_name.clone()),
        phase,
        cpu_requested_milli,
        memory_requested_bytes,
        labels,
        created_at: pod
            .metadata
            .creation_timestamp
            .as_ref()
            .map(|t| t.0)
            .unwrap_or_else(Utc::now),
        event_payload,
    }
}

/// Kubernetes CPU quantity to milli-units ("4", "3800m")
fn cpu_milli(quantity: &Quantity) -> i64 {
    parse_cpu_quantity(&quantity.0).map(|m| m as i64).unwrap_or(0)
}

/// Kubernetes memory quantity to bytes ("16Gi", "512Mi", "1000000")
fn memory_bytes(quantity: &Quantity) -> i64 {
    let value = quantity.0.trim();

    let suffixes: [(&str, i64); 10] = [
        ("Ki", 1 << 10),
        ("Mi", 1 << 20),
        ("Gi", 1 << 30),
        ("Ti", 1 << 40),
        ("Pi", 1 << 50),
        ("k", 1_000),
        ("M", 1_000_000),
        ("G", 1_000_000_000),
        ("T", 1_000_000_000_000),
        ("P", 1_000_000_000_000_000),
    ];

    for (suffix, multiplier) in suffixes {
        if let Some(number) = value.strip_suffix(suffix) {
            return number
                .parse::<f64>()
                .map(|n| (n * multiplier as f64) as i64)
                .unwrap_or(0);
        }
    }

    value.parse::<f64>().map(|n| n as i64).unwrap_or(0)
}

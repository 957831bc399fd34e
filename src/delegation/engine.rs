//! Delegation engine - ranks remote replicas and dispatches jobs to them
//!
//! The engine is fully sequential per invocation: candidates are ranked,
//! stably sorted by priority, and contacted one at a time so that "first
//! accepted replica wins" stays well-defined. Per-candidate failures are
//! logged and skipped; only exhausting every eligible replica is an error,
//! which the caller answers by scheduling the invocation locally.

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::probe::{build_http_client, RemoteProbeClient};
use super::ranking::rank_replicas;
use super::service::{Replica, ReplicaKind, Service};
use super::tokens::TokenCache;
use super::{NO_DELEGATE_PRIORITY, REMOTE_TIMEOUT};

/// Errors delegating a job
#[derive(Debug, thiserror::Error)]
pub enum DelegationError {
    /// Every eligible replica was tried and none accepted the job
    #[error("No replica accepted the delegated job for service '{0}'")]
    NoReplicaAccepted(String),
}

/// Ranks delegation targets and forwards invocations to them in order
pub struct DelegationEngine {
    probe: RemoteProbeClient,
    tokens: Arc<TokenCache>,
    timeout: Duration,
}

impl DelegationEngine {
    /// Create an engine sharing the given token cache
    pub fn new(tokens: Arc<TokenCache>) -> Self {
        Self {
            probe: RemoteProbeClient::new(),
            tokens,
            timeout: REMOTE_TIMEOUT,
        }
    }

    /// Override the remote-call timeout (probes and dispatch alike)
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.probe = RemoteProbeClient::new().with_timeout(timeout);
        self.timeout = timeout;
        self
    }

    /// Delegate an event-triggered invocation to the first accepting replica
    ///
    /// Replicas are ranked per the service's delegation mode, then attempted
    /// in non-decreasing priority order, skipping the ineligible sentinel.
    pub async fn delegate_job(&self, service: &Service, event: &str) -> Result<(), DelegationError> {
        let mut replicas = service.replicas.clone();
        rank_replicas(&self.probe, service, &mut replicas).await;

        // Stable sort keeps the caller's ordering among equal priorities
        replicas.sort_by_key(|r| r.priority);

        let payload = wrap_event(&service.cluster_id, event);

        for replica in &replicas {
            if replica.priority >= NO_DELEGATE_PRIORITY {
                debug!(
                    "Skipping ineligible replica (priority {}) for '{}'",
                    replica.priority, service.name
                );
                continue;
            }

            let accepted = match replica.kind {
                ReplicaKind::Oscar => self.dispatch_oscar(service, replica, &payload).await,
                ReplicaKind::Endpoint => self.dispatch_endpoint(replica, &payload).await,
            };

            if accepted {
                return Ok(());
            }
        }

        Err(DelegationError::NoReplicaAccepted(service.name.clone()))
    }

    /// POST the job to a cooperating cluster's service, bearer-authenticated
    async fn dispatch_oscar(&self, service: &Service, replica: &Replica, payload: &Value) -> bool {
        let Some(cluster) = service.clusters.get(&replica.cluster_id) else {
            warn!(
                "Replica of '{}' references undefined cluster '{}', skipping",
                service.name, replica.cluster_id
            );
            return false;
        };

        let token = match self.tokens.get_or_fetch(cluster, &replica.service_name).await {
            Ok(token) => token,
            Err(e) => {
                warn!(
                    "Failed to resolve token for '{}' on cluster '{}': {}",
                    replica.service_name, replica.cluster_id, e
                );
                return false;
            }
        };

        let client = build_http_client(cluster.ssl_verify, self.timeout);
        let url = format!("{}/job/{}", cluster.endpoint, replica.service_name);

        match self.post_job(&client, &url, replica, payload, &token).await {
            Ok(StatusCode::CREATED) => {
                info!(
                    "Delegated job for '{}' to service '{}' on cluster '{}'",
                    service.name, replica.service_name, replica.cluster_id
                );
                true
            }
            Ok(StatusCode::UNAUTHORIZED) => {
                // Stale token; refresh once and retry the same replica
                debug!(
                    "Cluster '{}' rejected token for '{}', refreshing",
                    replica.cluster_id, replica.service_name
                );
                let token = match self.tokens.refresh(cluster, &replica.service_name).await {
                    Ok(token) => token,
                    Err(e) => {
                        warn!(
                            "Token refresh failed for '{}' on cluster '{}': {}",
                            replica.service_name, replica.cluster_id, e
                        );
                        return false;
                    }
                };

                match self.post_job(&client, &url, replica, payload, &token).await {
                    Ok(StatusCode::CREATED) => {
                        info!(
                            "Delegated job for '{}' to cluster '{}' after token refresh",
                            service.name, replica.cluster_id
                        );
                        true
                    }
                    Ok(status) => {
                        warn!(
                            "Cluster '{}' rejected job for '{}' after refresh: HTTP {}",
                            replica.cluster_id, replica.service_name, status
                        );
                        false
                    }
                    Err(e) => {
                        warn!("Failed to contact cluster '{}': {}", replica.cluster_id, e);
                        false
                    }
                }
            }
            Ok(status) => {
                warn!(
                    "Cluster '{}' rejected job for '{}': HTTP {}",
                    replica.cluster_id, replica.service_name, status
                );
                false
            }
            Err(e) => {
                warn!("Failed to contact cluster '{}': {}", replica.cluster_id, e);
                false
            }
        }
    }

    /// POST the job directly to an external endpoint, no bearer token
    async fn dispatch_endpoint(&self, replica: &Replica, payload: &Value) -> bool {
        let client = build_http_client(replica.ssl_verify, self.timeout);

        let mut request = client.post(&replica.url).json(payload);
        for (name, value) in &replica.headers {
            request = request.header(name, value);
        }

        match request.send().await {
            Ok(response) if response.status() == StatusCode::OK => {
                info!("Delegated job to endpoint {}", replica.url);
                true
            }
            Ok(response) => {
                warn!(
                    "Endpoint {} rejected job: HTTP {}",
                    replica.url,
                    response.status()
                );
                false
            }
            Err(e) => {
                warn!("Failed to contact endpoint {}: {}", replica.url, e);
                false
            }
        }
    }

    async fn post_job(
        &self,
        client: &reqwest::Client,
        url: &str,
        replica: &Replica,
        payload: &Value,
        token: &str,
    ) -> Result<StatusCode, reqwest::Error> {
        let mut request = client.post(url).bearer_auth(token).json(payload);
        for (name, value) in &replica.headers {
            request = request.header(name, value);
        }
        Ok(request.send().await?.status())
    }
}

/// Build the outbound payload, preserving delegation provenance
///
/// An event that already carries a `storage_provider` keeps it and its nested
/// `event` unchanged, so payloads survive multiple delegation hops; anything
/// else is wrapped with this cluster's id as the provider.
fn wrap_event(cluster_id: &str, event: &str) -> Value {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(event) {
        if let Some(provider) = map.get("storage_provider") {
            return json!({
                "storage_provider": provider.clone(),
                "event": map.get("event").cloned().unwrap_or(Value::Null),
            });
        }
        return json!({
            "storage_provider": cluster_id,
            "event": Value::Object(map),
        });
    }

    // Non-object or unparseable events are forwarded verbatim
    let inner = serde_json::from_str::<Value>(event).unwrap_or_else(|_| Value::String(event.to_string()));
    json!({
        "storage_provider": cluster_id,
        "event": inner,
    })
}

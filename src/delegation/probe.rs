//! Remote cluster probing
//!
//! Stateless HTTP helpers used to query a cooperating cluster's capacity and
//! per-service job history. Probe results feed the ranking strategies; a probe
//! failure is never fatal to a ranking pass, the caller substitutes a
//! worst-case row instead.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::REMOTE_TIMEOUT;
use crate::delegation::service::Cluster;

/// Build an HTTP client for one remote target
///
/// TLS verification is configurable per cluster/endpoint; when disabled,
/// certificate validation is skipped for that target only.
pub fn build_http_client(ssl_verify: bool, timeout: Duration) -> Client {
    Client::builder()
        .timeout(timeout)
        .danger_accept_invalid_certs(!ssl_verify)
        .build()
        .expect("Failed to create HTTP client")
}

/// Capacity snapshot returned by a cluster's `/system/status` endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterStatus {
    /// Number of schedulable nodes
    #[serde(rename = "numberNodes")]
    pub number_nodes: i64,

    /// Free CPU summed across nodes, in milli-units
    #[serde(rename = "cpuFreeTotal")]
    pub cpu_free_total: i64,

    /// Largest free CPU on a single node, in milli-units
    #[serde(rename = "cpuMaxFree")]
    pub cpu_max_free: i64,

    /// Free memory summed across nodes, in bytes
    #[serde(rename = "memoryFreeTotal")]
    pub memory_free_total: i64,

    /// Largest free memory on a single node, in bytes
    #[serde(rename = "memoryMaxFree")]
    pub memory_max_free: i64,

    /// Per-node detail, unused by the ranking strategies
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub detail: Vec<serde_json::Value>,
}

impl ClusterStatus {
    /// Whether the cluster has a node with enough free CPU for a request
    pub fn fits_cpu(&self, cpu_milli: u64) -> bool {
        self.cpu_max_free - cpu_milli as i64 >= 0
    }
}

/// Status of one remote job in a cluster's history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    /// Job phase: "Succeeded", "Failed", "Pending", ...
    pub status: String,

    /// When the job was created
    pub creation_time: DateTime<Utc>,

    /// When the job started running
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,

    /// When the job finished
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_time: Option<DateTime<Utc>>,
}

/// Aggregated view of a service's job history on one cluster
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JobHistorySummary {
    /// Average creation-to-finish duration of succeeded jobs, in seconds
    pub avg_successful_exec_secs: f64,
    /// Number of jobs still pending
    pub pending_jobs: u64,
}

/// Aggregate a job history mapping into the measures TOPSIS consumes
///
/// Succeeded jobs without a finish time are excluded from the average; a
/// history with no completed successes averages to zero.
pub fn summarize_history(history: &HashMap<String, JobRecord>) -> JobHistorySummary {
    let mut total_secs = 0.0;
    let mut succeeded = 0u64;
    let mut pending = 0u64;

    for record in history.values() {
        match record.status.as_str() {
            "Succeeded" => {
                if let Some(finish) = record.finish_time {
                    total_secs += (finish - record.creation_time).num_milliseconds() as f64 / 1000.0;
                    succeeded += 1;
                }
            }
            "Pending" => pending += 1,
            _ => {}
        }
    }

    let avg = if succeeded > 0 {
        total_secs / succeeded as f64
    } else {
        0.0
    };

    JobHistorySummary {
        avg_successful_exec_secs: avg,
        pending_jobs: pending,
    }
}

/// Errors probing a remote cluster
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("Server error {status}: {message}")]
    ServerError { status: u16, message: String },
}

/// Stateless client for a cooperating cluster's status and log endpoints
#[derive(Debug, Clone)]
pub struct RemoteProbeClient {
    timeout: Duration,
}

impl Default for RemoteProbeClient {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteProbeClient {
    /// Create a probe client with the standard remote-call timeout
    pub fn new() -> Self {
        Self {
            timeout: REMOTE_TIMEOUT,
        }
    }

    /// Override the probe timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Probe a cluster's capacity, measuring the round-trip latency
    pub async fn cluster_status(
        &self,
        cluster: &Cluster,
    ) -> (Result<ClusterStatus, ProbeError>, Duration) {
        let client = build_http_client(cluster.ssl_verify, self.timeout);
        let url = format!("{}/system/status", cluster.endpoint);
        let start = Instant::now();

        let result = self
            .get_json::<ClusterStatus>(&client, &url, cluster)
            .await;

        (result, start.elapsed())
    }

    /// Fetch the job history of one service on a cluster
    pub async fn job_history(
        &self,
        cluster: &Cluster,
        service_name: &str,
    ) -> Result<HashMap<String, JobRecord>, ProbeError> {
        let client = build_http_client(cluster.ssl_verify, self.timeout);
        let url = format!("{}/system/logs/{}", cluster.endpoint, service_name);
        self.get_json(&client, &url, cluster).await
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        client: &Client,
        url: &str,
        cluster: &Cluster,
    ) -> Result<T, ProbeError> {
        let response = client
            .get(url)
            .basic_auth(&cluster.auth_user, Some(&cluster.auth_password))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(ProbeError::ServerError { status, message });
        }

        Ok(response.json::<T>().await?)
    }
}

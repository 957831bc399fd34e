//! Replica ranking strategies
//!
//! Given a service and its replica list, assign a dispatch priority to every
//! `oscar`-kind replica (ascending = preferred). `endpoint`-kind replicas keep
//! their externally assigned priority; dispatch still honors the ordering.
//! A replica whose cluster cannot host the request, or whose cluster is
//! unknown or unreachable, receives the `NO_DELEGATE_PRIORITY` sentinel.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};

use super::probe::{summarize_history, RemoteProbeClient};
use super::service::{DelegationMode, Replica, ReplicaKind, Service};
use super::{topsis, NO_DELEGATE_PRIORITY};

/// Free-CPU range mapped onto the load-based priority scale, in milli-units
const LOAD_RANGE_MILLI: i64 = 32_000;

/// Worst-case execution time substituted for unreachable clusters, seconds
const SENTINEL_EXEC_SECS: f64 = 1e6;

/// Worst-case pending-job count substituted for unreachable clusters
const SENTINEL_PENDING: f64 = 1e6;

/// Offset keeping the pending-count criterion strictly positive
const PENDING_OFFSET: f64 = 0.1;

/// Recompute replica priorities according to the service's delegation mode
///
/// `Static` leaves priorities untouched; the dispatcher's stable sort is the
/// only ordering guarantee in that mode.
pub async fn rank_replicas(probe: &RemoteProbeClient, service: &Service, replicas: &mut [Replica]) {
    match service.delegation {
        DelegationMode::Static => {}
        DelegationMode::Random => rank_random(probe, service, replicas).await,
        DelegationMode::LoadBased => rank_load_based(probe, service, replicas).await,
        DelegationMode::Topsis => rank_topsis(probe, service, replicas).await,
    }
}

/// Uniform random priority for clusters that can host the request
async fn rank_random(probe: &RemoteProbeClient, service: &Service, replicas: &mut [Replica]) {
    let cpu_milli = service.cpu_milli();
    let mut rng = SmallRng::from_entropy();

    for replica in oscar_replicas(replicas) {
        replica.priority = match probe_capacity(probe, service, replica, cpu_milli).await {
            Some(_) => rng.gen_range(0..NO_DELEGATE_PRIORITY),
            None => NO_DELEGATE_PRIORITY,
        };
    }
}

/// Priority linear in the cluster's total free CPU (more free = preferred)
async fn rank_load_based(probe: &RemoteProbeClient, service: &Service, replicas: &mut [Replica]) {
    let cpu_milli = service.cpu_milli();

    for replica in oscar_replicas(replicas) {
        replica.priority = match probe_capacity(probe, service, replica, cpu_milli).await {
            Some(status) => load_priority(status.cpu_free_total),
            None => NO_DELEGATE_PRIORITY,
        };
    }
}

/// Map free CPU clamped to `[0, LOAD_RANGE_MILLI]` onto priorities `[100, 0]`
fn load_priority(cpu_free_milli: i64) -> u32 {
    let free = cpu_free_milli.clamp(0, LOAD_RANGE_MILLI) as f64;
    ((1.0 - free / LOAD_RANGE_MILLI as f64) * 100.0).round() as u32
}

/// Multi-criteria TOPSIS ranking over probe measurements
///
/// Each candidate contributes a six-column criteria row. A failed probe, or a
/// cluster without enough free CPU, contributes the worst-case sentinel row
/// instead of being dropped, keeping the matrix rectangular.
async fn rank_topsis(probe: &RemoteProbeClient, service: &Service, replicas: &mut [Replica]) {
    let cpu_milli = service.cpu_milli();
    let mut rows: Vec<[f64; topsis::CRITERIA]> = Vec::new();
    let mut candidates: Vec<usize> = Vec::new();

    for (index, replica) in replicas.iter().enumerate() {
        if replica.kind != ReplicaKind::Oscar {
            continue;
        }
        candidates.push(index);

        let Some(cluster) = service.clusters.get(&replica.cluster_id) else {
            warn!(
                "Replica of '{}' references undefined cluster '{}'",
                service.name, replica.cluster_id
            );
            rows.push(sentinel_row(0.0));
            continue;
        };

        let (status, latency) = probe.cluster_status(cluster).await;
        let latency_secs = latency.as_secs_f64();

        let row = match status {
            Ok(status) if status.fits_cpu(cpu_milli) => {
                match probe.job_history(cluster, &replica.service_name).await {
                    Ok(history) => {
                        let summary = summarize_history(&history);
                        [
                            latency_secs,
                            status.number_nodes as f64,
                            status.memory_free_total as f64,
                            status.cpu_free_total as f64,
                            summary.avg_successful_exec_secs,
                            summary.pending_jobs as f64 + PENDING_OFFSET,
                        ]
                    }
                    Err(e) => {
                        debug!(
                            "Job history probe failed for '{}' on '{}': {}",
                            replica.service_name, replica.cluster_id, e
                        );
                        sentinel_row(latency_secs)
                    }
                }
            }
            Ok(_) => {
                debug!(
                    "Cluster '{}' lacks free CPU for {} milli",
                    replica.cluster_id, cpu_milli
                );
                sentinel_row(latency_secs)
            }
            Err(e) => {
                debug!("Status probe failed for cluster '{}': {}", replica.cluster_id, e);
                sentinel_row(latency_secs)
            }
        };

        rows.push(row);
    }

    let mut rng = SmallRng::from_entropy();
    let priorities = topsis::rank(&rows, &mut rng);

    for (index, priority) in candidates.into_iter().zip(priorities) {
        replicas[index].priority = priority;
    }
}

/// Worst-case criteria row for an unreachable or saturated cluster
fn sentinel_row(latency_secs: f64) -> [f64; topsis::CRITERIA] {
    [latency_secs, 0.0, 0.0, 0.0, SENTINEL_EXEC_SECS, SENTINEL_PENDING]
}

/// Probe a replica's cluster and check it can host the request
///
/// Returns the status only when the cluster is known, reachable, and has a
/// node with enough free CPU.
async fn probe_capacity(
    probe: &RemoteProbeClient,
    service: &Service,
    replica: &Replica,
    cpu_milli: u64,
) -> Option<super::probe::ClusterStatus> {
    let Some(cluster) = service.clusters.get(&replica.cluster_id) else {
        warn!(
            "Replica of '{}' references undefined cluster '{}'",
            service.name, replica.cluster_id
        );
        return None;
    };

    match probe.cluster_status(cluster).await {
        (Ok(status), _) if status.fits_cpu(cpu_milli) => Some(status),
        (Ok(_), _) => {
            debug!(
                "Cluster '{}' lacks free CPU for {} milli",
                replica.cluster_id, cpu_milli
            );
            None
        }
        (Err(e), _) => {
            debug!("Status probe failed for cluster '{}': {}", replica.cluster_id, e);
            None
        }
    }
}

fn oscar_replicas(replicas: &mut [Replica]) -> impl Iterator<Item = &mut Replica> {
    replicas
        .iter_mut()
        .filter(|r| r.kind == ReplicaKind::Oscar)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delegation::service::Cluster;
    use std::time::Duration;

    #[test]
    fn test_load_priority_mapping() {
        assert_eq!(load_priority(0), 100);
        assert_eq!(load_priority(LOAD_RANGE_MILLI), 0);
        assert_eq!(load_priority(16_000), 50);
        assert_eq!(load_priority(64_000), 0, "free CPU above the range clamps");
        assert_eq!(load_priority(-500), 100, "negative free CPU clamps");
    }

    #[test]
    fn test_sentinel_row_shape() {
        let row = sentinel_row(0.25);
        assert_eq!(row[0], 0.25);
        assert_eq!(&row[1..4], &[0.0, 0.0, 0.0]);
        assert_eq!(row[4], SENTINEL_EXEC_SECS);
        assert_eq!(row[5], SENTINEL_PENDING);
    }

    fn unreachable_service(mode: DelegationMode) -> (Service, Vec<Replica>) {
        let service = Service::new("mark-faces", "local")
            .with_delegation(mode)
            .with_cluster("edge-1", Cluster::new("http://127.0.0.1:1", "user", "pass"));
        let replicas = vec![Replica::oscar("edge-1", "mark-faces")];
        (service, replicas)
    }

    #[tokio::test]
    async fn test_random_unreachable_cluster_gets_sentinel() {
        let probe = RemoteProbeClient::new().with_timeout(Duration::from_millis(200));
        let (service, mut replicas) = unreachable_service(DelegationMode::Random);

        rank_replicas(&probe, &service, &mut replicas).await;
        assert_eq!(replicas[0].priority, NO_DELEGATE_PRIORITY);
    }

    #[tokio::test]
    async fn test_load_based_undefined_cluster_gets_sentinel() {
        let probe = RemoteProbeClient::new().with_timeout(Duration::from_millis(200));
        let service = Service::new("mark-faces", "local").with_delegation(DelegationMode::LoadBased);
        let mut replicas = vec![Replica::oscar("ghost", "mark-faces")];

        rank_replicas(&probe, &service, &mut replicas).await;
        assert_eq!(replicas[0].priority, NO_DELEGATE_PRIORITY);
    }

    #[tokio::test]
    async fn test_topsis_lone_unreachable_candidate_still_ranked() {
        // A failed probe yields a sentinel row, not an excluded candidate;
        // with a single candidate that row is still the best available.
        let probe = RemoteProbeClient::new().with_timeout(Duration::from_millis(200));
        let (service, mut replicas) = unreachable_service(DelegationMode::Topsis);

        rank_replicas(&probe, &service, &mut replicas).await;
        assert_eq!(replicas[0].priority, 0);
    }

    #[tokio::test]
    async fn test_static_mode_keeps_priorities() {
        let probe = RemoteProbeClient::new();
        let service = Service::new("mark-faces", "local");
        let mut replicas = vec![
            Replica::oscar("edge-1", "mark-faces").with_priority(7),
            Replica::endpoint("https://sink.example.com").with_priority(3),
        ];

        rank_replicas(&probe, &service, &mut replicas).await;
        assert_eq!(replicas[0].priority, 7);
        assert_eq!(replicas[1].priority, 3);
    }

    #[tokio::test]
    async fn test_endpoint_replicas_never_ranked() {
        let probe = RemoteProbeClient::new().with_timeout(Duration::from_millis(200));
        let (service, _) = unreachable_service(DelegationMode::Random);
        let mut replicas = vec![Replica::endpoint("https://sink.example.com").with_priority(42)];

        rank_replicas(&probe, &service, &mut replicas).await;
        assert_eq!(replicas[0].priority, 42);
    }
}

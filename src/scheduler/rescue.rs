//! Pending-job rescue
//!
//! Invocations whose backing pod never left `Pending` are periodically
//! re-delegated. Every async-invocation pod carries the owning service name
//! and a per-service stuck threshold as labels, and the original event
//! payload as a container environment variable; the scan recovers the event,
//! resolves the service, and hands it back to the delegation engine. The
//! stuck job is deleted only after a remote replica confirmed acceptance.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::backend::{BackendError, ClusterBackend, PodPhase, PodSnapshot};
use crate::delegation::DelegationEngine;

/// Label carrying the owning service name
pub const SERVICE_LABEL: &str = "faasmesh.dev/service";

/// Label carrying the per-service stuck threshold in seconds
pub const RESCUE_THRESHOLD_LABEL: &str = "faasmesh.dev/rescue-after";

/// Kubernetes-managed label binding a pod to its job
pub const JOB_NAME_LABEL: &str = "job-name";

/// Periodically re-delegates invocations stuck in the pending state
pub struct RescueLoop {
    backend: Arc<dyn ClusterBackend>,
    engine: Arc<DelegationEngine>,
    namespace: String,
}

impl RescueLoop {
    /// Create a rescue loop over the services namespace
    pub fn new(
        backend: Arc<dyn ClusterBackend>,
        engine: Arc<DelegationEngine>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            engine,
            namespace: namespace.into(),
        }
    }

    /// Scan once, returning how many invocations were re-delegated
    ///
    /// Per-pod failures are logged and leave the stuck job in place for the
    /// next scan; overlapping scans are safe because delegation is idempotent.
    pub async fn scan(&self) -> Result<usize, BackendError> {
        let pods = self.backend.list_pods(Some(&self.namespace)).await?;
        let now = Utc::now();
        let mut rescued = 0;

        for pod in &pods {
            let Some(service_name) = stuck_service(pod, now) else {
                continue;
            };

            info!(
                "Pod '{}' of service '{}' stuck in Pending, attempting rescue",
                pod.name, service_name
            );

            let Some(event) = pod.event_payload.as_deref() else {
                warn!("Pod '{}' carries no event payload, cannot rescue", pod.name);
                continue;
            };

            let service = match self.backend.read_service(&service_name).await {
                Ok(service) => service,
                Err(e) => {
                    warn!("Cannot resolve service '{}': {}", service_name, e);
                    continue;
                }
            };

            match self.engine.delegate_job(&service, event).await {
                Ok(()) => {
                    rescued += 1;
                    self.remove_stuck_job(pod).await;
                }
                Err(e) => {
                    // Left untouched for the next scan
                    debug!("Rescue of pod '{}' failed: {}", pod.name, e);
                }
            }
        }

        Ok(rescued)
    }

    /// Delete the job behind a rescued pod; its work now lives remotely
    async fn remove_stuck_job(&self, pod: &PodSnapshot) {
        let Some(job_name) = pod.labels.get(JOB_NAME_LABEL) else {
            warn!("Rescued pod '{}' has no '{}' label", pod.name, JOB_NAME_LABEL);
            return;
        };

        match self.backend.delete_job(job_name).await {
            Ok(()) => info!("Removed stuck job '{}' after rescue", job_name),
            Err(e) => warn!("Failed to remove stuck job '{}': {}", job_name, e),
        }
    }
}

/// The owning service of a pod that qualifies for rescue
///
/// A pod qualifies when it is `Pending`, labeled with a service name, and
/// older than its own threshold label. An absent or unparseable threshold
/// disqualifies the pod; there is no global default.
fn stuck_service(pod: &PodSnapshot, now: DateTime<Utc>) -> Option<String> {
    if pod.phase != PodPhase::Pending {
        return None;
    }

    let service_name = pod.labels.get(SERVICE_LABEL)?;

    let threshold_secs = match pod
        .labels
        .get(RESCUE_THRESHOLD_LABEL)
        .and_then(|t| t.parse::<i64>().ok())
    {
        Some(secs) => secs,
        None => {
            debug!("Pod '{}' has no usable rescue threshold", pod.name);
            return None;
        }
    };

    let age_secs = (now - pod.created_at).num_seconds();
    if age_secs > threshold_secs {
        Some(service_name.clone())
    } else {
        None
    }
}

/// Spawn the periodic rescue scan as a background task
pub fn spawn_rescue_loop(rescue: Arc<RescueLoop>, interval: Duration) -> watch::Sender<bool> {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        info!("Rescue loop started, scanning every {}s", interval.as_secs());

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match rescue.scan().await {
                        Ok(0) => {}
                        Ok(n) => info!("Rescued {} stuck invocation(s)", n),
                        Err(e) => error!("Rescue scan failed: {}", e),
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Rescue loop shutting down");
                        break;
                    }
                }
            }
        }
    });

    shutdown_tx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::fake::FakeBackend;
    use crate::delegation::{Replica, Service, TokenCache};
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::Router;
    use chrono::Duration as ChronoDuration;
    use std::collections::HashMap;

    fn stuck_pod(service: &str, threshold_secs: i64, age_secs: i64) -> PodSnapshot {
        let mut labels = HashMap::new();
        labels.insert(SERVICE_LABEL.to_string(), service.to_string());
        labels.insert(
            RESCUE_THRESHOLD_LABEL.to_string(),
            threshold_secs.to_string(),
        );
        labels.insert(JOB_NAME_LABEL.to_string(), format!("{}-job", service));

        PodSnapshot {
            name: format!("{}-pod", service),
            namespace: "svc".to_string(),
            node_name: None,
            phase: PodPhase::Pending,
            cpu_requested_milli: 100,
            memory_requested_bytes: 1024,
            labels,
            created_at: Utc::now() - ChronoDuration::seconds(age_secs),
            event_payload: Some(r#"{"bucket": "in"}"#.to_string()),
        }
    }

    #[test]
    fn test_young_pod_never_selected() {
        let pod = stuck_pod("mark-faces", 300, 10);
        assert!(stuck_service(&pod, Utc::now()).is_none());
    }

    #[test]
    fn test_old_pod_always_selected() {
        let pod = stuck_pod("mark-faces", 30, 100);
        assert_eq!(
            stuck_service(&pod, Utc::now()).as_deref(),
            Some("mark-faces")
        );
    }

    #[test]
    fn test_running_pod_not_selected() {
        let mut pod = stuck_pod("mark-faces", 30, 100);
        pod.phase = PodPhase::Running;
        assert!(stuck_service(&pod, Utc::now()).is_none());
    }

    #[test]
    fn test_unparseable_threshold_disqualifies() {
        let mut pod = stuck_pod("mark-faces", 30, 100);
        pod.labels
            .insert(RESCUE_THRESHOLD_LABEL.to_string(), "soon".to_string());
        assert!(stuck_service(&pod, Utc::now()).is_none());
    }

    #[test]
    fn test_unlabeled_pod_not_selected() {
        let mut pod = stuck_pod("mark-faces", 30, 100);
        pod.labels.remove(SERVICE_LABEL);
        assert!(stuck_service(&pod, Utc::now()).is_none());
    }

    async fn accepting_endpoint() -> String {
        let app = Router::new().route("/", post(|| async { StatusCode::OK }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_scan_rescues_and_removes_job() {
        let url = accepting_endpoint().await;

        let service = Service::new("mark-faces", "local")
            .with_replica(Replica::endpoint(url));

        let mut services = HashMap::new();
        services.insert("mark-faces".to_string(), service);

        let backend = Arc::new(FakeBackend {
            pods: vec![stuck_pod("mark-faces", 30, 100)],
            services,
            ..Default::default()
        });

        let engine = Arc::new(DelegationEngine::new(Arc::new(TokenCache::new())));
        let rescue = RescueLoop::new(backend.clone(), engine, "svc");

        let rescued = rescue.scan().await.unwrap();
        assert_eq!(rescued, 1);
        assert_eq!(
            backend.deleted_jobs.lock().await.as_slice(),
            &["mark-faces-job".to_string()]
        );
    }

    #[tokio::test]
    async fn test_failed_rescue_leaves_job_in_place() {
        // Service with no replicas: delegation must fail
        let mut services = HashMap::new();
        services.insert(
            "mark-faces".to_string(),
            Service::new("mark-faces", "local"),
        );

        let backend = Arc::new(FakeBackend {
            pods: vec![stuck_pod("mark-faces", 30, 100)],
            services,
            ..Default::default()
        });

        let engine = Arc::new(DelegationEngine::new(Arc::new(TokenCache::new())));
        let rescue = RescueLoop::new(backend.clone(), engine, "svc");

        let rescued = rescue.scan().await.unwrap();
        assert_eq!(rescued, 0);
        assert!(backend.deleted_jobs.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_scan_ignores_fresh_pending_pods() {
        let mut services = HashMap::new();
        services.insert(
            "mark-faces".to_string(),
            Service::new("mark-faces", "local"),
        );

        let backend = Arc::new(FakeBackend {
            pods: vec![stuck_pod("mark-faces", 3600, 10)],
            services,
            ..Default::default()
        });

        let engine = Arc::new(DelegationEngine::new(Arc::new(TokenCache::new())));
        let rescue = RescueLoop::new(backend.clone(), engine, "svc");

        assert_eq!(rescue.scan().await.unwrap(), 0);
    }
}

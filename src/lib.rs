//! # faasmesh
//!
//! Delegation core for a federation of cooperating serverless clusters. When
//! the local cluster cannot take an event-triggered invocation, the
//! delegation engine ranks the service's remote replicas (statically,
//! randomly, by load, or by multi-criteria TOPSIS scoring) and forwards the
//! event to the first replica that accepts it. Two background loops support
//! the decision: a resource tracker snapshotting local capacity and a rescue
//! loop re-delegating invocations stuck in the pending state.

pub mod backend;
pub mod cli;
pub mod config;
pub mod delegation;
pub mod scheduler;

pub use backend::{ClusterBackend, KubernetesBackend};
pub use config::Config;
pub use delegation::{DelegationEngine, DelegationMode, Service, TokenCache};
pub use scheduler::{RescueLoop, ResourceTracker};

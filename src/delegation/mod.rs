//! # Delegation core
//!
//! Decides where an asynchronous service invocation runs when the local
//! cluster cannot (or should not) take it: ranks the service's remote
//! replicas, resolves credentials, and forwards the triggering event to the
//! first replica that accepts.
//!
//! ## Components
//!
//! - **service**: `Service` / `Replica` / `Cluster` definitions shared with
//!   the surrounding CRUD layer
//! - **probe**: stateless HTTP client for remote status and job-history
//!   endpoints
//! - **tokens**: bounded bearer-token cache with refresh-on-401 semantics
//! - **ranking**: static, random, load-based, and TOPSIS priority strategies
//! - **engine**: sequential priority-order dispatcher

pub mod engine;
pub mod probe;
pub mod ranking;
pub mod service;
pub mod tokens;
pub mod topsis;

pub use engine::{DelegationEngine, DelegationError};
pub use probe::{ClusterStatus, JobHistorySummary, JobRecord, RemoteProbeClient};
pub use service::{Cluster, DelegationMode, Replica, ReplicaKind, Service};
pub use tokens::{TokenCache, TokenError, MAX_CACHED_TOKENS};

use std::time::Duration;

/// Reserved priority meaning "never delegate to this replica"
pub const NO_DELEGATE_PRIORITY: u32 = 101;

/// Fixed timeout for every remote call (probes, token fetches, dispatch)
pub const REMOTE_TIMEOUT: Duration = Duration::from_secs(20);

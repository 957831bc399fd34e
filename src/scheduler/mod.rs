//! Local scheduling support
//!
//! Two background loops keep the delegation core honest: the resource tracker
//! answers "can this invocation run here right now", and the rescue loop
//! re-delegates invocations that were admitted but never started.

pub mod rescue;
pub mod tracker;

pub use rescue::{spawn_rescue_loop, RescueLoop};
pub use tracker::{spawn_resource_tracker, ResourceRequest, ResourceTracker, TrackerError};

//! Cluster control interface.
//!
//! The engine mutates and observes the cluster only through [`ClusterControl`].
//! The production implementation shells out to kubectl
//! ([`crate::clients::kubectl::KubectlCluster`]); tests use in-memory fakes.

use crate::lifecycle::{ObservedState, ResourceSpec};
use crate::poller::Transience;
use async_trait::async_trait;
use thiserror::Error;

/// Cluster control errors.
///
/// `AlreadyExists` and `NotFound` are expected, recoverable answers and must
/// stay distinguishable from real failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClusterError {
    #[error("{kind} '{name}' already exists")]
    AlreadyExists { kind: String, name: String },

    #[error("{kind} '{name}' not found")]
    NotFound { kind: String, name: String },

    /// The control plane could not be reached or did not answer in time.
    #[error("Cluster unavailable: {0}")]
    Unavailable(String),

    /// The control plane rejected the request (invalid manifest, forbidden, ...).
    #[error("Cluster rejected request: {0}")]
    Rejected(String),

    /// The control tool itself failed (missing binary, unreadable output).
    #[error("Cluster command failed: {0}")]
    Command(String),
}

impl Transience for ClusterError {
    fn is_transient(&self) -> bool {
        matches!(self, ClusterError::Unavailable(_))
    }
}

/// Operations the engine needs from the cluster.
#[async_trait]
pub trait ClusterControl: Send + Sync {
    /// Create a namespace-like execution scope with the given labels.
    async fn create_namespace(&self, name: &str, labels: &[(String, String)])
        -> Result<(), ClusterError>;

    /// Request deletion of a namespace. Returns once deletion is requested,
    /// not when it has finished.
    async fn delete_namespace(&self, name: &str) -> Result<(), ClusterError>;

    /// Current state of a namespace (`Absent` when it does not exist).
    async fn namespace_state(&self, name: &str) -> Result<ObservedState, ClusterError>;

    /// Create a resource inside a namespace.
    async fn create_resource(&self, namespace: &str, spec: &ResourceSpec)
        -> Result<(), ClusterError>;

    /// Request deletion of a resource.
    async fn delete_resource(
        &self,
        namespace: &str,
        api_kind: &str,
        name: &str,
    ) -> Result<(), ClusterError>;

    /// Current state of a resource, including readiness.
    async fn resource_state(
        &self,
        namespace: &str,
        api_kind: &str,
        name: &str,
    ) -> Result<ObservedState, ClusterError>;
}

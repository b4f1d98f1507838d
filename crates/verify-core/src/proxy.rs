//! Sidecar proxy administrative interface.

use crate::poller::Transience;
use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

/// Pod whose sidecar proxy is inspected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyTarget {
    pub namespace: String,
    pub pod: String,
}

impl ProxyTarget {
    pub fn new(namespace: impl Into<String>, pod: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            pod: pod.into(),
        }
    }
}

impl fmt::Display for ProxyTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.pod)
    }
}

/// Proxy admin errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AdminError {
    /// The admin surface could not be reached (pod starting, exec refused, ...).
    #[error("Proxy admin unreachable: {0}")]
    Unreachable(String),

    /// The admin surface answered with something that is not a config dump.
    #[error("Malformed config dump: {0}")]
    Malformed(String),
}

impl Transience for AdminError {
    fn is_transient(&self) -> bool {
        matches!(self, AdminError::Unreachable(_))
    }
}

/// Read access to a sidecar's configuration.
#[async_trait]
pub trait ProxyAdmin: Send + Sync {
    /// Fetch the full configuration dump as JSON.
    async fn config_dump(&self, target: &ProxyTarget) -> Result<serde_json::Value, AdminError>;
}

//! Sidecar proxy configuration convergence.
//!
//! The proxy's config dump is a JSON document with a top-level `configs`
//! array; each entry has an `@type` naming its section. Cluster definitions
//! live in the `ClustersConfigDump` section, under `dynamic_active_clusters`
//! and `static_clusters`, each item wrapping a `cluster` object.

use super::settle;
use crate::poller::{poll, PollResult, PollSpec};
use crate::proxy::{AdminError, ProxyAdmin, ProxyTarget};
use crate::report::CheckFailure;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{info, instrument};

const CLUSTERS_SECTION: &str = "ClustersConfigDump";
const CLUSTER_LISTS: [&str; 2] = ["dynamic_active_clusters", "static_clusters"];

/// Name the mesh gives to the outbound cluster for a service port.
pub fn outbound_cluster_name(port: u16, service: &str, namespace: &str) -> String {
    format!("outbound|{}||{}.{}.svc.cluster.local", port, service, namespace)
}

/// What must be present in the proxy configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigExpectation {
    /// Raw substring anywhere in the serialized dump.
    Substring(String),

    /// The named cluster must carry a transport socket whose name contains
    /// `keyword` (e.g. `tls`).
    TransportSocket { cluster: String, keyword: String },
}

impl fmt::Display for ConfigExpectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigExpectation::Substring(keyword) => write!(f, "config contains '{}'", keyword),
            ConfigExpectation::TransportSocket { cluster, keyword } => {
                write!(f, "cluster {} has '{}' transport socket", cluster, keyword)
            }
        }
    }
}

/// Check one config dump against an expectation.
///
/// Schema violations are returned as `Err`; everything else is an observation.
pub fn evaluate(dump: &Value, expectation: &ConfigExpectation) -> Result<PollResult<()>, AdminError> {
    let configs = dump
        .get("configs")
        .and_then(Value::as_array)
        .ok_or_else(|| AdminError::Malformed("missing 'configs' array".to_string()))?;

    match expectation {
        ConfigExpectation::Substring(keyword) => {
            if dump.to_string().contains(keyword.as_str()) {
                Ok(PollResult::Satisfied(()))
            } else {
                Ok(PollResult::NotYetSatisfied(format!("'{}' not in config", keyword)))
            }
        }
        ConfigExpectation::TransportSocket { cluster, keyword } => {
            let section = configs
                .iter()
                .find(|config| {
                    config
                        .get("@type")
                        .and_then(Value::as_str)
                        .is_some_and(|t| t.contains(CLUSTERS_SECTION))
                })
                .ok_or_else(|| {
                    AdminError::Malformed(format!("no {} section", CLUSTERS_SECTION))
                })?;

            let found = CLUSTER_LISTS
                .iter()
                .filter_map(|list| section.get(*list).and_then(Value::as_array))
                .flatten()
                .filter_map(|entry| entry.get("cluster"))
                .find(|c| c.get("name").and_then(Value::as_str) == Some(cluster.as_str()));

            let Some(found) = found else {
                return Ok(PollResult::NotYetSatisfied(format!(
                    "cluster {} not configured",
                    cluster
                )));
            };

            match found
                .get("transport_socket")
                .and_then(|socket| socket.get("name"))
                .and_then(Value::as_str)
            {
                Some(name) if name.contains(keyword.as_str()) => Ok(PollResult::Satisfied(())),
                Some(name) => Ok(PollResult::NotYetSatisfied(format!(
                    "transport socket is '{}'",
                    name
                ))),
                None => Ok(PollResult::NotYetSatisfied(
                    "cluster has no transport socket".to_string(),
                )),
            }
        }
    }
}

/// Waits for a sidecar to pick up expected configuration.
#[derive(Clone)]
pub struct ProxyConvergence {
    admin: Arc<dyn ProxyAdmin>,
}

impl ProxyConvergence {
    pub fn new(admin: Arc<dyn ProxyAdmin>) -> Self {
        Self { admin }
    }

    /// An unreachable admin surface is retried; a malformed dump is a setup
    /// failure.
    #[instrument(skip_all, fields(target = %target))]
    pub async fn wait_config_present(
        &self,
        target: &ProxyTarget,
        expectation: &ConfigExpectation,
        spec: &PollSpec,
    ) -> Result<(), CheckFailure> {
        let description = format!("proxy {}: {}", target, expectation);
        let spec = spec.retarget(description.clone());

        let outcome = poll(&spec, || async {
            match self.admin.config_dump(target).await {
                Ok(dump) => evaluate(&dump, expectation),
                Err(e) => PollResult::from_error(e),
            }
        })
        .await
        .map_err(|e| CheckFailure::setup(&description, e.to_string()))?;

        settle(&description, outcome)?;
        info!(target: "verify.proxy", proxy = %target, expectation = %expectation, "Config present");
        Ok(())
    }
}

//! kubectl-backed cluster control.
//!
//! Commands are built as argument vectors, never shell strings. Every
//! invocation is bounded by the runner's timeout and the child is killed if
//! the call is dropped.

use crate::cluster::{ClusterControl, ClusterError};
use crate::lifecycle::{ObservedState, ResourceSpec};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Default bound on a single kubectl call.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// stderr fragments kubectl prints when the API server cannot be reached.
const UNAVAILABLE_MARKERS: [&str; 7] = [
    "Unable to connect to the server",
    "connection refused",
    "i/o timeout",
    "TLS handshake timeout",
    "ServiceUnavailable",
    "the server is currently unable to handle the request",
    "context deadline exceeded",
];

/// Conditions that, when present, decide readiness of a generic object.
const READY_CONDITIONS: [&str; 3] = ["Ready", "Available", "Programmed"];

/// Captured result of one kubectl invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Runs kubectl with an optional context and a per-call timeout.
#[derive(Debug, Clone)]
pub struct KubectlRunner {
    binary: String,
    context: Option<String>,
    timeout: Duration,
}

impl Default for KubectlRunner {
    fn default() -> Self {
        Self::new("kubectl")
    }
}

impl KubectlRunner {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            context: None,
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_context(mut self, context: Option<String>) -> Self {
        self.context = context;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run kubectl with `args`, optionally feeding `stdin`.
    ///
    /// A non-zero exit is returned as output, not as an error. Errors mean
    /// the command could not be run (`Command`) or did not finish in time
    /// (`Unavailable`).
    pub async fn run(&self, args: &[String], stdin: Option<&str>) -> Result<CommandOutput, ClusterError> {
        let mut command = Command::new(&self.binary);
        if let Some(context) = &self.context {
            command.arg("--context").arg(context);
        }
        command
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(target: "verify.kubectl", binary = %self.binary, args = ?args, "Running");

        let mut child = command
            .spawn()
            .map_err(|e| ClusterError::Command(format!("failed to start {}: {}", self.binary, e)))?;

        let run = async {
            if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
                pipe.write_all(input.as_bytes()).await?;
                pipe.shutdown().await?;
            }
            child.wait_with_output().await
        };

        let output = tokio::time::timeout(self.timeout, run)
            .await
            .map_err(|_| {
                ClusterError::Unavailable(format!(
                    "{} did not finish within {}s",
                    self.binary,
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| ClusterError::Command(format!("{} failed: {}", self.binary, e)))?;

        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

/// Map kubectl's stderr for a failed call on `kind`/`name` to a typed error.
pub fn classify_failure(stderr: &str, kind: &str, name: &str) -> ClusterError {
    if stderr.contains("AlreadyExists") || stderr.contains("already exists") {
        ClusterError::AlreadyExists {
            kind: kind.to_string(),
            name: name.to_string(),
        }
    } else if stderr.contains("NotFound") || stderr.contains("not found") {
        ClusterError::NotFound {
            kind: kind.to_string(),
            name: name.to_string(),
        }
    } else if UNAVAILABLE_MARKERS.iter().any(|marker| stderr.contains(marker)) {
        ClusterError::Unavailable(stderr.to_string())
    } else {
        ClusterError::Rejected(stderr.to_string())
    }
}

/// Derive an object's state from its JSON representation.
pub fn readiness_from_object(object: &Value) -> ObservedState {
    if object.pointer("/metadata/deletionTimestamp").is_some() {
        return ObservedState::Deleting;
    }

    let ready = match object.get("kind").and_then(Value::as_str) {
        Some("Deployment") | Some("StatefulSet") => {
            let wanted = object
                .pointer("/spec/replicas")
                .and_then(Value::as_i64)
                .unwrap_or(1);
            let ready = object
                .pointer("/status/readyReplicas")
                .and_then(Value::as_i64)
                .unwrap_or(0);
            ready >= wanted
        }
        Some("Pod") => {
            let running = object.pointer("/status/phase").and_then(Value::as_str) == Some("Running");
            running && condition_status(object, "Ready") == Some(true)
        }
        _ => READY_CONDITIONS
            .iter()
            .find_map(|condition| condition_status(object, condition))
            .unwrap_or(true),
    };

    if ready {
        ObservedState::Present
    } else {
        ObservedState::Pending
    }
}

fn condition_status(object: &Value, condition: &str) -> Option<bool> {
    object
        .pointer("/status/conditions")
        .and_then(Value::as_array)?
        .iter()
        .find(|c| c.get("type").and_then(Value::as_str) == Some(condition))
        .map(|c| c.get("status").and_then(Value::as_str) == Some("True"))
}

fn args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|part| (*part).to_string()).collect()
}

/// [`ClusterControl`] over kubectl.
#[derive(Debug, Clone, Default)]
pub struct KubectlCluster {
    runner: KubectlRunner,
}

impl KubectlCluster {
    pub fn new(runner: KubectlRunner) -> Self {
        Self { runner }
    }

    pub fn runner(&self) -> &KubectlRunner {
        &self.runner
    }

    async fn expect_success(
        &self,
        args: &[String],
        stdin: Option<&str>,
        kind: &str,
        name: &str,
    ) -> Result<String, ClusterError> {
        let output = self.runner.run(args, stdin).await?;
        if output.success {
            Ok(output.stdout)
        } else {
            Err(classify_failure(&output.stderr, kind, name))
        }
    }
}

#[async_trait]
impl ClusterControl for KubectlCluster {
    async fn create_namespace(
        &self,
        name: &str,
        labels: &[(String, String)],
    ) -> Result<(), ClusterError> {
        let labels: Map<String, Value> = labels
            .iter()
            .map(|(key, value)| (key.clone(), Value::String(value.clone())))
            .collect();
        let manifest = json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": { "name": name, "labels": labels },
        });

        self.expect_success(
            &args(&["create", "-f", "-"]),
            Some(&manifest.to_string()),
            "Namespace",
            name,
        )
        .await
        .map(|_| ())
    }

    async fn delete_namespace(&self, name: &str) -> Result<(), ClusterError> {
        self.expect_success(
            &args(&["delete", "namespace", name, "--wait=false"]),
            None,
            "Namespace",
            name,
        )
        .await
        .map(|_| ())
    }

    async fn namespace_state(&self, name: &str) -> Result<ObservedState, ClusterError> {
        let result = self
            .expect_success(
                &args(&["get", "namespace", name, "-o", "jsonpath={.status.phase}"]),
                None,
                "Namespace",
                name,
            )
            .await;

        match result {
            Ok(phase) => Ok(match phase.trim() {
                "Active" => ObservedState::Present,
                "Terminating" => ObservedState::Deleting,
                _ => ObservedState::Pending,
            }),
            Err(ClusterError::NotFound { .. }) => Ok(ObservedState::Absent),
            Err(e) => Err(e),
        }
    }

    async fn create_resource(&self, namespace: &str, spec: &ResourceSpec) -> Result<(), ClusterError> {
        self.expect_success(
            &args(&["create", "-n", namespace, "-f", "-"]),
            Some(&spec.manifest),
            &spec.api_kind,
            &spec.name,
        )
        .await
        .map(|_| ())
    }

    async fn delete_resource(
        &self,
        namespace: &str,
        api_kind: &str,
        name: &str,
    ) -> Result<(), ClusterError> {
        self.expect_success(
            &args(&["delete", api_kind, name, "-n", namespace, "--wait=false"]),
            None,
            api_kind,
            name,
        )
        .await
        .map(|_| ())
    }

    async fn resource_state(
        &self,
        namespace: &str,
        api_kind: &str,
        name: &str,
    ) -> Result<ObservedState, ClusterError> {
        let result = self
            .expect_success(
                &args(&["get", api_kind, name, "-n", namespace, "-o", "json"]),
                None,
                api_kind,
                name,
            )
            .await;

        match result {
            Ok(stdout) => {
                let object: Value = serde_json::from_str(&stdout).map_err(|e| {
                    ClusterError::Command(format!("unreadable {} {} output: {}", api_kind, name, e))
                })?;
                Ok(readiness_from_object(&object))
            }
            Err(ClusterError::NotFound { .. }) => Ok(ObservedState::Absent),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_failure() {
        assert!(matches!(
            classify_failure(
                r#"Error from server (AlreadyExists): namespaces "mesh-test" already exists"#,
                "Namespace",
                "mesh-test"
            ),
            ClusterError::AlreadyExists { .. }
        ));
        assert!(matches!(
            classify_failure(
                r#"Error from server (NotFound): gateways.networking.istio.io "edge" not found"#,
                "Gateway",
                "edge"
            ),
            ClusterError::NotFound { .. }
        ));
        assert!(matches!(
            classify_failure(
                "Unable to connect to the server: dial tcp 10.0.0.1:443: i/o timeout",
                "Namespace",
                "x"
            ),
            ClusterError::Unavailable(_)
        ));
        assert!(matches!(
            classify_failure(
                "error: error validating data: unknown field \"spce\"",
                "Deployment",
                "x"
            ),
            ClusterError::Rejected(_)
        ));
    }

    #[test]
    fn test_deployment_readiness() {
        let pending = json!({
            "kind": "Deployment",
            "spec": { "replicas": 2 },
            "status": { "readyReplicas": 1 }
        });
        assert_eq!(readiness_from_object(&pending), ObservedState::Pending);

        let ready = json!({
            "kind": "Deployment",
            "spec": { "replicas": 2 },
            "status": { "readyReplicas": 2 }
        });
        assert_eq!(readiness_from_object(&ready), ObservedState::Present);

        let no_status = json!({ "kind": "Deployment", "spec": { "replicas": 1 } });
        assert_eq!(readiness_from_object(&no_status), ObservedState::Pending);
    }

    #[test]
    fn test_pod_readiness() {
        let running_not_ready = json!({
            "kind": "Pod",
            "status": {
                "phase": "Running",
                "conditions": [{ "type": "Ready", "status": "False" }]
            }
        });
        assert_eq!(readiness_from_object(&running_not_ready), ObservedState::Pending);

        let ready = json!({
            "kind": "Pod",
            "status": {
                "phase": "Running",
                "conditions": [
                    { "type": "Initialized", "status": "True" },
                    { "type": "Ready", "status": "True" }
                ]
            }
        });
        assert_eq!(readiness_from_object(&ready), ObservedState::Present);
    }

    #[test]
    fn test_generic_object_readiness() {
        let programmed = json!({
            "kind": "Gateway",
            "status": { "conditions": [{ "type": "Programmed", "status": "False" }] }
        });
        assert_eq!(readiness_from_object(&programmed), ObservedState::Pending);

        let virtual_service = json!({ "kind": "VirtualService", "spec": { "hosts": ["a"] } });
        assert_eq!(readiness_from_object(&virtual_service), ObservedState::Present);

        let deleting = json!({
            "kind": "Service",
            "metadata": { "deletionTimestamp": "2026-01-01T00:00:00Z" }
        });
        assert_eq!(readiness_from_object(&deleting), ObservedState::Deleting);
    }

    #[tokio::test]
    async fn test_runner_passes_context_before_args() {
        let runner = KubectlRunner::new("echo").with_context(Some("kind-mesh".into()));
        let output = runner.run(&args(&["get", "ns"]), None).await.unwrap();
        assert!(output.success);
        assert_eq!(output.stdout.trim(), "--context kind-mesh get ns");
    }

    #[tokio::test]
    async fn test_runner_feeds_stdin() {
        let runner = KubectlRunner::new("cat");
        let output = runner.run(&[], Some("kind: Namespace")).await.unwrap();
        assert_eq!(output.stdout, "kind: Namespace");
    }

    #[tokio::test]
    async fn test_runner_missing_binary_is_command_error() {
        let runner = KubectlRunner::new("/nonexistent/kubectl");
        let err = runner.run(&args(&["version"]), None).await.unwrap_err();
        assert!(matches!(err, ClusterError::Command(_)));
    }

    #[tokio::test]
    async fn test_runner_timeout_is_unavailable() {
        let runner = KubectlRunner::new("sleep").with_timeout(Duration::from_millis(100));
        let err = runner.run(&args(&["5"]), None).await.unwrap_err();
        assert!(matches!(err, ClusterError::Unavailable(_)));
    }
}

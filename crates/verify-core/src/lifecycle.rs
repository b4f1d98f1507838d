//! Execution scope lifecycle.
//!
//! An [`ExecutionScope`] is one disposable environment (a namespace) plus the
//! resources the engine created inside it. [`LifecycleManager`] opens scopes,
//! deploys into them and tears them down:
//!
//! - Opening a scope whose name is still in use destroys the leftover first
//!   and waits until the cluster reports it gone. Only then is the new one
//!   created; a create that still collides is an error, never a success.
//! - Deploying treats "already exists" as success.
//! - Closing deletes resources in reverse deploy order, then the namespace.
//!   Failures are logged and reflected in [`CleanupStatus`], never raised.
//!
//! [`LifecycleManager::run_in_scope`] ties these together so the scope is
//! released on every exit path, including a panicking body.

use crate::cluster::{ClusterControl, ClusterError};
use crate::dns::{self, DnsProvider, RecordId};
use crate::poller::{poll, Backoff, PollOutcome, PollResult, PollSpec};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, instrument, warn};

/// Category of an externally visible object created by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    DnsRecord,
    Workload,
    NetworkConfig,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceKind::DnsRecord => "dns-record",
            ResourceKind::Workload => "workload",
            ResourceKind::NetworkConfig => "network-config",
        };
        f.write_str(name)
    }
}

/// Last observed state of an external object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservedState {
    Absent,
    Pending,
    Present,
    Deleting,
}

impl fmt::Display for ObservedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ObservedState::Absent => "absent",
            ObservedState::Pending => "pending",
            ObservedState::Present => "present",
            ObservedState::Deleting => "deleting",
        };
        f.write_str(name)
    }
}

/// Teardown progress of a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupStatus {
    Pending,
    InProgress,
    Done,
    Failed,
    /// Teardown disabled by configuration; the environment was left in place.
    Skipped,
}

impl fmt::Display for CleanupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CleanupStatus::Pending => "pending",
            CleanupStatus::InProgress => "in-progress",
            CleanupStatus::Done => "done",
            CleanupStatus::Failed => "failed",
            CleanupStatus::Skipped => "skipped",
        };
        f.write_str(name)
    }
}

/// A rendered resource to create inside a scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSpec {
    pub kind: ResourceKind,
    /// Kubernetes kind, e.g. `Deployment`, `Gateway`, `VirtualService`.
    pub api_kind: String,
    pub name: String,
    /// Manifest passed verbatim to the cluster (YAML or JSON).
    pub manifest: String,
    /// Wait for readiness after creation.
    pub ready_timeout: Option<Duration>,
}

/// How to reach the object behind a handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleTarget {
    Cluster { api_kind: String },
    Dns { id: RecordId },
}

/// Reference to one object created within a scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceHandle {
    pub kind: ResourceKind,
    pub name: String,
    pub scope: String,
    pub state: ObservedState,
    pub target: HandleTarget,
}

impl fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            HandleTarget::Cluster { api_kind } => {
                write!(f, "{} {}/{} ({})", api_kind, self.scope, self.name, self.state)
            }
            HandleTarget::Dns { id } => write!(f, "DNS {} ({})", id, self.state),
        }
    }
}

/// Identity and labels of a scope to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeSpec {
    pub name: String,
    pub labels: Vec<(String, String)>,
}

impl ScopeSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            labels: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.push((key.into(), value.into()));
        self
    }
}

/// One disposable environment and the resources created inside it.
#[derive(Debug)]
pub struct ExecutionScope {
    id: String,
    created_at: DateTime<Utc>,
    resources: Vec<ResourceHandle>,
    cleanup: CleanupStatus,
    opened: bool,
}

impl ExecutionScope {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            created_at: Utc::now(),
            resources: Vec::new(),
            cleanup: CleanupStatus::Pending,
            opened: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn resources(&self) -> &[ResourceHandle] {
        &self.resources
    }

    pub fn cleanup_status(&self) -> CleanupStatus {
        self.cleanup
    }

    /// Whether the underlying environment was fully created.
    pub fn is_open(&self) -> bool {
        self.opened
    }

    /// Take ownership of a DNS record produced by this scope's deployments,
    /// so that closing the scope deletes it.
    pub fn adopt_dns_record(&mut self, id: RecordId) -> ResourceHandle {
        let handle = ResourceHandle {
            kind: ResourceKind::DnsRecord,
            name: dns::normalize_name(&id.name),
            scope: self.id.clone(),
            state: ObservedState::Present,
            target: HandleTarget::Dns { id },
        };
        self.attach(handle.clone());
        handle
    }

    /// Record a handle, or refresh the state of an identical one.
    fn attach(&mut self, handle: ResourceHandle) {
        let existing = self.resources.iter_mut().find(|h| {
            h.kind == handle.kind && h.name == handle.name && h.target == handle.target
        });
        match existing {
            Some(existing) => existing.state = handle.state,
            None => self.resources.push(handle),
        }
    }
}

/// Lifecycle errors. All of them abort the current test case.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Scope '{scope}' left by a previous run was not fully destroyed (last observed: {last})")]
    ResidualScope { scope: String, last: String },

    #[error("Failed to create scope '{scope}': {source}")]
    ScopeCreate { scope: String, source: ClusterError },

    #[error("Scope '{0}' is not open")]
    ScopeNotOpen(String),

    #[error("Resource kind {kind} cannot be deployed ('{name}')")]
    UnsupportedKind { kind: ResourceKind, name: String },

    #[error("Failed to deploy {api_kind} '{name}': {source}")]
    Deploy {
        api_kind: String,
        name: String,
        source: ClusterError,
    },

    #[error("{api_kind} '{name}' did not become ready (last observed: {last})")]
    NotReady {
        api_kind: String,
        name: String,
        last: String,
    },

    #[error(transparent)]
    Cluster(#[from] ClusterError),
}

/// A scope that failed to open. `scope` holds whatever partial state exists
/// and should still be passed to [`LifecycleManager::close_scope`].
#[derive(Debug, Error)]
#[error("{error}")]
pub struct ScopeOpenError {
    pub scope: ExecutionScope,
    #[source]
    pub error: LifecycleError,
}

/// Value produced by a body run inside a scope, plus the teardown result.
#[derive(Debug)]
pub struct ScopeRun<T> {
    pub value: T,
    pub cleanup: CleanupStatus,
}

/// Timing and behaviour of scope management.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleConfig {
    /// How long to wait for a namespace to disappear after deletion. Also
    /// bounds retries of throttled DNS deletes at close.
    pub delete_timeout: Duration,
    pub delete_backoff: Backoff,
    /// Poll interval for readiness waits.
    pub ready_interval: Duration,
    /// When false, scopes are left in place at close.
    pub cleanup_enabled: bool,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            delete_timeout: Duration::from_secs(180),
            delete_backoff: Backoff::Fixed(Duration::from_secs(2)),
            ready_interval: Duration::from_secs(2),
            cleanup_enabled: true,
        }
    }
}

/// Opens, populates and tears down execution scopes.
pub struct LifecycleManager {
    cluster: Arc<dyn ClusterControl>,
    dns: Option<Arc<dyn DnsProvider>>,
    config: LifecycleConfig,
}

impl LifecycleManager {
    pub fn new(
        cluster: Arc<dyn ClusterControl>,
        dns: Option<Arc<dyn DnsProvider>>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            cluster,
            dns,
            config,
        }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Open a fresh scope, destroying any leftover with the same name first.
    #[instrument(skip_all, fields(scope = %spec.name))]
    pub async fn open_scope(&self, spec: &ScopeSpec) -> Result<ExecutionScope, ScopeOpenError> {
        let mut scope = ExecutionScope::new(&spec.name);

        if let Err(error) = self.destroy_residual(&spec.name).await {
            return Err(ScopeOpenError { scope, error });
        }

        match self.cluster.create_namespace(&spec.name, &spec.labels).await {
            Ok(()) => {
                scope.opened = true;
                info!(target: "verify.lifecycle", scope = %spec.name, "Scope opened");
                Ok(scope)
            }
            Err(source) => Err(ScopeOpenError {
                scope,
                error: LifecycleError::ScopeCreate {
                    scope: spec.name.clone(),
                    source,
                },
            }),
        }
    }

    /// Delete a leftover namespace and wait until the cluster reports it gone.
    async fn destroy_residual(&self, name: &str) -> Result<(), LifecycleError> {
        let state = self.cluster.namespace_state(name).await?;
        if state == ObservedState::Absent {
            return Ok(());
        }

        warn!(
            target: "verify.lifecycle",
            scope = %name,
            state = %state,
            "Residual scope found, destroying before re-creating"
        );

        if state != ObservedState::Deleting {
            match self.cluster.delete_namespace(name).await {
                Ok(()) | Err(ClusterError::NotFound { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }

        self.wait_namespace_gone(name).await
    }

    async fn wait_namespace_gone(&self, name: &str) -> Result<(), LifecycleError> {
        let spec = PollSpec::new(
            format!("namespace {} deleted", name),
            self.config.delete_backoff,
            self.config.delete_timeout,
        );

        let outcome = poll(&spec, || async {
            match self.cluster.namespace_state(name).await {
                Ok(ObservedState::Absent) => Ok(PollResult::Satisfied(())),
                Ok(state) => Ok(PollResult::NotYetSatisfied(format!("namespace {}", state))),
                Err(e) => PollResult::from_error(e),
            }
        })
        .await?;

        match outcome {
            PollOutcome::Converged { .. } => Ok(()),
            PollOutcome::TimedOut { last, .. } => Err(LifecycleError::ResidualScope {
                scope: name.to_string(),
                last: last.to_string(),
            }),
        }
    }

    /// Create a resource tagged to `scope`. "Already exists" is success.
    #[instrument(skip_all, fields(scope = %scope.id, resource = %spec.name))]
    pub async fn deploy(
        &self,
        scope: &mut ExecutionScope,
        spec: &ResourceSpec,
    ) -> Result<ResourceHandle, LifecycleError> {
        if !scope.opened {
            return Err(LifecycleError::ScopeNotOpen(scope.id.clone()));
        }
        if spec.kind == ResourceKind::DnsRecord {
            return Err(LifecycleError::UnsupportedKind {
                kind: spec.kind,
                name: spec.name.clone(),
            });
        }

        match self.cluster.create_resource(&scope.id, spec).await {
            Ok(()) => {
                info!(
                    target: "verify.lifecycle",
                    api_kind = %spec.api_kind,
                    name = %spec.name,
                    "Resource created"
                );
            }
            Err(ClusterError::AlreadyExists { .. }) => {
                info!(
                    target: "verify.lifecycle",
                    api_kind = %spec.api_kind,
                    name = %spec.name,
                    "Resource already exists, reusing"
                );
            }
            Err(source) => {
                return Err(LifecycleError::Deploy {
                    api_kind: spec.api_kind.clone(),
                    name: spec.name.clone(),
                    source,
                })
            }
        }

        let mut handle = ResourceHandle {
            kind: spec.kind,
            name: spec.name.clone(),
            scope: scope.id.clone(),
            state: ObservedState::Pending,
            target: HandleTarget::Cluster {
                api_kind: spec.api_kind.clone(),
            },
        };
        scope.attach(handle.clone());

        if let Some(timeout) = spec.ready_timeout {
            self.wait_ready(&scope.id, spec, timeout).await?;
            handle.state = ObservedState::Present;
            scope.attach(handle.clone());
        }

        Ok(handle)
    }

    async fn wait_ready(
        &self,
        namespace: &str,
        spec: &ResourceSpec,
        timeout: Duration,
    ) -> Result<(), LifecycleError> {
        let poll_spec = PollSpec::fixed(
            format!("{} {}/{} ready", spec.api_kind, namespace, spec.name),
            self.config.ready_interval,
            timeout,
        );

        let outcome = poll(&poll_spec, || async {
            match self
                .cluster
                .resource_state(namespace, &spec.api_kind, &spec.name)
                .await
            {
                Ok(ObservedState::Present) => Ok(PollResult::Satisfied(())),
                Ok(state) => Ok(PollResult::NotYetSatisfied(state.to_string())),
                // Read-after-write lag on a freshly created object.
                Err(ClusterError::NotFound { .. }) => {
                    Ok(PollResult::NotYetSatisfied("not found".to_string()))
                }
                Err(e) => PollResult::from_error(e),
            }
        })
        .await?;

        match outcome {
            PollOutcome::Converged { .. } => Ok(()),
            PollOutcome::TimedOut { last, .. } => Err(LifecycleError::NotReady {
                api_kind: spec.api_kind.clone(),
                name: spec.name.clone(),
                last: last.to_string(),
            }),
        }
    }

    /// Destroy the scope and everything it owns. Never fails: problems are
    /// logged and reported through the returned status.
    #[instrument(skip_all, fields(scope = %scope.id))]
    pub async fn close_scope(&self, mut scope: ExecutionScope) -> CleanupStatus {
        if !self.config.cleanup_enabled {
            warn!(
                target: "verify.lifecycle",
                scope = %scope.id,
                resources = scope.resources.len(),
                "Cleanup disabled, leaving scope in place"
            );
            scope.cleanup = CleanupStatus::Skipped;
            return scope.cleanup;
        }

        scope.cleanup = CleanupStatus::InProgress;
        let mut failures = 0usize;

        let namespace = scope.id.clone();
        for handle in scope.resources.iter_mut().rev() {
            match self.release(&namespace, handle).await {
                Ok(()) => handle.state = ObservedState::Absent,
                Err(reason) => {
                    failures += 1;
                    warn!(
                        target: "verify.lifecycle",
                        resource = %handle,
                        error = %reason,
                        "Failed to delete resource"
                    );
                }
            }
        }

        // Also covers scopes that never finished opening.
        match self.cluster.delete_namespace(&namespace).await {
            Ok(()) | Err(ClusterError::NotFound { .. }) => {
                if let Err(e) = self.wait_namespace_gone(&namespace).await {
                    failures += 1;
                    warn!(target: "verify.lifecycle", scope = %namespace, error = %e, "Scope deletion not confirmed");
                }
            }
            Err(e) => {
                failures += 1;
                warn!(target: "verify.lifecycle", scope = %namespace, error = %e, "Failed to delete scope");
            }
        }

        scope.cleanup = if failures == 0 {
            CleanupStatus::Done
        } else {
            CleanupStatus::Failed
        };

        info!(
            target: "verify.lifecycle",
            scope = %namespace,
            status = %scope.cleanup,
            "Scope closed"
        );
        scope.cleanup
    }

    async fn release(&self, namespace: &str, handle: &ResourceHandle) -> Result<(), String> {
        match &handle.target {
            HandleTarget::Cluster { api_kind } => {
                match self
                    .cluster
                    .delete_resource(namespace, api_kind, &handle.name)
                    .await
                {
                    Ok(()) | Err(ClusterError::NotFound { .. }) => Ok(()),
                    Err(e) => Err(e.to_string()),
                }
            }
            HandleTarget::Dns { id } => {
                let provider = self
                    .dns
                    .as_ref()
                    .ok_or_else(|| "no DNS provider configured".to_string())?;
                let spec = PollSpec::new(
                    format!("DNS {} released", id),
                    self.config.delete_backoff,
                    self.config.delete_timeout,
                );
                match dns::delete_with_retry(provider.as_ref(), id, &spec).await {
                    Ok(PollOutcome::Converged { .. }) => Ok(()),
                    Ok(PollOutcome::TimedOut { last, .. }) => Err(last.to_string()),
                    Err(e) => Err(e.to_string()),
                }
            }
        }
    }

    /// Open a scope, run `body` inside it, and close the scope on every exit
    /// path. A panic in `body` is re-raised after cleanup.
    ///
    /// A scope that fails to open is still closed (best effort) before the
    /// open error is returned.
    pub async fn run_in_scope<T, F>(
        &self,
        spec: &ScopeSpec,
        body: F,
    ) -> Result<ScopeRun<T>, LifecycleError>
    where
        T: Send,
        F: for<'s> FnOnce(&'s mut ExecutionScope) -> BoxFuture<'s, T>,
    {
        let mut scope = match self.open_scope(spec).await {
            Ok(scope) => scope,
            Err(ScopeOpenError { scope, error }) => {
                let cleanup = self.close_scope(scope).await;
                warn!(
                    target: "verify.lifecycle",
                    scope = %spec.name,
                    error = %error,
                    cleanup = %cleanup,
                    "Scope failed to open"
                );
                return Err(error);
            }
        };

        let result = AssertUnwindSafe(body(&mut scope)).catch_unwind().await;
        let cleanup = self.close_scope(scope).await;

        match result {
            Ok(value) => Ok(ScopeRun { value, cleanup }),
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

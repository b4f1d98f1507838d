//! In-memory cluster.
//!
//! Namespaces go through `Present -> Deleting -> Absent`. Deletion is only
//! requested by `delete_namespace`; the namespace (and everything in it)
//! disappears after a configurable number of `namespace_state` queries,
//! which is how kubectl behaves while finalizers run.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use verify_core::cluster::{ClusterControl, ClusterError};
use verify_core::lifecycle::{ObservedState, ResourceSpec};

/// Fake [`ClusterControl`].
#[derive(Debug, Clone, Default)]
pub struct FakeCluster {
    inner: Arc<Mutex<FakeClusterInner>>,
}

#[derive(Debug, Default)]
struct FakeClusterInner {
    namespaces: BTreeMap<String, Namespace>,
    /// State queries a deleted namespace answers with `Deleting`.
    terminating_polls: u32,
    /// Pending state queries before a resource reports ready, by name.
    ready_after: HashMap<String, u32>,
    create_failures: HashMap<String, ClusterError>,
    namespace_create_failure: Option<ClusterError>,
    delete_failures: HashSet<String>,
    /// Every mutating call, in order.
    calls: Vec<String>,
}

#[derive(Debug, Default)]
struct Namespace {
    labels: Vec<(String, String)>,
    /// `Some(n)`: deletion requested, gone after `n` more state queries.
    terminating: Option<u32>,
    /// (api_kind, name) -> pending readiness queries.
    resources: BTreeMap<(String, String), u32>,
}

impl FakeCluster {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-existing namespace, e.g. left behind by an interrupted run.
    #[must_use]
    pub fn with_namespace(self, name: &str) -> Self {
        self.inner
            .lock()
            .unwrap()
            .namespaces
            .insert(name.to_string(), Namespace::default());
        self
    }

    /// Pre-existing resource inside a pre-existing namespace.
    #[must_use]
    pub fn with_resource(self, namespace: &str, api_kind: &str, name: &str) -> Self {
        {
            let mut inner = self.inner.lock().unwrap();
            inner
                .namespaces
                .entry(namespace.to_string())
                .or_default()
                .resources
                .insert((api_kind.to_string(), name.to_string()), 0);
        }
        self
    }

    #[must_use]
    pub fn with_terminating_polls(self, polls: u32) -> Self {
        self.inner.lock().unwrap().terminating_polls = polls;
        self
    }

    #[must_use]
    pub fn with_ready_after(self, name: &str, polls: u32) -> Self {
        self.inner
            .lock()
            .unwrap()
            .ready_after
            .insert(name.to_string(), polls);
        self
    }

    /// Creating the resource called `name` fails with `error`.
    #[must_use]
    pub fn with_create_failure(self, name: &str, error: ClusterError) -> Self {
        self.inner
            .lock()
            .unwrap()
            .create_failures
            .insert(name.to_string(), error);
        self
    }

    #[must_use]
    pub fn with_namespace_create_failure(self, error: ClusterError) -> Self {
        self.inner.lock().unwrap().namespace_create_failure = Some(error);
        self
    }

    /// Deleting the resource called `name` is rejected.
    #[must_use]
    pub fn with_delete_failure(self, name: &str) -> Self {
        self.inner
            .lock()
            .unwrap()
            .delete_failures
            .insert(name.to_string());
        self
    }

    pub fn namespace_exists(&self, name: &str) -> bool {
        self.inner.lock().unwrap().namespaces.contains_key(name)
    }

    pub fn namespace_count(&self) -> usize {
        self.inner.lock().unwrap().namespaces.len()
    }

    pub fn namespace_labels(&self, name: &str) -> Option<Vec<(String, String)>> {
        self.inner
            .lock()
            .unwrap()
            .namespaces
            .get(name)
            .map(|ns| ns.labels.clone())
    }

    /// `(api_kind, name)` of every resource in `namespace`.
    pub fn resources_in(&self, namespace: &str) -> Vec<(String, String)> {
        self.inner
            .lock()
            .unwrap()
            .namespaces
            .get(namespace)
            .map(|ns| ns.resources.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Mutating calls in order, e.g. `create_resource mesh-test/Gateway/edge`.
    pub fn calls(&self) -> Vec<String> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn call_count(&self, prefix: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }
}

fn not_found(kind: &str, name: &str) -> ClusterError {
    ClusterError::NotFound {
        kind: kind.to_string(),
        name: name.to_string(),
    }
}

#[async_trait]
impl ClusterControl for FakeCluster {
    async fn create_namespace(
        &self,
        name: &str,
        labels: &[(String, String)],
    ) -> Result<(), ClusterError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(format!("create_namespace {}", name));
        if let Some(error) = inner.namespace_create_failure.clone() {
            return Err(error);
        }
        if inner.namespaces.contains_key(name) {
            return Err(ClusterError::AlreadyExists {
                kind: "Namespace".to_string(),
                name: name.to_string(),
            });
        }
        inner.namespaces.insert(
            name.to_string(),
            Namespace {
                labels: labels.to_vec(),
                ..Namespace::default()
            },
        );
        Ok(())
    }

    async fn delete_namespace(&self, name: &str) -> Result<(), ClusterError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(format!("delete_namespace {}", name));
        let polls = inner.terminating_polls;
        let namespace = inner
            .namespaces
            .get_mut(name)
            .ok_or_else(|| not_found("Namespace", name))?;
        if namespace.terminating.is_none() {
            namespace.terminating = Some(polls);
        }
        Ok(())
    }

    async fn namespace_state(&self, name: &str) -> Result<ObservedState, ClusterError> {
        let mut inner = self.inner.lock().unwrap();
        let Some(namespace) = inner.namespaces.get_mut(name) else {
            return Ok(ObservedState::Absent);
        };
        let terminating = namespace.terminating;
        match terminating {
            None => Ok(ObservedState::Present),
            Some(0) => {
                inner.namespaces.remove(name);
                Ok(ObservedState::Absent)
            }
            Some(left) => {
                namespace.terminating = Some(left - 1);
                Ok(ObservedState::Deleting)
            }
        }
    }

    async fn create_resource(&self, namespace: &str, spec: &ResourceSpec) -> Result<(), ClusterError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(format!(
            "create_resource {}/{}/{}",
            namespace, spec.api_kind, spec.name
        ));
        if let Some(error) = inner.create_failures.get(&spec.name).cloned() {
            return Err(error);
        }
        let ready_after = inner.ready_after.get(&spec.name).copied().unwrap_or(0);
        let ns = inner
            .namespaces
            .get_mut(namespace)
            .filter(|ns| ns.terminating.is_none())
            .ok_or_else(|| not_found("Namespace", namespace))?;

        let key = (spec.api_kind.clone(), spec.name.clone());
        if ns.resources.contains_key(&key) {
            return Err(ClusterError::AlreadyExists {
                kind: spec.api_kind.clone(),
                name: spec.name.clone(),
            });
        }
        ns.resources.insert(key, ready_after);
        Ok(())
    }

    async fn delete_resource(
        &self,
        namespace: &str,
        api_kind: &str,
        name: &str,
    ) -> Result<(), ClusterError> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .calls
            .push(format!("delete_resource {}/{}/{}", namespace, api_kind, name));
        if inner.delete_failures.contains(name) {
            return Err(ClusterError::Rejected(format!("cannot delete {}", name)));
        }
        inner
            .namespaces
            .get_mut(namespace)
            .and_then(|ns| ns.resources.remove(&(api_kind.to_string(), name.to_string())))
            .map(|_| ())
            .ok_or_else(|| not_found(api_kind, name))
    }

    async fn resource_state(
        &self,
        namespace: &str,
        api_kind: &str,
        name: &str,
    ) -> Result<ObservedState, ClusterError> {
        let mut inner = self.inner.lock().unwrap();
        let Some(ns) = inner.namespaces.get_mut(namespace) else {
            return Ok(ObservedState::Absent);
        };
        let deleting = ns.terminating.is_some();
        match ns.resources.get_mut(&(api_kind.to_string(), name.to_string())) {
            None => Ok(ObservedState::Absent),
            Some(_) if deleting => Ok(ObservedState::Deleting),
            Some(0) => Ok(ObservedState::Present),
            Some(pending) => {
                *pending -= 1;
                Ok(ObservedState::Pending)
            }
        }
    }
}

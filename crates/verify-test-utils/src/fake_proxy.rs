//! Scripted proxy admin surface.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use verify_core::proxy::{AdminError, ProxyAdmin, ProxyTarget};

/// Fake [`ProxyAdmin`]: answers with queued results in order, then keeps
/// repeating the last one.
#[derive(Debug, Clone, Default)]
pub struct FakeProxyAdmin {
    inner: Arc<Mutex<FakeProxyInner>>,
}

#[derive(Debug, Default)]
struct FakeProxyInner {
    queue: VecDeque<Result<Value, AdminError>>,
    last: Option<Result<Value, AdminError>>,
    requests: Vec<ProxyTarget>,
}

impl FakeProxyAdmin {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn then_dump(self, dump: Value) -> Self {
        self.inner.lock().unwrap().queue.push_back(Ok(dump));
        self
    }

    #[must_use]
    pub fn then_error(self, error: AdminError) -> Self {
        self.inner.lock().unwrap().queue.push_back(Err(error));
        self
    }

    /// Targets of every `config_dump` call.
    pub fn requests(&self) -> Vec<ProxyTarget> {
        self.inner.lock().unwrap().requests.clone()
    }
}

#[async_trait]
impl ProxyAdmin for FakeProxyAdmin {
    async fn config_dump(&self, target: &ProxyTarget) -> Result<Value, AdminError> {
        let mut inner = self.inner.lock().unwrap();
        inner.requests.push(target.clone());
        if let Some(next) = inner.queue.pop_front() {
            inner.last = Some(next.clone());
            return next;
        }
        inner
            .last
            .clone()
            .unwrap_or_else(|| Err(AdminError::Unreachable("no scripted response".to_string())))
    }
}

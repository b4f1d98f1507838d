//! Scripted HTTP probe.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use verify_core::probe::{HttpProbe, ProbeError, ProbeRequest, ProbeResponse, ProbeStatus};

type Scripted = Result<ProbeResponse, ProbeError>;

/// Fake [`HttpProbe`] keyed by URL. Each URL answers with its queued
/// results in order, then repeats the last one. Unknown URLs fail to
/// connect.
#[derive(Debug, Clone, Default)]
pub struct FakeHttpProbe {
    inner: Arc<Mutex<FakeProbeInner>>,
}

#[derive(Debug, Default)]
struct FakeProbeInner {
    scripts: HashMap<String, VecDeque<Scripted>>,
    requests: Vec<ProbeRequest>,
}

impl FakeHttpProbe {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_status(self, url: &str, code: u16) -> Self {
        self.with_response(url, ProbeResponse::new(ProbeStatus::Http(code), Duration::from_millis(15)))
    }

    /// Response with a measured duration, for timing checks.
    #[must_use]
    pub fn with_timed_status(self, url: &str, code: u16, duration: Duration) -> Self {
        self.with_response(url, ProbeResponse::new(ProbeStatus::Http(code), duration))
    }

    #[must_use]
    pub fn with_connection_failure(self, url: &str, reason: &str) -> Self {
        self.with_response(
            url,
            ProbeResponse::new(
                ProbeStatus::ConnectionFailed(reason.to_string()),
                Duration::from_millis(1),
            ),
        )
    }

    #[must_use]
    pub fn with_response(self, url: &str, response: ProbeResponse) -> Self {
        self.push(url, Ok(response));
        self
    }

    #[must_use]
    pub fn with_error(self, url: &str, error: ProbeError) -> Self {
        self.push(url, Err(error));
        self
    }

    fn push(&self, url: &str, result: Scripted) {
        self.inner
            .lock()
            .unwrap()
            .scripts
            .entry(url.to_string())
            .or_default()
            .push_back(result);
    }

    /// Every request received, in order.
    pub fn requests(&self) -> Vec<ProbeRequest> {
        self.inner.lock().unwrap().requests.clone()
    }

    pub fn request_count(&self, url: &str) -> usize {
        self.requests().iter().filter(|r| r.url == url).count()
    }
}

#[async_trait]
impl HttpProbe for FakeHttpProbe {
    async fn probe(&self, request: &ProbeRequest) -> Result<ProbeResponse, ProbeError> {
        let mut inner = self.inner.lock().unwrap();
        inner.requests.push(request.clone());
        match inner.scripts.get_mut(&request.url) {
            Some(script) if script.len() > 1 => script.pop_front().unwrap(),
            Some(script) => script.front().cloned().unwrap(),
            None => Ok(ProbeResponse::new(
                ProbeStatus::ConnectionFailed("no route to host".to_string()),
                Duration::from_millis(1),
            )),
        }
    }
}

//! HTTP probe interface.
//!
//! A probe issues exactly one request and reports what happened: an HTTP
//! status, or a connection-level failure. Refused, reset and timed-out
//! connections are observations (isolation checks expect them), so they are
//! part of [`ProbeStatus`] rather than [`ProbeError`]. `ProbeError` is reserved
//! for problems with the probing machinery itself.

use crate::poller::Transience;
use async_trait::async_trait;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Default per-request timeout.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Literal name-to-address mapping used instead of DNS for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveOverride {
    pub host: String,
    pub port: u16,
    pub address: IpAddr,
}

/// Where the request originates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeSource {
    /// From the verifying process itself.
    Local,

    /// From inside a pod (exercises in-mesh identity and policies).
    Pod {
        namespace: String,
        pod: String,
        container: Option<String>,
    },
}

impl fmt::Display for ProbeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeSource::Local => write!(f, "local"),
            ProbeSource::Pod { namespace, pod, .. } => write!(f, "pod {}/{}", namespace, pod),
        }
    }
}

/// A single probe request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeRequest {
    pub url: String,
    pub resolve: Option<ResolveOverride>,
    pub headers: Vec<(String, String)>,
    pub timeout: Duration,
    pub source: ProbeSource,
}

impl ProbeRequest {
    /// Local GET request with the default timeout.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            resolve: None,
            headers: Vec::new(),
            timeout: DEFAULT_PROBE_TIMEOUT,
            source: ProbeSource::Local,
        }
    }

    #[must_use]
    pub fn with_resolve(mut self, host: impl Into<String>, port: u16, address: IpAddr) -> Self {
        self.resolve = Some(ResolveOverride {
            host: host.into(),
            port,
            address,
        });
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn from_source(mut self, source: ProbeSource) -> Self {
        self.source = source;
        self
    }
}

impl fmt::Display for ProbeRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GET {} from {}", self.url, self.source)?;
        if let Some(resolve) = &self.resolve {
            write!(f, " (resolve {}:{} -> {})", resolve.host, resolve.port, resolve.address)?;
        }
        Ok(())
    }
}

/// What the probe observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeStatus {
    /// A complete HTTP response with this status code.
    Http(u16),

    /// No HTTP response: refused, reset, timed out, TLS failure.
    ConnectionFailed(String),
}

impl ProbeStatus {
    pub fn code(&self) -> Option<u16> {
        match self {
            ProbeStatus::Http(code) => Some(*code),
            ProbeStatus::ConnectionFailed(_) => None,
        }
    }

    /// Whether the target served the request (2xx or 3xx).
    pub fn is_accepted(&self) -> bool {
        matches!(self, ProbeStatus::Http(code) if (200..400).contains(code))
    }
}

impl fmt::Display for ProbeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeStatus::Http(code) => write!(f, "HTTP {}", code),
            ProbeStatus::ConnectionFailed(reason) => write!(f, "connection failed ({})", reason),
        }
    }
}

/// Result of one probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResponse {
    pub status: ProbeStatus,
    pub headers: Vec<(String, String)>,
    /// Total wall-clock duration of the request.
    pub duration: Duration,
}

impl ProbeResponse {
    pub fn new(status: ProbeStatus, duration: Duration) -> Self {
        Self {
            status,
            headers: Vec::new(),
            duration,
        }
    }

    /// First header value with this name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Probe machinery errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProbeError {
    #[error("Invalid probe request: {0}")]
    InvalidRequest(String),

    /// The source pod or exec channel is not usable right now.
    #[error("Probe source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Probe source not supported: {0}")]
    Unsupported(String),

    /// The probe tool produced output that could not be interpreted.
    #[error("Malformed probe output: {0}")]
    Malformed(String),
}

impl Transience for ProbeError {
    fn is_transient(&self) -> bool {
        matches!(self, ProbeError::SourceUnavailable(_))
    }
}

/// Issues one request and reports status and duration.
#[async_trait]
pub trait HttpProbe: Send + Sync {
    async fn probe(&self, request: &ProbeRequest) -> Result<ProbeResponse, ProbeError>;
}

/// Dispatches requests to a local or an in-pod probe depending on their source.
pub struct ProbeRouter {
    local: Arc<dyn HttpProbe>,
    remote: Option<Arc<dyn HttpProbe>>,
}

impl ProbeRouter {
    pub fn new(local: Arc<dyn HttpProbe>, remote: Option<Arc<dyn HttpProbe>>) -> Self {
        Self { local, remote }
    }
}

#[async_trait]
impl HttpProbe for ProbeRouter {
    async fn probe(&self, request: &ProbeRequest) -> Result<ProbeResponse, ProbeError> {
        match (&request.source, &self.remote) {
            (ProbeSource::Local, _) => self.local.probe(request).await,
            (ProbeSource::Pod { .. }, Some(remote)) => remote.probe(request).await,
            (ProbeSource::Pod { .. }, None) => Err(ProbeError::Unsupported(format!(
                "no in-pod probe configured for {}",
                request.source
            ))),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    struct Fixed(u16);

    #[async_trait]
    impl HttpProbe for Fixed {
        async fn probe(&self, _request: &ProbeRequest) -> Result<ProbeResponse, ProbeError> {
            Ok(ProbeResponse::new(ProbeStatus::Http(self.0), Duration::ZERO))
        }
    }

    fn pod_source() -> ProbeSource {
        ProbeSource::Pod {
            namespace: "mesh-test".into(),
            pod: "sleep".into(),
            container: None,
        }
    }

    #[test]
    fn test_accepted_statuses() {
        assert!(ProbeStatus::Http(200).is_accepted());
        assert!(ProbeStatus::Http(302).is_accepted());
        assert!(!ProbeStatus::Http(404).is_accepted());
        assert!(!ProbeStatus::Http(503).is_accepted());
        assert!(!ProbeStatus::ConnectionFailed("reset".into()).is_accepted());
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let mut response = ProbeResponse::new(ProbeStatus::Http(200), Duration::ZERO);
        response
            .headers
            .push(("X-Envoy-Upstream-Service-Time".into(), "3".into()));
        assert_eq!(response.header("x-envoy-upstream-service-time"), Some("3"));
        assert_eq!(response.header("server"), None);
    }

    #[test]
    fn test_request_display_mentions_resolve_override() {
        let request = ProbeRequest::new("https://api.example.com/ping").with_resolve(
            "api.example.com",
            443,
            "10.1.2.3".parse().unwrap(),
        );
        assert_eq!(
            request.to_string(),
            "GET https://api.example.com/ping from local (resolve api.example.com:443 -> 10.1.2.3)"
        );
    }

    #[tokio::test]
    async fn test_router_dispatches_by_source() {
        let router = ProbeRouter::new(Arc::new(Fixed(200)), Some(Arc::new(Fixed(404))));

        let local = router.probe(&ProbeRequest::new("http://a")).await.unwrap();
        assert_eq!(local.status, ProbeStatus::Http(200));

        let remote = router
            .probe(&ProbeRequest::new("http://a").from_source(pod_source()))
            .await
            .unwrap();
        assert_eq!(remote.status, ProbeStatus::Http(404));
    }

    #[tokio::test]
    async fn test_router_without_remote_rejects_pod_source() {
        let router = ProbeRouter::new(Arc::new(Fixed(200)), None);
        let err = router
            .probe(&ProbeRequest::new("http://a").from_source(pod_source()))
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Unsupported(_)));
    }
}

//! reqwest-backed probe and proxy admin client.

use crate::probe::{HttpProbe, ProbeError, ProbeRequest, ProbeResponse, ProbeSource, ProbeStatus};
use crate::proxy::{AdminError, ProxyAdmin, ProxyTarget};
use async_trait::async_trait;
use reqwest::redirect::Policy;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// [`HttpProbe`] issuing requests from the verifying process.
///
/// A client is built per request so that the resolve override and timeout
/// apply to that request only. Redirects are not followed: a 3xx is what
/// the route returned.
#[derive(Debug, Clone, Default)]
pub struct ReqwestProbe;

impl ReqwestProbe {
    pub fn new() -> Self {
        Self
    }

    fn client_for(request: &ProbeRequest) -> Result<reqwest::Client, ProbeError> {
        let mut builder = reqwest::Client::builder()
            .timeout(request.timeout)
            .redirect(Policy::none());
        if let Some(resolve) = &request.resolve {
            // reqwest takes the port from the URL; only the address matters here.
            builder = builder.resolve(&resolve.host, SocketAddr::new(resolve.address, resolve.port));
        }
        builder
            .build()
            .map_err(|e| ProbeError::InvalidRequest(format!("failed to build HTTP client: {}", e)))
    }
}

#[async_trait]
impl HttpProbe for ReqwestProbe {
    async fn probe(&self, request: &ProbeRequest) -> Result<ProbeResponse, ProbeError> {
        if request.source != ProbeSource::Local {
            return Err(ProbeError::Unsupported(format!(
                "local probe cannot run from {}",
                request.source
            )));
        }

        let client = Self::client_for(request)?;
        let mut builder = client.get(&request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let start = Instant::now();
        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) if e.is_builder() => {
                return Err(ProbeError::InvalidRequest(e.to_string()));
            }
            Err(e) => {
                let duration = start.elapsed();
                debug!(target: "verify.http", request = %request, error = %e, "Connection failed");
                return Ok(ProbeResponse::new(
                    ProbeStatus::ConnectionFailed(e.to_string()),
                    duration,
                ));
            }
        };

        let status = ProbeStatus::Http(response.status().as_u16());
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        // Include body transfer in the measured duration. The status line
        // already arrived, so a broken body does not change the verdict.
        if let Err(e) = response.bytes().await {
            debug!(target: "verify.http", request = %request, error = %e, "Body read failed");
        }
        let duration = start.elapsed();

        debug!(
            target: "verify.http",
            request = %request,
            status = %status,
            duration_ms = duration.as_millis() as u64,
            "Probe finished"
        );
        Ok(ProbeResponse {
            status,
            headers,
            duration,
        })
    }
}

/// [`ProxyAdmin`] against an admin endpoint reachable from this process,
/// typically a `kubectl port-forward` to one sidecar.
#[derive(Debug, Clone)]
pub struct HttpProxyAdmin {
    base_url: String,
    client: reqwest::Client,
}

impl HttpProxyAdmin {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, AdminError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AdminError::Unreachable(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl ProxyAdmin for HttpProxyAdmin {
    async fn config_dump(&self, target: &ProxyTarget) -> Result<serde_json::Value, AdminError> {
        let url = format!("{}/config_dump", self.base_url);
        debug!(target: "verify.proxy", proxy = %target, url = %url, "Fetching config dump");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| AdminError::Unreachable(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(AdminError::Unreachable(format!("admin endpoint returned {}", status)));
        }
        if !status.is_success() {
            return Err(AdminError::Malformed(format!("admin endpoint returned {}", status)));
        }

        response
            .json()
            .await
            .map_err(|e| AdminError::Malformed(format!("config dump is not JSON: {}", e)))
    }
}

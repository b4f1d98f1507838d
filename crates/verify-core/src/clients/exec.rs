//! In-pod probes and proxy config dumps through `kubectl exec`.
//!
//! Requests issued from inside a pod carry that pod's mesh identity, which
//! is what mTLS and authorization policies are evaluated against. curl is
//! run inside the container with argument vectors; its status and total
//! time come from a `--write-out` trailer on the last line of stdout.

use super::kubectl::{CommandOutput, KubectlRunner};
use crate::cluster::ClusterError;
use crate::probe::{HttpProbe, ProbeError, ProbeRequest, ProbeResponse, ProbeSource, ProbeStatus};
use crate::proxy::{AdminError, ProxyAdmin, ProxyTarget};
use async_trait::async_trait;
use regex::Regex;
use std::net::IpAddr;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::debug;

/// Appended to stdout by curl after the response headers.
const WRITE_OUT: &str = "\n%{http_code} %{time_total}";

/// kubectl messages meaning the exec channel itself failed.
const EXEC_FAILURE_MARKERS: [&str; 4] = [
    "Error from server",
    "unable to upgrade connection",
    "container not found",
    "does not have a host assigned",
];

#[allow(clippy::expect_used)]
fn trailer_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(\d{3}) (\d+(?:\.\d+)?)\s*$").expect("invalid regex"))
}

/// Parse curl's `-D -` header dump followed by the write-out trailer.
pub fn parse_curl_output(stdout: &str) -> Option<(ProbeStatus, Duration, Vec<(String, String)>)> {
    let captures = trailer_pattern().captures(stdout)?;
    let code: u16 = captures.get(1)?.as_str().parse().ok()?;
    let seconds: f64 = captures.get(2)?.as_str().parse().ok()?;
    let duration = Duration::try_from_secs_f64(seconds).ok()?;

    let headers = stdout
        .lines()
        .filter_map(|line| line.split_once(':'))
        .filter(|(name, _)| !name.is_empty() && !name.contains(' '))
        .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
        .collect();

    let status = if code == 0 {
        ProbeStatus::ConnectionFailed("no response".to_string())
    } else {
        ProbeStatus::Http(code)
    };
    Some((status, duration, headers))
}

fn resolve_arg(host: &str, port: u16, address: IpAddr) -> String {
    match address {
        IpAddr::V4(v4) => format!("{}:{}:{}", host, port, v4),
        IpAddr::V6(v6) => format!("{}:{}:[{}]", host, port, v6),
    }
}

fn exec_args(namespace: &str, pod: &str, container: Option<&str>) -> Vec<String> {
    let mut args = vec![
        "exec".to_string(),
        "-n".to_string(),
        namespace.to_string(),
        pod.to_string(),
    ];
    if let Some(container) = container {
        args.push("-c".to_string());
        args.push(container.to_string());
    }
    args.push("--".to_string());
    args
}

fn exec_channel_failed(output: &CommandOutput) -> bool {
    !output.success
        && EXEC_FAILURE_MARKERS
            .iter()
            .any(|marker| output.stderr.contains(marker))
}

/// [`HttpProbe`] that runs curl inside the request's source pod.
#[derive(Debug, Clone)]
pub struct ExecProbe {
    runner: KubectlRunner,
}

impl ExecProbe {
    pub fn new(runner: KubectlRunner) -> Self {
        Self { runner }
    }

    fn curl_args(request: &ProbeRequest) -> Vec<String> {
        let mut args = vec![
            "curl".to_string(),
            "-sS".to_string(),
            "-o".to_string(),
            "/dev/null".to_string(),
            "-D".to_string(),
            "-".to_string(),
            "--max-time".to_string(),
            format!("{:.3}", request.timeout.as_secs_f64()),
            "-w".to_string(),
            WRITE_OUT.to_string(),
        ];
        if let Some(resolve) = &request.resolve {
            args.push("--resolve".to_string());
            args.push(resolve_arg(&resolve.host, resolve.port, resolve.address));
        }
        for (name, value) in &request.headers {
            args.push("-H".to_string());
            args.push(format!("{}: {}", name, value));
        }
        args.push(request.url.clone());
        args
    }
}

#[async_trait]
impl HttpProbe for ExecProbe {
    async fn probe(&self, request: &ProbeRequest) -> Result<ProbeResponse, ProbeError> {
        let ProbeSource::Pod {
            namespace,
            pod,
            container,
        } = &request.source
        else {
            return Err(ProbeError::Unsupported(
                "exec probes need a pod source".to_string(),
            ));
        };

        let mut args = exec_args(namespace, pod, container.as_deref());
        args.extend(Self::curl_args(request));

        let output = self.runner.run(&args, None).await.map_err(|e| match e {
            ClusterError::Unavailable(reason) => ProbeError::SourceUnavailable(reason),
            other => ProbeError::Unsupported(other.to_string()),
        })?;

        if exec_channel_failed(&output) {
            return Err(ProbeError::SourceUnavailable(output.stderr));
        }

        match parse_curl_output(&output.stdout) {
            Some((status, duration, headers)) => {
                // curl reports its own failure reason on stderr with -sS.
                let status = match status {
                    ProbeStatus::ConnectionFailed(_) if !output.stderr.is_empty() => {
                        ProbeStatus::ConnectionFailed(output.stderr)
                    }
                    status => status,
                };
                debug!(target: "verify.http", request = %request, status = %status, "Exec probe finished");
                Ok(ProbeResponse {
                    status,
                    headers,
                    duration,
                })
            }
            None if !output.success => Ok(ProbeResponse::new(
                ProbeStatus::ConnectionFailed(output.stderr),
                Duration::ZERO,
            )),
            None => Err(ProbeError::Malformed(format!(
                "no status trailer in curl output: {}",
                output.stdout.trim()
            ))),
        }
    }
}

/// [`ProxyAdmin`] that fetches the dump from inside the sidecar container.
#[derive(Debug, Clone)]
pub struct ExecProxyAdmin {
    runner: KubectlRunner,
    container: String,
    port: u16,
}

impl ExecProxyAdmin {
    pub fn new(runner: KubectlRunner, container: impl Into<String>, port: u16) -> Self {
        Self {
            runner,
            container: container.into(),
            port,
        }
    }
}

#[async_trait]
impl ProxyAdmin for ExecProxyAdmin {
    async fn config_dump(&self, target: &ProxyTarget) -> Result<serde_json::Value, AdminError> {
        let mut args = exec_args(&target.namespace, &target.pod, Some(&self.container));
        args.extend([
            "curl".to_string(),
            "-s".to_string(),
            "-f".to_string(),
            format!("http://localhost:{}/config_dump", self.port),
        ]);

        let output = self
            .runner
            .run(&args, None)
            .await
            .map_err(|e| AdminError::Unreachable(e.to_string()))?;

        if !output.success {
            return Err(AdminError::Unreachable(if output.stderr.is_empty() {
                format!("admin endpoint on {} answered with an error", target)
            } else {
                output.stderr
            }));
        }

        serde_json::from_str(&output.stdout)
            .map_err(|e| AdminError::Malformed(format!("config dump from {} is not JSON: {}", target, e)))
    }
}

//! Verifier configuration.
//!
//! Configuration is loaded from environment variables. Everything except the
//! suite location has a default; the suite path may also be given as the
//! first command-line argument.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use verify_core::lifecycle::LifecycleConfig;
use verify_core::orchestrator::OrchestratorConfig;
use verify_core::poller::Backoff;

/// Default bound on every kubectl invocation, in seconds.
pub const DEFAULT_COMMAND_TIMEOUT_SECONDS: u64 = 30;

/// Default wait for a residual scope to disappear, in seconds.
pub const DEFAULT_SCOPE_DELETE_TIMEOUT_SECONDS: u64 = 180;

pub const DEFAULT_SCOPE_DELETE_INTERVAL_SECONDS: u64 = 2;

/// Default gap between workload readiness polls, in seconds.
pub const DEFAULT_READY_INTERVAL_SECONDS: u64 = 2;

/// Default readiness wait applied to workloads, in seconds.
pub const DEFAULT_READY_TIMEOUT_SECONDS: u64 = 120;

/// Envoy admin port inside sidecar-injected pods.
pub const DEFAULT_PROXY_ADMIN_PORT: u16 = 15000;

pub const DEFAULT_PROXY_CONTAINER: &str = "istio-proxy";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Which DNS provider backs the DNS checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DnsProviderKind {
    Route53,
    /// DNS checks fail as setup errors.
    None,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Suite file, unless given on the command line.
    pub suite_path: Option<PathBuf>,

    pub log_format: LogFormat,

    /// kubectl binary (default: "kubectl").
    pub kubectl: String,

    /// `--context` passed to every kubectl call.
    pub kube_context: Option<String>,

    pub command_timeout_seconds: u64,

    pub scope_delete_timeout_seconds: u64,

    pub scope_delete_interval_seconds: u64,

    /// When set, delete waits back off exponentially from
    /// `scope_delete_interval_seconds` up to this many seconds.
    pub scope_delete_max_interval_seconds: Option<u64>,

    pub ready_interval_seconds: u64,

    /// Readiness wait for workloads that do not set their own.
    pub ready_timeout_seconds: u64,

    /// Leave scopes in place after each case for debugging.
    pub skip_cleanup: bool,

    /// Run cases concurrently.
    pub parallel: bool,

    /// Forwarded admin endpoint. When unset, config dumps are fetched by
    /// exec into the proxy container.
    pub proxy_admin_url: Option<String>,

    pub proxy_admin_port: u16,

    pub proxy_container: String,

    pub dns_provider: DnsProviderKind,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid number: {0}")]
    InvalidNumber(String),

    #[error("Invalid boolean: {0}")]
    InvalidBool(String),

    #[error("Invalid value: {0}")]
    InvalidChoice(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let suite_path = non_empty(vars, "VERIFY_SUITE_PATH").map(PathBuf::from);

        let log_format = match non_empty(vars, "VERIFY_LOG_FORMAT").as_deref() {
            None | Some("pretty") => LogFormat::Pretty,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::InvalidChoice(format!(
                    "VERIFY_LOG_FORMAT must be 'pretty' or 'json', got '{}'",
                    other
                )))
            }
        };

        let dns_provider = match non_empty(vars, "VERIFY_DNS_PROVIDER").as_deref() {
            None | Some("route53") => DnsProviderKind::Route53,
            Some("none") => DnsProviderKind::None,
            Some(other) => {
                return Err(ConfigError::InvalidChoice(format!(
                    "VERIFY_DNS_PROVIDER must be 'route53' or 'none', got '{}'",
                    other
                )))
            }
        };

        let proxy_admin_port = match vars.get("VERIFY_PROXY_ADMIN_PORT") {
            Some(value_str) => {
                let value: u16 = value_str.parse().map_err(|e| {
                    ConfigError::InvalidNumber(format!(
                        "VERIFY_PROXY_ADMIN_PORT must be a valid port, got '{}': {}",
                        value_str, e
                    ))
                })?;
                if value == 0 {
                    return Err(ConfigError::InvalidNumber(
                        "VERIFY_PROXY_ADMIN_PORT must be greater than 0".to_string(),
                    ));
                }
                value
            }
            None => DEFAULT_PROXY_ADMIN_PORT,
        };

        Ok(Config {
            suite_path,
            log_format,
            kubectl: non_empty(vars, "VERIFY_KUBECTL").unwrap_or_else(|| "kubectl".to_string()),
            kube_context: non_empty(vars, "VERIFY_KUBE_CONTEXT"),
            command_timeout_seconds: seconds(
                vars,
                "VERIFY_COMMAND_TIMEOUT_SECONDS",
                DEFAULT_COMMAND_TIMEOUT_SECONDS,
            )?,
            scope_delete_timeout_seconds: seconds(
                vars,
                "VERIFY_SCOPE_DELETE_TIMEOUT_SECONDS",
                DEFAULT_SCOPE_DELETE_TIMEOUT_SECONDS,
            )?,
            scope_delete_interval_seconds: seconds(
                vars,
                "VERIFY_SCOPE_DELETE_INTERVAL_SECONDS",
                DEFAULT_SCOPE_DELETE_INTERVAL_SECONDS,
            )?,
            scope_delete_max_interval_seconds: optional_seconds(
                vars,
                "VERIFY_SCOPE_DELETE_MAX_INTERVAL_SECONDS",
            )?,
            ready_interval_seconds: seconds(
                vars,
                "VERIFY_READY_INTERVAL_SECONDS",
                DEFAULT_READY_INTERVAL_SECONDS,
            )?,
            ready_timeout_seconds: seconds(
                vars,
                "VERIFY_READY_TIMEOUT_SECONDS",
                DEFAULT_READY_TIMEOUT_SECONDS,
            )?,
            skip_cleanup: flag(vars, "VERIFY_SKIP_CLEANUP")?,
            parallel: flag(vars, "VERIFY_PARALLEL")?,
            proxy_admin_url: non_empty(vars, "VERIFY_PROXY_ADMIN_URL"),
            proxy_admin_port,
            proxy_container: non_empty(vars, "VERIFY_PROXY_CONTAINER")
                .unwrap_or_else(|| DEFAULT_PROXY_CONTAINER.to_string()),
            dns_provider,
        })
    }

    /// The suite to run: the command-line argument wins over the environment.
    pub fn resolve_suite_path(&self, arg: Option<String>) -> Result<PathBuf, ConfigError> {
        arg.map(PathBuf::from)
            .or_else(|| self.suite_path.clone())
            .ok_or_else(|| ConfigError::MissingEnvVar("VERIFY_SUITE_PATH".to_string()))
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_seconds)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_seconds)
    }

    /// Pacing of scope and record deletion waits.
    pub fn delete_backoff(&self) -> Backoff {
        let min = Duration::from_secs(self.scope_delete_interval_seconds);
        match self.scope_delete_max_interval_seconds {
            Some(max) => Backoff::exponential(min, Duration::from_secs(max)),
            None => Backoff::Fixed(min),
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            lifecycle: LifecycleConfig {
                delete_timeout: Duration::from_secs(self.scope_delete_timeout_seconds),
                delete_backoff: self.delete_backoff(),
                ready_interval: Duration::from_secs(self.ready_interval_seconds),
                cleanup_enabled: !self.skip_cleanup,
            },
            parallel: self.parallel,
        }
    }
}

fn non_empty(vars: &HashMap<String, String>, name: &str) -> Option<String> {
    vars.get(name)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Positive number of seconds, or `default` when unset.
fn seconds(vars: &HashMap<String, String>, name: &str, default: u64) -> Result<u64, ConfigError> {
    let Some(value_str) = vars.get(name) else {
        return Ok(default);
    };
    let value: u64 = value_str.trim().parse().map_err(|e| {
        ConfigError::InvalidNumber(format!(
            "{} must be a valid positive integer, got '{}': {}",
            name, value_str, e
        ))
    })?;
    if value == 0 {
        return Err(ConfigError::InvalidNumber(format!(
            "{} must be greater than 0",
            name
        )));
    }
    Ok(value)
}

fn optional_seconds(
    vars: &HashMap<String, String>,
    name: &str,
) -> Result<Option<u64>, ConfigError> {
    match non_empty(vars, name) {
        Some(_) => seconds(vars, name, 0).map(Some),
        None => Ok(None),
    }
}

fn flag(vars: &HashMap<String, String>, name: &str) -> Result<bool, ConfigError> {
    match non_empty(vars, name).map(|v| v.to_ascii_lowercase()).as_deref() {
        None | Some("false") | Some("0") | Some("no") => Ok(false),
        Some("true") | Some("1") | Some("yes") => Ok(true),
        Some(other) => Err(ConfigError::InvalidBool(format!(
            "{} must be true or false, got '{}'",
            name, other
        ))),
    }
}

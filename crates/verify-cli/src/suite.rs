//! Suite file loading.
//!
//! A suite is a JSON document `{ "cases": [...] }`. Manifests are referenced
//! by path, relative to the suite file, and passed to the cluster verbatim.

use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use verify_core::convergence::{outbound_cluster_name, ConfigExpectation, HttpExpectation};
use verify_core::dns::RecordId;
use verify_core::lifecycle::{ResourceKind, ResourceSpec, ScopeSpec};
use verify_core::orchestrator::{Check, CheckKind, TestCase};
use verify_core::poller::{Backoff, PollSpec};
use verify_core::probe::{ProbeRequest, ProbeSource};
use verify_core::proxy::ProxyTarget;
use verify_core::timing::{RetryPolicy, TimingExpectation};

/// Default total wait for a convergence check, in seconds.
const DEFAULT_WAIT_TIMEOUT_SECONDS: u64 = 60;

/// Default interval between convergence observations, in seconds.
const DEFAULT_WAIT_INTERVAL_SECONDS: u64 = 2;

const DEFAULT_TRANSPORT_SOCKET: &str = "tls";

#[derive(Debug, Error)]
pub enum SuiteError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Case '{case}': {reason}")]
    Invalid { case: String, reason: String },

    #[error("Suite {0} contains no cases")]
    Empty(PathBuf),
}

/// Values applied where a suite leaves them out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuiteDefaults {
    /// Readiness wait for workloads without `ready_timeout_seconds`.
    pub ready_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct SuiteFile {
    cases: Vec<CaseDef>,
}

#[derive(Debug, Deserialize)]
struct CaseDef {
    name: String,
    scope: ScopeDef,
    #[serde(default)]
    resources: Vec<ResourceDef>,
    #[serde(default)]
    before_deploy: Vec<CheckDef>,
    #[serde(default)]
    checks: Vec<CheckDef>,
    #[serde(default)]
    after_teardown: Vec<CheckDef>,
}

#[derive(Debug, Deserialize)]
struct ScopeDef {
    name: String,
    #[serde(default)]
    labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
enum ResourceKindDef {
    Workload,
    NetworkConfig,
}

#[derive(Debug, Deserialize)]
struct ResourceDef {
    kind: ResourceKindDef,
    api_kind: String,
    name: String,
    manifest_path: PathBuf,
    /// `0` disables the readiness wait.
    ready_timeout_seconds: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct CheckDef {
    name: String,
    #[serde(default)]
    advisory: bool,
    #[serde(flatten)]
    kind: CheckKindDef,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum CheckKindDef {
    DnsCleanSlate {
        record: RecordDef,
        #[serde(default)]
        wait: WaitDef,
    },
    DnsCreated {
        record: RecordDef,
        #[serde(default)]
        wait: WaitDef,
        #[serde(default)]
        adopt: bool,
    },
    DnsDeleted {
        record: RecordDef,
        #[serde(default)]
        wait: WaitDef,
        #[serde(default = "default_true")]
        final_delete: bool,
    },
    ProxyConfig {
        namespace: String,
        pod: String,
        /// Outbound cluster that must carry a transport socket.
        cluster: Option<ClusterRef>,
        transport_socket: Option<String>,
        /// Plain substring anywhere in the dump.
        contains: Option<String>,
        #[serde(default)]
        wait: WaitDef,
    },
    HttpStatus {
        request: RequestDef,
        expect_status: Option<u16>,
        #[serde(default)]
        expect_blocked: bool,
        #[serde(default)]
        expect_headers: BTreeMap<String, String>,
        #[serde(default)]
        wait: WaitDef,
    },
    RetryTiming {
        request: RequestDef,
        expected_status: u16,
        attempts: u32,
        interval_millis: u64,
        tolerance_millis: u64,
    },
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct RecordDef {
    zone_id: String,
    name: String,
    record_type: String,
}

#[derive(Debug, Deserialize)]
struct ClusterRef {
    port: u16,
    service: String,
    namespace: String,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct WaitDef {
    timeout_seconds: u64,
    interval_seconds: Option<u64>,
    interval_millis: Option<u64>,
    /// Replaces the fixed interval.
    backoff: Option<BackoffDef>,
}

impl Default for WaitDef {
    fn default() -> Self {
        Self {
            timeout_seconds: DEFAULT_WAIT_TIMEOUT_SECONDS,
            interval_seconds: None,
            interval_millis: None,
            backoff: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum BackoffDef {
    /// `{"exponential": {"min_seconds": 2, "max_seconds": 10}}`
    Exponential {
        min_seconds: Option<u64>,
        min_millis: Option<u64>,
        max_seconds: u64,
    },
}

#[derive(Debug, Deserialize)]
struct RequestDef {
    url: String,
    resolve: Option<ResolveDef>,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    timeout_seconds: Option<u64>,
    timeout_millis: Option<u64>,
    source: Option<SourceDef>,
}

#[derive(Debug, Deserialize)]
struct ResolveDef {
    host: String,
    port: u16,
    address: IpAddr,
}

#[derive(Debug, Deserialize)]
struct SourceDef {
    namespace: String,
    pod: String,
    container: Option<String>,
}

/// Read and convert the suite at `path`.
pub fn load(path: &Path, defaults: &SuiteDefaults) -> Result<Vec<TestCase>, SuiteError> {
    let text = std::fs::read_to_string(path).map_err(|source| SuiteError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    parse(&text, path, base_dir, defaults)
}

/// Convert suite JSON; `origin` names the document in errors and manifest
/// paths are resolved against `base_dir`.
pub fn parse(
    text: &str,
    origin: &Path,
    base_dir: &Path,
    defaults: &SuiteDefaults,
) -> Result<Vec<TestCase>, SuiteError> {
    let suite: SuiteFile = serde_json::from_str(text).map_err(|source| SuiteError::Parse {
        path: origin.to_path_buf(),
        source,
    })?;
    if suite.cases.is_empty() {
        return Err(SuiteError::Empty(origin.to_path_buf()));
    }

    let mut names = HashSet::new();
    let mut cases = Vec::with_capacity(suite.cases.len());
    for def in suite.cases {
        if !names.insert(def.name.clone()) {
            return Err(invalid(&def.name, "duplicate case name"));
        }
        cases.push(convert_case(def, base_dir, defaults)?);
    }
    Ok(cases)
}

fn invalid(case: &str, reason: impl Into<String>) -> SuiteError {
    SuiteError::Invalid {
        case: case.to_string(),
        reason: reason.into(),
    }
}

fn convert_case(
    def: CaseDef,
    base_dir: &Path,
    defaults: &SuiteDefaults,
) -> Result<TestCase, SuiteError> {
    let mut scope = ScopeSpec::new(def.scope.name);
    for (key, value) in def.scope.labels {
        scope = scope.with_label(key, value);
    }

    let mut case = TestCase::new(&def.name, scope);
    for resource in def.resources {
        case.resources
            .push(convert_resource(&def.name, resource, base_dir, defaults)?);
    }
    case.before_deploy = convert_checks(&def.name, def.before_deploy)?;
    case.checks = convert_checks(&def.name, def.checks)?;
    case.after_teardown = convert_checks(&def.name, def.after_teardown)?;
    Ok(case)
}

fn convert_resource(
    case: &str,
    def: ResourceDef,
    base_dir: &Path,
    defaults: &SuiteDefaults,
) -> Result<ResourceSpec, SuiteError> {
    let path = base_dir.join(&def.manifest_path);
    let manifest = std::fs::read_to_string(&path).map_err(|e| {
        invalid(
            case,
            format!("manifest {} for {} unreadable: {}", path.display(), def.name, e),
        )
    })?;

    let (kind, default_wait) = match def.kind {
        ResourceKindDef::Workload => (ResourceKind::Workload, Some(defaults.ready_timeout)),
        ResourceKindDef::NetworkConfig => (ResourceKind::NetworkConfig, None),
    };
    let ready_timeout = match def.ready_timeout_seconds {
        Some(0) => None,
        Some(seconds) => Some(Duration::from_secs(seconds)),
        None => default_wait,
    };

    Ok(ResourceSpec {
        kind,
        api_kind: def.api_kind,
        name: def.name,
        manifest,
        ready_timeout,
    })
}

fn convert_checks(case: &str, defs: Vec<CheckDef>) -> Result<Vec<Check>, SuiteError> {
    defs.into_iter()
        .map(|def| {
            let kind = convert_check_kind(case, &def.name, def.kind)?;
            let check = Check::new(def.name, kind);
            Ok(if def.advisory { check.advisory() } else { check })
        })
        .collect()
}

fn convert_check_kind(case: &str, check: &str, def: CheckKindDef) -> Result<CheckKind, SuiteError> {
    let kind = match def {
        CheckKindDef::DnsCleanSlate { record, wait } => CheckKind::DnsCleanSlate {
            record: record_id(record),
            wait: poll_spec(case, check, &wait)?,
        },
        CheckKindDef::DnsCreated {
            record,
            wait,
            adopt,
        } => CheckKind::DnsCreated {
            record: record_id(record),
            wait: poll_spec(case, check, &wait)?,
            adopt,
        },
        CheckKindDef::DnsDeleted {
            record,
            wait,
            final_delete,
        } => CheckKind::DnsDeleted {
            record: record_id(record),
            wait: poll_spec(case, check, &wait)?,
            final_delete,
        },
        CheckKindDef::ProxyConfig {
            namespace,
            pod,
            cluster,
            transport_socket,
            contains,
            wait,
        } => {
            let expectation = match (cluster, contains) {
                (Some(cluster), None) => ConfigExpectation::TransportSocket {
                    cluster: outbound_cluster_name(cluster.port, &cluster.service, &cluster.namespace),
                    keyword: transport_socket
                        .unwrap_or_else(|| DEFAULT_TRANSPORT_SOCKET.to_string()),
                },
                (None, Some(needle)) => ConfigExpectation::Substring(needle),
                _ => {
                    return Err(invalid(
                        case,
                        format!("check '{}' needs exactly one of 'cluster' or 'contains'", check),
                    ))
                }
            };
            CheckKind::ProxyConfig {
                target: ProxyTarget::new(namespace, pod),
                expectation,
                wait: poll_spec(case, check, &wait)?,
            }
        }
        CheckKindDef::HttpStatus {
            request,
            expect_status,
            expect_blocked,
            expect_headers,
            wait,
        } => {
            let mut expectation = match (expect_blocked, expect_status) {
                (true, None) => HttpExpectation::blocked(),
                (false, Some(code)) => HttpExpectation::status(code),
                _ => {
                    return Err(invalid(
                        case,
                        format!(
                            "check '{}' needs exactly one of 'expect_status' or 'expect_blocked'",
                            check
                        ),
                    ))
                }
            };
            for (name, value) in expect_headers {
                expectation = expectation.with_header(name, value);
            }
            CheckKind::HttpStatus {
                request: probe_request(request),
                expectation,
                wait: poll_spec(case, check, &wait)?,
            }
        }
        CheckKindDef::RetryTiming {
            request,
            expected_status,
            attempts,
            interval_millis,
            tolerance_millis,
        } => {
            let policy = RetryPolicy {
                attempts,
                interval: Duration::from_millis(interval_millis),
                tolerance: Duration::from_millis(tolerance_millis),
            };
            TimingExpectation::from_policy(&policy)
                .map_err(|e| invalid(case, format!("check '{}': {}", check, e)))?;
            CheckKind::RetryTiming {
                request: probe_request(request),
                expected_status,
                policy,
            }
        }
    };
    Ok(kind)
}

fn record_id(def: RecordDef) -> RecordId {
    RecordId::new(def.zone_id, def.name, def.record_type.to_ascii_uppercase())
}

fn poll_spec(case: &str, check: &str, wait: &WaitDef) -> Result<PollSpec, SuiteError> {
    let backoff = match (&wait.backoff, wait.interval_millis, wait.interval_seconds) {
        (None, Some(millis), _) => Backoff::Fixed(Duration::from_millis(millis)),
        (None, None, Some(seconds)) => Backoff::Fixed(Duration::from_secs(seconds)),
        (None, None, None) => Backoff::Fixed(Duration::from_secs(DEFAULT_WAIT_INTERVAL_SECONDS)),
        (
            Some(BackoffDef::Exponential {
                min_seconds,
                min_millis,
                max_seconds,
            }),
            None,
            None,
        ) => {
            let min = match (min_millis, min_seconds) {
                (Some(millis), _) => Duration::from_millis(*millis),
                (None, Some(seconds)) => Duration::from_secs(*seconds),
                (None, None) => Duration::from_secs(DEFAULT_WAIT_INTERVAL_SECONDS),
            };
            let max = Duration::from_secs(*max_seconds);
            if max < min {
                return Err(invalid(
                    case,
                    format!("check '{}': backoff max is below its min", check),
                ));
            }
            Backoff::exponential(min, max)
        }
        (Some(_), _, _) => {
            return Err(invalid(
                case,
                format!("check '{}': 'backoff' replaces the wait interval, set only one", check),
            ))
        }
    };

    if backoff.delay(0).is_zero() {
        return Err(invalid(
            case,
            format!("check '{}': wait interval must be greater than zero", check),
        ));
    }

    Ok(PollSpec::new(
        check,
        backoff,
        Duration::from_secs(wait.timeout_seconds),
    ))
}

fn probe_request(def: RequestDef) -> ProbeRequest {
    let mut request = ProbeRequest::new(def.url);
    if let Some(resolve) = def.resolve {
        request = request.with_resolve(resolve.host, resolve.port, resolve.address);
    }
    for (name, value) in def.headers {
        request = request.with_header(name, value);
    }
    let timeout = match (def.timeout_millis, def.timeout_seconds) {
        (Some(millis), _) => Some(Duration::from_millis(millis)),
        (None, Some(seconds)) => Some(Duration::from_secs(seconds)),
        (None, None) => None,
    };
    if let Some(timeout) = timeout {
        request = request.with_timeout(timeout);
    }
    if let Some(source) = def.source {
        request = request.from_source(ProbeSource::Pod {
            namespace: source.namespace,
            pod: source.pod,
            container: source.container,
        });
    }
    request
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing, clippy::panic)]
mod tests {
    use super::*;
    use verify_core::convergence::ExpectedStatus;

    fn defaults() -> SuiteDefaults {
        SuiteDefaults {
            ready_timeout: Duration::from_secs(120),
        }
    }

    fn parse_str(text: &str) -> Result<Vec<TestCase>, SuiteError> {
        parse(text, Path::new("suite.json"), Path::new("."), &defaults())
    }

    #[test]
    fn test_empty_suite_rejected() {
        let result = parse_str(r#"{ "cases": [] }"#);
        assert!(matches!(result, Err(SuiteError::Empty(_))));
    }

    #[test]
    fn test_invalid_json_rejected() {
        let result = parse_str(r#"{ "cases": [ { "name": "x" } ] }"#);
        assert!(matches!(result, Err(SuiteError::Parse { .. })));
    }

    #[test]
    fn test_duplicate_case_names_rejected() {
        let result = parse_str(
            r#"{ "cases": [
                { "name": "dup", "scope": { "name": "a" } },
                { "name": "dup", "scope": { "name": "b" } }
            ] }"#,
        );
        assert!(matches!(result, Err(SuiteError::Invalid { case, .. }) if case == "dup"));
    }

    #[test]
    fn test_checks_converted() {
        let cases = parse_str(
            r#"{ "cases": [ {
                "name": "mtls",
                "scope": { "name": "mesh-test", "labels": { "istio-injection": "enabled" } },
                "before_deploy": [
                    { "name": "clean", "type": "dns_clean_slate",
                      "record": { "zone_id": "Z1", "name": "app.example.com", "record_type": "a" } }
                ],
                "checks": [
                    { "name": "tls socket", "type": "proxy_config",
                      "namespace": "mesh-test", "pod": "sleep-0",
                      "cluster": { "port": 80, "service": "httpbin", "namespace": "mesh-test" },
                      "wait": { "timeout_seconds": 30, "interval_seconds": 1 } },
                    { "name": "plaintext blocked", "type": "http_status", "advisory": true,
                      "request": { "url": "http://httpbin.mesh-test/",
                                   "source": { "namespace": "legacy", "pod": "sleep-0" } },
                      "expect_blocked": true },
                    { "name": "canary", "type": "http_status",
                      "request": { "url": "http://app.example.com/",
                                   "resolve": { "host": "app.example.com", "port": 80, "address": "10.0.0.10" },
                                   "headers": { "x-canary": "true" },
                                   "timeout_millis": 2500 },
                      "expect_status": 200, "expect_headers": { "x-version": "v2" } },
                    { "name": "retries", "type": "retry_timing",
                      "request": { "url": "http://httpbin.mesh-test/status/503" },
                      "expected_status": 503, "attempts": 3,
                      "interval_millis": 2000, "tolerance_millis": 3000 }
                ],
                "after_teardown": [
                    { "name": "gone", "type": "dns_deleted",
                      "record": { "zone_id": "Z1", "name": "app.example.com", "record_type": "A" } }
                ]
            } ] }"#,
        )
        .unwrap();

        let case = &cases[0];
        assert_eq!(case.scope.labels, vec![("istio-injection".to_string(), "enabled".to_string())]);

        match &case.before_deploy[0].kind {
            CheckKind::DnsCleanSlate { record, wait } => {
                assert_eq!(record.record_type, "A");
                assert_eq!(wait.timeout, Duration::from_secs(DEFAULT_WAIT_TIMEOUT_SECONDS));
            }
            other => panic!("unexpected check {:?}", other),
        }

        match &case.checks[0].kind {
            CheckKind::ProxyConfig {
                expectation, wait, ..
            } => {
                assert_eq!(
                    expectation,
                    &ConfigExpectation::TransportSocket {
                        cluster: "outbound|80||httpbin.mesh-test.svc.cluster.local".to_string(),
                        keyword: "tls".to_string(),
                    }
                );
                assert_eq!(wait.timeout, Duration::from_secs(30));
            }
            other => panic!("unexpected check {:?}", other),
        }

        assert!(case.checks[1].advisory);
        match &case.checks[1].kind {
            CheckKind::HttpStatus {
                request,
                expectation,
                ..
            } => {
                assert_eq!(expectation.status, ExpectedStatus::Blocked);
                assert!(matches!(request.source, ProbeSource::Pod { .. }));
            }
            other => panic!("unexpected check {:?}", other),
        }

        match &case.checks[2].kind {
            CheckKind::HttpStatus { request, .. } => {
                assert_eq!(request.timeout, Duration::from_millis(2500));
                assert_eq!(request.resolve.as_ref().unwrap().host, "app.example.com");
                assert_eq!(request.headers, vec![("x-canary".to_string(), "true".to_string())]);
            }
            other => panic!("unexpected check {:?}", other),
        }

        assert!(matches!(
            &case.checks[3].kind,
            CheckKind::RetryTiming { policy, .. } if policy.attempts == 3
        ));
        assert!(matches!(
            &case.after_teardown[0].kind,
            CheckKind::DnsDeleted { final_delete: true, .. }
        ));
    }

    #[test]
    fn test_ambiguous_http_expectation_rejected() {
        let result = parse_str(
            r#"{ "cases": [ { "name": "bad", "scope": { "name": "s" }, "checks": [
                { "name": "both", "type": "http_status",
                  "request": { "url": "http://x/" }, "expect_status": 200, "expect_blocked": true }
            ] } ] }"#,
        );
        assert!(matches!(result, Err(SuiteError::Invalid { .. })));
    }

    #[test]
    fn test_zero_attempt_retry_rejected() {
        let result = parse_str(
            r#"{ "cases": [ { "name": "bad", "scope": { "name": "s" }, "checks": [
                { "name": "retries", "type": "retry_timing", "request": { "url": "http://x/" },
                  "expected_status": 503, "attempts": 0, "interval_millis": 100, "tolerance_millis": 100 }
            ] } ] }"#,
        );
        assert!(matches!(result, Err(SuiteError::Invalid { .. })));
    }

    fn wait_of(wait: &str) -> Result<PollSpec, SuiteError> {
        let text = format!(
            r#"{{ "cases": [ {{ "name": "dns", "scope": {{ "name": "s" }}, "checks": [
                {{ "name": "created", "type": "dns_created",
                  "record": {{ "zone_id": "Z1", "name": "app.example.com", "record_type": "A" }},
                  "wait": {} }}
            ] }} ] }}"#,
            wait
        );
        let cases = parse_str(&text)?;
        match &cases[0].checks[0].kind {
            CheckKind::DnsCreated { wait, .. } => Ok(wait.clone()),
            other => panic!("unexpected check {:?}", other),
        }
    }

    #[test]
    fn test_exponential_backoff_from_suite() {
        let wait = wait_of(
            r#"{ "timeout_seconds": 120, "backoff": { "exponential": { "min_seconds": 2, "max_seconds": 10 } } }"#,
        )
        .unwrap();

        assert_eq!(
            wait.backoff,
            Backoff::exponential(Duration::from_secs(2), Duration::from_secs(10))
        );
        assert_eq!(wait.timeout, Duration::from_secs(120));
        let delays: Vec<u64> = (0..5).map(|n| wait.backoff.delay(n).as_secs()).collect();
        assert_eq!(delays, vec![2, 4, 8, 10, 10]);
    }

    #[test]
    fn test_fixed_interval_from_suite() {
        let wait = wait_of(r#"{ "interval_millis": 500 }"#).unwrap();
        assert_eq!(wait.backoff, Backoff::Fixed(Duration::from_millis(500)));
        assert_eq!(wait.timeout, Duration::from_secs(DEFAULT_WAIT_TIMEOUT_SECONDS));
    }

    #[test]
    fn test_zero_wait_interval_rejected() {
        for wait in [
            r#"{ "interval_seconds": 0 }"#,
            r#"{ "interval_millis": 0 }"#,
            r#"{ "backoff": { "exponential": { "min_millis": 0, "max_seconds": 5 } } }"#,
        ] {
            let result = wait_of(wait);
            assert!(
                matches!(&result, Err(SuiteError::Invalid { reason, .. }) if reason.contains("greater than zero")),
                "{} gave {:?}",
                wait,
                result
            );
        }
    }

    #[test]
    fn test_backoff_with_interval_rejected() {
        let result = wait_of(
            r#"{ "interval_seconds": 1, "backoff": { "exponential": { "min_seconds": 1, "max_seconds": 5 } } }"#,
        );
        assert!(matches!(result, Err(SuiteError::Invalid { .. })));
    }

    #[test]
    fn test_backoff_max_below_min_rejected() {
        let result = wait_of(
            r#"{ "backoff": { "exponential": { "min_seconds": 10, "max_seconds": 5 } } }"#,
        );
        assert!(matches!(result, Err(SuiteError::Invalid { .. })));
    }

    #[test]
    fn test_zero_tolerance_retry_rejected() {
        let result = parse_str(
            r#"{ "cases": [ { "name": "bad", "scope": { "name": "s" }, "checks": [
                { "name": "retries", "type": "retry_timing", "request": { "url": "http://x/" },
                  "expected_status": 503, "attempts": 3, "interval_millis": 100, "tolerance_millis": 0 }
            ] } ] }"#,
        );
        assert!(matches!(result, Err(SuiteError::Invalid { reason, .. }) if reason.contains("tolerance")));
    }

    #[test]
    fn test_manifests_read_relative_to_suite() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("manifests")).unwrap();
        std::fs::write(
            dir.path().join("manifests/httpbin.yaml"),
            "apiVersion: apps/v1\nkind: Deployment\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("manifests/gateway.yaml"),
            "apiVersion: networking.istio.io/v1\nkind: Gateway\n",
        )
        .unwrap();
        let suite_path = dir.path().join("suite.json");
        std::fs::write(
            &suite_path,
            r#"{ "cases": [ { "name": "deploy", "scope": { "name": "mesh-test" }, "resources": [
                { "kind": "workload", "api_kind": "Deployment", "name": "httpbin",
                  "manifest_path": "manifests/httpbin.yaml" },
                { "kind": "network_config", "api_kind": "Gateway", "name": "edge",
                  "manifest_path": "manifests/gateway.yaml" },
                { "kind": "workload", "api_kind": "Deployment", "name": "nowait",
                  "manifest_path": "manifests/httpbin.yaml", "ready_timeout_seconds": 0 }
            ] } ] }"#,
        )
        .unwrap();

        let cases = load(&suite_path, &defaults()).unwrap();
        let resources = &cases[0].resources;

        assert_eq!(resources.len(), 3);
        assert_eq!(resources[0].kind, ResourceKind::Workload);
        assert!(resources[0].manifest.contains("kind: Deployment"));
        assert_eq!(resources[0].ready_timeout, Some(Duration::from_secs(120)));
        assert_eq!(resources[1].kind, ResourceKind::NetworkConfig);
        assert_eq!(resources[1].ready_timeout, None);
        assert_eq!(resources[2].ready_timeout, None);
    }

    #[test]
    fn test_missing_manifest_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let suite_path = dir.path().join("suite.json");
        std::fs::write(
            &suite_path,
            r#"{ "cases": [ { "name": "deploy", "scope": { "name": "mesh-test" }, "resources": [
                { "kind": "workload", "api_kind": "Deployment", "name": "httpbin",
                  "manifest_path": "missing.yaml" }
            ] } ] }"#,
        )
        .unwrap();

        let result = load(&suite_path, &defaults());
        assert!(matches!(result, Err(SuiteError::Invalid { reason, .. }) if reason.contains("missing.yaml")));
    }

    #[test]
    fn test_missing_suite_file() {
        let result = load(Path::new("/nonexistent/suite.json"), &defaults());
        assert!(matches!(result, Err(SuiteError::Io { .. })));
    }

    #[test]
    fn test_demo_suite_loads() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../demos/suite.json");
        let cases = load(&path, &defaults()).unwrap();

        assert_eq!(cases.len(), 3);
        assert!(cases.iter().all(|case| !case.checks.is_empty()));
        assert_eq!(cases[2].before_deploy.len(), 1);
        assert!(cases[2].after_teardown[0].advisory);

        let blocked = cases[0]
            .checks
            .iter()
            .find_map(|check| match &check.kind {
                CheckKind::HttpStatus {
                    request,
                    expectation,
                    ..
                } if expectation.status == ExpectedStatus::Blocked => Some((check, request)),
                _ => None,
            })
            .expect("mtls case should carry a blocked check");
        assert!(!blocked.0.advisory);
        assert!(matches!(
            &blocked.1.source,
            ProbeSource::Pod { pod, .. } if pod == "plaintext-0"
        ));
    }
}

//! Convergence checkers against scripted collaborators.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use verify_core::convergence::{
    outbound_cluster_name, ConfigExpectation, DnsConvergence, HttpConvergence, HttpExpectation,
    ProxyConvergence,
};
use verify_core::dns::{DnsError, RecordId};
use verify_core::poller::PollSpec;
use verify_core::probe::{ProbeError, ProbeRequest};
use verify_core::proxy::{AdminError, ProxyTarget};
use verify_core::report::{FailureCategory, Severity};
use verify_test_utils::*;

fn dns_wait() -> PollSpec {
    PollSpec::fixed("dns", Duration::from_secs(5), Duration::from_secs(60))
}

fn record_id() -> RecordId {
    RecordId::new("Z1", "app.example.com", "A")
}

// --- DNS ---

#[tokio::test(start_paused = true)]
async fn test_dns_record_visible_within_deadline() {
    let dns = FakeDns::new().with_record_after("Z1", a_record("app.example.com.", "10.0.0.7"), 5);
    let checker = DnsConvergence::new(Arc::new(dns.clone()));

    let start = Instant::now();
    let record = checker.wait_created(&record_id(), &dns_wait()).await.unwrap();

    assert_eq!(record.values, vec!["10.0.0.7".to_string()]);
    assert_eq!(dns.query_count(), 5);
    assert_eq!(start.elapsed(), Duration::from_secs(20));
}

#[tokio::test(start_paused = true)]
async fn test_dns_record_never_visible_times_out() {
    let dns = FakeDns::new();
    let checker = DnsConvergence::new(Arc::new(dns.clone()));

    let start = Instant::now();
    let failure = checker
        .wait_created(&record_id(), &dns_wait())
        .await
        .unwrap_err();

    assert_eq!(failure.category, FailureCategory::NotConverged);
    assert_eq!(failure.last_observed.as_deref(), Some("record absent"));
    assert_eq!(start.elapsed(), Duration::from_secs(60));
    assert_eq!(dns.query_count(), 13);
}

#[tokio::test(start_paused = true)]
async fn test_dns_throttling_is_retried() {
    let dns = FakeDns::new()
        .with_record("Z1", a_record("app.example.com.", "10.0.0.7"))
        .with_find_errors(vec![
            DnsError::Throttled("Rate exceeded".into()),
            DnsError::Unavailable("connection reset".into()),
        ]);
    let checker = DnsConvergence::new(Arc::new(dns.clone()));

    checker.wait_created(&record_id(), &dns_wait()).await.unwrap();
    assert_eq!(dns.query_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_dns_missing_zone_is_setup_failure() {
    let dns = FakeDns::new().with_find_errors(vec![DnsError::ZoneNotFound("Z1".into())]);
    let checker = DnsConvergence::new(Arc::new(dns.clone()));

    let failure = checker
        .wait_created(&record_id(), &dns_wait())
        .await
        .unwrap_err();

    assert_eq!(failure.category, FailureCategory::Setup);
    assert_eq!(dns.query_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_dns_record_deleted_after_propagation() {
    let dns = FakeDns::new().with_record_removed_after(
        "Z1",
        a_record("app.example.com.", "10.0.0.7"),
        4,
    );
    let checker = DnsConvergence::new(Arc::new(dns.clone()));

    checker.wait_deleted(&record_id(), &dns_wait()).await.unwrap();
    assert_eq!(dns.query_count(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_clean_slate_removes_stale_record() {
    let dns = FakeDns::new()
        .with_record("Z1", a_record("app.example.com.", "10.0.0.1"))
        .with_rewrite_before_delete(a_record("app.example.com.", "10.0.0.9"));
    let checker = DnsConvergence::new(Arc::new(dns.clone()));

    checker.ensure_absent(&record_id(), &dns_wait()).await.unwrap();

    assert!(dns.record(&record_id()).is_none());
    assert_eq!(dns.deleted(), vec![a_record("app.example.com.", "10.0.0.9")]);
}

#[tokio::test(start_paused = true)]
async fn test_clean_slate_without_record_deletes_nothing() {
    let dns = FakeDns::new();
    let checker = DnsConvergence::new(Arc::new(dns.clone()));

    checker.ensure_absent(&record_id(), &dns_wait()).await.unwrap();
    assert!(dns.deleted().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_clean_slate_rejected_delete_is_setup_failure() {
    let dns = FakeDns::new()
        .with_record("Z1", a_record("app.example.com.", "10.0.0.1"))
        .with_delete_errors(vec![DnsError::Rejected("AccessDenied".into())]);
    let checker = DnsConvergence::new(Arc::new(dns.clone()));

    let failure = checker
        .ensure_absent(&record_id(), &dns_wait())
        .await
        .unwrap_err();

    assert_eq!(failure.category, FailureCategory::Setup);
    assert!(failure.reason.contains("AccessDenied"));
}

#[tokio::test(start_paused = true)]
async fn test_clean_slate_retries_throttled_delete() {
    let dns = FakeDns::new()
        .with_record("Z1", a_record("app.example.com.", "10.0.0.1"))
        .with_delete_errors(vec![DnsError::Throttled("Rate exceeded".into())]);
    let checker = DnsConvergence::new(Arc::new(dns.clone()));

    checker.ensure_absent(&record_id(), &dns_wait()).await.unwrap();

    assert_eq!(dns.delete_count(), 2);
    assert_eq!(dns.deleted(), vec![a_record("app.example.com.", "10.0.0.1")]);
    assert!(dns.record(&record_id()).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_clean_slate_throttled_until_deadline_is_setup_failure() {
    let dns = FakeDns::new()
        .with_record("Z1", a_record("app.example.com.", "10.0.0.1"))
        .with_delete_errors(vec![DnsError::Throttled("Rate exceeded".into()); 100]);
    let checker = DnsConvergence::new(Arc::new(dns.clone()));

    let start = Instant::now();
    let failure = checker
        .ensure_absent(&record_id(), &dns_wait())
        .await
        .unwrap_err();

    assert_eq!(failure.category, FailureCategory::Setup);
    assert!(failure.reason.contains("Rate exceeded"));
    assert_eq!(start.elapsed(), Duration::from_secs(60));
    assert!(dns.delete_count() > 1);
}

#[tokio::test(start_paused = true)]
async fn test_final_delete_retries_unavailable_provider() {
    let dns = FakeDns::new()
        .with_record("Z1", a_record("app.example.com.", "10.0.0.1"))
        .with_delete_errors(vec![DnsError::Unavailable("dispatch failure".into())]);
    let checker = DnsConvergence::new(Arc::new(dns.clone()));

    let removed = checker
        .delete_if_present(&record_id(), &dns_wait())
        .await
        .unwrap();

    assert!(removed);
    assert_eq!(dns.delete_count(), 2);
}

// --- Proxy configuration ---

fn mtls_expectation() -> ConfigExpectation {
    ConfigExpectation::TransportSocket {
        cluster: outbound_cluster_name(80, "httpbin", "mesh-test"),
        keyword: "tls".to_string(),
    }
}

fn proxy_wait() -> PollSpec {
    PollSpec::fixed("proxy", Duration::from_secs(2), Duration::from_secs(30))
}

#[tokio::test(start_paused = true)]
async fn test_proxy_config_converges_after_unreachable_and_plaintext() {
    let cluster = outbound_cluster_name(80, "httpbin", "mesh-test");
    let admin = FakeProxyAdmin::new()
        .then_error(AdminError::Unreachable("connection refused".into()))
        .then_dump(config_dump_with_cluster(&cluster, None))
        .then_dump(config_dump_with_cluster(&cluster, Some("envoy.transport_sockets.tls")));
    let checker = ProxyConvergence::new(Arc::new(admin.clone()));

    checker
        .wait_config_present(&ProxyTarget::new("mesh-test", "sleep-0"), &mtls_expectation(), &proxy_wait())
        .await
        .unwrap();

    assert_eq!(admin.requests().len(), 3);
    assert_eq!(admin.requests()[0].pod, "sleep-0");
}

#[tokio::test(start_paused = true)]
async fn test_proxy_config_plaintext_times_out() {
    let cluster = outbound_cluster_name(80, "httpbin", "mesh-test");
    let admin = FakeProxyAdmin::new().then_dump(config_dump_with_cluster(&cluster, None));
    let checker = ProxyConvergence::new(Arc::new(admin));

    let failure = checker
        .wait_config_present(&ProxyTarget::new("mesh-test", "sleep-0"), &mtls_expectation(), &proxy_wait())
        .await
        .unwrap_err();

    assert_eq!(failure.category, FailureCategory::NotConverged);
}

#[tokio::test(start_paused = true)]
async fn test_proxy_malformed_dump_is_setup_failure() {
    let admin = FakeProxyAdmin::new().then_dump(serde_json::json!({ "unexpected": true }));
    let checker = ProxyConvergence::new(Arc::new(admin.clone()));

    let failure = checker
        .wait_config_present(&ProxyTarget::new("mesh-test", "sleep-0"), &mtls_expectation(), &proxy_wait())
        .await
        .unwrap_err();

    assert_eq!(failure.category, FailureCategory::Setup);
    assert_eq!(admin.requests().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_proxy_substring_expectation() {
    let admin = FakeProxyAdmin::new().then_dump(config_dump_with_cluster(
        "outbound|443||api.example.com",
        None,
    ));
    let checker = ProxyConvergence::new(Arc::new(admin));

    checker
        .wait_config_present(
            &ProxyTarget::new("mesh-test", "sleep-0"),
            &ConfigExpectation::Substring("api.example.com".into()),
            &proxy_wait(),
        )
        .await
        .unwrap();
}

// --- HTTP ---

const URL: &str = "http://httpbin.mesh-test.svc.cluster.local/status/200";

fn http_wait() -> PollSpec {
    PollSpec::fixed("http", Duration::from_secs(1), Duration::from_secs(15))
}

#[tokio::test(start_paused = true)]
async fn test_http_route_converges_after_503s() {
    let probe = FakeHttpProbe::new()
        .with_status(URL, 503)
        .with_status(URL, 503)
        .with_status(URL, 200);
    let checker = HttpConvergence::new(Arc::new(probe.clone()));

    let response = checker
        .wait_status(&ProbeRequest::new(URL), &HttpExpectation::status(200), &http_wait())
        .await
        .unwrap();

    assert_eq!(response.status.code(), Some(200));
    assert_eq!(probe.request_count(URL), 3);
}

#[tokio::test(start_paused = true)]
async fn test_http_isolation_passes_on_404() {
    let probe = FakeHttpProbe::new().with_status(URL, 404);
    let checker = HttpConvergence::new(Arc::new(probe));

    checker
        .wait_status(&ProbeRequest::new(URL), &HttpExpectation::status(404), &http_wait())
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_http_isolation_breach_is_security_failure() {
    let probe = FakeHttpProbe::new().with_status(URL, 200);
    let checker = HttpConvergence::new(Arc::new(probe.clone()));

    let failure = checker
        .wait_status(&ProbeRequest::new(URL), &HttpExpectation::status(404), &http_wait())
        .await
        .unwrap_err();

    assert_eq!(failure.category, FailureCategory::SecurityViolation);
    assert_eq!(failure.severity, Severity::Critical);
    assert_eq!(probe.request_count(URL), 1);
}

#[tokio::test(start_paused = true)]
async fn test_http_blocked_accepts_connection_failure() {
    let probe = FakeHttpProbe::new().with_connection_failure(URL, "connection reset by peer");
    let checker = HttpConvergence::new(Arc::new(probe));

    checker
        .wait_status(&ProbeRequest::new(URL), &HttpExpectation::blocked(), &http_wait())
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_http_header_mismatch_times_out_with_last_response() {
    let probe = FakeHttpProbe::new().with_status(URL, 200);
    let checker = HttpConvergence::new(Arc::new(probe));

    let failure = checker
        .wait_status(
            &ProbeRequest::new(URL),
            &HttpExpectation::status(200).with_header("x-canary", "true"),
            &http_wait(),
        )
        .await
        .unwrap_err();

    assert_eq!(failure.category, FailureCategory::NotConverged);
    assert!(failure.last_observed.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_http_invalid_request_is_setup_failure() {
    let probe = FakeHttpProbe::new().with_error(URL, ProbeError::InvalidRequest("bad url".into()));
    let checker = HttpConvergence::new(Arc::new(probe));

    let failure = checker
        .wait_status(&ProbeRequest::new(URL), &HttpExpectation::status(200), &http_wait())
        .await
        .unwrap_err();

    assert_eq!(failure.category, FailureCategory::Setup);
}

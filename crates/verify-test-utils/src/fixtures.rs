//! Test data builders.

use serde_json::{json, Value};
use std::time::Duration;
use verify_core::dns::DnsRecord;
use verify_core::lifecycle::{ResourceKind, ResourceSpec};

/// Config dump with one dynamic cluster, optionally carrying a transport socket.
pub fn config_dump_with_cluster(cluster: &str, transport_socket: Option<&str>) -> Value {
    let mut entry = json!({ "name": cluster, "type": "EDS" });
    if let Some(socket) = transport_socket {
        entry["transport_socket"] = json!({
            "name": socket,
            "typed_config": {
                "@type": "type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.UpstreamTlsContext"
            }
        });
    }
    json!({
        "configs": [
            { "@type": "type.googleapis.com/envoy.admin.v3.BootstrapConfigDump", "bootstrap": {} },
            {
                "@type": "type.googleapis.com/envoy.admin.v3.ClustersConfigDump",
                "version_info": "2026-10-16T00:00:00Z/1",
                "static_clusters": [],
                "dynamic_active_clusters": [ { "version_info": "1", "cluster": entry } ]
            }
        ]
    })
}

/// Plain A record with one address.
pub fn a_record(name: &str, address: &str) -> DnsRecord {
    DnsRecord::simple(name, "A", 300, vec![address.to_string()])
}

pub fn workload(name: &str) -> ResourceSpec {
    ResourceSpec {
        kind: ResourceKind::Workload,
        api_kind: "Deployment".to_string(),
        name: name.to_string(),
        manifest: format!("apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: {}\n", name),
        ready_timeout: None,
    }
}

pub fn network_config(api_kind: &str, name: &str) -> ResourceSpec {
    ResourceSpec {
        kind: ResourceKind::NetworkConfig,
        api_kind: api_kind.to_string(),
        name: name.to_string(),
        manifest: format!(
            "apiVersion: networking.istio.io/v1\nkind: {}\nmetadata:\n  name: {}\n",
            api_kind, name
        ),
        ready_timeout: None,
    }
}

/// Workload that must report ready within `timeout` after creation.
pub fn ready_workload(name: &str, timeout: Duration) -> ResourceSpec {
    ResourceSpec {
        ready_timeout: Some(timeout),
        ..workload(name)
    }
}

//! # Verify Test Utilities
//!
//! In-memory fakes of every collaborator interface used by `verify-core`,
//! for integration tests that must not touch a real cluster, DNS zone or
//! network.
//!
//! - `fake_cluster` - namespaces and resources with scripted deletion lag,
//!   readiness delays and failures
//! - `fake_dns` - records that appear or vanish after N queries, with
//!   authoritative delete-by-current-value semantics
//! - `fake_proxy` - scripted config dumps and admin errors
//! - `fake_probe` - scripted HTTP statuses and durations per URL
//! - `fixtures` - config dump and manifest builders
//!
//! Every fake is cheap to clone; clones share state, so a test keeps one
//! handle for assertions and passes another (as `Arc<dyn Trait>`) to the
//! code under test.
//!
//! ```rust,ignore
//! use verify_test_utils::*;
//!
//! let cluster = FakeCluster::new().with_namespace("mesh-test").with_terminating_polls(3);
//! let dns = FakeDns::new().with_record_after("Z1", record, 4);
//! ```

pub mod fake_cluster;
pub mod fake_dns;
pub mod fake_probe;
pub mod fake_proxy;
pub mod fixtures;

pub use fake_cluster::*;
pub use fake_dns::*;
pub use fake_probe::*;
pub use fake_proxy::*;
pub use fixtures::*;

//! Release verification engine for service-mesh deployments.
//!
//! Deploys short-lived resources into a disposable scope, waits for the
//! eventually-consistent systems around the mesh (DNS, sidecar proxies,
//! HTTP routing) to reflect them, checks retry timing, and tears everything
//! down again regardless of the outcome.
//!
//! # Layout
//!
//! - [`poller`]: bounded polling with fixed or exponential backoff
//! - [`lifecycle`]: execution scopes with guaranteed teardown
//! - [`convergence`]: DNS, proxy config and HTTP convergence checkers
//! - [`timing`]: retry-window validation
//! - [`orchestrator`]: runs test cases and builds the [`report::TestReport`]
//! - [`cluster`], [`dns`], [`proxy`], [`probe`]: collaborator interfaces
//! - [`clients`]: production implementations of those interfaces

pub mod clients;
pub mod cluster;
pub mod convergence;
pub mod dns;
pub mod lifecycle;
pub mod orchestrator;
pub mod poller;
pub mod probe;
pub mod proxy;
pub mod report;
pub mod timing;

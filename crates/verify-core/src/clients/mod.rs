//! Production implementations of the collaborator interfaces.
//!
//! - [`kubectl`]: cluster control through the kubectl CLI
//! - [`exec`]: in-pod probes and proxy config dumps through `kubectl exec`
//! - [`http`]: local probes and forwarded proxy admin endpoints over reqwest
//! - [`route53`]: DNS provider backed by Route 53 (feature `route53`)

pub mod exec;
pub mod http;
pub mod kubectl;
#[cfg(feature = "route53")]
pub mod route53;

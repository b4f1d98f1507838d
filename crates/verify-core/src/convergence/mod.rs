//! Convergence checkers.
//!
//! Each checker waits, through [`crate::poller::poll`], until one external
//! system reflects a requested change. They differ only in what they
//! observe. All of them report the outcome as a value: a timeout becomes a
//! [`CheckFailure`] carrying the awaited state and the last observation, and
//! a fatal collaborator error becomes a setup failure.

pub mod dns;
pub mod http;
pub mod proxy;

pub use dns::DnsConvergence;
pub use http::{ExpectedStatus, HttpConvergence, HttpExpectation};
pub use proxy::{outbound_cluster_name, ConfigExpectation, ProxyConvergence};

use crate::poller::PollOutcome;
use crate::report::CheckFailure;

/// Turn a finished poll into the converged value or a not-converged failure.
fn settle<T>(target: &str, outcome: PollOutcome<T>) -> Result<T, CheckFailure> {
    match outcome {
        PollOutcome::Converged { value, .. } => Ok(value),
        PollOutcome::TimedOut { last, .. } => {
            Err(CheckFailure::not_converged(target, last.to_string()))
        }
    }
}

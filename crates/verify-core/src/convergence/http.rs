//! HTTP endpoint convergence and isolation checks.
//!
//! When the expectation is a rejection (`Blocked` or a 4xx/5xx code) the
//! check is an isolation check: the host or identity must not be routable.
//! Any accepted response in that mode stops the wait at once and is reported
//! as a security failure, separate from an ordinary timeout.

use super::settle;
use crate::poller::{poll, PollResult, PollSpec};
use crate::probe::{HttpProbe, ProbeError, ProbeRequest, ProbeResponse, ProbeStatus};
use crate::report::CheckFailure;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, instrument};

/// Status the probe should converge to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpectedStatus {
    /// Exactly this HTTP status.
    Code(u16),

    /// Any rejection: a connection failure or a 4xx/5xx status.
    Blocked,
}

impl fmt::Display for ExpectedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpectedStatus::Code(code) => write!(f, "HTTP {}", code),
            ExpectedStatus::Blocked => write!(f, "blocked"),
        }
    }
}

/// Expected status plus optional exact header values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpExpectation {
    pub status: ExpectedStatus,
    pub headers: Vec<(String, String)>,
}

impl HttpExpectation {
    pub fn status(code: u16) -> Self {
        Self {
            status: ExpectedStatus::Code(code),
            headers: Vec::new(),
        }
    }

    pub fn blocked() -> Self {
        Self {
            status: ExpectedStatus::Blocked,
            headers: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Whether success means the request was rejected.
    pub fn is_isolation(&self) -> bool {
        match self.status {
            ExpectedStatus::Blocked => true,
            ExpectedStatus::Code(code) => code >= 400,
        }
    }

    /// `Ok` when the response matches, otherwise a description of the mismatch.
    fn check(&self, response: &ProbeResponse) -> Result<(), String> {
        let status_ok = match (&self.status, &response.status) {
            (ExpectedStatus::Code(expected), ProbeStatus::Http(code)) => expected == code,
            (ExpectedStatus::Code(_), ProbeStatus::ConnectionFailed(_)) => false,
            (ExpectedStatus::Blocked, status) => !status.is_accepted(),
        };
        if !status_ok {
            return Err(response.status.to_string());
        }

        for (name, expected) in &self.headers {
            match response.header(name) {
                Some(value) if value == expected => {}
                Some(value) => return Err(format!("header {}: '{}'", name, value)),
                None => return Err(format!("header {} missing", name)),
            }
        }
        Ok(())
    }
}

impl fmt::Display for HttpExpectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.status)?;
        for (name, value) in &self.headers {
            write!(f, ", {}: {}", name, value)?;
        }
        Ok(())
    }
}

/// Fatal outcomes of a single observation.
#[derive(Debug, Error)]
enum Abort {
    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error("request was accepted with {0}")]
    Accepted(ProbeStatus),
}

/// Waits for an endpoint to answer with an expected status.
#[derive(Clone)]
pub struct HttpConvergence {
    probe: Arc<dyn HttpProbe>,
}

impl HttpConvergence {
    pub fn new(probe: Arc<dyn HttpProbe>) -> Self {
        Self { probe }
    }

    /// Probe `request` until the response matches `expectation`.
    #[instrument(skip_all, fields(request = %request, expect = %expectation))]
    pub async fn wait_status(
        &self,
        request: &ProbeRequest,
        expectation: &HttpExpectation,
        spec: &PollSpec,
    ) -> Result<ProbeResponse, CheckFailure> {
        let description = format!("{} -> {}", request, expectation);
        let spec = spec.retarget(description.clone());
        let isolation = expectation.is_isolation();

        let result = poll(&spec, || async {
            let response = match self.probe.probe(request).await {
                Ok(response) => response,
                Err(e) => return PollResult::from_error(e).map_err(Abort::from),
            };

            if isolation && response.status.is_accepted() {
                return Err(Abort::Accepted(response.status));
            }

            match expectation.check(&response) {
                Ok(()) => Ok(PollResult::Satisfied(response)),
                Err(observed) => Ok(PollResult::NotYetSatisfied(observed)),
            }
        })
        .await;

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(Abort::Accepted(status)) => {
                error!(
                    target: "verify.http",
                    request = %request,
                    observed = %status,
                    "SECURITY FAILURE: isolated endpoint accepted the request"
                );
                return Err(CheckFailure::security(
                    &description,
                    "isolated endpoint accepted the request",
                    status.to_string(),
                ));
            }
            Err(Abort::Probe(e)) => return Err(CheckFailure::setup(&description, e.to_string())),
        };

        let response = settle(&description, outcome)?;
        info!(
            target: "verify.http",
            request = %request,
            status = %response.status,
            "Endpoint converged"
        );
        Ok(response)
    }
}

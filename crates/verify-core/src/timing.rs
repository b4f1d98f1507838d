//! Timing validation for retry and back-off behaviour.
//!
//! A retry policy of `attempts` tries spaced `interval` apart implies the
//! whole operation takes at least `interval * (attempts - 1)`: the last
//! attempt does not wait. `tolerance` bounds how much longer it may take.
//! The probe runs exactly once; it is the single end-to-end duration of the
//! infrastructure's internal retries that is being measured.

use crate::probe::{ProbeError, ProbeResponse, ProbeStatus};
use crate::report::{FailureCategory, TestOutcome};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{info, instrument, warn};

/// Retry policy configured on the system under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub interval: Duration,
    pub tolerance: Duration,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TimingError {
    #[error("Retry policy must allow at least one attempt")]
    NoAttempts,

    /// The window `[min, min + tolerance)` would be empty.
    #[error("Retry timing tolerance must be greater than zero")]
    ZeroTolerance,

    #[error("Retry window does not fit in a duration")]
    Overflow,
}

/// Accepted duration window `[min, max)` derived from a [`RetryPolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingExpectation {
    min: Duration,
    max: Duration,
}

impl TimingExpectation {
    pub fn from_policy(policy: &RetryPolicy) -> Result<Self, TimingError> {
        let waits = policy
            .attempts
            .checked_sub(1)
            .ok_or(TimingError::NoAttempts)?;
        if policy.tolerance.is_zero() {
            return Err(TimingError::ZeroTolerance);
        }
        let min = policy
            .interval
            .checked_mul(waits)
            .ok_or(TimingError::Overflow)?;
        let max = min
            .checked_add(policy.tolerance)
            .ok_or(TimingError::Overflow)?;
        Ok(Self { min, max })
    }

    pub fn min(&self) -> Duration {
        self.min
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    pub fn contains(&self, observed: Duration) -> bool {
        self.min <= observed && observed < self.max
    }
}

/// One way a measurement can miss its expectation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimingViolation {
    WrongStatus { expected: u16, observed: ProbeStatus },
    /// Faster than the policy allows; retries or back-off were skipped.
    TooFast { observed: Duration, min: Duration },
    /// At or past the upper bound; a hang or a missing cap.
    TooSlow { observed: Duration, max: Duration },
}

impl fmt::Display for TimingViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimingViolation::WrongStatus { expected, observed } => {
                write!(f, "wrong status: expected HTTP {}, got {}", expected, observed)
            }
            TimingViolation::TooFast { observed, min } => write!(
                f,
                "too fast: {:.3}s < minimum {:.3}s",
                observed.as_secs_f64(),
                min.as_secs_f64()
            ),
            TimingViolation::TooSlow { observed, max } => write!(
                f,
                "too slow: {:.3}s >= maximum {:.3}s",
                observed.as_secs_f64(),
                max.as_secs_f64()
            ),
        }
    }
}

/// Every violation matched by `response`. Empty means the measurement passes.
pub fn evaluate(
    expected_status: u16,
    expectation: &TimingExpectation,
    response: &ProbeResponse,
) -> Vec<TimingViolation> {
    let mut violations = Vec::new();

    if response.status.code() != Some(expected_status) {
        violations.push(TimingViolation::WrongStatus {
            expected: expected_status,
            observed: response.status.clone(),
        });
    }
    if response.duration < expectation.min {
        violations.push(TimingViolation::TooFast {
            observed: response.duration,
            min: expectation.min,
        });
    }
    if response.duration >= expectation.max {
        violations.push(TimingViolation::TooSlow {
            observed: response.duration,
            max: expectation.max,
        });
    }

    violations
}

/// Run `probe` once and check its status and duration against the window.
///
/// The observed duration is the one reported by the probe.
#[instrument(skip_all, fields(test = %test_name))]
pub async fn measure_and_validate<F, Fut>(
    test_name: &str,
    expected_status: u16,
    expectation: &TimingExpectation,
    probe: F,
) -> TestOutcome
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<ProbeResponse, ProbeError>>,
{
    let start = Instant::now();
    let result = probe().await;
    let elapsed = start.elapsed();

    let response = match result {
        Ok(response) => response,
        Err(e) => {
            warn!(target: "verify.timing", test = %test_name, error = %e, "Timing probe failed");
            return TestOutcome::error(test_name, format!("probe failed: {}", e), elapsed);
        }
    };

    let violations = evaluate(expected_status, expectation, &response);
    if violations.is_empty() {
        info!(
            target: "verify.timing",
            test = %test_name,
            status = %response.status,
            observed_ms = response.duration.as_millis() as u64,
            min_ms = expectation.min.as_millis() as u64,
            max_ms = expectation.max.as_millis() as u64,
            "Timing within window"
        );
        return TestOutcome::pass(test_name, elapsed);
    }

    let reason = violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ");
    warn!(
        target: "verify.timing",
        test = %test_name,
        reason = %reason,
        "Timing outside window"
    );
    TestOutcome::fail(test_name, reason, elapsed).with_category(FailureCategory::TimingViolation)
}

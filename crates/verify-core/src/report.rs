//! Test outcomes and the per-run report.

use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Final status of one test case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestStatus {
    Pass,
    Fail,
    /// The case could not be evaluated (setup failure, contract violation).
    Error,
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TestStatus::Pass => "pass",
            TestStatus::Fail => "fail",
            TestStatus::Error => "error",
        };
        f.write_str(name)
    }
}

/// Why a check failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCategory {
    /// The awaited state was not observed before the deadline.
    NotConverged,
    /// An isolation check observed an accepted request.
    SecurityViolation,
    /// A measured duration or status fell outside the expected window.
    TimingViolation,
    /// The case could not be set up or a collaborator broke its contract.
    Setup,
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureCategory::NotConverged => "not converged",
            FailureCategory::SecurityViolation => "SECURITY FAILURE",
            FailureCategory::TimingViolation => "timing violation",
            FailureCategory::Setup => "setup error",
        };
        f.write_str(name)
    }
}

/// How much a failure matters. Ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Advisory,
    Failure,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Advisory => "advisory",
            Severity::Failure => "failure",
            Severity::Critical => "critical",
        };
        f.write_str(name)
    }
}

/// A failed check, as a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckFailure {
    pub category: FailureCategory,
    pub severity: Severity,
    /// Description of the check or awaited state.
    pub check: String,
    pub reason: String,
    pub last_observed: Option<String>,
}

impl CheckFailure {
    pub fn not_converged(check: impl Into<String>, last_observed: impl Into<String>) -> Self {
        Self {
            category: FailureCategory::NotConverged,
            severity: Severity::Failure,
            check: check.into(),
            reason: "timed out".to_string(),
            last_observed: Some(last_observed.into()),
        }
    }

    pub fn security(
        check: impl Into<String>,
        reason: impl Into<String>,
        observed: impl Into<String>,
    ) -> Self {
        Self {
            category: FailureCategory::SecurityViolation,
            severity: Severity::Critical,
            check: check.into(),
            reason: reason.into(),
            last_observed: Some(observed.into()),
        }
    }

    pub fn timing(check: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            category: FailureCategory::TimingViolation,
            severity: Severity::Failure,
            check: check.into(),
            reason: reason.into(),
            last_observed: None,
        }
    }

    pub fn setup(check: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            category: FailureCategory::Setup,
            severity: Severity::Failure,
            check: check.into(),
            reason: reason.into(),
            last_observed: None,
        }
    }

    /// Downgrade to advisory; the failure is reported but does not fail the case.
    #[must_use]
    pub fn advisory(mut self) -> Self {
        self.severity = Severity::Advisory;
        self
    }

    /// Setup failures abort the case and mark it as `Error`.
    pub fn is_setup(&self) -> bool {
        self.category == FailureCategory::Setup
    }
}

impl fmt::Display for CheckFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.category, self.check, self.reason)?;
        if let Some(observed) = &self.last_observed {
            write!(f, " (last observed: {})", observed)?;
        }
        Ok(())
    }
}

/// Result of one logical test case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestOutcome {
    pub test_name: String,
    pub status: TestStatus,
    /// Present iff `status` is not `Pass`.
    pub reason: Option<String>,
    pub duration: Duration,
    pub category: Option<FailureCategory>,
    pub severity: Option<Severity>,
    /// Advisory failures seen while the case still passed.
    pub notes: Vec<String>,
}

impl TestOutcome {
    pub fn pass(test_name: impl Into<String>, duration: Duration) -> Self {
        Self {
            test_name: test_name.into(),
            status: TestStatus::Pass,
            reason: None,
            duration,
            category: None,
            severity: None,
            notes: Vec::new(),
        }
    }

    pub fn fail(test_name: impl Into<String>, reason: impl Into<String>, duration: Duration) -> Self {
        Self {
            test_name: test_name.into(),
            status: TestStatus::Fail,
            reason: Some(reason.into()),
            duration,
            category: None,
            severity: Some(Severity::Failure),
            notes: Vec::new(),
        }
    }

    pub fn error(test_name: impl Into<String>, reason: impl Into<String>, duration: Duration) -> Self {
        Self {
            test_name: test_name.into(),
            status: TestStatus::Error,
            reason: Some(reason.into()),
            duration,
            category: Some(FailureCategory::Setup),
            severity: Some(Severity::Failure),
            notes: Vec::new(),
        }
    }

    /// Outcome for a case stopped by `failure`: `Error` for setup failures,
    /// `Fail` otherwise.
    pub fn from_failure(
        test_name: impl Into<String>,
        failure: &CheckFailure,
        duration: Duration,
    ) -> Self {
        let mut outcome = if failure.is_setup() {
            Self::error(test_name, failure.to_string(), duration)
        } else {
            Self::fail(test_name, failure.to_string(), duration)
        };
        outcome.category = Some(failure.category);
        outcome.severity = Some(failure.severity);
        outcome
    }

    #[must_use]
    pub fn with_category(mut self, category: FailureCategory) -> Self {
        self.category = Some(category);
        self
    }

    #[must_use]
    pub fn with_notes(mut self, notes: Vec<String>) -> Self {
        self.notes = notes;
        self
    }

    pub fn is_pass(&self) -> bool {
        self.status == TestStatus::Pass
    }
}

/// Ordered, append-only collection of outcomes for one run.
#[derive(Debug, Clone)]
pub struct TestReport {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    outcomes: Vec<TestOutcome>,
}

impl Default for TestReport {
    fn default() -> Self {
        Self::new()
    }
}

impl TestReport {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            outcomes: Vec::new(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Wall-clock time since the run started; zero if the clock went back.
    pub fn wall_time(&self) -> Duration {
        (Utc::now() - self.started_at).to_std().unwrap_or_default()
    }

    pub fn push(&mut self, outcome: TestOutcome) {
        self.outcomes.push(outcome);
    }

    pub fn outcomes(&self) -> &[TestOutcome] {
        &self.outcomes
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// True when every outcome passed.
    pub fn all_passed(&self) -> bool {
        self.outcomes.iter().all(TestOutcome::is_pass)
    }

    pub fn failures(&self) -> impl Iterator<Item = &TestOutcome> {
        self.outcomes.iter().filter(|o| !o.is_pass())
    }

    pub fn count(&self, status: TestStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }

    /// Process exit code: 0 when everything passed, 1 otherwise.
    pub fn exit_code(&self) -> u8 {
        if self.all_passed() {
            0
        } else {
            1
        }
    }

    /// Log one line per case and a totals line.
    pub fn log_summary(&self) {
        for outcome in &self.outcomes {
            let duration_ms = outcome.duration.as_millis() as u64;
            match (outcome.status, outcome.severity) {
                (TestStatus::Pass, _) => info!(
                    target: "verify.orchestrator",
                    run_id = %self.run_id,
                    test = %outcome.test_name,
                    duration_ms,
                    notes = outcome.notes.len(),
                    "PASS"
                ),
                (status, Some(Severity::Critical)) => error!(
                    target: "verify.orchestrator",
                    run_id = %self.run_id,
                    test = %outcome.test_name,
                    status = %status,
                    duration_ms,
                    reason = outcome.reason.as_deref().unwrap_or_default(),
                    "SECURITY FAILURE"
                ),
                (status, _) => warn!(
                    target: "verify.orchestrator",
                    run_id = %self.run_id,
                    test = %outcome.test_name,
                    status = %status,
                    duration_ms,
                    reason = outcome.reason.as_deref().unwrap_or_default(),
                    "FAIL"
                ),
            }
        }

        info!(
            target: "verify.orchestrator",
            run_id = %self.run_id,
            started_at = %self.started_at.to_rfc3339(),
            wall_ms = self.wall_time().as_millis() as u64,
            total = self.outcomes.len(),
            passed = self.count(TestStatus::Pass),
            failed = self.count(TestStatus::Fail),
            errors = self.count(TestStatus::Error),
            "Verification run complete"
        );
    }
}

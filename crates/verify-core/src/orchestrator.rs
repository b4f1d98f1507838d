//! Verification orchestrator.
//!
//! Drives each [`TestCase`] through
//! `Init -> ScopeOpen -> Deploying -> Checking -> Reporting -> ScopeClosed`,
//! where every path ends in `ScopeClosed`. Checks run in three phases:
//!
//! - `before_deploy`, before the scope exists (e.g. DNS clean slate);
//! - `checks`, with the scope open and resources deployed;
//! - `after_teardown`, once the scope is closed (e.g. DNS record removal
//!   driven by the deleted resources). Skipped when the case already failed.
//!
//! A failing or panicking case never stops the cases after it.

use crate::cluster::ClusterControl;
use crate::convergence::{
    ConfigExpectation, DnsConvergence, HttpConvergence, HttpExpectation, ProxyConvergence,
};
use crate::dns::{DnsProvider, RecordId};
use crate::lifecycle::{
    CleanupStatus, ExecutionScope, LifecycleConfig, LifecycleManager, ResourceSpec, ScopeSpec,
};
use crate::poller::PollSpec;
use crate::probe::{HttpProbe, ProbeRequest};
use crate::proxy::{ProxyAdmin, ProxyTarget};
use crate::report::{CheckFailure, FailureCategory, TestOutcome, TestReport, TestStatus};
use crate::timing::{self, RetryPolicy, TimingExpectation};
use futures::FutureExt;
use std::collections::HashSet;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

/// Where a test case is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasePhase {
    Init,
    ScopeOpen,
    Deploying,
    Checking,
    Reporting,
    ScopeClosed,
}

impl fmt::Display for CasePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CasePhase::Init => "init",
            CasePhase::ScopeOpen => "scope-open",
            CasePhase::Deploying => "deploying",
            CasePhase::Checking => "checking",
            CasePhase::Reporting => "reporting",
            CasePhase::ScopeClosed => "scope-closed",
        };
        f.write_str(name)
    }
}

/// One check within a test case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Check {
    pub name: String,
    pub kind: CheckKind,
    /// Failures are recorded on the outcome but do not fail the case.
    pub advisory: bool,
}

impl Check {
    pub fn new(name: impl Into<String>, kind: CheckKind) -> Self {
        Self {
            name: name.into(),
            kind,
            advisory: false,
        }
    }

    #[must_use]
    pub fn advisory(mut self) -> Self {
        self.advisory = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckKind {
    /// Delete any stale record and confirm it is gone.
    DnsCleanSlate { record: RecordId, wait: PollSpec },

    /// Wait for a record to appear; optionally make the scope own it.
    DnsCreated {
        record: RecordId,
        wait: PollSpec,
        adopt: bool,
    },

    /// Wait for a record to disappear; optionally delete it afterwards
    /// whatever the result, so nothing leaks into the next run.
    DnsDeleted {
        record: RecordId,
        wait: PollSpec,
        final_delete: bool,
    },

    ProxyConfig {
        target: ProxyTarget,
        expectation: ConfigExpectation,
        wait: PollSpec,
    },

    HttpStatus {
        request: ProbeRequest,
        expectation: HttpExpectation,
        wait: PollSpec,
    },

    RetryTiming {
        request: ProbeRequest,
        expected_status: u16,
        policy: RetryPolicy,
    },
}

/// One logical test case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCase {
    pub name: String,
    pub scope: ScopeSpec,
    pub before_deploy: Vec<Check>,
    /// Deployed in order, deleted in reverse order.
    pub resources: Vec<ResourceSpec>,
    pub checks: Vec<Check>,
    pub after_teardown: Vec<Check>,
}

impl TestCase {
    pub fn new(name: impl Into<String>, scope: ScopeSpec) -> Self {
        Self {
            name: name.into(),
            scope,
            before_deploy: Vec::new(),
            resources: Vec::new(),
            checks: Vec::new(),
            after_teardown: Vec::new(),
        }
    }
}

/// Collaborators injected into the orchestrator.
#[derive(Clone)]
pub struct Clients {
    pub cluster: Arc<dyn ClusterControl>,
    pub dns: Option<Arc<dyn DnsProvider>>,
    pub proxy: Option<Arc<dyn ProxyAdmin>>,
    pub probe: Arc<dyn HttpProbe>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrchestratorConfig {
    pub lifecycle: LifecycleConfig,
    /// Run cases concurrently. Requires distinct scope names.
    pub parallel: bool,
}

/// Runs test cases and collects their outcomes.
pub struct Orchestrator {
    runner: Arc<CaseRunner>,
    parallel: bool,
}

impl Orchestrator {
    pub fn new(clients: Clients, config: OrchestratorConfig) -> Self {
        let runner = CaseRunner {
            lifecycle: LifecycleManager::new(
                Arc::clone(&clients.cluster),
                clients.dns.clone(),
                config.lifecycle,
            ),
            dns: clients.dns.map(DnsConvergence::new),
            proxy: clients.proxy.map(ProxyConvergence::new),
            http: HttpConvergence::new(Arc::clone(&clients.probe)),
            probe: clients.probe,
        };
        Self {
            runner: Arc::new(runner),
            parallel: config.parallel,
        }
    }

    /// Run every case and return the report, in case order.
    pub async fn run(&self, cases: &[TestCase]) -> TestReport {
        if self.parallel {
            if distinct_scopes(cases) {
                return self.run_concurrently(cases).await;
            }
            warn!(
                target: "verify.orchestrator",
                "Cases share scope names, running sequentially"
            );
        }

        let mut report = TestReport::new();
        info!(
            target: "verify.orchestrator",
            run_id = %report.run_id(),
            cases = cases.len(),
            "Starting verification run"
        );
        for case in cases {
            report.push(Arc::clone(&self.runner).run_isolated(case.clone()).await);
        }
        report
    }

    async fn run_concurrently(&self, cases: &[TestCase]) -> TestReport {
        let mut report = TestReport::new();
        info!(
            target: "verify.orchestrator",
            run_id = %report.run_id(),
            cases = cases.len(),
            "Starting concurrent verification run"
        );

        let mut tasks = JoinSet::new();
        for (index, case) in cases.iter().enumerate() {
            let runner = Arc::clone(&self.runner);
            let case = case.clone();
            tasks.spawn(async move { (index, runner.run_isolated(case).await) });
        }

        let mut outcomes: Vec<Option<TestOutcome>> = vec![None; cases.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => {
                    if let Some(slot) = outcomes.get_mut(index) {
                        *slot = Some(outcome);
                    }
                }
                Err(e) => error!(target: "verify.orchestrator", error = %e, "Case task failed"),
            }
        }

        for (case, outcome) in cases.iter().zip(outcomes) {
            report.push(outcome.unwrap_or_else(|| {
                TestOutcome::error(&case.name, "case task did not complete", Default::default())
            }));
        }
        report
    }
}

fn distinct_scopes(cases: &[TestCase]) -> bool {
    let mut seen = HashSet::new();
    cases.iter().all(|case| seen.insert(case.scope.name.as_str()))
}

struct CaseRunner {
    lifecycle: LifecycleManager,
    dns: Option<DnsConvergence>,
    proxy: Option<ProxyConvergence>,
    http: HttpConvergence,
    probe: Arc<dyn HttpProbe>,
}

impl CaseRunner {
    /// Run a case, turning a panic into an `Error` outcome.
    async fn run_isolated(self: Arc<Self>, case: TestCase) -> TestOutcome {
        let start = Instant::now();
        let name = case.name.clone();
        match AssertUnwindSafe(Arc::clone(&self).run_case(case))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                error!(target: "verify.orchestrator", case = %name, "Case panicked");
                TestOutcome::error(name, "case panicked", start.elapsed())
            }
        }
    }

    #[instrument(skip_all, fields(case = %case.name))]
    async fn run_case(self: Arc<Self>, case: TestCase) -> TestOutcome {
        let start = Instant::now();
        let mut notes = Vec::new();
        enter(&case.name, CasePhase::Init);

        if let Err(failure) = self.run_checks(&case.before_deploy, None, &mut notes).await {
            return finish(&case.name, Err(failure), notes, start);
        }

        let runner = Arc::clone(&self);
        let body_case = case.clone();
        let run = self
            .lifecycle
            .run_in_scope(&case.scope, move |scope| {
                Box::pin(async move { runner.deploy_and_check(&body_case, scope).await })
            })
            .await;
        enter(&case.name, CasePhase::ScopeClosed);

        let result = match run {
            Ok(run) => {
                if run.cleanup == CleanupStatus::Failed {
                    notes.push(format!("scope {} cleanup failed", case.scope.name));
                }
                run.value.map(|body_notes| notes.extend(body_notes))
            }
            Err(e) => Err(CheckFailure::setup(
                format!("open scope {}", case.scope.name),
                e.to_string(),
            )),
        };

        let result = match result {
            Ok(()) => self.run_checks(&case.after_teardown, None, &mut notes).await,
            Err(failure) => Err(failure),
        };

        finish(&case.name, result, notes, start)
    }

    /// Deploy every resource, then run the in-scope checks.
    async fn deploy_and_check(
        &self,
        case: &TestCase,
        scope: &mut ExecutionScope,
    ) -> Result<Vec<String>, CheckFailure> {
        enter(&case.name, CasePhase::ScopeOpen);
        enter(&case.name, CasePhase::Deploying);
        for spec in &case.resources {
            self.lifecycle.deploy(scope, spec).await.map_err(|e| {
                CheckFailure::setup(format!("deploy {} {}", spec.api_kind, spec.name), e.to_string())
            })?;
        }

        enter(&case.name, CasePhase::Checking);
        let mut notes = Vec::new();
        let result = self.run_checks(&case.checks, Some(scope), &mut notes).await;
        enter(&case.name, CasePhase::Reporting);
        result.map(|()| notes)
    }

    async fn run_checks(
        &self,
        checks: &[Check],
        mut scope: Option<&mut ExecutionScope>,
        notes: &mut Vec<String>,
    ) -> Result<(), CheckFailure> {
        for check in checks {
            debug!(target: "verify.orchestrator", check = %check.name, "Running check");
            match self.run_check(check, scope.as_deref_mut()).await {
                Ok(()) => {}
                Err(failure) if check.advisory && downgradable(&failure) => {
                    let failure = failure.advisory();
                    warn!(
                        target: "verify.orchestrator",
                        check = %check.name,
                        failure = %failure,
                        "Advisory check failed"
                    );
                    notes.push(format!("advisory {}: {}", check.name, failure));
                }
                Err(failure) => return Err(failure),
            }
        }
        Ok(())
    }

    async fn run_check(
        &self,
        check: &Check,
        scope: Option<&mut ExecutionScope>,
    ) -> Result<(), CheckFailure> {
        match &check.kind {
            CheckKind::DnsCleanSlate { record, wait } => {
                self.dns(check)?.ensure_absent(record, wait).await
            }
            CheckKind::DnsCreated {
                record,
                wait,
                adopt,
            } => {
                self.dns(check)?.wait_created(record, wait).await?;
                if *adopt {
                    let scope = scope.ok_or_else(|| {
                        CheckFailure::setup(&check.name, "record adoption needs an open scope")
                    })?;
                    let handle = scope.adopt_dns_record(record.clone());
                    info!(target: "verify.orchestrator", handle = %handle, "Adopted DNS record");
                }
                Ok(())
            }
            CheckKind::DnsDeleted {
                record,
                wait,
                final_delete,
            } => {
                let dns = self.dns(check)?;
                let result = dns.wait_deleted(record, wait).await;
                if *final_delete {
                    match dns.delete_if_present(record, wait).await {
                        Ok(true) => {
                            warn!(target: "verify.orchestrator", record = %record, "Final cleanup removed leftover record")
                        }
                        Ok(false) => {}
                        Err(e) => {
                            warn!(target: "verify.orchestrator", record = %record, error = %e, "Final cleanup failed")
                        }
                    }
                }
                result
            }
            CheckKind::ProxyConfig {
                target,
                expectation,
                wait,
            } => {
                let proxy = self.proxy.as_ref().ok_or_else(|| {
                    CheckFailure::setup(&check.name, "no proxy admin client configured")
                })?;
                proxy.wait_config_present(target, expectation, wait).await
            }
            CheckKind::HttpStatus {
                request,
                expectation,
                wait,
            } => self
                .http
                .wait_status(request, expectation, wait)
                .await
                .map(|_| ()),
            CheckKind::RetryTiming {
                request,
                expected_status,
                policy,
            } => {
                let expectation = TimingExpectation::from_policy(policy)
                    .map_err(|e| CheckFailure::setup(&check.name, e.to_string()))?;
                let outcome = timing::measure_and_validate(
                    &check.name,
                    *expected_status,
                    &expectation,
                    || self.probe.probe(request),
                )
                .await;
                let reason = outcome.reason.unwrap_or_default();
                match outcome.status {
                    TestStatus::Pass => Ok(()),
                    TestStatus::Fail => Err(CheckFailure::timing(&check.name, reason)),
                    TestStatus::Error => Err(CheckFailure::setup(&check.name, reason)),
                }
            }
        }
    }

    fn dns(&self, check: &Check) -> Result<&DnsConvergence, CheckFailure> {
        self.dns
            .as_ref()
            .ok_or_else(|| CheckFailure::setup(&check.name, "no DNS provider configured"))
    }
}

/// Security and setup failures are never downgraded.
fn downgradable(failure: &CheckFailure) -> bool {
    matches!(
        failure.category,
        FailureCategory::NotConverged | FailureCategory::TimingViolation
    )
}

fn enter(case: &str, phase: CasePhase) {
    debug!(target: "verify.orchestrator", case = %case, phase = %phase, "Phase");
}

fn finish(
    case: &str,
    result: Result<(), CheckFailure>,
    notes: Vec<String>,
    start: Instant,
) -> TestOutcome {
    let elapsed = start.elapsed();
    match result {
        Ok(()) => {
            info!(target: "verify.orchestrator", case = %case, "Case passed");
            TestOutcome::pass(case, elapsed).with_notes(notes)
        }
        Err(failure) => {
            warn!(target: "verify.orchestrator", case = %case, failure = %failure, "Case failed");
            TestOutcome::from_failure(case, &failure, elapsed).with_notes(notes)
        }
    }
}

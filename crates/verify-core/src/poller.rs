//! Bounded polling for eventually-consistent external state.
//!
//! Every wait in this crate goes through [`poll`]. A predicate reports one of
//! three observations per attempt, the poller sleeps according to a
//! [`Backoff`] policy between attempts, and gives up once the timeout has
//! elapsed. Errors returned by the predicate itself are fatal and propagate on
//! the first occurrence: call sites decide which failures are transient by
//! mapping them into [`PollResult::TransientError`] instead (see
//! [`PollResult::from_error`]).
//!
//! The poller keeps no state between calls. Independent waits may run on
//! separate tasks; a single call is a sequential retry loop.

use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::debug;

/// Strategy governing the wait between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay after every unsuccessful attempt.
    Fixed(Duration),

    /// Delay doubles after each unsuccessful attempt, starting at `min` and
    /// clamped to `max` (2s, 4s, 8s, 10s, 10s, ... for min=2s, max=10s).
    Exponential { min: Duration, max: Duration },
}

impl Backoff {
    /// Fixed interval between attempts.
    pub fn fixed(interval: Duration) -> Self {
        Backoff::Fixed(interval)
    }

    /// Exponential backoff. A `max` below `min` is raised to `min`.
    pub fn exponential(min: Duration, max: Duration) -> Self {
        Backoff::Exponential {
            min,
            max: max.max(min),
        }
    }

    /// Delay to wait after the unsuccessful attempt with zero-based index `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Fixed(interval) => interval,
            Backoff::Exponential { min, max } => {
                let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
                min.checked_mul(factor).map_or(max, |delay| delay.min(max))
            }
        }
    }
}

/// Errors that can be classified as worth retrying.
///
/// Implemented by every collaborator error type; the classification is what
/// call sites use to build [`PollResult::TransientError`].
pub trait Transience {
    /// Whether the failure is expected to clear up on its own.
    fn is_transient(&self) -> bool;
}

/// Result of a single predicate evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollResult<T> {
    /// The expected state was observed.
    Satisfied(T),

    /// The system answered but does not reflect the change yet.
    NotYetSatisfied(String),

    /// The observation itself failed in a way that is worth retrying.
    TransientError(String),
}

impl<T> PollResult<T> {
    /// Map an observation error into a transient result, or hand it back as fatal.
    pub fn from_error<E>(err: E) -> Result<Self, E>
    where
        E: Transience + fmt::Display,
    {
        if err.is_transient() {
            Ok(PollResult::TransientError(err.to_string()))
        } else {
            Err(err)
        }
    }
}

/// The last unsuccessful observation, kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    NotYetSatisfied(String),
    TransientError(String),
}

impl fmt::Display for Observation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Observation::NotYetSatisfied(observed) => write!(f, "{}", observed),
            Observation::TransientError(cause) => write!(f, "transient error: {}", cause),
        }
    }
}

/// Final outcome of a [`poll`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    /// The predicate was satisfied.
    Converged {
        value: T,
        attempts: u32,
        elapsed: Duration,
    },

    /// The timeout elapsed without the predicate being satisfied.
    TimedOut {
        last: Observation,
        attempts: u32,
        elapsed: Duration,
    },
}

impl<T> PollOutcome<T> {
    /// Whether the predicate was satisfied.
    pub fn is_converged(&self) -> bool {
        matches!(self, PollOutcome::Converged { .. })
    }

    /// Number of predicate evaluations performed.
    pub fn attempts(&self) -> u32 {
        match self {
            PollOutcome::Converged { attempts, .. } | PollOutcome::TimedOut { attempts, .. } => {
                *attempts
            }
        }
    }
}

/// What to wait for and for how long.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSpec {
    /// Human-readable description of the awaited state, used in logs and failures.
    pub target: String,

    /// Wait policy between attempts.
    pub backoff: Backoff,

    /// Maximum total wait.
    pub timeout: Duration,
}

impl PollSpec {
    /// Create a spec with an explicit backoff policy.
    pub fn new(target: impl Into<String>, backoff: Backoff, timeout: Duration) -> Self {
        Self {
            target: target.into(),
            backoff,
            timeout,
        }
    }

    /// Create a spec with a fixed interval.
    pub fn fixed(target: impl Into<String>, interval: Duration, timeout: Duration) -> Self {
        Self::new(target, Backoff::Fixed(interval), timeout)
    }

    /// Same policy, different target description.
    pub fn retarget(&self, target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            backoff: self.backoff,
            timeout: self.timeout,
        }
    }
}

/// Evaluate `predicate` until it is satisfied or `spec.timeout` elapses.
///
/// - The first `Satisfied` wins; no extra wait or confirmation re-check.
/// - `NotYetSatisfied` and `TransientError` never abort the loop.
/// - An `Err` from the predicate is returned immediately.
/// - Sleeps are clamped to the remaining time and the predicate is evaluated
///   once more at the deadline, so a state reached before the deadline is
///   never reported as a timeout.
/// - When the first interval is longer than the whole timeout, the predicate
///   runs exactly once and the call returns without sleeping.
pub async fn poll<T, E, F, Fut>(spec: &PollSpec, mut predicate: F) -> Result<PollOutcome<T>, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<PollResult<T>, E>>,
{
    let start = Instant::now();
    let mut attempts: u32 = 0;

    loop {
        attempts = attempts.saturating_add(1);

        let last = match predicate().await? {
            PollResult::Satisfied(value) => {
                let elapsed = start.elapsed();
                debug!(
                    target: "verify.poller",
                    target_desc = %spec.target,
                    attempts,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Converged"
                );
                return Ok(PollOutcome::Converged {
                    value,
                    attempts,
                    elapsed,
                });
            }
            PollResult::NotYetSatisfied(observed) => Observation::NotYetSatisfied(observed),
            PollResult::TransientError(cause) => Observation::TransientError(cause),
        };

        let elapsed = start.elapsed();
        if elapsed >= spec.timeout {
            return Ok(timed_out(spec, last, attempts, elapsed));
        }

        let delay = spec.backoff.delay(attempts - 1);
        if attempts == 1 && delay > spec.timeout {
            return Ok(timed_out(spec, last, attempts, elapsed));
        }
        let delay = delay.min(spec.timeout.saturating_sub(elapsed));

        debug!(
            target: "verify.poller",
            target_desc = %spec.target,
            attempt = attempts,
            observed = %last,
            delay_ms = delay.as_millis() as u64,
            "Not converged yet, waiting"
        );

        sleep(delay).await;
    }
}

fn timed_out<T>(
    spec: &PollSpec,
    last: Observation,
    attempts: u32,
    elapsed: Duration,
) -> PollOutcome<T> {
    debug!(
        target: "verify.poller",
        target_desc = %spec.target,
        attempts,
        elapsed_ms = elapsed.as_millis() as u64,
        last = %last,
        "Timed out"
    );
    PollOutcome::TimedOut {
        last,
        attempts,
        elapsed,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Debug, thiserror::Error)]
    #[error("boom (transient: {0})")]
    struct TestError(bool);

    impl Transience for TestError {
        fn is_transient(&self) -> bool {
            self.0
        }
    }

    #[test]
    fn test_fixed_backoff_is_constant() {
        let backoff = Backoff::fixed(Duration::from_secs(5));
        assert_eq!(backoff.delay(0), Duration::from_secs(5));
        assert_eq!(backoff.delay(7), Duration::from_secs(5));
    }

    #[test]
    fn test_exponential_backoff_doubles_and_caps() {
        let backoff = Backoff::exponential(Duration::from_secs(2), Duration::from_secs(10));
        let delays: Vec<u64> = (0..5).map(|n| backoff.delay(n).as_secs()).collect();
        assert_eq!(delays, vec![2, 4, 8, 10, 10]);
    }

    #[test]
    fn test_exponential_backoff_survives_huge_attempt_counts() {
        let backoff = Backoff::exponential(Duration::from_secs(1), Duration::from_secs(30));
        assert_eq!(backoff.delay(64), Duration::from_secs(30));
        assert_eq!(backoff.delay(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn test_exponential_backoff_raises_max_to_min() {
        let backoff = Backoff::exponential(Duration::from_secs(4), Duration::from_secs(1));
        assert_eq!(backoff.delay(0), Duration::from_secs(4));
        assert_eq!(backoff.delay(3), Duration::from_secs(4));
    }

    #[test]
    fn test_from_error_classifies_by_transience() {
        let transient = PollResult::<()>::from_error(TestError(true)).unwrap();
        assert!(matches!(transient, PollResult::TransientError(msg) if msg.contains("boom")));

        let fatal = PollResult::<()>::from_error(TestError(false));
        assert!(fatal.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_success_returns_without_sleeping() {
        let spec = PollSpec::fixed("immediate", Duration::from_secs(5), Duration::from_secs(60));
        let before = Instant::now();

        let outcome = poll(&spec, || async { Ok::<_, TestError>(PollResult::Satisfied(42)) })
            .await
            .unwrap();

        assert_eq!(Instant::now() - before, Duration::ZERO);
        assert_eq!(
            outcome,
            PollOutcome::Converged {
                value: 42,
                attempts: 1,
                elapsed: Duration::ZERO
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_longer_than_timeout_evaluates_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let spec = PollSpec::fixed("slow", Duration::from_secs(10), Duration::from_secs(3));
        let before = Instant::now();

        let counter = calls.clone();
        let outcome = poll(&spec, move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<PollResult<()>, TestError>(PollResult::NotYetSatisfied("nope".into()))
            }
        })
        .await
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(Instant::now() - before <= Duration::from_secs(3));
        assert!(matches!(
            outcome,
            PollOutcome::TimedOut { attempts: 1, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_timeout_evaluates_once() {
        let spec = PollSpec::fixed("zero", Duration::from_secs(1), Duration::ZERO);
        let outcome = poll(&spec, || async {
            Ok::<PollResult<()>, TestError>(PollResult::NotYetSatisfied("absent".into()))
        })
        .await
        .unwrap();

        assert_eq!(outcome.attempts(), 1);
        assert!(!outcome.is_converged());
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_converging_times_out_with_last_observation() {
        let calls = Arc::new(AtomicU32::new(0));
        let spec = PollSpec::fixed("never", Duration::from_secs(5), Duration::from_secs(60));
        let before = Instant::now();

        let counter = calls.clone();
        let outcome = poll(&spec, move || {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                Ok::<PollResult<()>, TestError>(PollResult::NotYetSatisfied(format!("seen {}", n)))
            }
        })
        .await
        .unwrap();

        assert_eq!(Instant::now() - before, Duration::from_secs(60));
        // Attempts at 0s, 5s, ..., 55s and a last one at the deadline.
        assert_eq!(calls.load(Ordering::SeqCst), 13);
        match outcome {
            PollOutcome::TimedOut { last, attempts, .. } => {
                assert_eq!(attempts, 13);
                assert_eq!(last, Observation::NotYetSatisfied("seen 13".into()));
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_reached_between_last_interval_and_deadline_converges() {
        let spec = PollSpec::fixed("late", Duration::from_secs(5), Duration::from_secs(58));
        let start = Instant::now();

        let outcome = poll(&spec, || async move {
            if start.elapsed() >= Duration::from_secs(57) {
                Ok::<_, TestError>(PollResult::Satisfied(()))
            } else {
                Ok(PollResult::NotYetSatisfied("absent".into()))
            }
        })
        .await
        .unwrap();

        match outcome {
            PollOutcome::Converged {
                attempts, elapsed, ..
            } => {
                assert_eq!(attempts, 13);
                assert_eq!(elapsed, Duration::from_secs(58));
            }
            other => panic!("expected convergence at the deadline, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_clamped_wait_ends_with_evaluation_at_deadline() {
        let calls = Arc::new(AtomicU32::new(0));
        let spec = PollSpec::fixed("clamped", Duration::from_secs(4), Duration::from_secs(6));
        let before = Instant::now();

        let counter = calls.clone();
        let outcome = poll(&spec, move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<PollResult<()>, TestError>(PollResult::NotYetSatisfied("absent".into()))
            }
        })
        .await
        .unwrap();

        // 0s, 4s, then 6s after a wait shortened to 2s.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(Instant::now() - before, Duration::from_secs(6));
        assert!(!outcome.is_converged());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_do_not_abort_the_loop() {
        let calls = Arc::new(AtomicU32::new(0));
        let spec = PollSpec::new(
            "flaky",
            Backoff::exponential(Duration::from_secs(1), Duration::from_secs(4)),
            Duration::from_secs(30),
        );

        let counter = calls.clone();
        let outcome = poll(&spec, move || {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 4 {
                    PollResult::from_error(TestError(true))
                } else {
                    Ok(PollResult::Satisfied(n))
                }
            }
        })
        .await
        .unwrap();

        // Waits of 1s + 2s + 4s before the fourth attempt.
        match outcome {
            PollOutcome::Converged {
                value,
                attempts,
                elapsed,
            } => {
                assert_eq!(value, 4);
                assert_eq!(attempts, 4);
                assert_eq!(elapsed, Duration::from_secs(7));
            }
            other => panic!("expected convergence, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_propagates_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let spec = PollSpec::fixed("fatal", Duration::from_secs(1), Duration::from_secs(30));

        let counter = calls.clone();
        let result = poll(&spec, move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                PollResult::<()>::from_error(TestError(false))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_reports_transient_error_as_last_observation() {
        let spec = PollSpec::fixed("unreachable", Duration::from_secs(2), Duration::from_secs(5));
        let outcome = poll(&spec, || async { PollResult::<()>::from_error(TestError(true)) })
            .await
            .unwrap();

        match outcome {
            PollOutcome::TimedOut { last, .. } => {
                assert!(matches!(last, Observation::TransientError(_)));
                assert!(last.to_string().starts_with("transient error"));
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }
}

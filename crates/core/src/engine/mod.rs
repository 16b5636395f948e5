//! The scenario engine: two sessions, two threads, one barrier set.
//!
//! For every run the engine leases sessions A and B, resets the table with the
//! scenario's fixture on A, then drives each session through its plan on its
//! own scoped thread. The threads only meet at barriers. Step faults are
//! recorded and the run goes on; barrier timeouts, cancellation, pool
//! exhaustion, fixture failures and worker panics end the run with
//! [`Verdict::EngineError`]. Both sessions are released on every path.

use core::fmt::{self, Display, Formatter};
use std::collections::BTreeMap;
use std::thread;
use std::time::{Duration, Instant};

use derive_more::From;
use typed_builder::TypedBuilder;

use crate::fault::ErrorKind;
use crate::isolation::{IsolationLevel, UnsupportedIsolationLevel};
use crate::pool::ConnectionPool;
use crate::recorder::{BenchmarkRecorder, RunOutcome};
use crate::report::{RunFailure, ScenarioReport, StepResult};
use crate::scenario::{builtin, Observations, PlannedStep, Scenario, StepKind, Verdict};
use crate::session::{Session, SessionId};

pub mod barrier;
pub mod cancel;

use self::barrier::{BarrierError, BarrierSet};
pub use self::cancel::CancelToken;

/// Tunables of a [`ScenarioEngine`].
#[derive(Debug, Clone, TypedBuilder)]
pub struct EngineConfig {
    /// How long a session waits at a barrier for its partner.
    #[builder(default = Duration::from_secs(5))]
    pub barrier_timeout: Duration,
    /// Bounded lock wait configured on every session. Must be positive.
    #[builder(default = Duration::from_secs(2))]
    pub lock_timeout: Duration,
    /// How often a waiting session looks at the cancel token.
    #[builder(default = Duration::from_millis(20))]
    pub barrier_poll: Duration,
    /// Run the scenario fixture before the sessions start.
    #[builder(default = true)]
    pub run_fixture: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A barrier would give up before a blocked partner's lock wait does.
    BarrierShorterThanLockWait {
        barrier_timeout: Duration,
        lock_wait: Duration,
    },
    ZeroBarrierTimeout,
    ZeroBarrierPoll,
    /// A zero lock timeout leaves the server default in place, which no
    /// barrier can be checked against.
    UnboundedLockWait,
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::BarrierShorterThanLockWait {
                barrier_timeout,
                lock_wait,
            } => write!(
                f,
                "barrier timeout ({} ms) is shorter than the effective lock wait ({} ms)",
                barrier_timeout.as_millis(),
                lock_wait.as_millis()
            ),
            Self::ZeroBarrierTimeout => f.write_str("barrier timeout must be positive"),
            Self::ZeroBarrierPoll => f.write_str("barrier poll interval must be positive"),
            Self::UnboundedLockWait => f.write_str("lock timeout must be positive"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone, PartialEq, Eq, From)]
pub enum EngineError {
    #[from(ignore)]
    UnknownScenario(String),
    Config(ConfigError),
}

impl Display for EngineError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownScenario(name) => write!(f, "unknown scenario `{name}`"),
            Self::Config(err) => write!(f, "invalid engine configuration: {err}"),
        }
    }
}

impl std::error::Error for EngineError {}

/// Runs scenarios against one pool.
pub struct ScenarioEngine<'pool, P: ConnectionPool> {
    pool: &'pool P,
    config: EngineConfig,
    cancel: CancelToken,
}

impl<'pool, P: ConnectionPool> ScenarioEngine<'pool, P> {
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the barrier timeout or the lock timeout
    /// is zero, or the barrier is shorter than the lock wait the pool's
    /// dialect will actually apply.
    pub fn new(pool: &'pool P, config: EngineConfig) -> Result<Self, ConfigError> {
        if config.barrier_timeout.is_zero() {
            return Err(ConfigError::ZeroBarrierTimeout);
        }
        if config.barrier_poll.is_zero() {
            return Err(ConfigError::ZeroBarrierPoll);
        }
        if config.lock_timeout.is_zero() {
            return Err(ConfigError::UnboundedLockWait);
        }
        let lock_wait = pool.dialect().effective_lock_wait(config.lock_timeout);
        if config.barrier_timeout < lock_wait {
            tracing::warn!(
                barrier_ms = config.barrier_timeout.as_millis(),
                lock_wait_ms = lock_wait.as_millis(),
                "barrier timeout shorter than lock wait"
            );
            return Err(ConfigError::BarrierShorterThanLockWait {
                barrier_timeout: config.barrier_timeout,
                lock_wait,
            });
        }
        Ok(Self {
            pool,
            config,
            cancel: CancelToken::new(),
        })
    }

    /// Use `cancel` instead of the engine's own token.
    #[must_use]
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// A handle that cancels the current and every later run.
    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run a built-in scenario at every level the backend supports, in
    /// ascending strength.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownScenario`] for an unknown name. Run
    /// failures are reported inside the returned reports.
    pub fn run_scenario(&self, name: &str) -> Result<Vec<ScenarioReport>, EngineError> {
        let scenario =
            builtin::find(name).ok_or_else(|| EngineError::UnknownScenario(name.to_string()))?;
        Ok(self.run_levels(&scenario))
    }

    /// Run every built-in scenario.
    #[must_use]
    pub fn run_all_scenarios(&self) -> BTreeMap<String, Vec<ScenarioReport>> {
        builtin::all()
            .iter()
            .map(|scenario| (scenario.name().to_string(), self.run_levels(scenario)))
            .collect()
    }

    /// Run `scenario` once per supported level, ascending.
    #[must_use]
    pub fn run_levels(&self, scenario: &Scenario) -> Vec<ScenarioReport> {
        let dialect = self.pool.dialect();
        dialect
            .supported_levels()
            .iter()
            .filter_map(|&level| match self.run_once(scenario, level) {
                Ok(report) => Some(report),
                Err(err) => {
                    tracing::debug!(%err, "skipping level");
                    None
                }
            })
            .collect()
    }

    /// Run `scenario` at `level`.
    ///
    /// # Errors
    ///
    /// Returns [`UnsupportedIsolationLevel`] when the backend's dialect does
    /// not declare `level`; nothing is run in that case.
    pub fn run_once(
        &self,
        scenario: &Scenario,
        level: IsolationLevel,
    ) -> Result<ScenarioReport, UnsupportedIsolationLevel> {
        let dialect = self.pool.dialect();
        let lock_timeout = self.config.lock_timeout;
        let plan_a = scenario.plan(SessionId::A, dialect, level, lock_timeout)?;
        let plan_b = scenario.plan(SessionId::B, dialect, level, lock_timeout)?;
        let fixture = if self.config.run_fixture {
            scenario.plan_fixture(dialect)
        } else {
            Vec::new()
        };

        let recorder = BenchmarkRecorder::start(self.pool.name(), dialect, scenario, level);
        let plans = [plan_a.as_slice(), plan_b.as_slice()];
        let outcome = self.drive(scenario, &fixture, plans, recorder.origin());
        Ok(recorder.finish(outcome))
    }

    fn drive(
        &self,
        scenario: &Scenario,
        fixture: &[PlannedStep],
        plans: [&[PlannedStep]; 2],
        origin: Instant,
    ) -> RunOutcome {
        if self.cancel.is_cancelled() {
            return RunOutcome::aborted(
                Vec::new(),
                RunFailure::new(ErrorKind::Cancelled, "run cancelled before start"),
            );
        }

        let mut a = match Session::open(SessionId::A, self.pool, origin) {
            Ok(session) => session,
            Err(err) => {
                return RunOutcome::aborted(
                    Vec::new(),
                    RunFailure::new(ErrorKind::ConnectionAcquisition, format!("session A: {err}")),
                )
            }
        };
        let mut b = match Session::open(SessionId::B, self.pool, origin) {
            Ok(session) => session,
            Err(err) => {
                a.release();
                return RunOutcome::aborted(
                    Vec::new(),
                    RunFailure::new(ErrorKind::ConnectionAcquisition, format!("session B: {err}")),
                );
            }
        };

        let mut fixture_results = Vec::with_capacity(fixture.len());
        for step in fixture {
            let result = a.run(step);
            let failed = !result.is_ok();
            let message = result.message().unwrap_or_default().to_string();
            fixture_results.push(result);
            if failed {
                a.release();
                b.release();
                return RunOutcome::aborted(
                    fixture_results,
                    RunFailure::new(ErrorKind::FixtureFailed, message),
                );
            }
        }

        let barriers = BarrierSet::new(2);
        let [plan_a, plan_b] = plans;
        let (joined_a, joined_b) = thread::scope(|scope| {
            let worker_a = scope.spawn(|| self.drive_session(&mut a, plan_a, &barriers, origin));
            let worker_b = scope.spawn(|| self.drive_session(&mut b, plan_b, &barriers, origin));
            (worker_a.join(), worker_b.join())
        });
        // Normally already released by the workers; a panicked worker leaves
        // its session to us.
        a.release();
        b.release();

        let mut failure = None;
        let mut streams = Vec::with_capacity(2);
        for (session, joined) in [(SessionId::A, joined_a), (SessionId::B, joined_b)] {
            match joined {
                Ok(stream) => {
                    if failure.is_none() {
                        failure.clone_from(&stream.failure);
                    }
                    streams.push(stream.results);
                }
                Err(_) => {
                    failure = Some(RunFailure::new(
                        ErrorKind::WorkerPanicked,
                        format!("session {session} worker panicked"),
                    ));
                    streams.push(Vec::new());
                }
            }
        }
        let session_b = streams.pop().unwrap_or_default();
        let session_a = streams.pop().unwrap_or_default();

        let verdict = if failure.is_some() {
            Verdict::EngineError
        } else {
            scenario
                .rule()
                .evaluate(&Observations::collect(session_a.iter().chain(&session_b)))
        };

        RunOutcome {
            fixture: fixture_results,
            session_a,
            session_b,
            verdict,
            failure,
        }
    }

    fn drive_session(
        &self,
        session: &mut Session<'_, P>,
        plan: &[PlannedStep],
        barriers: &BarrierSet,
        origin: Instant,
    ) -> Stream {
        let _guard = AbortOnPanic(barriers);
        let mut stream = Stream::default();

        for step in plan {
            if self.cancel.is_cancelled() {
                stream.failure = Some(RunFailure::new(
                    ErrorKind::Cancelled,
                    format!("session {} cancelled before step {}", session.id(), step.index),
                ));
                barriers.abort();
                break;
            }
            if barriers.is_broken() {
                break;
            }

            let StepKind::WaitBarrier(index) = step.kind else {
                stream.results.push(session.run(step));
                continue;
            };

            let started = Instant::now();
            let offset = started.saturating_duration_since(origin);
            let waited = barriers.wait(
                index,
                self.config.barrier_timeout,
                self.config.barrier_poll,
                &self.cancel,
            );
            let err = match waited {
                Ok(waited) => {
                    tracing::debug!(
                        session = %session.id(),
                        barrier = index,
                        waited_micros = waited.as_micros(),
                        "barrier passed"
                    );
                    stream
                        .results
                        .push(StepResult::succeeded(session.id(), step, None, offset, waited));
                    continue;
                }
                Err(BarrierError::Broken { .. }) => {
                    tracing::debug!(session = %session.id(), barrier = index, "barrier broken by partner");
                    break;
                }
                Err(err) => err,
            };
            let kind = if matches!(err, BarrierError::TimedOut { .. }) {
                ErrorKind::BarrierTimeout
            } else {
                ErrorKind::Cancelled
            };
            tracing::warn!(session = %session.id(), kind = %kind, "{err}");
            stream.results.push(StepResult::failed(
                session.id(),
                step,
                kind,
                err.to_string(),
                offset,
                started.elapsed(),
            ));
            stream.failure = Some(RunFailure::new(kind, format!("session {}: {err}", session.id())));
            barriers.abort();
            break;
        }

        session.release();
        stream
    }
}

/// Results of one session's thread.
#[derive(Debug, Default)]
struct Stream {
    results: Vec<StepResult>,
    failure: Option<RunFailure>,
}

/// Breaks the barriers if its thread unwinds, so the partner does not sit out
/// the full timeout.
struct AbortOnPanic<'a>(&'a BarrierSet);

impl Drop for AbortOnPanic<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.abort();
        }
    }
}

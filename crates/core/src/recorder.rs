//! Timing around a single run and assembly of its [`ScenarioReport`].

use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::isolation::{Dialect, IsolationLevel};
use crate::report::{micros, RunFailure, ScenarioReport, StepResult};
use crate::scenario::{Observations, Scenario, Verdict};

/// Raw results of one run, before timing is attached.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub fixture: Vec<StepResult>,
    pub session_a: Vec<StepResult>,
    pub session_b: Vec<StepResult>,
    pub verdict: Verdict,
    pub failure: Option<RunFailure>,
}

impl RunOutcome {
    /// A run that failed before any session step ran.
    #[must_use]
    pub const fn aborted(fixture: Vec<StepResult>, failure: RunFailure) -> Self {
        Self {
            fixture,
            session_a: Vec::new(),
            session_b: Vec::new(),
            verdict: Verdict::EngineError,
            failure: Some(failure),
        }
    }
}

/// Stopwatch for one (backend, scenario, level) run.
#[derive(Debug)]
pub struct BenchmarkRecorder {
    backend: String,
    dialect: Dialect,
    scenario: String,
    description: String,
    expectation: String,
    level: IsolationLevel,
    started_at: DateTime<Utc>,
    origin: Instant,
}

impl BenchmarkRecorder {
    #[must_use]
    pub fn start(backend: &str, dialect: Dialect, scenario: &Scenario, level: IsolationLevel) -> Self {
        tracing::debug!(backend, scenario = scenario.name(), level = level.slug(), "run started");
        Self {
            backend: backend.to_string(),
            dialect,
            scenario: scenario.name().to_string(),
            description: scenario.description().to_string(),
            expectation: scenario.expectation().to_string(),
            level,
            started_at: Utc::now(),
            origin: Instant::now(),
        }
    }

    /// The instant step offsets are measured from.
    #[must_use]
    pub const fn origin(&self) -> Instant {
        self.origin
    }

    /// Stop the clock and build the report.
    ///
    /// A run carrying a failure always ends as [`Verdict::EngineError`].
    #[must_use]
    pub fn finish(self, outcome: RunOutcome) -> ScenarioReport {
        let elapsed = self.origin.elapsed();
        let finished_at = Utc::now();
        let verdict = if outcome.failure.is_some() {
            Verdict::EngineError
        } else {
            outcome.verdict
        };
        let captures =
            Observations::collect(outcome.session_a.iter().chain(&outcome.session_b)).into_captures();

        match &outcome.failure {
            Some(failure) => tracing::warn!(
                backend = %self.backend,
                scenario = %self.scenario,
                level = self.level.slug(),
                kind = %failure.kind,
                elapsed_micros = micros(elapsed),
                "run failed: {}",
                failure.message
            ),
            None => tracing::info!(
                backend = %self.backend,
                scenario = %self.scenario,
                level = self.level.slug(),
                %verdict,
                elapsed_micros = micros(elapsed),
                "run finished"
            ),
        }

        ScenarioReport {
            backend: self.backend,
            dialect: self.dialect,
            scenario: self.scenario,
            description: self.description,
            expectation: self.expectation,
            isolation_level: self.level,
            started_at: self.started_at,
            finished_at,
            total_elapsed_micros: micros(elapsed),
            fixture: outcome.fixture,
            session_a: outcome.session_a,
            session_b: outcome.session_b,
            captures,
            verdict,
            failure: outcome.failure,
        }
    }
}

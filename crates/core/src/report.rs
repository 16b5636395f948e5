//! Step results and scenario reports.
//!
//! Both are pure data: no live connection or raw driver error is ever stored.
//! They are built once by the engine and the recorder and only read after
//! that; there are no setters.

use std::collections::BTreeMap;
use core::time::Duration;

use chrono::{DateTime, Utc};

use crate::fault::ErrorKind;
use crate::isolation::{Dialect, IsolationLevel};
use crate::scenario::verdict::Verdict;
use crate::scenario::PlannedStep;
use crate::session::SessionId;
use crate::value::Value;

#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
#[cfg_attr(feature = "schemars", derive(::schemars::JsonSchema))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum StepStatus {
    Ok,
    Failed,
}

/// Outcome of one step of one session.
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[cfg_attr(feature = "schemars", derive(::schemars::JsonSchema))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepResult {
    pub(crate) session: SessionId,
    pub(crate) index: usize,
    pub(crate) label: String,
    pub(crate) sql: Option<String>,
    pub(crate) capture: Option<String>,
    pub(crate) status: StepStatus,
    pub(crate) value: Option<Value>,
    pub(crate) error_kind: Option<ErrorKind>,
    pub(crate) message: Option<String>,
    /// Start of the step, measured from the start of the run.
    pub(crate) offset_micros: u64,
    pub(crate) duration_micros: u64,
}

impl StepResult {
    pub(crate) fn succeeded(
        session: SessionId,
        step: &PlannedStep,
        value: Option<Value>,
        offset: Duration,
        duration: Duration,
    ) -> Self {
        Self {
            session,
            index: step.index,
            label: step.label.clone(),
            sql: step.sql.clone(),
            capture: step.capture.clone(),
            status: StepStatus::Ok,
            value,
            error_kind: None,
            message: None,
            offset_micros: micros(offset),
            duration_micros: micros(duration),
        }
    }

    pub(crate) fn failed(
        session: SessionId,
        step: &PlannedStep,
        kind: ErrorKind,
        message: impl Into<String>,
        offset: Duration,
        duration: Duration,
    ) -> Self {
        Self {
            session,
            index: step.index,
            label: step.label.clone(),
            sql: step.sql.clone(),
            capture: step.capture.clone(),
            status: StepStatus::Failed,
            value: None,
            error_kind: Some(kind),
            message: Some(message.into()),
            offset_micros: micros(offset),
            duration_micros: micros(duration),
        }
    }

    #[must_use]
    pub const fn session(&self) -> SessionId {
        self.session
    }

    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[must_use]
    pub fn sql(&self) -> Option<&str> {
        self.sql.as_deref()
    }

    #[must_use]
    pub fn capture(&self) -> Option<&str> {
        self.capture.as_deref()
    }

    #[must_use]
    pub const fn status(&self) -> StepStatus {
        self.status
    }

    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self.status, StepStatus::Ok)
    }

    #[must_use]
    pub const fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    #[must_use]
    pub const fn error_kind(&self) -> Option<ErrorKind> {
        self.error_kind
    }

    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    #[must_use]
    pub const fn offset_micros(&self) -> u64 {
        self.offset_micros
    }

    #[must_use]
    pub const fn duration_micros(&self) -> u64 {
        self.duration_micros
    }
}

/// Why a run as a whole failed.
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[cfg_attr(feature = "schemars", derive(::schemars::JsonSchema))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl RunFailure {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Everything observed while running one scenario at one isolation level.
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[cfg_attr(feature = "schemars", derive(::schemars::JsonSchema))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioReport {
    pub(crate) backend: String,
    pub(crate) dialect: Dialect,
    pub(crate) scenario: String,
    pub(crate) description: String,
    pub(crate) expectation: String,
    pub(crate) isolation_level: IsolationLevel,
    pub(crate) started_at: DateTime<Utc>,
    pub(crate) finished_at: DateTime<Utc>,
    pub(crate) total_elapsed_micros: u64,
    pub(crate) fixture: Vec<StepResult>,
    pub(crate) session_a: Vec<StepResult>,
    pub(crate) session_b: Vec<StepResult>,
    pub(crate) captures: BTreeMap<String, Value>,
    pub(crate) verdict: Verdict,
    pub(crate) failure: Option<RunFailure>,
}

impl ScenarioReport {
    #[must_use]
    pub fn backend(&self) -> &str {
        &self.backend
    }

    #[must_use]
    pub const fn dialect(&self) -> Dialect {
        self.dialect
    }

    #[must_use]
    pub fn scenario(&self) -> &str {
        &self.scenario
    }

    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    #[must_use]
    pub fn expectation(&self) -> &str {
        &self.expectation
    }

    #[must_use]
    pub const fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    #[must_use]
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    #[must_use]
    pub const fn finished_at(&self) -> DateTime<Utc> {
        self.finished_at
    }

    #[must_use]
    pub const fn total_elapsed(&self) -> Duration {
        Duration::from_micros(self.total_elapsed_micros)
    }

    #[must_use]
    pub fn fixture(&self) -> &[StepResult] {
        &self.fixture
    }

    /// Results of one session, in execution order.
    #[must_use]
    pub fn steps(&self, session: SessionId) -> &[StepResult] {
        match session {
            SessionId::A => &self.session_a,
            SessionId::B => &self.session_b,
        }
    }

    /// Observed values by capture key; failed captures are absent.
    #[must_use]
    pub const fn captures(&self) -> &BTreeMap<String, Value> {
        &self.captures
    }

    #[must_use]
    pub fn capture(&self, key: &str) -> Option<&Value> {
        self.captures.get(key)
    }

    #[must_use]
    pub const fn verdict(&self) -> Verdict {
        self.verdict
    }

    #[must_use]
    pub const fn failure(&self) -> Option<&RunFailure> {
        self.failure.as_ref()
    }

    /// Failed steps of both sessions, A first.
    pub fn failed_steps(&self) -> impl Iterator<Item = &StepResult> {
        self.session_a
            .iter()
            .chain(&self.session_b)
            .filter(|step| !step.is_ok())
    }

    /// The step of `session` that recorded `capture`, if it ran.
    #[must_use]
    pub fn capture_step(&self, session: SessionId, capture: &str) -> Option<&StepResult> {
        self.steps(session)
            .iter()
            .find(|step| step.capture() == Some(capture))
    }
}

pub(crate) fn micros(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}

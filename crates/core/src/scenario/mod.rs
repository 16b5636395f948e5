//! Declarative anomaly scenarios.
//!
//! A [`Scenario`] is pure data: the ordered steps of sessions A and B, the
//! barriers that are the only points where the two streams meet, a fixture
//! that resets the table before each run, and a [`VerdictRule`] over the
//! values captured by queries. Scenarios are dialect-neutral; [`Scenario::plan`]
//! renders one session's steps for a concrete dialect and isolation level.

use core::fmt::{self, Display, Formatter};
use std::collections::BTreeSet;
use std::time::Duration;

use crate::isolation::{Dialect, IsolationLevel, UnsupportedIsolationLevel};
use crate::session::SessionId;
use crate::sql;
use crate::value::Value;

pub mod builtin;
pub mod display;
pub mod error;
pub mod verdict;

pub use error::ScenarioError;
pub use verdict::{Observations, Verdict, VerdictRule};

/// What a step does.
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
#[cfg_attr(feature = "schemars", derive(::schemars::JsonSchema))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum StepKind {
    /// Set the isolation level under test for the session.
    SetIsolation,
    Begin,
    /// Run a statement and ignore its rows.
    Execute,
    /// Run a statement and capture the first column of its first row.
    Query,
    Commit,
    Rollback,
    /// Block until the partner session reaches the same barrier.
    WaitBarrier(u32),
}

impl Display for StepKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::SetIsolation => f.write_str("isolation"),
            Self::Begin => f.write_str("begin"),
            Self::Execute => f.write_str("exec"),
            Self::Query => f.write_str("query"),
            Self::Commit => f.write_str("commit"),
            Self::Rollback => f.write_str("rollback"),
            Self::WaitBarrier(n) => write!(f, "barrier {n}"),
        }
    }
}

/// A SQL template with `$n` placeholders and the values bound to them.
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[cfg_attr(feature = "schemars", derive(::schemars::JsonSchema))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Statement {
    #[must_use]
    pub fn new(sql: impl Into<String>, params: impl IntoIterator<Item = Value>) -> Self {
        Self {
            sql: sql.into(),
            params: params.into_iter().collect(),
        }
    }

    /// Distinct placeholders must be exactly `$1..=$len(params)`.
    fn check_params(&self) -> Result<(), (usize, usize)> {
        let used: BTreeSet<usize> = sql::placeholder_indices(&self.sql).into_iter().collect();
        let expected: BTreeSet<usize> = (0..self.params.len()).collect();
        if used == expected {
            Ok(())
        } else {
            Err((used.last().map_or(0, |max| max + 1), self.params.len()))
        }
    }
}

/// One step of one session.
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[cfg_attr(feature = "schemars", derive(::schemars::JsonSchema))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioStep {
    pub session: SessionId,
    pub kind: StepKind,
    /// Present for `Execute` and `Query`.
    pub statement: Option<Statement>,
    /// Present for `Query`.
    pub capture: Option<String>,
}

impl ScenarioStep {
    const fn bare(session: SessionId, kind: StepKind) -> Self {
        Self {
            session,
            kind,
            statement: None,
            capture: None,
        }
    }

    #[must_use]
    pub const fn isolation(session: SessionId) -> Self {
        Self::bare(session, StepKind::SetIsolation)
    }

    #[must_use]
    pub const fn begin(session: SessionId) -> Self {
        Self::bare(session, StepKind::Begin)
    }

    #[must_use]
    pub const fn commit(session: SessionId) -> Self {
        Self::bare(session, StepKind::Commit)
    }

    #[must_use]
    pub const fn rollback(session: SessionId) -> Self {
        Self::bare(session, StepKind::Rollback)
    }

    #[must_use]
    pub const fn barrier(session: SessionId, index: u32) -> Self {
        Self::bare(session, StepKind::WaitBarrier(index))
    }

    #[must_use]
    pub fn execute(
        session: SessionId,
        sql: impl Into<String>,
        params: impl IntoIterator<Item = Value>,
    ) -> Self {
        Self {
            statement: Some(Statement::new(sql, params)),
            ..Self::bare(session, StepKind::Execute)
        }
    }

    #[must_use]
    pub fn query(
        session: SessionId,
        capture: impl Into<String>,
        sql: impl Into<String>,
        params: impl IntoIterator<Item = Value>,
    ) -> Self {
        Self {
            statement: Some(Statement::new(sql, params)),
            capture: Some(capture.into()),
            ..Self::bare(session, StepKind::Query)
        }
    }

    /// Short human label: `begin`, `query init`, `barrier 2`, ...
    #[must_use]
    pub fn label(&self) -> String {
        match (&self.kind, &self.capture) {
            (StepKind::Query, Some(key)) => format!("query {key}"),
            (kind, _) => kind.to_string(),
        }
    }
}

/// A step rendered for one dialect and level, ready for a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedStep {
    /// Position in the session's plan.
    pub index: usize,
    pub kind: StepKind,
    pub label: String,
    pub sql: Option<String>,
    pub params: Vec<Value>,
    pub capture: Option<String>,
}

impl PlannedStep {
    /// A plain statement outside the scenario's own steps (fixture, session
    /// prologue).
    #[must_use]
    pub fn statement(index: usize, label: impl Into<String>, sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            index,
            kind: StepKind::Execute,
            label: label.into(),
            sql: Some(sql.into()),
            params,
            capture: None,
        }
    }
}

/// A validated scenario.
///
/// Deserialization goes through [`ScenarioBuilder::build`], so a decoded
/// scenario obeys the same rules as one built in code.
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "ScenarioBuilder"))]
#[cfg_attr(feature = "schemars", derive(::schemars::JsonSchema))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scenario {
    name: String,
    description: String,
    expectation: String,
    fixture: Vec<Statement>,
    steps: Vec<ScenarioStep>,
    rule: VerdictRule,
}

impl Scenario {
    #[must_use]
    pub fn builder(name: impl Into<String>) -> ScenarioBuilder {
        ScenarioBuilder {
            name: name.into(),
            description: String::new(),
            expectation: String::new(),
            fixture: Vec::new(),
            steps: Vec::new(),
            rule: None,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
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
    pub fn fixture(&self) -> &[Statement] {
        &self.fixture
    }

    /// All steps, in declaration order.
    #[must_use]
    pub fn steps(&self) -> &[ScenarioStep] {
        &self.steps
    }

    #[must_use]
    pub const fn rule(&self) -> &VerdictRule {
        &self.rule
    }

    /// Steps of one session, in execution order.
    pub fn steps_for(&self, session: SessionId) -> impl Iterator<Item = &ScenarioStep> {
        self.steps.iter().filter(move |step| step.session == session)
    }

    /// Barrier indices one session waits on, in order.
    #[must_use]
    pub fn barriers(&self, session: SessionId) -> Vec<u32> {
        self.steps_for(session)
            .filter_map(|step| match step.kind {
                StepKind::WaitBarrier(n) => Some(n),
                _ => None,
            })
            .collect()
    }

    /// Session that records `capture`, if any step does.
    #[must_use]
    pub fn capture_owner(&self, capture: &str) -> Option<SessionId> {
        self.steps
            .iter()
            .find(|step| step.capture.as_deref() == Some(capture))
            .map(|step| step.session)
    }

    /// Render the steps of `session` for `dialect` at `level`.
    ///
    /// A non-zero `lock_timeout` prepends the statement bounding lock waits.
    ///
    /// # Errors
    ///
    /// Returns [`UnsupportedIsolationLevel`] when `dialect` does not declare
    /// `level`.
    pub fn plan(
        &self,
        session: SessionId,
        dialect: Dialect,
        level: IsolationLevel,
        lock_timeout: Duration,
    ) -> Result<Vec<PlannedStep>, UnsupportedIsolationLevel> {
        let set_level = dialect.sql_for_set_level(level)?;
        let mut plan = Vec::new();

        if let Some(sql) = dialect.sql_for_lock_timeout(lock_timeout) {
            plan.push(PlannedStep::statement(0, "lock-timeout", sql, Vec::new()));
        }

        for step in self.steps_for(session) {
            let (sql, params) = match step.kind {
                StepKind::SetIsolation => (Some(set_level.clone()), Vec::new()),
                StepKind::Begin => (Some(dialect.sql_for_begin().to_string()), Vec::new()),
                StepKind::Commit => (Some(dialect.sql_for_commit().to_string()), Vec::new()),
                StepKind::Rollback => (Some(dialect.sql_for_rollback().to_string()), Vec::new()),
                StepKind::WaitBarrier(_) => (None, Vec::new()),
                StepKind::Execute | StepKind::Query => match &step.statement {
                    Some(statement) => {
                        let (sql, params) = dialect.bind(&statement.sql, &statement.params);
                        (Some(sql), params)
                    }
                    None => (None, Vec::new()),
                },
            };
            plan.push(PlannedStep {
                index: plan.len(),
                kind: step.kind,
                label: step.label(),
                sql,
                params,
                capture: step.capture.clone(),
            });
        }
        Ok(plan)
    }

    /// Render the fixture for `dialect`.
    #[must_use]
    pub fn plan_fixture(&self, dialect: Dialect) -> Vec<PlannedStep> {
        self.fixture
            .iter()
            .enumerate()
            .map(|(index, statement)| {
                let (sql, params) = dialect.bind(&statement.sql, &statement.params);
                PlannedStep::statement(index, "fixture", sql, params)
            })
            .collect()
    }
}

/// Collects the parts of a [`Scenario`] and validates them on
/// [`ScenarioBuilder::build`].
#[cfg_attr(feature = "serde", derive(::serde::Deserialize))]
#[cfg_attr(feature = "schemars", derive(::schemars::JsonSchema))]
#[derive(Debug, Clone)]
pub struct ScenarioBuilder {
    name: String,
    #[cfg_attr(feature = "serde", serde(default))]
    description: String,
    #[cfg_attr(feature = "serde", serde(default))]
    expectation: String,
    #[cfg_attr(feature = "serde", serde(default))]
    fixture: Vec<Statement>,
    #[cfg_attr(feature = "serde", serde(default))]
    steps: Vec<ScenarioStep>,
    rule: Option<VerdictRule>,
}

impl ScenarioBuilder {
    #[must_use]
    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = text.into();
        self
    }

    #[must_use]
    pub fn expectation(mut self, text: impl Into<String>) -> Self {
        self.expectation = text.into();
        self
    }

    #[must_use]
    pub fn fixture(mut self, sql: impl Into<String>, params: impl IntoIterator<Item = Value>) -> Self {
        self.fixture.push(Statement::new(sql, params));
        self
    }

    #[must_use]
    pub fn step(mut self, step: ScenarioStep) -> Self {
        self.steps.push(step);
        self
    }

    #[must_use]
    pub fn steps(mut self, steps: impl IntoIterator<Item = ScenarioStep>) -> Self {
        self.steps.extend(steps);
        self
    }

    #[must_use]
    pub fn rule(mut self, rule: VerdictRule) -> Self {
        self.rule = Some(rule);
        self
    }

    /// # Errors
    ///
    /// Returns the first [`ScenarioError`] found.
    pub fn build(self) -> Result<Scenario, ScenarioError> {
        if self.name.trim().is_empty() {
            return Err(ScenarioError::EmptyName);
        }
        let rule = self.rule.ok_or(ScenarioError::MissingRule)?;

        for (index, statement) in self.fixture.iter().enumerate() {
            if statement.sql.trim().is_empty() {
                return Err(ScenarioError::MissingSql {
                    session: None,
                    index,
                });
            }
            statement
                .check_params()
                .map_err(|(placeholders, params)| ScenarioError::ParameterCount {
                    session: None,
                    index,
                    placeholders,
                    params,
                })?;
        }

        let mut captures = BTreeSet::new();
        for session in SessionId::BOTH {
            let mut open = false;
            let mut last_barrier = None;
            for (index, step) in self.steps.iter().filter(|s| s.session == session).enumerate() {
                match step.kind {
                    StepKind::Execute | StepKind::Query => {
                        let statement = step
                            .statement
                            .as_ref()
                            .filter(|s| !s.sql.trim().is_empty())
                            .ok_or(ScenarioError::MissingSql {
                                session: Some(session),
                                index,
                            })?;
                        statement.check_params().map_err(|(placeholders, params)| {
                            ScenarioError::ParameterCount {
                                session: Some(session),
                                index,
                                placeholders,
                                params,
                            }
                        })?;
                        if step.kind == StepKind::Query {
                            let key = step
                                .capture
                                .as_deref()
                                .filter(|key| !key.is_empty())
                                .ok_or(ScenarioError::MissingCapture { session, index })?;
                            if !captures.insert(key.to_string()) {
                                return Err(ScenarioError::DuplicateCapture(key.to_string()));
                            }
                        }
                    }
                    StepKind::Begin => {
                        if open {
                            return Err(ScenarioError::NestedBegin { session, index });
                        }
                        open = true;
                    }
                    StepKind::Commit | StepKind::Rollback => {
                        if !open {
                            return Err(ScenarioError::NoTransaction { session, index });
                        }
                        open = false;
                    }
                    StepKind::WaitBarrier(n) => {
                        if last_barrier.is_some_and(|last| n <= last) {
                            return Err(ScenarioError::BarrierOrder {
                                session,
                                index,
                                barrier: n,
                            });
                        }
                        last_barrier = Some(n);
                    }
                    StepKind::SetIsolation => {}
                }
            }
        }

        let barriers = |session: SessionId| -> Vec<u32> {
            self.steps
                .iter()
                .filter(|step| step.session == session)
                .filter_map(|step| match step.kind {
                    StepKind::WaitBarrier(n) => Some(n),
                    _ => None,
                })
                .collect()
        };
        let (a, b) = (barriers(SessionId::A), barriers(SessionId::B));
        if a != b {
            return Err(ScenarioError::BarrierMismatch { a, b });
        }

        for key in rule.captures() {
            if !captures.contains(key) {
                return Err(ScenarioError::UnknownCapture(key.to_string()));
            }
        }

        Ok(Scenario {
            name: self.name,
            description: self.description,
            expectation: self.expectation,
            fixture: self.fixture,
            steps: self.steps,
            rule,
        })
    }
}

impl TryFrom<ScenarioBuilder> for Scenario {
    type Error = ScenarioError;

    fn try_from(builder: ScenarioBuilder) -> Result<Self, Self::Error> {
        builder.build()
    }
}

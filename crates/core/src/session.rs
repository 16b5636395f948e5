//! One database session bound to one leased connection.
//!
//! A [`Session`] never returns an error from [`Session::run`]: every fault is
//! classified and folded into a [`StepResult`]. The only way the connection
//! goes back to the pool is [`Session::release`], which may be called any
//! number of times and is also run on drop.

use core::fmt::{self, Display, Formatter};
use std::time::Instant;

use crate::fault::{classify, ErrorKind};
use crate::isolation::Dialect;
use crate::pool::{AcquireError, Connection, ConnectionPool, Lease};
use crate::report::StepResult;
use crate::scenario::{PlannedStep, StepKind};
use crate::value::{QueryOutput, Value};

/// Which of the two choreographed sessions a step belongs to.
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[cfg_attr(feature = "schemars", derive(::schemars::JsonSchema))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SessionId {
    A,
    B,
}

impl SessionId {
    pub const BOTH: [Self; 2] = [Self::A, Self::B];

    #[must_use]
    pub const fn partner(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
        }
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Transaction state of a session.
///
/// `Committed` and `RolledBack` fall back to `Idle` as soon as the next step
/// runs. `Released` is terminal.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    TransactionActive,
    Committed,
    RolledBack,
    Released,
}

/// Rollback during release failed. Logged, never propagated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseFailure {
    pub session: SessionId,
    pub kind: ErrorKind,
    pub message: String,
}

impl Display for ReleaseFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "session {} failed to roll back on release ({}): {}",
            self.session, self.kind, self.message
        )
    }
}

impl std::error::Error for ReleaseFailure {}

pub struct Session<'pool, P: ConnectionPool> {
    id: SessionId,
    dialect: Dialect,
    lease: Lease<'pool, P>,
    state: SessionState,
    /// Message of the fault that cut the connection, if any.
    lost: Option<String>,
    origin: Instant,
}

impl<'pool, P: ConnectionPool> Session<'pool, P> {
    /// Lease a connection for session `id`. Step offsets are measured from
    /// `origin`.
    ///
    /// # Errors
    ///
    /// Returns the pool's [`AcquireError`].
    pub fn open(id: SessionId, pool: &'pool P, origin: Instant) -> Result<Self, AcquireError> {
        let lease = Lease::acquire(pool)?;
        tracing::debug!(session = %id, backend = pool.name(), "session opened");
        Ok(Self {
            id,
            dialect: pool.dialect(),
            lease,
            state: SessionState::Idle,
            lost: None,
            origin,
        })
    }

    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }

    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub const fn in_transaction(&self) -> bool {
        matches!(self.state, SessionState::TransactionActive)
    }

    /// Execute one step and describe what happened.
    ///
    /// Barriers are coordinated by the engine; a session treats them as
    /// no-ops.
    pub fn run(&mut self, step: &PlannedStep) -> StepResult {
        let started = Instant::now();
        let offset = started.saturating_duration_since(self.origin);

        if matches!(self.state, SessionState::Committed | SessionState::RolledBack) {
            self.state = SessionState::Idle;
        }

        let outcome = self.dispatch(step);
        let duration = started.elapsed();

        match outcome {
            Ok(value) => {
                tracing::debug!(
                    session = %self.id,
                    step = step.index,
                    label = %step.label,
                    micros = duration.as_micros(),
                    "step ok"
                );
                StepResult::succeeded(self.id, step, value, offset, duration)
            }
            Err((kind, message)) => {
                tracing::debug!(
                    session = %self.id,
                    step = step.index,
                    label = %step.label,
                    kind = %kind,
                    %message,
                    "step failed"
                );
                StepResult::failed(self.id, step, kind, message, offset, duration)
            }
        }
    }

    fn dispatch(&mut self, step: &PlannedStep) -> Result<Option<Value>, (ErrorKind, String)> {
        if self.state == SessionState::Released {
            return Err((ErrorKind::InvalidState, "session already released".to_string()));
        }
        if matches!(step.kind, StepKind::WaitBarrier(_)) {
            return Ok(None);
        }
        if let Some(message) = &self.lost {
            return Err((
                ErrorKind::ConnectionLost,
                format!("connection lost earlier in this session: {message}"),
            ));
        }

        match step.kind {
            StepKind::Begin if self.in_transaction() => Err((
                ErrorKind::InvalidState,
                "a transaction is already active".to_string(),
            )),
            StepKind::Commit | StepKind::Rollback if !self.in_transaction() => Err((
                ErrorKind::InvalidState,
                "no active transaction".to_string(),
            )),
            StepKind::Begin => {
                self.round_trip(step)?;
                self.state = SessionState::TransactionActive;
                Ok(None)
            }
            StepKind::Commit => match self.round_trip(step) {
                Ok(_) => {
                    self.state = SessionState::Committed;
                    Ok(None)
                }
                Err(err) => {
                    // A failed COMMIT leaves nothing to commit.
                    self.state = SessionState::RolledBack;
                    Err(err)
                }
            },
            StepKind::Rollback => {
                let result = self.round_trip(step);
                self.state = SessionState::RolledBack;
                result.map(|_| None)
            }
            StepKind::Query => {
                let output = self.round_trip(step)?;
                Ok(output.scalar().cloned())
            }
            StepKind::SetIsolation | StepKind::Execute | StepKind::WaitBarrier(_) => {
                self.round_trip(step).map(|_| None)
            }
        }
    }

    fn round_trip(&mut self, step: &PlannedStep) -> Result<QueryOutput, (ErrorKind, String)> {
        let Some(sql) = step.sql.as_deref() else {
            return Err((ErrorKind::InvalidStatement, "step carries no SQL".to_string()));
        };
        self.execute(sql, &step.params)
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<QueryOutput, (ErrorKind, String)> {
        let Some(connection) = self.lease.connection() else {
            return Err((ErrorKind::InvalidState, "session already released".to_string()));
        };
        connection.execute(sql, params).map_err(|fault| {
            let kind = classify(self.dialect, &fault);
            if kind == ErrorKind::ConnectionLost {
                self.lost = Some(fault.message.clone());
            }
            (kind, fault.to_string())
        })
    }

    /// Roll back an open transaction. Returns whether a rollback was sent.
    ///
    /// # Errors
    ///
    /// Returns a [`ReleaseFailure`] when the rollback itself fails.
    pub fn rollback_if_active(&mut self) -> Result<bool, ReleaseFailure> {
        if !self.in_transaction() || self.lost.is_some() {
            return Ok(false);
        }
        let rollback = self.dialect.sql_for_rollback();
        let result = self.execute(rollback, &[]);
        self.state = SessionState::RolledBack;
        match result {
            Ok(_) => Ok(true),
            Err((kind, message)) => Err(ReleaseFailure {
                session: self.id,
                kind,
                message,
            }),
        }
    }

    /// Roll back anything still open and return the connection to the pool.
    ///
    /// Only the first call does anything. A failed rollback is logged and
    /// handed back for inspection; the connection is returned regardless.
    pub fn release(&mut self) -> Option<ReleaseFailure> {
        if self.state == SessionState::Released {
            return None;
        }
        let failure = self.rollback_if_active().err();
        if let Some(failure) = &failure {
            tracing::warn!(session = %self.id, kind = %failure.kind, "{failure}");
        }
        self.lease.release();
        self.state = SessionState::Released;
        tracing::debug!(session = %self.id, "session released");
        failure
    }
}

impl<P: ConnectionPool> Drop for Session<'_, P> {
    fn drop(&mut self) {
        self.release();
    }
}

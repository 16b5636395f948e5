use core::fmt::{self, Display, Formatter};

use crate::session::SessionId;

/// A scenario definition that cannot be run.
///
/// `index` fields count the steps of one session from zero; `session: None`
/// points at the fixture.
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScenarioError {
    EmptyName,
    MissingRule,
    /// An `exec` or `query` step has no SQL.
    MissingSql {
        session: Option<SessionId>,
        index: usize,
    },
    /// A `query` step has no capture key.
    MissingCapture { session: SessionId, index: usize },
    DuplicateCapture(String),
    /// The placeholders of a template do not cover exactly its parameters.
    ParameterCount {
        session: Option<SessionId>,
        index: usize,
        placeholders: usize,
        params: usize,
    },
    /// `begin` while the session's transaction is still open.
    NestedBegin { session: SessionId, index: usize },
    /// `commit` or `rollback` without an open transaction.
    NoTransaction { session: SessionId, index: usize },
    /// Barrier indices of a session must strictly increase.
    BarrierOrder {
        session: SessionId,
        index: usize,
        barrier: u32,
    },
    /// Both sessions must wait on the same barrier sequence.
    BarrierMismatch { a: Vec<u32>, b: Vec<u32> },
    /// The verdict rule names a capture no query records.
    UnknownCapture(String),
}

fn location(session: Option<SessionId>, index: usize) -> String {
    session.map_or_else(
        || format!("fixture statement {index}"),
        |session| format!("session {session} step {index}"),
    )
}

impl Display for ScenarioError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyName => f.write_str("scenario name is empty"),
            Self::MissingRule => f.write_str("scenario has no verdict rule"),
            Self::MissingSql { session, index } => {
                write!(f, "{} has no SQL", location(*session, *index))
            }
            Self::MissingCapture { session, index } => {
                write!(f, "session {session} step {index}: query without capture key")
            }
            Self::DuplicateCapture(key) => write!(f, "capture `{key}` is recorded twice"),
            Self::ParameterCount {
                session,
                index,
                placeholders,
                params,
            } => write!(
                f,
                "{} uses {placeholders} placeholder(s) but binds {params} parameter(s)",
                location(*session, *index)
            ),
            Self::NestedBegin { session, index } => write!(
                f,
                "session {session} step {index}: begin inside an open transaction"
            ),
            Self::NoTransaction { session, index } => write!(
                f,
                "session {session} step {index}: no open transaction to end"
            ),
            Self::BarrierOrder {
                session,
                index,
                barrier,
            } => write!(
                f,
                "session {session} step {index}: barrier {barrier} is out of order"
            ),
            Self::BarrierMismatch { a, b } => {
                write!(f, "sessions wait on different barriers: A {a:?}, B {b:?}")
            }
            Self::UnknownCapture(key) => write!(f, "verdict references unknown capture `{key}`"),
        }
    }
}

impl std::error::Error for ScenarioError {}

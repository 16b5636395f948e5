//! Database faults and their classification.
//!
//! Drivers hand back a [`DbFault`] carrying whatever the server said. The
//! session turns it into an [`ErrorKind`] with [`classify`] so that verdicts
//! and reports never depend on raw driver errors.

use core::fmt::{self, Display, Formatter};

use crate::isolation::Dialect;

/// A raw failure reported by a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbFault {
    /// Five-character SQLSTATE, when the driver exposes one.
    pub sqlstate: Option<String>,
    /// Vendor error number (`MySQL` error codes).
    pub vendor_code: Option<u32>,
    pub message: String,
}

impl DbFault {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            sqlstate: None,
            vendor_code: None,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn with_sqlstate(mut self, sqlstate: impl Into<String>) -> Self {
        self.sqlstate = Some(sqlstate.into());
        self
    }

    #[must_use]
    pub const fn with_vendor_code(mut self, code: u32) -> Self {
        self.vendor_code = Some(code);
        self
    }
}

impl Display for DbFault {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match (&self.sqlstate, self.vendor_code) {
            (Some(state), Some(code)) => write!(f, "[{code} {state}] {}", self.message),
            (Some(state), None) => write!(f, "[{state}] {}", self.message),
            (None, Some(code)) => write!(f, "[{code}] {}", self.message),
            (None, None) => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for DbFault {}

/// Classified failure, attached to failed steps and failed runs.
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
#[cfg_attr(feature = "schemars", derive(::schemars::JsonSchema))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorKind {
    // -- step level --
    /// The server refused to serialize this transaction against another one.
    SerializationConflict,
    /// A lock wait exceeded the configured bound.
    LockWaitTimeout,
    /// The server broke a lock cycle by aborting this transaction.
    Deadlock,
    ConstraintViolation,
    ConnectionLost,
    /// The transaction was already aborted by an earlier failure.
    TransactionAborted,
    /// Syntax error, unknown table/column/variable.
    InvalidStatement,
    /// The step is not valid in the session's current state.
    InvalidState,
    Other,

    // -- run level --
    /// The partner session did not reach a barrier in time.
    BarrierTimeout,
    Cancelled,
    ConnectionAcquisition,
    FixtureFailed,
    WorkerPanicked,
}

impl ErrorKind {
    /// Kinds that abort a whole run rather than a single step.
    #[must_use]
    pub const fn is_run_level(self) -> bool {
        matches!(
            self,
            Self::BarrierTimeout
                | Self::Cancelled
                | Self::ConnectionAcquisition
                | Self::FixtureFailed
                | Self::WorkerPanicked
        )
    }

    /// Whether the server rejected the transaction to keep it isolated.
    #[must_use]
    pub const fn is_conflict(self) -> bool {
        matches!(self, Self::SerializationConflict | Self::Deadlock)
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::SerializationConflict => "serialization-conflict",
            Self::LockWaitTimeout => "lock-wait-timeout",
            Self::Deadlock => "deadlock",
            Self::ConstraintViolation => "constraint-violation",
            Self::ConnectionLost => "connection-lost",
            Self::TransactionAborted => "transaction-aborted",
            Self::InvalidStatement => "invalid-statement",
            Self::InvalidState => "invalid-state",
            Self::Other => "other",
            Self::BarrierTimeout => "barrier-timeout",
            Self::Cancelled => "cancelled",
            Self::ConnectionAcquisition => "connection-acquisition",
            Self::FixtureFailed => "fixture-failed",
            Self::WorkerPanicked => "worker-panicked",
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Classify a driver fault for `dialect`.
///
/// Vendor codes win over SQLSTATE, SQLSTATE wins over the message text.
#[must_use]
pub fn classify(dialect: Dialect, fault: &DbFault) -> ErrorKind {
    let by_code = match dialect {
        Dialect::MySql => fault.vendor_code.and_then(classify_mysql_code),
        Dialect::Postgres => None,
    };
    by_code
        .or_else(|| fault.sqlstate.as_deref().and_then(classify_sqlstate))
        .or_else(|| classify_message(&fault.message))
        .unwrap_or(ErrorKind::Other)
}

const fn classify_mysql_code(code: u32) -> Option<ErrorKind> {
    Some(match code {
        1205 => ErrorKind::LockWaitTimeout,
        1213 => ErrorKind::Deadlock,
        1062 | 1048 | 1451 | 1452 | 3819 => ErrorKind::ConstraintViolation,
        2002 | 2006 | 2013 | 2055 => ErrorKind::ConnectionLost,
        1054 | 1064 | 1146 | 1193 => ErrorKind::InvalidStatement,
        1568 => ErrorKind::InvalidState,
        _ => return None,
    })
}

fn classify_sqlstate(state: &str) -> Option<ErrorKind> {
    Some(match state {
        "40001" => ErrorKind::SerializationConflict,
        "40P01" => ErrorKind::Deadlock,
        "55P03" => ErrorKind::LockWaitTimeout,
        "25P02" => ErrorKind::TransactionAborted,
        "25001" => ErrorKind::InvalidState,
        _ if state.starts_with("23") => ErrorKind::ConstraintViolation,
        _ if state.starts_with("08") => ErrorKind::ConnectionLost,
        _ if state.starts_with("42") => ErrorKind::InvalidStatement,
        _ => return None,
    })
}

fn classify_message(message: &str) -> Option<ErrorKind> {
    let message = message.to_ascii_lowercase();
    if message.contains("lock timeout") || message.contains("lock wait timeout") {
        Some(ErrorKind::LockWaitTimeout)
    } else if message.contains("could not serialize") {
        Some(ErrorKind::SerializationConflict)
    } else if message.contains("deadlock") {
        Some(ErrorKind::Deadlock)
    } else if message.contains("connection") && message.contains("closed") {
        Some(ErrorKind::ConnectionLost)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_postgres_sqlstates() {
        let cases = [
            ("40001", ErrorKind::SerializationConflict),
            ("40P01", ErrorKind::Deadlock),
            ("55P03", ErrorKind::LockWaitTimeout),
            ("25P02", ErrorKind::TransactionAborted),
            ("23505", ErrorKind::ConstraintViolation),
            ("08006", ErrorKind::ConnectionLost),
            ("42P01", ErrorKind::InvalidStatement),
            ("XX000", ErrorKind::Other),
        ];
        for (state, kind) in cases {
            let fault = DbFault::new("boom").with_sqlstate(state);
            assert_eq!(classify(Dialect::Postgres, &fault), kind, "{state}");
        }
    }

    #[test]
    fn test_mysql_codes_win_over_sqlstate() {
        // 1213 carries SQLSTATE 40001 but is a deadlock.
        let fault = DbFault::new("Deadlock found when trying to get lock")
            .with_sqlstate("40001")
            .with_vendor_code(1213);
        assert_eq!(classify(Dialect::MySql, &fault), ErrorKind::Deadlock);

        let fault = DbFault::new("Lock wait timeout exceeded; try restarting transaction")
            .with_sqlstate("HY000")
            .with_vendor_code(1205);
        assert_eq!(classify(Dialect::MySql, &fault), ErrorKind::LockWaitTimeout);
    }

    #[test]
    fn test_vendor_codes_ignored_for_postgres() {
        let fault = DbFault::new("whatever").with_vendor_code(1205);
        assert_eq!(classify(Dialect::Postgres, &fault), ErrorKind::Other);
    }

    #[test]
    fn test_message_fallback() {
        let fault = DbFault::new("canceling statement due to lock timeout");
        assert_eq!(classify(Dialect::Postgres, &fault), ErrorKind::LockWaitTimeout);
        let fault = DbFault::new("could not serialize access due to concurrent update");
        assert_eq!(
            classify(Dialect::Postgres, &fault),
            ErrorKind::SerializationConflict
        );
    }

    #[test]
    fn test_run_level_kinds() {
        assert!(ErrorKind::BarrierTimeout.is_run_level());
        assert!(ErrorKind::Cancelled.is_run_level());
        assert!(!ErrorKind::LockWaitTimeout.is_run_level());
        assert!(ErrorKind::Deadlock.is_conflict());
    }

    #[test]
    fn test_fault_display() {
        let fault = DbFault::new("nope").with_sqlstate("40001");
        assert_eq!(fault.to_string(), "[40001] nope");
    }
}

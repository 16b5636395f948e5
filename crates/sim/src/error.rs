use core::fmt::{self, Display, Formatter};
use core::time::Duration;

use isocop_core::fault::DbFault;
use isocop_core::Dialect;

/// Everything the simulated server can refuse a statement for.
///
/// The error only becomes a [`DbFault`] at the connection boundary, where
/// [`SimError::into_fault`] picks the SQLSTATE and vendor code the real
/// server of the session's dialect would send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimError {
    /// Text at or near which the statement stopped making sense.
    Syntax(String),
    UndefinedTable(String),
    UndefinedColumn(String),
    UndefinedFunction(String),
    /// One-based number of a placeholder with no parameter bound.
    UndefinedParameter(usize),
    UnknownVariable(String),
    InvalidSetting { name: String, value: String },
    TypeMismatch(String),
    Overflow,
    DuplicateKey { table: String, id: i64 },
    NotNull(String),
    LockTimeout(Duration),
    SerializationFailure,
    /// A statement in a Postgres transaction that already failed.
    InFailedTransaction,
    /// The transaction had failed, so `COMMIT` rolled it back.
    CommitRolledBack,
    /// Transaction characteristics changed after the transaction started.
    ActiveTransaction,
    ConnectionClosed,
}

impl SimError {
    /// Render for `dialect` the way that server reports it.
    #[must_use]
    pub fn into_fault(self, dialect: Dialect) -> DbFault {
        let message = self.to_string();
        match dialect {
            Dialect::Postgres => DbFault::new(message).with_sqlstate(self.sqlstate()),
            Dialect::MySql => {
                let (code, state) = self.mysql_code();
                DbFault::new(message)
                    .with_sqlstate(state)
                    .with_vendor_code(code)
            }
        }
    }

    const fn sqlstate(&self) -> &'static str {
        match self {
            Self::Syntax(_) => "42601",
            Self::UndefinedTable(_) => "42P01",
            Self::UndefinedColumn(_) => "42703",
            Self::UndefinedFunction(_) => "42883",
            Self::UndefinedParameter(_) => "42P02",
            Self::UnknownVariable(_) => "42704",
            Self::InvalidSetting { .. } => "22023",
            Self::TypeMismatch(_) => "42804",
            Self::Overflow => "22003",
            Self::DuplicateKey { .. } => "23505",
            Self::NotNull(_) => "23502",
            Self::LockTimeout(_) => "55P03",
            Self::SerializationFailure => "40001",
            Self::InFailedTransaction | Self::CommitRolledBack => "25P02",
            Self::ActiveTransaction => "25001",
            Self::ConnectionClosed => "08006",
        }
    }

    const fn mysql_code(&self) -> (u32, &'static str) {
        match self {
            Self::Syntax(_) => (1064, "42000"),
            Self::UndefinedTable(_) => (1146, "42S02"),
            Self::UndefinedColumn(_) => (1054, "42S22"),
            Self::UndefinedFunction(_) => (1305, "42000"),
            Self::UndefinedParameter(_) => (1210, "HY000"),
            Self::UnknownVariable(_) => (1193, "HY000"),
            Self::InvalidSetting { .. } => (1231, "42000"),
            Self::TypeMismatch(_) => (1366, "HY000"),
            Self::Overflow => (1690, "22003"),
            Self::DuplicateKey { .. } => (1062, "23000"),
            Self::NotNull(_) => (1048, "23000"),
            Self::LockTimeout(_) => (1205, "HY000"),
            Self::SerializationFailure => (1213, "40001"),
            Self::InFailedTransaction | Self::CommitRolledBack => (1180, "HY000"),
            Self::ActiveTransaction => (1568, "25001"),
            Self::ConnectionClosed => (2013, "HY000"),
        }
    }
}

impl Display for SimError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Syntax(near) => write!(f, "syntax error at or near \"{near}\""),
            Self::UndefinedTable(table) => write!(f, "relation \"{table}\" does not exist"),
            Self::UndefinedColumn(column) => write!(f, "column \"{column}\" does not exist"),
            Self::UndefinedFunction(name) => write!(f, "function {name} does not exist"),
            Self::UndefinedParameter(n) => write!(f, "there is no parameter ${n}"),
            Self::UnknownVariable(name) => {
                write!(f, "unrecognized configuration parameter \"{name}\"")
            }
            Self::InvalidSetting { name, value } => {
                write!(f, "invalid value for parameter \"{name}\": \"{value}\"")
            }
            Self::TypeMismatch(what) => write!(f, "type mismatch: {what}"),
            Self::Overflow => f.write_str("integer out of range"),
            Self::DuplicateKey { table, id } => write!(
                f,
                "duplicate key value violates unique constraint \"{table}_pkey\" (id={id})"
            ),
            Self::NotNull(column) => {
                write!(f, "null value in column \"{column}\" violates not-null constraint")
            }
            Self::LockTimeout(waited) => write!(
                f,
                "lock wait timeout exceeded after {} ms",
                waited.as_millis()
            ),
            Self::SerializationFailure => {
                f.write_str("could not serialize access due to concurrent update")
            }
            Self::InFailedTransaction => f.write_str(
                "current transaction is aborted, commands ignored until end of transaction block",
            ),
            Self::CommitRolledBack => {
                f.write_str("current transaction is aborted, COMMIT rolled it back")
            }
            Self::ActiveTransaction => f.write_str(
                "transaction characteristics can't be changed while a transaction is in progress",
            ),
            Self::ConnectionClosed => f.write_str("server closed the connection unexpectedly"),
        }
    }
}

impl std::error::Error for SimError {}

#[cfg(test)]
mod tests {
    use isocop_core::fault::{classify, ErrorKind};

    use super::*;

    #[test]
    fn test_faults_classify_per_dialect() {
        let cases = [
            (SimError::LockTimeout(Duration::from_secs(1)), ErrorKind::LockWaitTimeout),
            (SimError::Syntax("?".to_string()), ErrorKind::InvalidStatement),
            (
                SimError::DuplicateKey {
                    table: "users".to_string(),
                    id: 1,
                },
                ErrorKind::ConstraintViolation,
            ),
            (SimError::ConnectionClosed, ErrorKind::ConnectionLost),
            (SimError::UnknownVariable("x".to_string()), ErrorKind::InvalidStatement),
        ];
        for dialect in Dialect::ALL {
            for (error, kind) in cases.clone() {
                assert_eq!(classify(dialect, &error.into_fault(dialect)), kind, "{dialect}");
            }
        }
    }

    #[test]
    fn test_postgres_only_states() {
        let pg = |e: SimError| classify(Dialect::Postgres, &e.into_fault(Dialect::Postgres));
        assert_eq!(pg(SimError::SerializationFailure), ErrorKind::SerializationConflict);
        assert_eq!(pg(SimError::CommitRolledBack), ErrorKind::TransactionAborted);
        assert_eq!(pg(SimError::InFailedTransaction), ErrorKind::TransactionAborted);
    }

    #[test]
    fn test_mysql_carries_vendor_code() {
        let fault = SimError::LockTimeout(Duration::from_secs(2)).into_fault(Dialect::MySql);
        assert_eq!(fault.vendor_code, Some(1205));
        assert_eq!(fault.sqlstate.as_deref(), Some("HY000"));
    }
}

//! Isolation levels, backend dialects, and the SQL each dialect needs to
//! drive a transaction.
//!
//! Everything here is pure: the catalog only renders text, it never talks to
//! a database.

use core::fmt::{self, Display, Formatter};
use core::str::FromStr;
use core::time::Duration;

use crate::sql;
use crate::value::Value;

/// Transaction isolation levels, ordered from weakest to strongest.
///
/// The derived `Ord` follows declaration order, so sorting a set of levels
/// yields ascending isolation strength.
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
#[cfg_attr(feature = "schemars", derive(::schemars::JsonSchema))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IsolationLevel {
    /// Dirty reads are allowed.
    ReadUncommitted,
    /// Every statement sees data committed before it began.
    ReadCommitted,
    /// Every statement sees data committed before the transaction began.
    RepeatableRead,
    /// Equivalent to some serial execution.
    Serializable,
}

impl IsolationLevel {
    /// All levels in ascending strength.
    pub const ALL: [Self; 4] = [
        Self::ReadUncommitted,
        Self::ReadCommitted,
        Self::RepeatableRead,
        Self::Serializable,
    ];

    /// The SQL spelling, e.g. `REPEATABLE READ`.
    #[must_use]
    pub const fn sql_name(self) -> &'static str {
        match self {
            Self::ReadUncommitted => "READ UNCOMMITTED",
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
        }
    }

    /// The kebab-case spelling used on the command line and in reports.
    #[must_use]
    pub const fn slug(self) -> &'static str {
        match self {
            Self::ReadUncommitted => "read-uncommitted",
            Self::ReadCommitted => "read-committed",
            Self::RepeatableRead => "repeatable-read",
            Self::Serializable => "serializable",
        }
    }
}

impl Display for IsolationLevel {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql_name())
    }
}

/// Error returned when a string names no isolation level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownIsolationLevel(pub String);

impl Display for UnknownIsolationLevel {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "unknown isolation level `{}`", self.0)
    }
}

impl std::error::Error for UnknownIsolationLevel {}

impl FromStr for IsolationLevel {
    type Err = UnknownIsolationLevel;

    /// Accepts the slug (`read-committed`) or the SQL spelling
    /// (`READ COMMITTED`), case-insensitively and with any run of spaces,
    /// dashes or underscores between words.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: Vec<String> = s
            .split(|c: char| c.is_whitespace() || c == '-' || c == '_')
            .filter(|word| !word.is_empty())
            .map(str::to_ascii_lowercase)
            .collect();
        match normalized.join(" ").as_str() {
            "read uncommitted" => Ok(Self::ReadUncommitted),
            "read committed" => Ok(Self::ReadCommitted),
            "repeatable read" => Ok(Self::RepeatableRead),
            "serializable" => Ok(Self::Serializable),
            _ => Err(UnknownIsolationLevel(s.to_string())),
        }
    }
}

/// SQL dialect of a backend. Selects the catalog entry for that backend.
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
#[cfg_attr(feature = "schemars", derive(::schemars::JsonSchema))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Dialect {
    /// `PostgreSQL`. `READ UNCOMMITTED` is accepted by the server but behaves
    /// as `READ COMMITTED`, so it is not declared.
    Postgres,
    /// `MySQL` / Percona Server with `InnoDB`.
    MySql,
}

/// Error returned when a level is requested that a dialect does not declare.
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct UnsupportedIsolationLevel {
    pub dialect: Dialect,
    pub level: IsolationLevel,
}

impl Display for UnsupportedIsolationLevel {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} does not support {}", self.dialect, self.level)
    }
}

impl std::error::Error for UnsupportedIsolationLevel {}

const POSTGRES_LEVELS: [IsolationLevel; 3] = [
    IsolationLevel::ReadCommitted,
    IsolationLevel::RepeatableRead,
    IsolationLevel::Serializable,
];

impl Dialect {
    /// All known dialects.
    pub const ALL: [Self; 2] = [Self::Postgres, Self::MySql];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::MySql => "mysql",
        }
    }

    /// Levels this dialect declares, in ascending strength.
    #[must_use]
    pub const fn supported_levels(self) -> &'static [IsolationLevel] {
        match self {
            Self::Postgres => &POSTGRES_LEVELS,
            Self::MySql => &IsolationLevel::ALL,
        }
    }

    #[must_use]
    pub fn supports(self, level: IsolationLevel) -> bool {
        self.supported_levels().contains(&level)
    }

    /// Statement that sets the isolation level for every following
    /// transaction of the session.
    ///
    /// # Errors
    ///
    /// Returns [`UnsupportedIsolationLevel`] when the dialect does not declare
    /// `level`.
    pub fn sql_for_set_level(self, level: IsolationLevel) -> Result<String, UnsupportedIsolationLevel> {
        if !self.supports(level) {
            return Err(UnsupportedIsolationLevel { dialect: self, level });
        }
        Ok(match self {
            Self::Postgres => format!(
                "SET SESSION CHARACTERISTICS AS TRANSACTION ISOLATION LEVEL {}",
                level.sql_name()
            ),
            Self::MySql => format!("SET SESSION TRANSACTION ISOLATION LEVEL {}", level.sql_name()),
        })
    }

    #[must_use]
    pub const fn sql_for_begin(self) -> &'static str {
        match self {
            Self::Postgres => "BEGIN",
            Self::MySql => "START TRANSACTION",
        }
    }

    #[must_use]
    pub const fn sql_for_commit(self) -> &'static str {
        "COMMIT"
    }

    #[must_use]
    pub const fn sql_for_rollback(self) -> &'static str {
        "ROLLBACK"
    }

    /// Statement bounding how long a statement may wait for a row lock.
    ///
    /// Returns `None` for a zero duration, which leaves the server default in
    /// place.
    #[must_use]
    pub fn sql_for_lock_timeout(self, timeout: Duration) -> Option<String> {
        if timeout.is_zero() {
            return None;
        }
        Some(match self {
            Self::Postgres => format!("SET lock_timeout = '{}ms'", timeout_millis(timeout)),
            Self::MySql => format!(
                "SET SESSION innodb_lock_wait_timeout = {}",
                whole_seconds(timeout)
            ),
        })
    }

    /// The lock wait the server will actually apply for `timeout`.
    ///
    /// `innodb_lock_wait_timeout` only takes whole seconds, so `MySQL` rounds
    /// up to at least one second.
    #[must_use]
    pub fn effective_lock_wait(self, timeout: Duration) -> Duration {
        match self {
            _ if timeout.is_zero() => Duration::ZERO,
            Self::Postgres => Duration::from_millis(timeout_millis(timeout)),
            Self::MySql => Duration::from_secs(whole_seconds(timeout)),
        }
    }

    /// Render a `$n` template for this dialect and order `params` to match.
    ///
    /// Postgres keeps `$n` and the parameters untouched. `MySQL` only knows
    /// positional `?`, so every `$n` becomes `?` and the parameter list is
    /// rebuilt in order of occurrence (a placeholder used twice binds twice).
    /// Placeholders inside string literals, quoted identifiers and comments
    /// are left alone.
    #[must_use]
    pub fn bind(self, template: &str, params: &[Value]) -> (String, Vec<Value>) {
        match self {
            Self::Postgres => (template.to_string(), params.to_vec()),
            Self::MySql => {
                let mut rendered = String::with_capacity(template.len());
                let mut bound = Vec::with_capacity(params.len());
                for (token, text) in sql::tokenize_with_text(template) {
                    match sql::placeholder_index(&token, text) {
                        Some(index) => {
                            rendered.push('?');
                            bound.push(params.get(index).cloned().unwrap_or(Value::Null));
                        }
                        None => rendered.push_str(text),
                    }
                }
                (rendered, bound)
            }
        }
    }
}

impl Display for Dialect {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(Self::Postgres),
            "mysql" | "percona" | "innodb" => Ok(Self::MySql),
            other => Err(format!("unknown dialect `{other}`")),
        }
    }
}

fn timeout_millis(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX).max(1)
}

fn whole_seconds(timeout: Duration) -> u64 {
    let secs = timeout.as_secs();
    let rounded = if timeout.subsec_nanos() > 0 { secs + 1 } else { secs };
    rounded.max(1)
}

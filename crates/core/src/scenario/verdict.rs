//! Verdict rules and their evaluation over captured values.

use core::fmt::{self, Display, Formatter};
use std::collections::{BTreeMap, BTreeSet};

use crate::fault::ErrorKind;
use crate::report::StepResult;
use crate::session::SessionId;
use crate::value::Value;

/// Outcome of one scenario run.
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
#[cfg_attr(feature = "schemars", derive(::schemars::JsonSchema))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Verdict {
    /// The database let the anomaly happen.
    AnomalyObserved,
    /// The database prevented it, by isolation or by rejecting a transaction.
    AnomalyPrevented,
    /// The observations fit neither outcome, or a needed capture is missing.
    Indeterminate,
    /// The run itself failed; nothing can be said about the database.
    EngineError,
}

impl Verdict {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::AnomalyObserved => "anomaly-observed",
            Self::AnomalyPrevented => "anomaly-prevented",
            Self::Indeterminate => "indeterminate",
            Self::EngineError => "engine-error",
        }
    }
}

impl Display for Verdict {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Predicate over the captures of a run.
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "rule", rename_all = "kebab-case"))]
#[cfg_attr(feature = "schemars", derive(::schemars::JsonSchema))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerdictRule {
    /// Two increments of the same row. Observed when the final value carries
    /// both deltas without any conflict; prevented when a conflict rejected
    /// one side and exactly one delta survived.
    LostUpdate {
        initial: String,
        last: String,
        deltas: [i64; 2],
    },
    /// A read of a row another session wrote but never committed. Observed
    /// when `probe` saw `dirty_value`; prevented when it saw `baseline` or
    /// timed out waiting for the writer's lock.
    DirtyRead {
        baseline: String,
        probe: String,
        dirty_value: Value,
    },
    /// Two reads by one session that should agree. Observed when they differ;
    /// prevented when they are equal or the reader hit a conflict.
    Changed { first: String, second: String },
}

impl VerdictRule {
    /// Capture keys the rule reads.
    #[must_use]
    pub fn captures(&self) -> Vec<&str> {
        match self {
            Self::LostUpdate { initial, last, .. } => vec![initial, last],
            Self::DirtyRead { baseline, probe, .. } => vec![baseline, probe],
            Self::Changed { first, second } => vec![first, second],
        }
    }

    #[must_use]
    pub fn evaluate(&self, observed: &Observations) -> Verdict {
        match self {
            Self::LostUpdate {
                initial,
                last,
                deltas: [first, second],
            } => {
                let (Some(initial), Some(last)) = (
                    observed.capture(initial).and_then(Value::as_int),
                    observed.capture(last).and_then(Value::as_int),
                ) else {
                    return Verdict::Indeterminate;
                };
                let one = [initial.checked_add(*first), initial.checked_add(*second)];
                let both = initial.checked_add(*first).and_then(|v| v.checked_add(*second));
                if observed.any_conflict() {
                    if one.contains(&Some(last)) {
                        Verdict::AnomalyPrevented
                    } else {
                        Verdict::Indeterminate
                    }
                } else if both == Some(last) {
                    Verdict::AnomalyObserved
                } else {
                    Verdict::Indeterminate
                }
            }
            Self::DirtyRead {
                baseline,
                probe,
                dirty_value,
            } => {
                if observed.failure(probe) == Some(ErrorKind::LockWaitTimeout) {
                    return Verdict::AnomalyPrevented;
                }
                match observed.capture(probe) {
                    Some(seen) if seen == dirty_value => Verdict::AnomalyObserved,
                    Some(seen) if observed.capture(baseline) == Some(seen) => {
                        Verdict::AnomalyPrevented
                    }
                    _ => Verdict::Indeterminate,
                }
            }
            Self::Changed { first, second } => {
                let reader = observed.session_of(first);
                if reader.is_some_and(|session| observed.conflict_in(session)) {
                    return Verdict::AnomalyPrevented;
                }
                match (observed.capture(first), observed.capture(second)) {
                    (Some(a), Some(b)) if a == b => Verdict::AnomalyPrevented,
                    (Some(_), Some(_)) => Verdict::AnomalyObserved,
                    _ => Verdict::Indeterminate,
                }
            }
        }
    }
}

/// What the two sessions saw, distilled from their step results.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Observations {
    captures: BTreeMap<String, Value>,
    failures: BTreeMap<String, ErrorKind>,
    owners: BTreeMap<String, SessionId>,
    conflicts: BTreeSet<SessionId>,
}

impl Observations {
    pub fn collect<'a>(results: impl IntoIterator<Item = &'a StepResult>) -> Self {
        let mut observed = Self::default();
        for result in results {
            if result.error_kind().is_some_and(ErrorKind::is_conflict) {
                observed.conflicts.insert(result.session());
            }
            let Some(key) = result.capture() else {
                continue;
            };
            observed.owners.insert(key.to_string(), result.session());
            match (result.value(), result.error_kind()) {
                (Some(value), None) => {
                    observed.captures.insert(key.to_string(), value.clone());
                }
                (_, Some(kind)) => {
                    observed.failures.insert(key.to_string(), kind);
                }
                (None, None) => {}
            }
        }
        observed
    }

    #[must_use]
    pub fn capture(&self, key: &str) -> Option<&Value> {
        self.captures.get(key)
    }

    /// Why the step recording `key` failed, if it did.
    #[must_use]
    pub fn failure(&self, key: &str) -> Option<ErrorKind> {
        self.failures.get(key).copied()
    }

    #[must_use]
    pub fn session_of(&self, key: &str) -> Option<SessionId> {
        self.owners.get(key).copied()
    }

    /// Whether `session` hit a serialization conflict or deadlock.
    #[must_use]
    pub fn conflict_in(&self, session: SessionId) -> bool {
        self.conflicts.contains(&session)
    }

    #[must_use]
    pub fn any_conflict(&self) -> bool {
        !self.conflicts.is_empty()
    }

    #[must_use]
    pub fn into_captures(self) -> BTreeMap<String, Value> {
        self.captures
    }
}

//! The four classic anomalies over a two-row `users` table.
//!
//! Every scenario starts from the same fixture: Alice (id 1) with balance 100
//! and Bob (id 2) with balance 200.

use super::{Scenario, ScenarioError, ScenarioStep, VerdictRule};
use crate::session::SessionId::{A, B};
use crate::value::Value;

pub const LOST_UPDATE: &str = "lost-update";
pub const DIRTY_READ: &str = "dirty-read";
pub const NON_REPEATABLE_READ: &str = "non-repeatable-read";
pub const PHANTOM_READ: &str = "phantom-read";

/// Names of the built-in scenarios, in catalog order.
pub const NAMES: [&str; 4] = [LOST_UPDATE, DIRTY_READ, NON_REPEATABLE_READ, PHANTOM_READ];

const SELECT_BALANCE: &str = "SELECT balance FROM users WHERE id = $1";
const ADD_BALANCE: &str = "UPDATE users SET balance = balance + $1 WHERE id = $2";

fn with_fixture(name: &str) -> super::ScenarioBuilder {
    Scenario::builder(name)
        .fixture("DELETE FROM users", [])
        .fixture(
            "INSERT INTO users (id, name, balance) VALUES ($1, $2, $3), ($4, $5, $6)",
            [
                Value::Int(1),
                Value::from("Alice"),
                Value::Int(100),
                Value::Int(2),
                Value::from("Bob"),
                Value::Int(200),
            ],
        )
}

fn alice() -> [Value; 1] {
    [Value::Int(1)]
}

/// # Errors
///
/// Never fails for the built-in definitions; the `Result` comes from
/// validation.
pub fn lost_update() -> Result<Scenario, ScenarioError> {
    with_fixture(LOST_UPDATE)
        .description(
            "Both transactions update the same row without seeing each other's updates, \
             leading to lost changes.",
        )
        .expectation("The final balance should reflect both updates (i.e., balance + 30).")
        .steps([
            ScenarioStep::isolation(A),
            ScenarioStep::begin(A),
            ScenarioStep::query(A, "init", SELECT_BALANCE, alice()),
            ScenarioStep::barrier(A, 1),
            ScenarioStep::execute(A, ADD_BALANCE, [Value::Int(10), Value::Int(1)]),
            ScenarioStep::barrier(A, 2),
            ScenarioStep::commit(A),
            ScenarioStep::barrier(A, 3),
            ScenarioStep::query(A, "final", SELECT_BALANCE, alice()),
        ])
        .steps([
            ScenarioStep::isolation(B),
            ScenarioStep::begin(B),
            ScenarioStep::query(B, "seen", SELECT_BALANCE, [Value::Int(2)]),
            ScenarioStep::barrier(B, 1),
            ScenarioStep::barrier(B, 2),
            ScenarioStep::execute(B, ADD_BALANCE, [Value::Int(20), Value::Int(1)]),
            ScenarioStep::commit(B),
            ScenarioStep::barrier(B, 3),
        ])
        .rule(VerdictRule::LostUpdate {
            initial: "init".to_string(),
            last: "final".to_string(),
            deltas: [10, 20],
        })
        .build()
}

/// # Errors
///
/// Never fails for the built-in definitions.
pub fn dirty_read() -> Result<Scenario, ScenarioError> {
    with_fixture(DIRTY_READ)
        .description(
            "One transaction reads data that has been modified by another uncommitted transaction.",
        )
        .expectation("The second transaction sees the uncommitted balance of 1000.")
        .steps([
            ScenarioStep::isolation(A),
            ScenarioStep::begin(A),
            ScenarioStep::query(A, "before", SELECT_BALANCE, alice()),
            ScenarioStep::execute(
                A,
                "UPDATE users SET balance = $1 WHERE id = $2",
                [Value::Int(1000), Value::Int(1)],
            ),
            ScenarioStep::barrier(A, 1),
            ScenarioStep::barrier(A, 2),
            ScenarioStep::rollback(A),
        ])
        .steps([
            ScenarioStep::isolation(B),
            ScenarioStep::barrier(B, 1),
            ScenarioStep::begin(B),
            ScenarioStep::query(B, "dirty", SELECT_BALANCE, alice()),
            ScenarioStep::barrier(B, 2),
            ScenarioStep::commit(B),
        ])
        .rule(VerdictRule::DirtyRead {
            baseline: "before".to_string(),
            probe: "dirty".to_string(),
            dirty_value: Value::Int(1000),
        })
        .build()
}

/// # Errors
///
/// Never fails for the built-in definitions.
pub fn non_repeatable_read() -> Result<Scenario, ScenarioError> {
    with_fixture(NON_REPEATABLE_READ)
        .description(
            "One transaction reads data multiple times, but the data has changed due to another \
             committed transaction.",
        )
        .expectation("The first read and second read should show different values.")
        .steps([
            ScenarioStep::isolation(A),
            ScenarioStep::begin(A),
            ScenarioStep::query(A, "r1", SELECT_BALANCE, alice()),
            ScenarioStep::barrier(A, 1),
            ScenarioStep::barrier(A, 2),
            ScenarioStep::query(A, "r2", SELECT_BALANCE, alice()),
            ScenarioStep::commit(A),
        ])
        .steps([
            ScenarioStep::isolation(B),
            ScenarioStep::barrier(B, 1),
            ScenarioStep::begin(B),
            ScenarioStep::execute(B, ADD_BALANCE, [Value::Int(50), Value::Int(1)]),
            ScenarioStep::commit(B),
            ScenarioStep::barrier(B, 2),
        ])
        .rule(VerdictRule::Changed {
            first: "r1".to_string(),
            second: "r2".to_string(),
        })
        .build()
}

/// # Errors
///
/// Never fails for the built-in definitions.
pub fn phantom_read() -> Result<Scenario, ScenarioError> {
    const COUNT: &str = "SELECT COUNT(*) AS count FROM users";
    with_fixture(PHANTOM_READ)
        .description(
            "A transaction reads a set of rows that satisfies a condition, but another transaction \
             inserts rows that satisfy the condition after the first read.",
        )
        .expectation("The first count and second count should be different.")
        .steps([
            ScenarioStep::isolation(A),
            ScenarioStep::begin(A),
            ScenarioStep::query(A, "c1", COUNT, []),
            ScenarioStep::barrier(A, 1),
            ScenarioStep::barrier(A, 2),
            ScenarioStep::query(A, "c2", COUNT, []),
            ScenarioStep::commit(A),
        ])
        .steps([
            ScenarioStep::isolation(B),
            ScenarioStep::barrier(B, 1),
            ScenarioStep::begin(B),
            ScenarioStep::execute(
                B,
                "INSERT INTO users (id, name, balance) VALUES ($1, $2, $3)",
                [Value::Int(3), Value::from("Charlie"), Value::Int(300)],
            ),
            ScenarioStep::commit(B),
            ScenarioStep::barrier(B, 2),
        ])
        .rule(VerdictRule::Changed {
            first: "c1".to_string(),
            second: "c2".to_string(),
        })
        .build()
}

/// Look up a built-in scenario by name.
#[must_use]
pub fn find(name: &str) -> Option<Scenario> {
    let scenario = match name {
        LOST_UPDATE => lost_update(),
        DIRTY_READ => dirty_read(),
        NON_REPEATABLE_READ => non_repeatable_read(),
        PHANTOM_READ => phantom_read(),
        _ => return None,
    };
    scenario.ok()
}

/// All built-in scenarios, in catalog order.
#[must_use]
pub fn all() -> Vec<Scenario> {
    NAMES.iter().filter_map(|name| find(name)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_builtin_validates() {
        lost_update().unwrap();
        dirty_read().unwrap();
        non_repeatable_read().unwrap();
        phantom_read().unwrap();
        assert_eq!(all().len(), NAMES.len());
    }

    #[test]
    fn test_find() {
        assert_eq!(find("phantom-read").unwrap().name(), PHANTOM_READ);
        assert!(find("write-skew").is_none());
    }

    #[test]
    fn test_sessions_share_barriers() {
        for scenario in all() {
            assert_eq!(scenario.barriers(A), scenario.barriers(B), "{}", scenario.name());
            assert!(!scenario.description().is_empty());
            assert!(!scenario.expectation().is_empty());
        }
    }

    #[test]
    fn test_dirty_read_probe_runs_after_the_write() {
        let scenario = dirty_read().unwrap();
        let a: Vec<String> = scenario.steps_for(A).map(ScenarioStep::label).collect();
        let b: Vec<String> = scenario.steps_for(B).map(ScenarioStep::label).collect();
        let write = a.iter().position(|l| l == "exec").unwrap();
        let a_barrier = a.iter().position(|l| l == "barrier 1").unwrap();
        let probe = b.iter().position(|l| l == "query dirty").unwrap();
        let b_barrier = b.iter().position(|l| l == "barrier 1").unwrap();
        assert!(write < a_barrier);
        assert!(b_barrier < probe);
    }
}

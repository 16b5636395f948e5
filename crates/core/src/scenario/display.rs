//! Text rendering of scenarios in the `.scn` format read by `isocop_parser`.

use core::fmt::Write as _;

use super::{Scenario, ScenarioStep, Statement, StepKind, VerdictRule};
use crate::value::Value;

fn quote(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn params(values: &[Value]) -> String {
    values
        .iter()
        .map(|value| match value {
            Value::Null => "null".to_string(),
            other => other.to_sql_literal(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn statement(statement: &Statement) -> String {
    if statement.params.is_empty() {
        statement.sql.clone()
    } else {
        format!("{} | {}", statement.sql, params(&statement.params))
    }
}

fn step(step: &ScenarioStep) -> String {
    let body = match (step.kind, &step.statement) {
        (StepKind::Execute, Some(s)) => format!("exec {}", statement(s)),
        (StepKind::Query, Some(s)) => format!(
            "query {} = {}",
            step.capture.as_deref().unwrap_or_default(),
            statement(s)
        ),
        (kind, _) => kind.to_string(),
    };
    format!("{}: {body}", step.session)
}

/// Render `scenario` so that parsing the output yields an equal scenario.
#[must_use]
pub fn format_scenario(scenario: &Scenario) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "scenario {}", scenario.name());
    if !scenario.description().is_empty() {
        let _ = writeln!(out, "description {}", quote(scenario.description()));
    }
    if !scenario.expectation().is_empty() {
        let _ = writeln!(out, "expect {}", quote(scenario.expectation()));
    }
    for fixture in scenario.fixture() {
        let _ = writeln!(out, "fixture {}", statement(fixture));
    }
    out.push('\n');
    let mut previous = None;
    for s in scenario.steps() {
        if previous.is_some_and(|session| session != s.session) {
            out.push('\n');
        }
        previous = Some(s.session);
        let _ = writeln!(out, "{}", step(s));
    }
    out.push('\n');
    let rule = match scenario.rule() {
        VerdictRule::LostUpdate {
            initial,
            last,
            deltas: [first, second],
        } => format!("lost-update {initial} {last} {first} {second}"),
        VerdictRule::DirtyRead {
            baseline,
            probe,
            dirty_value,
        } => format!("dirty-read {baseline} {probe} {}", params(core::slice::from_ref(dirty_value))),
        VerdictRule::Changed { first, second } => format!("changed {first} {second}"),
    };
    let _ = writeln!(out, "verdict {rule}");
    out
}

/// Render several scenarios separated by blank lines.
#[must_use]
pub fn format_scenarios<'a>(scenarios: impl IntoIterator<Item = &'a Scenario>) -> String {
    scenarios
        .into_iter()
        .map(format_scenario)
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::builtin;

    #[test]
    fn test_format_lost_update() {
        let text = format_scenario(&builtin::lost_update().unwrap());
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "scenario lost-update");
        assert!(lines[1].starts_with("description \"Both transactions"));
        assert!(text.contains(
            "fixture INSERT INTO users (id, name, balance) VALUES ($1, $2, $3), ($4, $5, $6) \
             | 1, 'Alice', 100, 2, 'Bob', 200\n"
        ));
        assert!(text.contains("A: query init = SELECT balance FROM users WHERE id = $1 | 1\n"));
        assert!(text.contains("B: exec UPDATE users SET balance = balance + $1 WHERE id = $2 | 20, 1\n"));
        assert!(text.contains("B: barrier 3\n"));
        assert!(text.ends_with("verdict lost-update init final 10 20\n"));
    }

    #[test]
    fn test_quote_escapes() {
        assert_eq!(quote("say \"hi\"\\"), "\"say \\\"hi\\\"\\\\\"");
    }

    #[test]
    fn test_dirty_read_verdict_line() {
        let text = format_scenario(&builtin::dirty_read().unwrap());
        assert!(text.ends_with("verdict dirty-read before dirty 1000\n"));
        assert!(text.contains("A: rollback\n"));
    }
}

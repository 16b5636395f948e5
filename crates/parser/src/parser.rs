//! Winnow-based parser for the line-oriented scenario DSL.
//!
//! Grammar (one directive per line):
//! ```text
//! file       = (blank | comment | scenario)*
//! comment    = "//" REST_OF_LINE
//! scenario   = "scenario" NAME (directive)*
//! directive  = "description" QUOTED
//!            | "expect" QUOTED
//!            | "fixture" statement
//!            | SESSION ":" step
//!            | "verdict" rule
//! step       = "isolation" | "begin" | "commit" | "rollback"
//!            | "barrier" INTEGER
//!            | "exec" statement
//!            | "query" KEY "=" statement
//! statement  = SQL ("|" value ("," value)*)?
//! value      = INTEGER | "'" TEXT "'" | "null"
//! rule       = "lost-update" KEY KEY INTEGER INTEGER
//!            | "dirty-read" KEY KEY value
//!            | "changed" KEY KEY
//! SESSION    = "A" | "B"
//! ```
//!
//! The parameter separator is the first `|` of the line that is neither part
//! of `||` nor inside a string literal, quoted identifier or comment.

use isocop_core::scenario::{Scenario, ScenarioBuilder, ScenarioStep, Statement, VerdictRule};
use isocop_core::session::SessionId;
use isocop_core::sql::{tokenize_with_text, SqlTokenKind};
use isocop_core::value::Value;
use winnow::ascii::{dec_int, dec_uint, space0, space1, Caseless};
use winnow::combinator::{alt, cut_err, delimited, eof, preceded, repeat, separated};
use winnow::error::{ContextError, ErrMode, StrContext, StrContextValue};
use winnow::prelude::*;
use winnow::token::{literal, none_of, rest, take, take_while};
use winnow::ModalResult;

// ---------------------------------------------------------------------------
// Public error type
// ---------------------------------------------------------------------------

/// A parse error with human-readable location information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub message: String,
    pub line: usize,
    pub column: usize,
}

impl core::fmt::Display for ParseError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "parse error at line {}, column {}: {}",
            self.line, self.column, self.message
        )
    }
}

impl std::error::Error for ParseError {}

// ---------------------------------------------------------------------------
// Public entry points
// ---------------------------------------------------------------------------

/// Parse every scenario in `input`.
///
/// # Errors
///
/// Returns a [`ParseError`] when a line does not conform to the grammar, when
/// a directive appears before the first `scenario` line, or when a scenario
/// fails validation. Validation errors point at the scenario's header line.
pub fn parse_scenarios(input: &str) -> Result<Vec<Scenario>, ParseError> {
    let mut scenarios = Vec::new();
    let mut current: Option<Pending> = None;
    let mut offset = 0;

    for raw in input.split_inclusive('\n') {
        let text = raw.trim_end_matches(['\n', '\r']);
        let mut stream = text;
        let parsed = line.parse_next(&mut stream).map_err(|e| {
            let consumed = text.len().saturating_sub(stream.len());
            error_at(input, offset + consumed, describe(e))
        })?;

        match parsed {
            None => {}
            Some(Directive::Scenario(name)) => {
                if let Some(pending) = current.take() {
                    scenarios.push(pending.finish(input)?);
                }
                current = Some(Pending::new(name, offset));
            }
            Some(directive) => {
                let pending = current.take().ok_or_else(|| {
                    error_at(input, offset, "expected a `scenario` line first".to_string())
                })?;
                current = Some(pending.apply(directive, input, offset)?);
            }
        }
        offset += raw.len();
    }

    if let Some(pending) = current {
        scenarios.push(pending.finish(input)?);
    }
    Ok(scenarios)
}

/// Parse an input holding exactly one scenario.
///
/// # Errors
///
/// Everything [`parse_scenarios`] rejects, plus an input with no scenario or
/// more than one.
pub fn parse_scenario(input: &str) -> Result<Scenario, ParseError> {
    let mut scenarios = parse_scenarios(input)?;
    match scenarios.len() {
        1 => Ok(scenarios.remove(0)),
        0 => Err(error_at(input, input.len(), "no scenario found".to_string())),
        n => Err(error_at(input, 0, format!("expected one scenario, found {n}"))),
    }
}

// ---------------------------------------------------------------------------
// Line/column helpers
// ---------------------------------------------------------------------------

/// Convert a byte offset into the original input to 1-based (line, column).
fn offset_to_line_col(input: &str, offset: usize) -> (usize, usize) {
    let safe_offset = offset.min(input.len());
    let prefix = &input[..safe_offset];
    let line = prefix.bytes().filter(|&b| b == b'\n').count() + 1;
    let column = prefix
        .rfind('\n')
        .map_or_else(|| prefix.len() + 1, |pos| prefix.len() - pos);
    (line, column)
}

fn error_at(input: &str, offset: usize, message: String) -> ParseError {
    let (line, column) = offset_to_line_col(input, offset);
    ParseError {
        message,
        line,
        column,
    }
}

fn describe(error: ErrMode<ContextError>) -> String {
    let message = match error {
        ErrMode::Backtrack(e) | ErrMode::Cut(e) => e.to_string(),
        ErrMode::Incomplete(_) => String::new(),
    };
    let message = message.lines().collect::<Vec<_>>().join(", ");
    if message.is_empty() {
        "unexpected input".to_string()
    } else {
        message
    }
}

// ---------------------------------------------------------------------------
// Scenario assembly
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Directive {
    Scenario(String),
    Description(String),
    Expect(String),
    Fixture(Statement),
    Step(ScenarioStep),
    Verdict(VerdictRule),
}

/// A scenario whose lines are still being read.
struct Pending {
    name: String,
    builder: ScenarioBuilder,
    /// Byte offset of the `scenario` line.
    start: usize,
    has_rule: bool,
}

impl Pending {
    fn new(name: String, start: usize) -> Self {
        Self {
            builder: Scenario::builder(name.clone()),
            name,
            start,
            has_rule: false,
        }
    }

    fn apply(mut self, directive: Directive, input: &str, offset: usize) -> Result<Self, ParseError> {
        self.builder = match directive {
            Directive::Scenario(_) => return Ok(self),
            Directive::Description(text) => self.builder.description(text),
            Directive::Expect(text) => self.builder.expectation(text),
            Directive::Fixture(statement) => self.builder.fixture(statement.sql, statement.params),
            Directive::Step(step) => self.builder.step(step),
            Directive::Verdict(rule) => {
                if self.has_rule {
                    return Err(error_at(
                        input,
                        offset,
                        format!("scenario `{}` has a second verdict", self.name),
                    ));
                }
                self.has_rule = true;
                self.builder.rule(rule)
            }
        };
        Ok(self)
    }

    fn finish(self, input: &str) -> Result<Scenario, ParseError> {
        let name = self.name;
        self.builder
            .build()
            .map_err(|e| error_at(input, self.start, format!("scenario `{name}`: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Leaf parsers
// ---------------------------------------------------------------------------

fn expected(what: &'static str) -> StrContext {
    StrContext::Expected(StrContextValue::Description(what))
}

/// Scenario name: letters, digits, `-`, `_` and `.`.
fn name(input: &mut &str) -> ModalResult<String> {
    take_while(1.., |c: char| {
        c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')
    })
    .map(str::to_string)
    .context(expected("a scenario name"))
    .parse_next(input)
}

/// Capture key: letters, digits, `-` and `_`.
fn key(input: &mut &str) -> ModalResult<String> {
    take_while(1.., |c: char| c.is_alphanumeric() || matches!(c, '-' | '_'))
        .map(str::to_string)
        .context(expected("a capture key"))
        .parse_next(input)
}

/// `"..."` with `\"`, `\\` and `\n` escapes.
fn quoted(input: &mut &str) -> ModalResult<String> {
    let escaped = preceded(
        '\\',
        alt(('n'.value('\n'), '"', '\\')).context(expected("`n`, `\"` or `\\` after `\\`")),
    );
    delimited(
        '"',
        repeat(0.., alt((escaped, none_of(['"', '\\'])))),
        cut_err('"').context(expected("closing `\"`")),
    )
    .context(expected("a quoted string"))
    .parse_next(input)
}

/// `'...'` with `''` standing for one quote.
fn text(input: &mut &str) -> ModalResult<String> {
    delimited(
        '\'',
        repeat(0.., alt(("''".value('\''), none_of('\'')))),
        cut_err('\'').context(expected("closing `'`")),
    )
    .parse_next(input)
}

fn value(input: &mut &str) -> ModalResult<Value> {
    alt((
        dec_int.map(Value::Int),
        text.map(Value::Text),
        Caseless("null").value(Value::Null),
    ))
    .context(expected("an integer, a 'text' literal or null"))
    .parse_next(input)
}

// ---------------------------------------------------------------------------
// Statements
// ---------------------------------------------------------------------------

/// Byte offset of the parameter separator in `line`.
fn separator_offset(line: &str) -> Option<usize> {
    let tokens = tokenize_with_text(line);
    let is_pipe = |i: usize| {
        tokens
            .get(i)
            .is_some_and(|(t, text)| t.kind == SqlTokenKind::Symbol && *text == "|")
    };
    (0..tokens.len())
        .find(|&i| is_pipe(i) && !is_pipe(i + 1) && !(i > 0 && is_pipe(i - 1)))
        .map(|i| tokens[i].0.span.start)
}

/// SQL up to the end of the line, then an optional parameter list.
fn statement(input: &mut &str) -> ModalResult<Statement> {
    let end = input.find(['\n', '\r']).unwrap_or(input.len());
    let split = separator_offset(&input[..end]);
    let chars = input[..split.unwrap_or(end)].chars().count();
    let sql = take(chars)
        .map(str::trim)
        .verify(|sql: &str| !sql.is_empty())
        .context(expected("a SQL statement"))
        .parse_next(input)?;
    let params = if split.is_some() {
        ('|', space0).parse_next(input)?;
        cut_err(separated(1.., value, (space0, ',', space0))).parse_next(input)?
    } else {
        Vec::new()
    };
    Ok(Statement::new(sql, params))
}

// ---------------------------------------------------------------------------
// Steps and rules
// ---------------------------------------------------------------------------

fn session(input: &mut &str) -> ModalResult<SessionId> {
    alt(('A'.value(SessionId::A), 'B'.value(SessionId::B))).parse_next(input)
}

fn step(input: &mut &str) -> ModalResult<ScenarioStep> {
    let session = session.parse_next(input)?;
    (space0, ':', space0).parse_next(input)?;
    alt((
        preceded(("exec", space1), cut_err(statement))
            .map(move |s| ScenarioStep::execute(session, s.sql, s.params)),
        preceded(
            ("query", space1),
            cut_err((key, space0, '=', space0, statement)),
        )
        .map(move |(capture, _, _, _, s)| ScenarioStep::query(session, capture, s.sql, s.params)),
        preceded(("barrier", space1), cut_err(dec_uint))
            .map(move |index| ScenarioStep::barrier(session, index)),
        "isolation".value(ScenarioStep::isolation(session)),
        "begin".value(ScenarioStep::begin(session)),
        "commit".value(ScenarioStep::commit(session)),
        "rollback".value(ScenarioStep::rollback(session)),
    ))
    .context(expected(
        "isolation, begin, commit, rollback, barrier, exec or query",
    ))
    .parse_next(input)
}

fn rule(input: &mut &str) -> ModalResult<VerdictRule> {
    alt((
        preceded(
            ("lost-update", space1),
            cut_err((key, space1, key, space1, dec_int, space1, dec_int)),
        )
        .map(|(initial, _, last, _, first, _, second)| VerdictRule::LostUpdate {
            initial,
            last,
            deltas: [first, second],
        }),
        preceded(
            ("dirty-read", space1),
            cut_err((key, space1, key, space1, value)),
        )
        .map(|(baseline, _, probe, _, dirty_value)| VerdictRule::DirtyRead {
            baseline,
            probe,
            dirty_value,
        }),
        preceded(("changed", space1), cut_err((key, space1, key)))
            .map(|(first, _, second)| VerdictRule::Changed { first, second }),
    ))
    .context(expected("lost-update, dirty-read or changed"))
    .parse_next(input)
}

// ---------------------------------------------------------------------------
// Lines
// ---------------------------------------------------------------------------

fn directive(input: &mut &str) -> ModalResult<Directive> {
    alt((
        preceded(("scenario", space1), cut_err(name)).map(Directive::Scenario),
        preceded(("description", space1), cut_err(quoted)).map(Directive::Description),
        preceded(("expect", space1), cut_err(quoted)).map(Directive::Expect),
        preceded(("fixture", space1), cut_err(statement)).map(Directive::Fixture),
        preceded(("verdict", space1), cut_err(rule)).map(Directive::Verdict),
        step.map(Directive::Step),
    ))
    .context(expected("a directive"))
    .parse_next(input)
}

/// One line without its terminator: blank, a comment or a directive.
fn line(input: &mut &str) -> ModalResult<Option<Directive>> {
    space0.parse_next(input)?;
    let parsed = alt((
        eof.value(None),
        (literal("//"), rest).value(None),
        directive.map(Some),
    ))
    .parse_next(input)?;
    (space0, eof)
        .context(expected("end of line"))
        .parse_next(input)?;
    Ok(parsed)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Winnow-based parser for the SQL subset the simulated server understands.
//!
//! Grammar (keywords are case-insensitive, a trailing `;` is allowed):
//! ```text
//! statement  = "BEGIN" | "START" "TRANSACTION" | "COMMIT" | "ROLLBACK"
//!            | "SET" "SESSION" "CHARACTERISTICS" "AS" "TRANSACTION" isolation
//!            | "SET" "SESSION" "TRANSACTION" isolation
//!            | "SET" "TRANSACTION" isolation
//!            | "SET" ("SESSION" | "LOCAL")? IDENT ("=" | "TO") setting
//!            | "SELECT" ("pg_sleep" | "SLEEP") "(" DECIMAL ")"
//!            | "SELECT" item ("," item)* ("FROM" IDENT)? where?
//!            | "UPDATE" IDENT "SET" IDENT "=" expr ("," IDENT "=" expr)* where?
//!            | "INSERT" "INTO" IDENT "(" IDENT ("," IDENT)* ")" "VALUES" tuple ("," tuple)*
//!            | "DELETE" "FROM" IDENT where?
//! isolation  = "ISOLATION" "LEVEL" level
//! item       = "*" | "COUNT" "(" "*" ")" alias? | expr alias?
//! where      = "WHERE" cond ("AND" cond)*
//! cond       = expr ("=" | "<>" | "!=" | "<=" | ">=" | "<" | ">") expr
//! expr       = term (("+" | "-") term)*
//! term       = unary ("*" unary)*
//! unary      = "-" unary | INTEGER | STRING | "NULL" | "$" INTEGER | IDENT | "(" expr ")"
//! ```
//!
//! Only numbered `$n` placeholders reach the grammar; [`prepare`] rewrites
//! `MySQL`'s positional `?` first.

use core::time::Duration;

use isocop_core::isolation::IsolationLevel;
use isocop_core::sql::{self, SqlTokenKind};
use isocop_core::Dialect;
use winnow::ascii::{dec_uint, digit1, multispace0, Caseless};
use winnow::combinator::{alt, eof, opt, separated};
use winnow::error::{ContextError, ErrMode};
use winnow::prelude::*;
use winnow::token::{literal, one_of, take_while};
use winnow::ModalResult;

use crate::error::SimError;

// ---------------------------------------------------------------------------
// Syntax tree
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Begin,
    Commit,
    Rollback,
    SetIsolation {
        scope: IsolationScope,
        level: IsolationLevel,
    },
    SetVariable {
        name: String,
        value: Setting,
    },
    Sleep {
        function: String,
        duration: Duration,
    },
    Select(Select),
    Update(Update),
    Insert(Insert),
    Delete(Delete),
}

impl Command {
    /// Whether the statement reads or writes table data.
    #[must_use]
    pub const fn touches_data(&self) -> bool {
        matches!(
            self,
            Self::Select(_) | Self::Update(_) | Self::Insert(_) | Self::Delete(_)
        )
    }
}

/// Which of the isolation `SET` spellings was used.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum IsolationScope {
    /// `SET SESSION CHARACTERISTICS AS TRANSACTION` (Postgres).
    Characteristics,
    /// `SET SESSION TRANSACTION` (`MySQL`).
    Session,
    /// `SET TRANSACTION`: the current or next transaction only.
    Transaction,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Setting {
    Int(i64),
    Text(String),
    Default,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Int(i64),
    Text(String),
    Null,
    /// Zero-based parameter index.
    Param(usize),
    Column(String),
    Neg(Box<Self>),
    Binary {
        op: BinaryOp,
        lhs: Box<Self>,
        rhs: Box<Self>,
    },
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    pub lhs: Expr,
    pub op: CmpOp,
    pub rhs: Expr,
}

impl Condition {
    /// The key expression when the condition is `id = <constant>`.
    #[must_use]
    pub fn key_lookup(&self) -> Option<&Expr> {
        if self.op != CmpOp::Eq {
            return None;
        }
        match (&self.lhs, &self.rhs) {
            (Expr::Column(c), e) | (e, Expr::Column(c)) if c == "id" && e.is_constant() => Some(e),
            _ => None,
        }
    }
}

impl Expr {
    /// Whether the value does not depend on a row.
    #[must_use]
    pub fn is_constant(&self) -> bool {
        match self {
            Self::Int(_) | Self::Text(_) | Self::Null | Self::Param(_) => true,
            Self::Column(_) => false,
            Self::Neg(inner) => inner.is_constant(),
            Self::Binary { lhs, rhs, .. } => lhs.is_constant() && rhs.is_constant(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectItem {
    Star,
    Count { alias: Option<String> },
    Expr { expr: Expr, alias: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Select {
    pub items: Vec<SelectItem>,
    pub from: Option<String>,
    pub filter: Vec<Condition>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Update {
    pub table: String,
    pub assignments: Vec<(String, Expr)>,
    pub filter: Vec<Condition>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Insert {
    pub table: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Expr>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delete {
    pub table: String,
    pub filter: Vec<Condition>,
}

// ---------------------------------------------------------------------------
// Public entry points
// ---------------------------------------------------------------------------

/// Check the placeholder style for `dialect` and parse `sql`.
///
/// Postgres only accepts `$n`. `MySQL` only accepts `?`, which is numbered
/// here in order of occurrence.
///
/// # Errors
///
/// Returns [`SimError::Syntax`] for the wrong placeholder style or input
/// outside the grammar.
pub fn prepare(dialect: Dialect, sql: &str) -> Result<Command, SimError> {
    let normalized = match dialect {
        Dialect::Postgres => {
            if sql::has_positional_marker(sql) {
                return Err(SimError::Syntax("?".to_string()));
            }
            sql.to_string()
        }
        Dialect::MySql => number_positional_markers(sql)?,
    };
    parse(&normalized)
}

/// Parse one statement that uses `$n` placeholders.
///
/// # Errors
///
/// Returns [`SimError::Syntax`] naming the text at which parsing failed.
pub fn parse(sql: &str) -> Result<Command, SimError> {
    let mut stream: &str = sql;
    statement.parse_next(&mut stream).map_err(|_| {
        let near: String = stream.trim_start().chars().take(20).collect();
        SimError::Syntax(if near.is_empty() {
            "end of input".to_string()
        } else {
            near
        })
    })
}

fn number_positional_markers(sql: &str) -> Result<String, SimError> {
    let mut out = String::with_capacity(sql.len() + 8);
    let mut next = 0_usize;
    for (token, text) in sql::tokenize_with_text(sql) {
        match token.kind {
            SqlTokenKind::Placeholder => return Err(SimError::Syntax(text.to_string())),
            SqlTokenKind::QuestionMark => {
                next += 1;
                out.push('$');
                out.push_str(&next.to_string());
            }
            _ => out.push_str(text),
        }
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Lexical helpers
// ---------------------------------------------------------------------------

fn backtrack<T>() -> ModalResult<T> {
    Err(ErrMode::Backtrack(ContextError::new()))
}

const fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn ws(input: &mut &str) -> ModalResult<()> {
    multispace0.void().parse_next(input)
}

/// A bare word, lower-cased.
fn word(input: &mut &str) -> ModalResult<String> {
    ws.parse_next(input)?;
    (
        one_of(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(0.., is_ident_char),
    )
        .take()
        .map(str::to_ascii_lowercase)
        .parse_next(input)
}

/// One case-insensitive keyword, not followed by an identifier character.
fn kw<'i>(expected: &'static str) -> impl Parser<&'i str, (), ErrMode<ContextError>> {
    move |input: &mut &'i str| -> ModalResult<()> {
        ws.parse_next(input)?;
        literal(Caseless(expected)).parse_next(input)?;
        if input.starts_with(is_ident_char) {
            return backtrack();
        }
        Ok(())
    }
}

/// A punctuation token after optional whitespace.
fn sym<'i>(expected: &'static str) -> impl Parser<&'i str, (), ErrMode<ContextError>> {
    move |input: &mut &'i str| -> ModalResult<()> {
        ws.parse_next(input)?;
        literal(expected).void().parse_next(input)
    }
}

const RESERVED: [&str; 12] = [
    "and", "as", "from", "into", "null", "select", "set", "to", "update", "values", "where",
    "default",
];

fn ident(input: &mut &str) -> ModalResult<String> {
    let name = word.parse_next(input)?;
    if RESERVED.contains(&name.as_str()) {
        return backtrack();
    }
    Ok(name)
}

fn integer(input: &mut &str) -> ModalResult<i64> {
    ws.parse_next(input)?;
    dec_uint
        .verify_map(|v: u64| i64::try_from(v).ok())
        .parse_next(input)
}

/// `'...'` with `''` standing for one quote.
fn text(input: &mut &str) -> ModalResult<String> {
    ws.parse_next(input)?;
    literal("'").parse_next(input)?;
    let mut out = String::new();
    loop {
        let chunk: &str = take_while(0.., |c: char| c != '\'').parse_next(input)?;
        out.push_str(chunk);
        literal("'").parse_next(input)?;
        if opt(literal("'")).parse_next(input)?.is_none() {
            return Ok(out);
        }
        out.push('\'');
    }
}

/// A non-negative decimal number of seconds, kept to microsecond precision.
fn seconds(input: &mut &str) -> ModalResult<Duration> {
    ws.parse_next(input)?;
    let whole: &str = digit1.parse_next(input)?;
    let fraction: Option<&str> = opt((literal("."), digit1).map(|(_, d)| d)).parse_next(input)?;
    let Ok(secs) = whole.parse::<u64>() else {
        return backtrack();
    };
    let micros = fraction.map_or(0, |digits| {
        let padded: String = digits.chars().chain("000000".chars()).take(6).collect();
        padded.parse::<u64>().unwrap_or(0)
    });
    Ok(Duration::from_secs(secs) + Duration::from_micros(micros))
}

// ---------------------------------------------------------------------------
// Expressions
// ---------------------------------------------------------------------------

fn param(input: &mut &str) -> ModalResult<Expr> {
    ws.parse_next(input)?;
    literal("$").parse_next(input)?;
    let n: usize = dec_uint.parse_next(input)?;
    match n.checked_sub(1) {
        Some(index) => Ok(Expr::Param(index)),
        None => backtrack(),
    }
}

fn primary(input: &mut &str) -> ModalResult<Expr> {
    alt((
        integer.map(Expr::Int),
        text.map(Expr::Text),
        param,
        kw("null").map(|()| Expr::Null),
        ident.map(Expr::Column),
        (sym("("), expr, sym(")")).map(|(_, e, _)| e),
    ))
    .parse_next(input)
}

fn unary(input: &mut &str) -> ModalResult<Expr> {
    if opt(sym("-")).parse_next(input)?.is_some() {
        return unary.map(|e| Expr::Neg(Box::new(e))).parse_next(input);
    }
    primary.parse_next(input)
}

fn term(input: &mut &str) -> ModalResult<Expr> {
    let mut lhs = unary.parse_next(input)?;
    while opt(sym("*")).parse_next(input)?.is_some() {
        let rhs = unary.parse_next(input)?;
        lhs = Expr::Binary {
            op: BinaryOp::Mul,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        };
    }
    Ok(lhs)
}

fn expr(input: &mut &str) -> ModalResult<Expr> {
    let mut lhs = term.parse_next(input)?;
    loop {
        let op = opt(alt((
            sym("+").map(|()| BinaryOp::Add),
            sym("-").map(|()| BinaryOp::Sub),
        )))
        .parse_next(input)?;
        let Some(op) = op else {
            return Ok(lhs);
        };
        let rhs = term.parse_next(input)?;
        lhs = Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        };
    }
}

fn cmp_op(input: &mut &str) -> ModalResult<CmpOp> {
    alt((
        sym("<>").map(|()| CmpOp::Ne),
        sym("!=").map(|()| CmpOp::Ne),
        sym("<=").map(|()| CmpOp::Le),
        sym(">=").map(|()| CmpOp::Ge),
        sym("<").map(|()| CmpOp::Lt),
        sym(">").map(|()| CmpOp::Gt),
        sym("=").map(|()| CmpOp::Eq),
    ))
    .parse_next(input)
}

fn condition(input: &mut &str) -> ModalResult<Condition> {
    let lhs = expr.parse_next(input)?;
    let op = cmp_op.parse_next(input)?;
    let rhs = expr.parse_next(input)?;
    Ok(Condition { lhs, op, rhs })
}

fn where_clause(input: &mut &str) -> ModalResult<Vec<Condition>> {
    let filter: Option<Vec<Condition>> =
        opt((kw("where"), separated(1.., condition, kw("and"))).map(|(_, c)| c))
            .parse_next(input)?;
    Ok(filter.unwrap_or_default())
}

fn alias(input: &mut &str) -> ModalResult<Option<String>> {
    opt((kw("as"), word).map(|(_, name)| name)).parse_next(input)
}

// ---------------------------------------------------------------------------
// Statements
// ---------------------------------------------------------------------------

fn isolation_level(input: &mut &str) -> ModalResult<IsolationLevel> {
    kw("isolation").parse_next(input)?;
    kw("level").parse_next(input)?;
    alt((
        (kw("read"), kw("uncommitted")).map(|_| IsolationLevel::ReadUncommitted),
        (kw("read"), kw("committed")).map(|_| IsolationLevel::ReadCommitted),
        (kw("repeatable"), kw("read")).map(|_| IsolationLevel::RepeatableRead),
        kw("serializable").map(|()| IsolationLevel::Serializable),
    ))
    .parse_next(input)
}

fn setting(input: &mut &str) -> ModalResult<Setting> {
    alt((
        integer.map(Setting::Int),
        text.map(Setting::Text),
        kw("default").map(|()| Setting::Default),
    ))
    .parse_next(input)
}

fn set_statement(input: &mut &str) -> ModalResult<Command> {
    kw("set").parse_next(input)?;
    let scope = opt(alt((
        (kw("session"), kw("characteristics"), kw("as"), kw("transaction"))
            .map(|_| IsolationScope::Characteristics),
        (kw("session"), kw("transaction")).map(|_| IsolationScope::Session),
        kw("transaction").map(|()| IsolationScope::Transaction),
    )))
    .parse_next(input)?;
    if let Some(scope) = scope {
        let level = isolation_level.parse_next(input)?;
        return Ok(Command::SetIsolation { scope, level });
    }
    opt(alt((kw("session"), kw("local")))).parse_next(input)?;
    let name = word.parse_next(input)?;
    alt((sym("="), kw("to"))).parse_next(input)?;
    let value = setting.parse_next(input)?;
    Ok(Command::SetVariable { name, value })
}

fn select_item(input: &mut &str) -> ModalResult<SelectItem> {
    alt((
        sym("*").map(|()| SelectItem::Star),
        (kw("count"), sym("("), sym("*"), sym(")"), alias)
            .map(|(_, _, _, _, alias)| SelectItem::Count { alias }),
        (expr, alias).map(|(expr, alias)| SelectItem::Expr { expr, alias }),
    ))
    .parse_next(input)
}

fn sleep_call(input: &mut &str) -> ModalResult<Command> {
    let function = alt((kw("pg_sleep").map(|()| "pg_sleep"), kw("sleep").map(|()| "sleep")))
        .parse_next(input)?;
    sym("(").parse_next(input)?;
    let duration = seconds.parse_next(input)?;
    sym(")").parse_next(input)?;
    Ok(Command::Sleep {
        function: function.to_string(),
        duration,
    })
}

fn select_statement(input: &mut &str) -> ModalResult<Command> {
    kw("select").parse_next(input)?;
    if let Some(sleep) = opt(sleep_call).parse_next(input)? {
        return Ok(sleep);
    }
    let items = separated(1.., select_item, sym(",")).parse_next(input)?;
    let from = opt((kw("from"), ident).map(|(_, t)| t)).parse_next(input)?;
    let filter = where_clause.parse_next(input)?;
    Ok(Command::Select(Select {
        items,
        from,
        filter,
    }))
}

fn assignment(input: &mut &str) -> ModalResult<(String, Expr)> {
    let column = ident.parse_next(input)?;
    sym("=").parse_next(input)?;
    let value = expr.parse_next(input)?;
    Ok((column, value))
}

fn update_statement(input: &mut &str) -> ModalResult<Command> {
    kw("update").parse_next(input)?;
    let table = ident.parse_next(input)?;
    kw("set").parse_next(input)?;
    let assignments = separated(1.., assignment, sym(",")).parse_next(input)?;
    let filter = where_clause.parse_next(input)?;
    Ok(Command::Update(Update {
        table,
        assignments,
        filter,
    }))
}

fn tuple(input: &mut &str) -> ModalResult<Vec<Expr>> {
    sym("(").parse_next(input)?;
    let values = separated(1.., expr, sym(",")).parse_next(input)?;
    sym(")").parse_next(input)?;
    Ok(values)
}

fn insert_statement(input: &mut &str) -> ModalResult<Command> {
    kw("insert").parse_next(input)?;
    kw("into").parse_next(input)?;
    let table = ident.parse_next(input)?;
    sym("(").parse_next(input)?;
    let columns = separated(1.., ident, sym(",")).parse_next(input)?;
    sym(")").parse_next(input)?;
    kw("values").parse_next(input)?;
    let rows = separated(1.., tuple, sym(",")).parse_next(input)?;
    Ok(Command::Insert(Insert {
        table,
        columns,
        rows,
    }))
}

fn delete_statement(input: &mut &str) -> ModalResult<Command> {
    kw("delete").parse_next(input)?;
    kw("from").parse_next(input)?;
    let table = ident.parse_next(input)?;
    let filter = where_clause.parse_next(input)?;
    Ok(Command::Delete(Delete { table, filter }))
}

fn statement(input: &mut &str) -> ModalResult<Command> {
    let command = alt((
        (kw("begin"), opt(alt((kw("work"), kw("transaction"))))).map(|_| Command::Begin),
        (kw("start"), kw("transaction")).map(|_| Command::Begin),
        (kw("commit"), opt(kw("work"))).map(|_| Command::Commit),
        (kw("rollback"), opt(kw("work"))).map(|_| Command::Rollback),
        set_statement,
        select_statement,
        update_statement,
        insert_statement,
        delete_statement,
    ))
    .parse_next(input)?;
    opt(sym(";")).parse_next(input)?;
    ws.parse_next(input)?;
    eof.parse_next(input)?;
    Ok(command)
}

//! Multi-version row storage with row locks.
//!
//! Every row is a chain of committed versions stamped with a commit sequence
//! number, plus at most one uncommitted version owned by the transaction that
//! holds the row's exclusive lock. Reads pick a version according to the
//! transaction's isolation level; writes lock first and change second, so a
//! statement either applies completely or not at all.
//!
//! Lock waits release the store and park on a condition variable that every
//! commit and rollback signals. There is no deadlock detection: a wait ends
//! when the lock is granted or the session's lock wait runs out.

use core::time::Duration;
use std::collections::BTreeMap;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use hashbrown::HashSet;
use isocop_core::isolation::IsolationLevel;
use isocop_core::value::{QueryOutput, Value};
use isocop_core::Dialect;

use crate::error::SimError;
use crate::sql::{
    self, BinaryOp, CmpOp, Command, Condition, Delete, Expr, Insert, IsolationScope, Select,
    SelectItem, Setting, Update,
};

pub type TxnId = u64;

type Row = Vec<Value>;

/// Position of the primary key `id` in every table.
const KEY: usize = 0;

// ---------------------------------------------------------------------------
// Per-connection state
// ---------------------------------------------------------------------------

/// Which versions a read may see.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum View {
    /// Uncommitted versions of other transactions included.
    Dirty,
    /// Latest committed version.
    Latest,
    /// Latest version committed at or before the sequence number.
    Snapshot(u64),
}

#[derive(Debug)]
pub struct Transaction {
    id: TxnId,
    level: IsolationLevel,
    snapshot: Option<u64>,
    explicit: bool,
    failed: bool,
    wrote: bool,
    reads: HashSet<(String, i64)>,
    scans: HashSet<String>,
}

impl Transaction {
    fn new(id: TxnId, level: IsolationLevel, explicit: bool) -> Self {
        Self {
            id,
            level,
            snapshot: None,
            explicit,
            failed: false,
            wrote: false,
            reads: HashSet::new(),
            scans: HashSet::new(),
        }
    }

    #[must_use]
    pub const fn level(&self) -> IsolationLevel {
        self.level
    }

    fn view(&self, dialect: Dialect) -> View {
        match (dialect, self.level) {
            (Dialect::MySql, IsolationLevel::ReadUncommitted) => View::Dirty,
            (_, IsolationLevel::ReadUncommitted | IsolationLevel::ReadCommitted) => View::Latest,
            (_, IsolationLevel::RepeatableRead | IsolationLevel::Serializable) => {
                self.snapshot.map_or(View::Latest, View::Snapshot)
            }
        }
    }

    /// `InnoDB` turns plain reads into shared-locking reads under
    /// `SERIALIZABLE`.
    fn locking_reads(&self, dialect: Dialect) -> bool {
        dialect == Dialect::MySql && self.level == IsolationLevel::Serializable
    }

    /// Postgres snapshot levels refuse to update a row committed by someone
    /// else after the snapshot.
    fn first_updater_wins(&self, dialect: Dialect) -> bool {
        dialect == Dialect::Postgres
            && matches!(
                self.level,
                IsolationLevel::RepeatableRead | IsolationLevel::Serializable
            )
    }

    fn needs_certification(&self, dialect: Dialect) -> bool {
        dialect == Dialect::Postgres && self.level == IsolationLevel::Serializable && self.wrote
    }
}

/// Session variables and the open transaction of one connection.
#[derive(Debug)]
pub struct Context {
    level: IsolationLevel,
    next_level: Option<IsolationLevel>,
    lock_wait: Option<Duration>,
    txn: Option<Transaction>,
}

impl Context {
    #[must_use]
    pub const fn new(dialect: Dialect) -> Self {
        Self {
            level: default_level(dialect),
            next_level: None,
            lock_wait: None,
            txn: None,
        }
    }

    /// Isolation level new transactions start with.
    #[must_use]
    pub const fn level(&self) -> IsolationLevel {
        self.level
    }

    #[must_use]
    pub const fn lock_wait(&self) -> Option<Duration> {
        self.lock_wait
    }

    #[must_use]
    pub const fn transaction(&self) -> Option<&Transaction> {
        self.txn.as_ref()
    }
}

/// Level a fresh session runs at.
#[must_use]
pub const fn default_level(dialect: Dialect) -> IsolationLevel {
    match dialect {
        Dialect::Postgres => IsolationLevel::ReadCommitted,
        Dialect::MySql => IsolationLevel::RepeatableRead,
    }
}

/// Postgres accepts `READ UNCOMMITTED` and runs it as `READ COMMITTED`.
const fn effective_level(dialect: Dialect, level: IsolationLevel) -> IsolationLevel {
    match (dialect, level) {
        (Dialect::Postgres, IsolationLevel::ReadUncommitted) => IsolationLevel::ReadCommitted,
        _ => level,
    }
}

// ---------------------------------------------------------------------------
// Rows and tables
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Version {
    seq: u64,
    /// `None` marks a deletion.
    row: Option<Row>,
}

#[derive(Debug, Default)]
struct RowChain {
    versions: Vec<Version>,
    pending: Option<(TxnId, Option<Row>)>,
    writer: Option<TxnId>,
    readers: HashSet<TxnId>,
}

impl RowChain {
    fn committed_seq(&self) -> u64 {
        self.versions.last().map_or(0, |v| v.seq)
    }

    fn latest(&self) -> Option<&Row> {
        self.versions.last().and_then(|v| v.row.as_ref())
    }

    fn own_pending(&self, me: TxnId) -> Option<Option<&Row>> {
        match &self.pending {
            Some((owner, row)) if *owner == me => Some(row.as_ref()),
            _ => None,
        }
    }

    /// Own uncommitted version, else the latest committed one.
    fn current(&self, me: TxnId) -> Option<&Row> {
        self.own_pending(me).unwrap_or_else(|| self.latest())
    }

    fn visible(&self, me: TxnId, view: View) -> Option<&Row> {
        if let Some(own) = self.own_pending(me) {
            return own;
        }
        match (view, &self.pending) {
            (View::Dirty, Some((_, row))) => row.as_ref(),
            (View::Snapshot(seq), _) => self
                .versions
                .iter()
                .rev()
                .find(|v| v.seq <= seq)
                .and_then(|v| v.row.as_ref()),
            _ => self.latest(),
        }
    }

    fn lock_shared(&mut self, me: TxnId) -> bool {
        if self.writer.is_some_and(|w| w != me) {
            return false;
        }
        self.readers.insert(me);
        true
    }

    fn lock_exclusive(&mut self, me: TxnId) -> bool {
        if self.writer.is_some_and(|w| w != me) || self.readers.iter().any(|r| *r != me) {
            return false;
        }
        self.writer = Some(me);
        true
    }

    fn unlock(&mut self, me: TxnId) {
        self.readers.remove(&me);
        if self.writer == Some(me) {
            self.writer = None;
        }
    }
}

#[derive(Debug)]
struct Table {
    columns: Vec<String>,
    rows: BTreeMap<i64, RowChain>,
    /// Holders of a shared lock on the whole table, taken by locking scans.
    scanners: HashSet<TxnId>,
}

/// A row together with the names of its columns.
#[derive(Clone, Copy)]
struct RowRef<'a> {
    columns: &'a [String],
    values: &'a [Value],
}

/// Context of expressions evaluated outside any row.
const NO_ROW: RowRef<'static> = RowRef {
    columns: &[],
    values: &[],
};

impl Table {
    fn new(columns: &[&str]) -> Self {
        Self {
            columns: columns.iter().map(ToString::to_string).collect(),
            rows: BTreeMap::new(),
            scanners: HashSet::new(),
        }
    }

    fn column(&self, name: &str) -> Result<usize, SimError> {
        self.columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| SimError::UndefinedColumn(name.to_string()))
    }

    /// Fail on the first column reference the table does not have.
    fn check<'e>(&self, exprs: impl IntoIterator<Item = &'e Expr>) -> Result<(), SimError> {
        let mut names = Vec::new();
        for expr in exprs {
            column_refs(expr, &mut names);
        }
        names.into_iter().try_for_each(|name| self.column(name).map(drop))
    }

    fn row<'a>(&'a self, values: &'a [Value]) -> RowRef<'a> {
        RowRef {
            columns: &self.columns,
            values,
        }
    }

    fn matches(&self, filter: &[Condition], values: &[Value], params: &[Value]) -> Result<bool, SimError> {
        satisfies(filter, self.row(values), params)
    }

    fn candidate_ids(&self, key: Option<i64>) -> Vec<i64> {
        key.map_or_else(|| self.rows.keys().copied().collect(), |id| vec![id])
    }

    /// Exclusively lock every row `filter` selects for a write.
    ///
    /// Returns `None` when some lock is held by another transaction.
    fn lock_targets(
        &mut self,
        dialect: Dialect,
        txn: &Transaction,
        filter: &[Condition],
        params: &[Value],
    ) -> Result<Option<Vec<i64>>, SimError> {
        let key = key_of(filter, params)?;
        let view = if txn.first_updater_wins(dialect) {
            txn.view(dialect)
        } else {
            View::Latest
        };
        let mut targets = Vec::new();
        for id in self.candidate_ids(key) {
            let Some(row) = self.rows.get(&id).and_then(|c| c.visible(txn.id, view)) else {
                continue;
            };
            if self.matches(filter, row, params)? {
                targets.push(id);
            }
        }
        let mut granted = true;
        for id in &targets {
            if let Some(chain) = self.rows.get_mut(id) {
                granted &= chain.lock_exclusive(txn.id);
            }
        }
        Ok(granted.then_some(targets))
    }

    /// The version a locked write builds on.
    fn current_for_write(
        &self,
        dialect: Dialect,
        txn: &Transaction,
        id: i64,
    ) -> Result<Option<&Row>, SimError> {
        let Some(chain) = self.rows.get(&id) else {
            return Ok(None);
        };
        if let Some(own) = chain.own_pending(txn.id) {
            return Ok(own);
        }
        if txn.first_updater_wins(dialect)
            && chain.committed_seq() > txn.snapshot.unwrap_or(u64::MAX)
        {
            return Err(SimError::SerializationFailure);
        }
        Ok(chain.latest())
    }

    fn apply(&mut self, txn: &mut Transaction, writes: Vec<(i64, Option<Row>)>) -> u64 {
        let mut applied = 0;
        for (id, row) in writes {
            if let Some(chain) = self.rows.get_mut(&id) {
                chain.pending = Some((txn.id, row));
                applied += 1;
            }
        }
        txn.wrote |= applied > 0;
        applied
    }
}

// ---------------------------------------------------------------------------
// Expressions
// ---------------------------------------------------------------------------

fn column_refs<'e>(expr: &'e Expr, out: &mut Vec<&'e str>) {
    match expr {
        Expr::Column(name) => out.push(name),
        Expr::Neg(inner) => column_refs(inner, out),
        Expr::Binary { lhs, rhs, .. } => {
            column_refs(lhs, out);
            column_refs(rhs, out);
        }
        Expr::Int(_) | Expr::Text(_) | Expr::Null | Expr::Param(_) => {}
    }
}

fn filter_exprs(filter: &[Condition]) -> impl Iterator<Item = &Expr> {
    filter.iter().flat_map(|c| [&c.lhs, &c.rhs])
}

fn eval(expr: &Expr, row: RowRef<'_>, params: &[Value]) -> Result<Value, SimError> {
    Ok(match expr {
        Expr::Int(v) => Value::Int(*v),
        Expr::Text(s) => Value::Text(s.clone()),
        Expr::Null => Value::Null,
        Expr::Param(index) => params
            .get(*index)
            .cloned()
            .ok_or(SimError::UndefinedParameter(index + 1))?,
        Expr::Column(name) => row
            .columns
            .iter()
            .position(|c| c == name)
            .and_then(|i| row.values.get(i))
            .cloned()
            .ok_or_else(|| SimError::UndefinedColumn(name.clone()))?,
        Expr::Neg(inner) => match eval(inner, row, params)? {
            Value::Null => Value::Null,
            Value::Int(v) => Value::Int(v.checked_neg().ok_or(SimError::Overflow)?),
            Value::Text(s) => return Err(SimError::TypeMismatch(format!("cannot negate '{s}'"))),
        },
        Expr::Binary { op, lhs, rhs } => {
            match (eval(lhs, row, params)?, eval(rhs, row, params)?) {
                (Value::Null, _) | (_, Value::Null) => Value::Null,
                (Value::Int(a), Value::Int(b)) => Value::Int(
                    match op {
                        BinaryOp::Add => a.checked_add(b),
                        BinaryOp::Sub => a.checked_sub(b),
                        BinaryOp::Mul => a.checked_mul(b),
                    }
                    .ok_or(SimError::Overflow)?,
                ),
                (a, b) => {
                    return Err(SimError::TypeMismatch(format!(
                        "no arithmetic between {} and {}",
                        a.to_sql_literal(),
                        b.to_sql_literal()
                    )))
                }
            }
        }
    })
}

/// Whether `row` passes every condition. Comparisons with `NULL` fail.
fn satisfies(filter: &[Condition], row: RowRef<'_>, params: &[Value]) -> Result<bool, SimError> {
    for condition in filter {
        let lhs = eval(&condition.lhs, row, params)?;
        let rhs = eval(&condition.rhs, row, params)?;
        let ordering = match (&lhs, &rhs) {
            (Value::Null, _) | (_, Value::Null) => return Ok(false),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            _ => {
                return Err(SimError::TypeMismatch(format!(
                    "cannot compare {} with {}",
                    lhs.to_sql_literal(),
                    rhs.to_sql_literal()
                )))
            }
        };
        let holds = match condition.op {
            CmpOp::Eq => ordering.is_eq(),
            CmpOp::Ne => ordering.is_ne(),
            CmpOp::Lt => ordering.is_lt(),
            CmpOp::Le => ordering.is_le(),
            CmpOp::Gt => ordering.is_gt(),
            CmpOp::Ge => ordering.is_ge(),
        };
        if !holds {
            return Ok(false);
        }
    }
    Ok(true)
}

/// The primary key a filter pins down with `id = <constant>`.
fn key_of(filter: &[Condition], params: &[Value]) -> Result<Option<i64>, SimError> {
    match filter.iter().find_map(Condition::key_lookup) {
        Some(expr) => Ok(eval(expr, NO_ROW, params)?.as_int()),
        None => Ok(None),
    }
}

fn count_label(dialect: Dialect) -> &'static str {
    match dialect {
        Dialect::Postgres => "count",
        Dialect::MySql => "COUNT(*)",
    }
}

fn item_label(item: &SelectItem, dialect: Dialect) -> String {
    match item {
        SelectItem::Star => "*".to_string(),
        SelectItem::Count { alias } => alias.clone().unwrap_or_else(|| count_label(dialect).to_string()),
        SelectItem::Expr { alias: Some(alias), .. } => alias.clone(),
        SelectItem::Expr {
            expr: Expr::Column(name),
            ..
        } => name.clone(),
        SelectItem::Expr { .. } => "?column?".to_string(),
    }
}

/// Build the result set of `items` over the rows that passed the filter.
fn project(
    dialect: Dialect,
    items: &[SelectItem],
    columns: &[String],
    matched: &[&Row],
    params: &[Value],
) -> Result<QueryOutput, SimError> {
    let counting = items.iter().filter(|i| matches!(i, SelectItem::Count { .. })).count();
    let mut header = Vec::new();
    for item in items {
        match item {
            SelectItem::Star => header.extend(columns.iter().cloned()),
            other => header.push(item_label(other, dialect)),
        }
    }
    if counting > 0 {
        if counting != items.len() {
            return Err(SimError::Syntax("COUNT(*)".to_string()));
        }
        let n = i64::try_from(matched.len()).map_err(|_| SimError::Overflow)?;
        return Ok(QueryOutput::rows(header, vec![vec![Value::Int(n); counting]]));
    }
    let mut rows = Vec::with_capacity(matched.len());
    for values in matched.iter().copied() {
        let row = RowRef { columns, values };
        let mut out = Vec::with_capacity(header.len());
        for item in items {
            match item {
                SelectItem::Star => out.extend(values.iter().cloned()),
                SelectItem::Expr { expr, .. } => out.push(eval(expr, row, params)?),
                SelectItem::Count { .. } => {}
            }
        }
        rows.push(out);
    }
    Ok(QueryOutput::rows(header, rows))
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Store {
    tables: BTreeMap<String, Table>,
    commit_seq: u64,
    next_txn: TxnId,
}

impl Store {
    fn table_mut(&mut self, name: &str) -> Result<&mut Table, SimError> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| SimError::UndefinedTable(name.to_string()))
    }

    /// Try to run a data statement. `Ok(None)` means a lock is held by
    /// another transaction and the caller should wait and retry.
    fn attempt(
        &mut self,
        dialect: Dialect,
        txn: &mut Transaction,
        command: &Command,
        params: &[Value],
    ) -> Result<Option<QueryOutput>, SimError> {
        match command {
            Command::Select(select) => self.select(dialect, txn, select, params),
            Command::Update(update) => self.update(dialect, txn, update, params),
            Command::Insert(insert) => self.insert(txn, insert, params),
            Command::Delete(delete) => self.delete(dialect, txn, delete, params),
            _ => Ok(Some(QueryOutput::affected(0))),
        }
    }

    fn select(
        &mut self,
        dialect: Dialect,
        txn: &mut Transaction,
        select: &Select,
        params: &[Value],
    ) -> Result<Option<QueryOutput>, SimError> {
        let Some(name) = &select.from else {
            if select.items.contains(&SelectItem::Star) {
                return Err(SimError::Syntax("*".to_string()));
            }
            let passes = satisfies(&select.filter, NO_ROW, params)?;
            let empty = Vec::new();
            let matched: Vec<&Row> = if passes { vec![&empty] } else { Vec::new() };
            return project(dialect, &select.items, &[], &matched, params).map(Some);
        };
        let table = self.table_mut(name)?;
        let item_exprs = select.items.iter().filter_map(|item| match item {
            SelectItem::Expr { expr, .. } => Some(expr),
            _ => None,
        });
        table.check(item_exprs.chain(filter_exprs(&select.filter)))?;
        let key = key_of(&select.filter, params)?;
        let me = txn.id;

        let locking = txn.locking_reads(dialect);
        if locking {
            let granted = match key {
                Some(id) => table.rows.get_mut(&id).is_none_or(|chain| chain.lock_shared(me)),
                None => {
                    table.scanners.insert(me);
                    table.rows.values_mut().all(|chain| chain.lock_shared(me))
                }
            };
            if !granted {
                return Ok(None);
            }
        }
        match key {
            Some(id) => txn.reads.insert((name.clone(), id)),
            None => txn.scans.insert(name.clone()),
        };

        let view = if locking { View::Latest } else { txn.view(dialect) };
        let table = &*table;
        let mut matched = Vec::new();
        for id in table.candidate_ids(key) {
            let Some(row) = table.rows.get(&id).and_then(|c| c.visible(me, view)) else {
                continue;
            };
            if table.matches(&select.filter, row, params)? {
                matched.push(row);
            }
        }
        project(dialect, &select.items, &table.columns, &matched, params).map(Some)
    }

    fn update(
        &mut self,
        dialect: Dialect,
        txn: &mut Transaction,
        update: &Update,
        params: &[Value],
    ) -> Result<Option<QueryOutput>, SimError> {
        let table = self.table_mut(&update.table)?;
        let assignments = update
            .assignments
            .iter()
            .map(|(column, expr)| Ok((table.column(column)?, expr)))
            .collect::<Result<Vec<_>, SimError>>()?;
        if assignments.iter().any(|(index, _)| *index == KEY) {
            return Err(SimError::TypeMismatch("the primary key cannot be updated".to_string()));
        }
        table.check(update.assignments.iter().map(|(_, e)| e).chain(filter_exprs(&update.filter)))?;
        let Some(targets) = table.lock_targets(dialect, txn, &update.filter, params)? else {
            return Ok(None);
        };
        let mut writes = Vec::with_capacity(targets.len());
        for id in targets {
            let Some(current) = table.current_for_write(dialect, txn, id)? else {
                continue;
            };
            if !table.matches(&update.filter, current, params)? {
                continue;
            }
            let mut next = current.clone();
            for (index, expr) in &assignments {
                next[*index] = eval(expr, table.row(current), params)?;
            }
            writes.push((id, Some(next)));
        }
        Ok(Some(QueryOutput::affected(table.apply(txn, writes))))
    }

    fn delete(
        &mut self,
        dialect: Dialect,
        txn: &mut Transaction,
        delete: &Delete,
        params: &[Value],
    ) -> Result<Option<QueryOutput>, SimError> {
        let table = self.table_mut(&delete.table)?;
        table.check(filter_exprs(&delete.filter))?;
        let Some(targets) = table.lock_targets(dialect, txn, &delete.filter, params)? else {
            return Ok(None);
        };
        let mut writes = Vec::with_capacity(targets.len());
        for id in targets {
            let Some(current) = table.current_for_write(dialect, txn, id)? else {
                continue;
            };
            if table.matches(&delete.filter, current, params)? {
                writes.push((id, None));
            }
        }
        Ok(Some(QueryOutput::affected(table.apply(txn, writes))))
    }

    fn insert(
        &mut self,
        txn: &mut Transaction,
        insert: &Insert,
        params: &[Value],
    ) -> Result<Option<QueryOutput>, SimError> {
        let table = self.table_mut(&insert.table)?;
        let indices = insert
            .columns
            .iter()
            .map(|c| table.column(c))
            .collect::<Result<Vec<_>, SimError>>()?;
        let mut rows: Vec<(i64, Row)> = Vec::with_capacity(insert.rows.len());
        for values in &insert.rows {
            if values.len() != indices.len() {
                return Err(SimError::Syntax("VALUES".to_string()));
            }
            let mut row = vec![Value::Null; table.columns.len()];
            for (index, expr) in indices.iter().zip(values) {
                row[*index] = eval(expr, NO_ROW, params)?;
            }
            let id = match &row[KEY] {
                Value::Int(id) => *id,
                Value::Null => return Err(SimError::NotNull(table.columns[KEY].clone())),
                Value::Text(text) => {
                    return Err(SimError::TypeMismatch(format!("invalid integer '{text}'")))
                }
            };
            if rows.iter().any(|(other, _)| *other == id) {
                return Err(SimError::DuplicateKey {
                    table: insert.table.clone(),
                    id,
                });
            }
            rows.push((id, row));
        }

        let me = txn.id;
        if table.scanners.iter().any(|holder| *holder != me) {
            return Ok(None);
        }
        let mut granted = true;
        for (id, _) in &rows {
            granted &= table.rows.entry(*id).or_default().lock_exclusive(me);
        }
        if !granted {
            return Ok(None);
        }
        if let Some((id, _)) = rows
            .iter()
            .find(|(id, _)| table.rows.get(id).and_then(|c| c.current(me)).is_some())
        {
            return Err(SimError::DuplicateKey {
                table: insert.table.clone(),
                id: *id,
            });
        }
        let writes = rows.into_iter().map(|(id, row)| (id, Some(row))).collect();
        Ok(Some(QueryOutput::affected(table.apply(txn, writes))))
    }

    /// Whether nothing `txn` read was committed over after its snapshot.
    fn certify(&self, txn: &Transaction) -> bool {
        let snapshot = txn.snapshot.unwrap_or(u64::MAX);
        let unchanged = |chain: &RowChain| chain.committed_seq() <= snapshot;
        let reads_hold = txn.reads.iter().all(|(table, id)| {
            self.tables
                .get(table)
                .and_then(|t| t.rows.get(id))
                .is_none_or(unchanged)
        });
        reads_hold
            && txn
                .scans
                .iter()
                .all(|table| self.tables.get(table).is_none_or(|t| t.rows.values().all(unchanged)))
    }

    /// End `me`: publish or drop its pending versions and release its locks.
    fn end(&mut self, me: TxnId, publish: bool) -> Option<u64> {
        let mut seq = None;
        for table in self.tables.values_mut() {
            table.scanners.remove(&me);
            for chain in table.rows.values_mut() {
                if chain.pending.as_ref().is_some_and(|(owner, _)| *owner == me) {
                    if let Some((_, row)) = chain.pending.take() {
                        if publish {
                            let at = *seq.get_or_insert_with(|| {
                                self.commit_seq += 1;
                                self.commit_seq
                            });
                            chain.versions.push(Version { seq: at, row });
                        }
                    }
                }
                chain.unlock(me);
            }
        }
        seq
    }
}

// ---------------------------------------------------------------------------
// Database
// ---------------------------------------------------------------------------

/// One simulated server: its tables and the rules of one dialect.
#[derive(Debug)]
pub struct Database {
    dialect: Dialect,
    default_lock_wait: Duration,
    store: Mutex<Store>,
    released: Condvar,
}

impl Database {
    /// A server with an empty `users (id, name, balance)` table.
    #[must_use]
    pub fn new(dialect: Dialect, default_lock_wait: Duration) -> Self {
        let mut tables = BTreeMap::new();
        tables.insert("users".to_string(), Table::new(&["id", "name", "balance"]));
        Self {
            dialect,
            default_lock_wait,
            store: Mutex::new(Store {
                tables,
                commit_seq: 0,
                next_txn: 0,
            }),
            released: Condvar::new(),
        }
    }

    #[must_use]
    pub const fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn lock_store(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Latest committed rows of `table`, by primary key.
    #[must_use]
    pub fn committed(&self, table: &str) -> Option<Vec<Vec<Value>>> {
        let store = self.lock_store();
        let table = store.tables.get(table)?;
        Some(table.rows.values().filter_map(RowChain::latest).cloned().collect())
    }

    /// Run one statement on behalf of the session `ctx`.
    ///
    /// # Errors
    ///
    /// Returns the [`SimError`] the server answers with. In Postgres any
    /// failure inside an explicit transaction leaves it failed until it ends;
    /// in `MySQL` only the statement is undone.
    pub fn execute(&self, ctx: &mut Context, sql: &str, params: &[Value]) -> Result<QueryOutput, SimError> {
        let result = sql::prepare(self.dialect, sql).and_then(|command| {
            if ctx.txn.as_ref().is_some_and(|txn| txn.failed)
                && !matches!(command, Command::Commit | Command::Rollback)
            {
                return Err(SimError::InFailedTransaction);
            }
            self.dispatch(ctx, command, params)
        });
        if result.is_err() && self.dialect == Dialect::Postgres {
            if let Some(txn) = ctx.txn.as_mut().filter(|txn| txn.explicit) {
                txn.failed = true;
            }
        }
        result
    }

    /// Roll back whatever `ctx` has open and forget its session variables.
    pub fn reset(&self, ctx: &mut Context) {
        if let Some(txn) = ctx.txn.take() {
            self.rollback(&txn);
        }
        *ctx = Context::new(self.dialect);
    }

    fn dispatch(&self, ctx: &mut Context, command: Command, params: &[Value]) -> Result<QueryOutput, SimError> {
        match command {
            Command::Begin => self.begin(ctx)?,
            Command::Commit => {
                if let Some(txn) = ctx.txn.take() {
                    self.commit(txn)?;
                }
            }
            Command::Rollback => {
                if let Some(txn) = ctx.txn.take() {
                    self.rollback(&txn);
                }
            }
            Command::SetIsolation { scope, level } => self.set_isolation(ctx, scope, level)?,
            Command::SetVariable { name, value } => self.set_variable(ctx, &name, &value)?,
            Command::Sleep { function, duration } => return self.sleep(&function, duration),
            data => return self.run_data(ctx, &data, params),
        }
        Ok(QueryOutput::affected(0))
    }

    fn start(&self, level: IsolationLevel, explicit: bool) -> Transaction {
        let mut store = self.lock_store();
        store.next_txn += 1;
        Transaction::new(store.next_txn, effective_level(self.dialect, level), explicit)
    }

    fn begin(&self, ctx: &mut Context) -> Result<(), SimError> {
        if let Some(open) = ctx.txn.take() {
            if self.dialect == Dialect::Postgres {
                tracing::debug!(txn = open.id, "there is already a transaction in progress");
                ctx.txn = Some(open);
                return Ok(());
            }
            // MySQL commits the open transaction implicitly.
            self.commit(open)?;
        }
        let level = ctx.next_level.take().unwrap_or(ctx.level);
        ctx.txn = Some(self.start(level, true));
        Ok(())
    }

    fn commit(&self, txn: Transaction) -> Result<(), SimError> {
        let mut store = self.lock_store();
        let outcome = if txn.failed {
            Err(SimError::CommitRolledBack)
        } else if txn.needs_certification(self.dialect) && !store.certify(&txn) {
            Err(SimError::SerializationFailure)
        } else {
            Ok(())
        };
        let seq = store.end(txn.id, outcome.is_ok());
        drop(store);
        self.released.notify_all();
        match &outcome {
            Ok(()) => tracing::debug!(txn = txn.id, seq, "committed"),
            Err(error) => tracing::debug!(txn = txn.id, %error, "commit refused"),
        }
        outcome
    }

    fn rollback(&self, txn: &Transaction) {
        self.lock_store().end(txn.id, false);
        self.released.notify_all();
        tracing::debug!(txn = txn.id, "rolled back");
    }

    fn set_isolation(&self, ctx: &mut Context, scope: IsolationScope, level: IsolationLevel) -> Result<(), SimError> {
        match (self.dialect, scope) {
            (Dialect::Postgres, IsolationScope::Session) => {
                return Err(SimError::Syntax("TRANSACTION".to_string()));
            }
            (Dialect::MySql, IsolationScope::Characteristics) => {
                return Err(SimError::Syntax("CHARACTERISTICS".to_string()));
            }
            (_, IsolationScope::Characteristics | IsolationScope::Session) => ctx.level = level,
            (dialect, IsolationScope::Transaction) => match ctx.txn.as_mut() {
                Some(txn) if dialect == Dialect::Postgres && txn.snapshot.is_none() => {
                    txn.level = effective_level(dialect, level);
                }
                Some(_) => return Err(SimError::ActiveTransaction),
                None if dialect == Dialect::MySql => ctx.next_level = Some(level),
                None => tracing::debug!("SET TRANSACTION outside a transaction has no effect"),
            },
        }
        Ok(())
    }

    fn set_variable(&self, ctx: &mut Context, name: &str, value: &Setting) -> Result<(), SimError> {
        let invalid = || SimError::InvalidSetting {
            name: name.to_string(),
            value: match value {
                Setting::Int(v) => v.to_string(),
                Setting::Text(s) => s.clone(),
                Setting::Default => "DEFAULT".to_string(),
            },
        };
        ctx.lock_wait = match (self.dialect, name) {
            (Dialect::Postgres, "lock_timeout") => match value {
                Setting::Default => None,
                Setting::Int(ms) => {
                    let ms = u64::try_from(*ms).map_err(|_| invalid())?;
                    Some(Duration::from_millis(ms)).filter(|d| !d.is_zero())
                }
                Setting::Text(text) => parse_interval(text)
                    .ok_or_else(invalid)
                    .map(|d| Some(d).filter(|d| !d.is_zero()))?,
            },
            (Dialect::MySql, "innodb_lock_wait_timeout") => match value {
                Setting::Default => None,
                Setting::Int(secs) => Some(
                    u64::try_from(*secs)
                        .ok()
                        .filter(|s| *s >= 1)
                        .map(Duration::from_secs)
                        .ok_or_else(invalid)?,
                ),
                Setting::Text(_) => return Err(invalid()),
            },
            _ => return Err(SimError::UnknownVariable(name.to_string())),
        };
        Ok(())
    }

    fn sleep(&self, function: &str, duration: Duration) -> Result<QueryOutput, SimError> {
        let (expected, column, value) = match self.dialect {
            Dialect::Postgres => ("pg_sleep", "pg_sleep", Value::Null),
            Dialect::MySql => ("sleep", "SLEEP", Value::Int(0)),
        };
        if function != expected {
            return Err(SimError::UndefinedFunction(format!("{function}(numeric)")));
        }
        std::thread::sleep(duration);
        Ok(QueryOutput::rows(vec![column.to_string()], vec![vec![value]]))
    }

    /// Run a data statement, inside the open transaction or in autocommit.
    fn run_data(&self, ctx: &mut Context, command: &Command, params: &[Value]) -> Result<QueryOutput, SimError> {
        let wait = ctx.lock_wait.unwrap_or(self.default_lock_wait);
        let Some(mut txn) = ctx.txn.take() else {
            let mut txn = self.start(ctx.level, false);
            return match self.statement(&mut txn, command, params, wait) {
                Ok(output) => self.commit(txn).map(|()| output),
                Err(error) => {
                    self.rollback(&txn);
                    Err(error)
                }
            };
        };
        let result = self.statement(&mut txn, command, params, wait);
        ctx.txn = Some(txn);
        result
    }

    fn statement(
        &self,
        txn: &mut Transaction,
        command: &Command,
        params: &[Value],
        wait: Duration,
    ) -> Result<QueryOutput, SimError> {
        let deadline = Instant::now() + wait;
        let mut store = self.lock_store();
        if txn.snapshot.is_none() {
            txn.snapshot = Some(store.commit_seq);
        }
        loop {
            if let Some(output) = store.attempt(self.dialect, txn, command, params)? {
                return Ok(output);
            }
            let Some(left) = deadline
                .checked_duration_since(Instant::now())
                .filter(|left| !left.is_zero())
            else {
                tracing::debug!(txn = txn.id, waited_ms = wait.as_millis(), "lock wait timed out");
                return Err(SimError::LockTimeout(wait));
            };
            tracing::trace!(txn = txn.id, "waiting for a row lock");
            store = self
                .released
                .wait_timeout(store, left)
                .map_or_else(|poisoned| poisoned.into_inner().0, |(guard, _)| guard);
        }
    }
}

/// `'100ms'`, `'2s'`, `'1min'` or a bare number of milliseconds.
fn parse_interval(text: &str) -> Option<Duration> {
    let text = text.trim();
    let split = text.find(|c: char| !c.is_ascii_digit()).unwrap_or(text.len());
    let (digits, unit) = text.split_at(split);
    let amount: u64 = digits.parse().ok()?;
    match unit.trim() {
        "" | "ms" => Some(Duration::from_millis(amount)),
        "s" => Some(Duration::from_secs(amount)),
        "min" => amount.checked_mul(60).map(Duration::from_secs),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use isocop_core::isolation::IsolationLevel::{ReadCommitted, RepeatableRead, Serializable};

    use super::*;

    const WAIT: Duration = Duration::from_millis(40);

    fn seeded(dialect: Dialect) -> Database {
        let db = Database::new(dialect, WAIT);
        let mut ctx = Context::new(dialect);
        let insert = match dialect {
            Dialect::Postgres => "INSERT INTO users (id, name, balance) VALUES ($1, $2, $3), ($4, $5, $6)",
            Dialect::MySql => "INSERT INTO users (id, name, balance) VALUES (?, ?, ?), (?, ?, ?)",
        };
        let params = [
            Value::Int(1),
            Value::from("Alice"),
            Value::Int(100),
            Value::Int(2),
            Value::from("Bob"),
            Value::Int(200),
        ];
        db.execute(&mut ctx, insert, &params).unwrap();
        db
    }

    fn session(db: &Database, level: IsolationLevel) -> Context {
        let mut ctx = Context::new(db.dialect());
        let sql = db.dialect().sql_for_set_level(level).unwrap();
        db.execute(&mut ctx, &sql, &[]).unwrap();
        ctx
    }

    fn run(db: &Database, ctx: &mut Context, sql: &str) -> Result<QueryOutput, SimError> {
        db.execute(ctx, sql, &[])
    }

    fn balance(db: &Database, ctx: &mut Context) -> Value {
        run(db, ctx, "SELECT balance FROM users WHERE id = 1")
            .unwrap()
            .scalar()
            .cloned()
            .unwrap()
    }

    #[test]
    fn test_default_levels() {
        assert_eq!(Context::new(Dialect::Postgres).level(), ReadCommitted);
        assert_eq!(Context::new(Dialect::MySql).level(), RepeatableRead);
    }

    #[test]
    fn test_read_committed_sees_new_commits() {
        let db = seeded(Dialect::Postgres);
        let mut reader = session(&db, ReadCommitted);
        let mut writer = Context::new(Dialect::Postgres);
        run(&db, &mut reader, "BEGIN").unwrap();
        assert_eq!(balance(&db, &mut reader), Value::Int(100));
        run(&db, &mut writer, "UPDATE users SET balance = 150 WHERE id = 1").unwrap();
        assert_eq!(balance(&db, &mut reader), Value::Int(150));
    }

    #[test]
    fn test_snapshot_survives_new_commits() {
        for dialect in Dialect::ALL {
            let db = seeded(dialect);
            let mut reader = session(&db, RepeatableRead);
            let mut writer = Context::new(dialect);
            run(&db, &mut reader, dialect.sql_for_begin()).unwrap();
            assert_eq!(balance(&db, &mut reader), Value::Int(100));
            run(&db, &mut writer, "UPDATE users SET balance = 150 WHERE id = 1").unwrap();
            run(&db, &mut writer, "DELETE FROM users WHERE id = 2").unwrap();
            assert_eq!(balance(&db, &mut reader), Value::Int(100));
            let count = run(&db, &mut reader, "SELECT COUNT(*) FROM users").unwrap();
            assert_eq!(count.scalar(), Some(&Value::Int(2)));
            run(&db, &mut reader, "COMMIT").unwrap();
            assert_eq!(balance(&db, &mut reader), Value::Int(150));
        }
    }

    #[test]
    fn test_dirty_reads_only_in_mysql() {
        let my = seeded(Dialect::MySql);
        let mut writer = Context::new(Dialect::MySql);
        let mut reader = session(&my, IsolationLevel::ReadUncommitted);
        run(&my, &mut writer, "START TRANSACTION").unwrap();
        run(&my, &mut writer, "UPDATE users SET balance = 1000 WHERE id = 1").unwrap();
        assert_eq!(balance(&my, &mut reader), Value::Int(1000));

        let pg = seeded(Dialect::Postgres);
        let mut writer = Context::new(Dialect::Postgres);
        let mut reader = session(&pg, ReadCommitted);
        run(&pg, &mut reader, "SET TRANSACTION ISOLATION LEVEL READ UNCOMMITTED").unwrap();
        run(&pg, &mut writer, "BEGIN").unwrap();
        run(&pg, &mut writer, "UPDATE users SET balance = 1000 WHERE id = 1").unwrap();
        assert_eq!(balance(&pg, &mut reader), Value::Int(100));
    }

    #[test]
    fn test_first_updater_wins_in_postgres_snapshots() {
        let db = seeded(Dialect::Postgres);
        let mut late = session(&db, RepeatableRead);
        let mut early = Context::new(Dialect::Postgres);
        run(&db, &mut late, "BEGIN").unwrap();
        assert_eq!(balance(&db, &mut late), Value::Int(100));
        run(&db, &mut early, "UPDATE users SET balance = balance + 10 WHERE id = 1").unwrap();

        let err = run(&db, &mut late, "UPDATE users SET balance = balance + 20 WHERE id = 1");
        assert_eq!(err.unwrap_err(), SimError::SerializationFailure);
        let err = run(&db, &mut late, "SELECT 1");
        assert_eq!(err.unwrap_err(), SimError::InFailedTransaction);
        assert_eq!(run(&db, &mut late, "COMMIT").unwrap_err(), SimError::CommitRolledBack);
        assert!(late.transaction().is_none());
        assert_eq!(balance(&db, &mut early), Value::Int(110));
    }

    #[test]
    fn test_mysql_updates_build_on_latest_commit() {
        let db = seeded(Dialect::MySql);
        let mut late = session(&db, RepeatableRead);
        let mut early = Context::new(Dialect::MySql);
        run(&db, &mut late, "START TRANSACTION").unwrap();
        assert_eq!(balance(&db, &mut late), Value::Int(100));
        run(&db, &mut early, "UPDATE users SET balance = balance + 10 WHERE id = 1").unwrap();
        let updated = run(&db, &mut late, "UPDATE users SET balance = balance + 20 WHERE id = 1");
        assert_eq!(updated.unwrap().rows_affected, 1);
        // The own write is visible over the snapshot.
        assert_eq!(balance(&db, &mut late), Value::Int(130));
        run(&db, &mut late, "COMMIT").unwrap();
        assert_eq!(db.committed("users").unwrap()[0][2], Value::Int(130));
    }

    #[test]
    fn test_lock_timeout_scope_per_dialect() {
        let db = seeded(Dialect::MySql);
        let mut holder = Context::new(Dialect::MySql);
        let mut waiter = Context::new(Dialect::MySql);
        run(&db, &mut holder, "START TRANSACTION").unwrap();
        run(&db, &mut holder, "UPDATE users SET balance = 0 WHERE id = 1").unwrap();
        run(&db, &mut waiter, "START TRANSACTION").unwrap();
        let started = Instant::now();
        let err = run(&db, &mut waiter, "UPDATE users SET balance = 5 WHERE id = 1").unwrap_err();
        assert_eq!(err, SimError::LockTimeout(WAIT));
        assert!(started.elapsed() >= WAIT);
        // Only the statement failed; the transaction goes on.
        run(&db, &mut waiter, "UPDATE users SET balance = 7 WHERE id = 2").unwrap();
        run(&db, &mut waiter, "COMMIT").unwrap();

        let db = seeded(Dialect::Postgres);
        let mut holder = Context::new(Dialect::Postgres);
        let mut waiter = Context::new(Dialect::Postgres);
        run(&db, &mut holder, "BEGIN").unwrap();
        run(&db, &mut holder, "DELETE FROM users WHERE id = 1").unwrap();
        run(&db, &mut waiter, "SET lock_timeout = '10ms'").unwrap();
        assert_eq!(waiter.lock_wait(), Some(Duration::from_millis(10)));
        run(&db, &mut waiter, "BEGIN").unwrap();
        let err = run(&db, &mut waiter, "UPDATE users SET balance = 5 WHERE id = 1").unwrap_err();
        assert_eq!(err, SimError::LockTimeout(Duration::from_millis(10)));
        assert_eq!(
            run(&db, &mut waiter, "SELECT 1").unwrap_err(),
            SimError::InFailedTransaction
        );
    }

    #[test]
    fn test_serializable_mysql_reads_lock() {
        let db = seeded(Dialect::MySql);
        let mut reader = session(&db, Serializable);
        let mut writer = Context::new(Dialect::MySql);
        run(&db, &mut reader, "START TRANSACTION").unwrap();
        run(&db, &mut reader, "SELECT COUNT(*) AS count FROM users").unwrap();

        let insert = run(&db, &mut writer, "INSERT INTO users (id, name, balance) VALUES (3, 'Charlie', 300)");
        assert_eq!(insert.unwrap_err(), SimError::LockTimeout(WAIT));
        let update = run(&db, &mut writer, "UPDATE users SET balance = 1 WHERE id = 2");
        assert_eq!(update.unwrap_err(), SimError::LockTimeout(WAIT));

        run(&db, &mut reader, "COMMIT").unwrap();
        run(&db, &mut writer, "UPDATE users SET balance = 1 WHERE id = 2").unwrap();
    }

    #[test]
    fn test_serializable_postgres_certifies_reads_at_commit() {
        let db = seeded(Dialect::Postgres);
        let mut skewed = session(&db, Serializable);
        let mut other = Context::new(Dialect::Postgres);
        run(&db, &mut skewed, "BEGIN").unwrap();
        run(&db, &mut skewed, "SELECT balance FROM users WHERE id = 2").unwrap();
        run(&db, &mut other, "UPDATE users SET balance = 0 WHERE id = 2").unwrap();
        run(&db, &mut skewed, "UPDATE users SET balance = 0 WHERE id = 1").unwrap();
        assert_eq!(
            run(&db, &mut skewed, "COMMIT").unwrap_err(),
            SimError::SerializationFailure
        );
        assert_eq!(balance(&db, &mut other), Value::Int(100));
    }

    #[test]
    fn test_duplicate_keys() {
        let db = seeded(Dialect::Postgres);
        let mut ctx = Context::new(Dialect::Postgres);
        let err = run(&db, &mut ctx, "INSERT INTO users (id, name, balance) VALUES (2, 'Bob', 1)");
        assert_eq!(
            err.unwrap_err(),
            SimError::DuplicateKey {
                table: "users".to_string(),
                id: 2
            }
        );
        run(&db, &mut ctx, "DELETE FROM users WHERE id = 2").unwrap();
        run(&db, &mut ctx, "INSERT INTO users (id, name, balance) VALUES (2, 'Bob', 1)").unwrap();
    }

    #[test]
    fn test_select_shapes() {
        let db = seeded(Dialect::MySql);
        let mut ctx = Context::new(Dialect::MySql);
        let all = run(&db, &mut ctx, "SELECT * FROM users WHERE balance >= 150").unwrap();
        assert_eq!(all.columns, ["id", "name", "balance"]);
        assert_eq!(all.rows, vec![vec![Value::Int(2), Value::from("Bob"), Value::Int(200)]]);

        let count = run(&db, &mut ctx, "SELECT COUNT(*) FROM users").unwrap();
        assert_eq!(count.columns, ["COUNT(*)"]);

        let sum = run(&db, &mut ctx, "SELECT balance * 2 AS doubled, name FROM users WHERE id = 1").unwrap();
        assert_eq!(sum.columns, ["doubled", "name"]);
        assert_eq!(sum.rows[0], vec![Value::Int(200), Value::from("Alice")]);

        let missing = run(&db, &mut ctx, "SELECT nope FROM users");
        assert_eq!(missing.unwrap_err(), SimError::UndefinedColumn("nope".to_string()));
        let table = run(&db, &mut ctx, "SELECT 1 FROM accounts");
        assert_eq!(table.unwrap_err(), SimError::UndefinedTable("accounts".to_string()));
    }

    #[test]
    fn test_dialect_specific_statements() {
        let pg = Database::new(Dialect::Postgres, WAIT);
        let mut ctx = Context::new(Dialect::Postgres);
        assert!(run(&pg, &mut ctx, "SET SESSION TRANSACTION ISOLATION LEVEL SERIALIZABLE").is_err());
        assert!(matches!(
            run(&pg, &mut ctx, "SET innodb_lock_wait_timeout = 1"),
            Err(SimError::UnknownVariable(_))
        ));
        assert!(matches!(
            run(&pg, &mut ctx, "SELECT sleep(0)"),
            Err(SimError::UndefinedFunction(_))
        ));

        let my = Database::new(Dialect::MySql, WAIT);
        let mut ctx = Context::new(Dialect::MySql);
        assert!(run(&my, &mut ctx, "SET SESSION CHARACTERISTICS AS TRANSACTION ISOLATION LEVEL SERIALIZABLE").is_err());
        assert!(matches!(
            run(&my, &mut ctx, "SET SESSION innodb_lock_wait_timeout = 0"),
            Err(SimError::InvalidSetting { .. })
        ));
        run(&my, &mut ctx, "SET SESSION innodb_lock_wait_timeout = 3").unwrap();
        assert_eq!(ctx.lock_wait(), Some(Duration::from_secs(3)));
    }

    #[test]
    fn test_set_transaction_applies_once() {
        let db = seeded(Dialect::MySql);
        let mut ctx = Context::new(Dialect::MySql);
        run(&db, &mut ctx, "SET TRANSACTION ISOLATION LEVEL SERIALIZABLE").unwrap();
        run(&db, &mut ctx, "START TRANSACTION").unwrap();
        assert_eq!(ctx.transaction().unwrap().level(), Serializable);
        assert_eq!(
            run(&db, &mut ctx, "SET TRANSACTION ISOLATION LEVEL READ COMMITTED").unwrap_err(),
            SimError::ActiveTransaction
        );
        run(&db, &mut ctx, "COMMIT").unwrap();
        run(&db, &mut ctx, "START TRANSACTION").unwrap();
        assert_eq!(ctx.transaction().unwrap().level(), RepeatableRead);
    }

    #[test]
    fn test_reset_releases_locks() {
        let db = seeded(Dialect::Postgres);
        let mut holder = Context::new(Dialect::Postgres);
        let mut other = Context::new(Dialect::Postgres);
        run(&db, &mut holder, "SET lock_timeout = 5").unwrap();
        run(&db, &mut holder, "BEGIN").unwrap();
        run(&db, &mut holder, "UPDATE users SET balance = 0 WHERE id = 1").unwrap();
        db.reset(&mut holder);
        assert!(holder.transaction().is_none());
        assert_eq!(holder.lock_wait(), None);
        run(&db, &mut other, "UPDATE users SET balance = 1 WHERE id = 1").unwrap();
        assert_eq!(balance(&db, &mut other), Value::Int(1));
    }

    #[test]
    fn test_intervals() {
        assert_eq!(parse_interval("100ms"), Some(Duration::from_millis(100)));
        assert_eq!(parse_interval("2s"), Some(Duration::from_secs(2)));
        assert_eq!(parse_interval("250"), Some(Duration::from_millis(250)));
        assert_eq!(parse_interval("1min"), Some(Duration::from_secs(60)));
        assert_eq!(parse_interval("soon"), None);
    }
}

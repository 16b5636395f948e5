#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use isocop_core::fault::DbFault;
use isocop_core::pool::{AcquireError, Connection, ConnectionPool};
use isocop_core::value::{QueryOutput, Value};
use isocop_core::Dialect;

type Responder = dyn Fn(&str, &[Value]) -> Result<QueryOutput, DbFault> + Send + Sync;

/// A pool whose connections answer from a closure and log every statement.
pub struct ScriptedPool {
    dialect: Dialect,
    capacity: usize,
    outstanding: AtomicUsize,
    log: Arc<Mutex<Vec<String>>>,
    responder: Arc<Responder>,
}

impl ScriptedPool {
    pub fn new(
        dialect: Dialect,
        responder: impl Fn(&str, &[Value]) -> Result<QueryOutput, DbFault> + Send + Sync + 'static,
    ) -> Self {
        Self {
            dialect,
            capacity: 2,
            outstanding: AtomicUsize::new(0),
            log: Arc::new(Mutex::new(Vec::new())),
            responder: Arc::new(responder),
        }
    }

    /// Every statement succeeds; balances read 100 and counts read 2.
    pub fn constant(dialect: Dialect) -> Self {
        Self::new(dialect, constant_answers)
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    pub fn executed(&self) -> Vec<String> {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

pub fn constant_answers(sql: &str, _params: &[Value]) -> Result<QueryOutput, DbFault> {
    if sql.starts_with("SELECT balance") {
        Ok(scalar(100))
    } else if sql.starts_with("SELECT COUNT") {
        Ok(scalar(2))
    } else {
        Ok(QueryOutput::affected(1))
    }
}

pub fn scalar(value: i64) -> QueryOutput {
    QueryOutput::rows(vec!["v".to_string()], vec![vec![Value::Int(value)]])
}

/// Responder that sleeps on statements containing `marker`.
pub fn sleeping_on(
    marker: &'static str,
    pause: Duration,
) -> impl Fn(&str, &[Value]) -> Result<QueryOutput, DbFault> + Send + Sync + 'static {
    move |sql, params| {
        if sql.contains(marker) {
            thread::sleep(pause);
        }
        constant_answers(sql, params)
    }
}

pub struct ScriptedConnection {
    log: Arc<Mutex<Vec<String>>>,
    responder: Arc<Responder>,
}

impl Connection for ScriptedConnection {
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<QueryOutput, DbFault> {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sql.to_string());
        (self.responder)(sql, params)
    }
}

impl ConnectionPool for ScriptedPool {
    type Connection = ScriptedConnection;

    fn name(&self) -> &str {
        "scripted"
    }

    fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn acquire(&self) -> Result<ScriptedConnection, AcquireError> {
        self.outstanding
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.capacity).then_some(n + 1)
            })
            .map_err(|n| AcquireError::new(format!("pool exhausted ({n} leased)")))?;
        Ok(ScriptedConnection {
            log: Arc::clone(&self.log),
            responder: Arc::clone(&self.responder),
        })
    }

    fn release(&self, _connection: ScriptedConnection) {
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
    }
}

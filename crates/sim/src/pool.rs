use core::time::Duration;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use isocop_core::fault::DbFault;
use isocop_core::pool::{AcquireError, Connection, ConnectionPool};
use isocop_core::value::{QueryOutput, Value};
use isocop_core::Dialect;
use rand::distr::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::config::SimConfig;
use crate::error::SimError;
use crate::storage::{Context, Database};

#[derive(Debug, Default)]
struct Leases {
    outstanding: usize,
}

/// A bounded pool of connections to one in-process [`Database`].
#[derive(Debug)]
pub struct SimPool {
    name: String,
    config: SimConfig,
    database: Arc<Database>,
    leases: Mutex<Leases>,
    returned: Condvar,
    closed: Arc<AtomicBool>,
    opened: AtomicU64,
}

impl SimPool {
    #[must_use]
    pub fn new(config: SimConfig) -> Self {
        let database = Arc::new(Database::new(config.dialect, config.default_lock_wait));
        Self {
            name: format!("sim-{}", config.dialect),
            config,
            database,
            leases: Mutex::new(Leases::default()),
            returned: Condvar::new(),
            closed: Arc::new(AtomicBool::new(false)),
            opened: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &SimConfig {
        &self.config
    }

    #[must_use]
    pub fn database(&self) -> &Database {
        &self.database
    }

    /// Connections currently leased.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.lock_leases().outstanding
    }

    /// Refuse new leases and cut off the leased connections, whose next
    /// statement fails as a lost connection.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            tracing::debug!(pool = %self.name, "closed");
        }
        self.returned.notify_all();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn lock_leases(&self) -> MutexGuard<'_, Leases> {
        self.leases.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn jitter(&self, index: u64) -> Option<Jitter> {
        let max = u64::try_from(self.config.jitter.as_micros()).ok()?;
        if max == 0 {
            return None;
        }
        let spread = Uniform::new_inclusive(0, max).ok()?;
        let rng = StdRng::seed_from_u64(self.config.seed.wrapping_add(index));
        Some(Jitter { rng, spread })
    }
}

impl ConnectionPool for SimPool {
    type Connection = SimConnection;

    fn name(&self) -> &str {
        &self.name
    }

    fn dialect(&self) -> Dialect {
        self.config.dialect
    }

    fn acquire(&self) -> Result<SimConnection, AcquireError> {
        let deadline = Instant::now() + self.config.acquire_timeout;
        let mut leases = self.lock_leases();
        loop {
            if self.is_closed() {
                return Err(AcquireError::new("pool is closed"));
            }
            if leases.outstanding < self.config.capacity {
                break;
            }
            let Some(left) = deadline
                .checked_duration_since(Instant::now())
                .filter(|left| !left.is_zero())
            else {
                tracing::warn!(
                    pool = %self.name,
                    capacity = self.config.capacity,
                    "timed out waiting for a connection"
                );
                return Err(AcquireError::new(format!(
                    "no connection free within {} ms (capacity {})",
                    self.config.acquire_timeout.as_millis(),
                    self.config.capacity
                )));
            };
            leases = self
                .returned
                .wait_timeout(leases, left)
                .map_or_else(|poisoned| poisoned.into_inner().0, |(guard, _)| guard);
        }
        leases.outstanding += 1;
        drop(leases);

        let index = self.opened.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(pool = %self.name, connection = index, "leased");
        Ok(SimConnection {
            index,
            database: Arc::clone(&self.database),
            context: Context::new(self.config.dialect),
            closed: Arc::clone(&self.closed),
            jitter: self.jitter(index),
        })
    }

    fn release(&self, mut connection: SimConnection) {
        connection.reset();
        let mut leases = self.lock_leases();
        leases.outstanding = leases.outstanding.saturating_sub(1);
        drop(leases);
        self.returned.notify_one();
        tracing::trace!(pool = %self.name, connection = connection.index, "returned");
    }
}

#[derive(Debug)]
struct Jitter {
    rng: StdRng,
    spread: Uniform<u64>,
}

impl Jitter {
    fn pause(&mut self) {
        let micros = self.spread.sample(&mut self.rng);
        std::thread::sleep(Duration::from_micros(micros));
    }
}

/// One session on the simulated server.
///
/// Dropping it rolls back whatever transaction it still has open.
#[derive(Debug)]
pub struct SimConnection {
    index: u64,
    database: Arc<Database>,
    context: Context,
    closed: Arc<AtomicBool>,
    jitter: Option<Jitter>,
}

impl SimConnection {
    #[must_use]
    pub const fn context(&self) -> &Context {
        &self.context
    }

    fn reset(&mut self) {
        self.database.reset(&mut self.context);
    }
}

impl Connection for SimConnection {
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<QueryOutput, DbFault> {
        let dialect = self.database.dialect();
        if self.closed.load(Ordering::SeqCst) {
            return Err(SimError::ConnectionClosed.into_fault(dialect));
        }
        if let Some(jitter) = self.jitter.as_mut() {
            jitter.pause();
        }
        tracing::trace!(connection = self.index, sql, params = params.len(), "statement");
        self.database
            .execute(&mut self.context, sql, params)
            .map_err(|error| error.into_fault(dialect))
    }
}

impl Drop for SimConnection {
    fn drop(&mut self) {
        self.reset();
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use isocop_core::fault::{classify, ErrorKind};
    use isocop_core::IsolationLevel;

    use super::*;

    fn pool(dialect: Dialect, capacity: usize) -> SimPool {
        SimPool::new(
            SimConfig::builder()
                .dialect(dialect)
                .capacity(capacity)
                .acquire_timeout(Duration::from_millis(30))
                .build(),
        )
    }

    #[test]
    fn test_capacity_and_timeout() {
        let pool = pool(Dialect::Postgres, 1);
        let first = pool.acquire().unwrap();
        assert_eq!(pool.outstanding(), 1);
        let started = Instant::now();
        let err = pool.acquire().unwrap_err();
        assert!(err.message.contains("capacity 1"));
        assert!(started.elapsed() >= Duration::from_millis(30));
        pool.release(first);
        assert_eq!(pool.outstanding(), 0);
        assert!(pool.acquire().is_ok());
    }

    #[test]
    fn test_waiting_acquire_gets_released_connection() {
        let pool = SimPool::new(
            SimConfig::builder()
                .dialect(Dialect::MySql)
                .capacity(1)
                .acquire_timeout(Duration::from_secs(2))
                .build(),
        );
        let held = pool.acquire().unwrap();
        thread::scope(|s| {
            let waiter = s.spawn(|| pool.acquire().map(|c| pool.release(c)));
            thread::sleep(Duration::from_millis(20));
            pool.release(held);
            assert!(waiter.join().unwrap().is_ok());
        });
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_release_resets_session() {
        let pool = pool(Dialect::Postgres, 1);
        let mut conn = pool.acquire().unwrap();
        conn.execute("SET SESSION CHARACTERISTICS AS TRANSACTION ISOLATION LEVEL SERIALIZABLE", &[])
            .unwrap();
        conn.execute("BEGIN", &[]).unwrap();
        conn.execute("DELETE FROM users", &[]).unwrap();
        pool.release(conn);

        let conn = pool.acquire().unwrap();
        assert_eq!(conn.context().level(), IsolationLevel::ReadCommitted);
        assert!(conn.context().transaction().is_none());
    }

    #[test]
    fn test_close_cuts_connections() {
        let pool = pool(Dialect::MySql, 2);
        let mut conn = pool.acquire().unwrap();
        conn.execute("SELECT 1", &[]).unwrap();
        pool.close();
        let fault = conn.execute("SELECT 1", &[]).unwrap_err();
        assert_eq!(fault.vendor_code, Some(2013));
        assert_eq!(classify(Dialect::MySql, &fault), ErrorKind::ConnectionLost);
        assert!(pool.acquire().is_err());
        pool.release(conn);
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_jitter_is_bounded() {
        let pool = SimPool::new(
            SimConfig::builder()
                .dialect(Dialect::Postgres)
                .jitter(Duration::from_millis(2))
                .seed(42)
                .build(),
        );
        let mut conn = pool.acquire().unwrap();
        let started = Instant::now();
        for _ in 0..5 {
            conn.execute("SELECT 1", &[]).unwrap();
        }
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(conn.jitter.is_some());
    }
}

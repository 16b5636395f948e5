//! The seam to the connection layer.
//!
//! The engine never builds connections. It is handed a [`ConnectionPool`],
//! leases connections from it and gives them back through [`Lease`], which
//! returns its connection exactly once: on [`Lease::release`] or on drop.

use core::fmt::{self, Display, Formatter};

use crate::fault::DbFault;
use crate::isolation::Dialect;
use crate::value::{QueryOutput, Value};

/// One live database session.
pub trait Connection: Send {
    /// Execute one statement with bound parameters.
    ///
    /// # Errors
    ///
    /// Returns the server's fault unclassified; the caller classifies it.
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<QueryOutput, DbFault>;
}

/// A source of connections to one backend.
pub trait ConnectionPool: Sync {
    type Connection: Connection;

    /// Label used in reports and logs.
    fn name(&self) -> &str;

    /// The dialect the backend speaks.
    fn dialect(&self) -> Dialect;

    /// Lease a connection, blocking until one is available or the pool gives
    /// up.
    ///
    /// # Errors
    ///
    /// Returns [`AcquireError`] on pool exhaustion, shutdown, or dial failure.
    fn acquire(&self) -> Result<Self::Connection, AcquireError>;

    /// Return a leased connection. Never fails observably.
    fn release(&self, connection: Self::Connection);
}

/// The pool could not hand out a connection.
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquireError {
    pub message: String,
}

impl AcquireError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Display for AcquireError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "connection acquisition failed: {}", self.message)
    }
}

impl std::error::Error for AcquireError {}

/// Scoped ownership of one leased connection.
pub struct Lease<'pool, P: ConnectionPool> {
    pool: &'pool P,
    connection: Option<P::Connection>,
}

impl<'pool, P: ConnectionPool> Lease<'pool, P> {
    /// # Errors
    ///
    /// Propagates the pool's [`AcquireError`].
    pub fn acquire(pool: &'pool P) -> Result<Self, AcquireError> {
        let connection = pool.acquire()?;
        Ok(Self {
            pool,
            connection: Some(connection),
        })
    }

    /// The leased connection, or `None` once released.
    pub fn connection(&mut self) -> Option<&mut P::Connection> {
        self.connection.as_mut()
    }

    #[must_use]
    pub const fn is_released(&self) -> bool {
        self.connection.is_none()
    }

    /// Give the connection back. Returns `true` only for the call that
    /// actually returned it.
    pub fn release(&mut self) -> bool {
        match self.connection.take() {
            Some(connection) => {
                self.pool.release(connection);
                true
            }
            None => false,
        }
    }
}

impl<P: ConnectionPool> Drop for Lease<'_, P> {
    fn drop(&mut self) {
        self.release();
    }
}

//! An in-process transactional backend for `isocop_core`.
//!
//! [`SimPool`] implements [`ConnectionPool`](isocop_core::ConnectionPool)
//! over a small multi-version store that behaves like Postgres or `MySQL`
//! (`InnoDB`) where isolation is concerned:
//!
//! | level            | Postgres                         | `MySQL`                              |
//! |------------------|----------------------------------|--------------------------------------|
//! | read uncommitted | as read committed                | reads uncommitted writes             |
//! | read committed   | latest commit per statement      | latest commit per statement          |
//! | repeatable read  | snapshot, first updater wins     | snapshot, updates apply to latest    |
//! | serializable     | as above, reads certified at commit | reads take shared locks           |
//!
//! Writes take exclusive row locks and wait for them up to the session's lock
//! wait. A Postgres lock timeout fails the whole transaction; a `MySQL` one
//! only the statement.
//!
//! The server understands the statements the engine and the built-in
//! scenarios send, in either dialect's spelling, against one table
//! `users (id, name, balance)`. Failures come back as
//! [`DbFault`](isocop_core::fault::DbFault)s with the SQLSTATE and vendor
//! code the real server would use.
//!
//! ```rust
//! use isocop_core::{run_scenario, Dialect, EngineConfig, Verdict};
//! use isocop_sim::{SimConfig, SimPool};
//!
//! let pool = SimPool::new(SimConfig::for_dialect(Dialect::Postgres));
//! let reports = run_scenario(&pool, "dirty-read", EngineConfig::default()).unwrap();
//! assert!(reports.iter().all(|r| r.verdict() == Verdict::AnomalyPrevented));
//! ```

pub mod config;
pub mod error;
pub mod pool;
pub mod sql;
pub mod storage;

pub use config::SimConfig;
pub use error::SimError;
pub use pool::{SimConnection, SimPool};
pub use storage::Database;

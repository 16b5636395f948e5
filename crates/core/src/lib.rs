//! Deterministic elicitation of transaction-isolation anomalies.
//!
//! `isocop_core` drives two database sessions through scripted, interleaved
//! steps to provoke the four classic anomalies and decides, per isolation
//! level, whether the backend let each one happen:
//!
//! 1. **Lost update** -- two increments of one row, one of them vanishes.
//! 2. **Dirty read** -- a session sees a write that is later rolled back.
//! 3. **Non-repeatable read** -- one row read twice in a transaction changes.
//! 4. **Phantom read** -- a count read twice in a transaction changes.
//!
//! A [`Scenario`](scenario::Scenario) is pure data: the steps of sessions A
//! and B, numbered barriers that are the only points where the two sessions
//! synchronize, and a [`VerdictRule`](scenario::VerdictRule) over the values
//! queries capture. The [`ScenarioEngine`] runs a scenario once per isolation
//! level the backend declares, on two scoped threads, and returns one
//! [`ScenarioReport`] per level. Database faults never escape a
//! [`Session`](session::Session): they are classified into an
//! [`ErrorKind`](fault::ErrorKind) and recorded in the step's result.
//!
//! The crate does not talk to any database itself. Backends plug in through
//! the [`ConnectionPool`] and [`Connection`](pool::Connection) traits; the
//! `isocop_sim` crate provides an in-process one.
//!
//! # Entry point
//!
//! ```rust,ignore
//! use isocop_core::{run_scenario, EngineConfig};
//!
//! let reports = run_scenario(&pool, "dirty-read", EngineConfig::default())?;
//! for report in &reports {
//!     println!("{}: {}", report.isolation_level(), report.verdict());
//! }
//! ```
//!
//! # Crate features
//!
//! - **`serde`** -- `Serialize`/`Deserialize` on reports, step results,
//!   verdicts, scenarios and the isolation catalog types.
//! - **`schemars`** -- `JsonSchema` on the same types (implies `serde`).

use std::collections::BTreeMap;

pub mod engine;
pub mod fault;
pub mod isolation;
pub mod pool;
pub mod recorder;
pub mod report;
pub mod scenario;
pub mod session;
pub mod sql;
pub mod value;

pub use engine::{CancelToken, ConfigError, EngineConfig, EngineError, ScenarioEngine};
pub use isolation::{Dialect, IsolationLevel};
pub use pool::{Connection, ConnectionPool};
pub use report::{ScenarioReport, StepResult};
pub use scenario::{Scenario, Verdict};
pub use value::Value;

/// Run the built-in scenario `name` against `pool` at every isolation level
/// the pool's dialect declares, weakest first.
///
/// # Errors
///
/// Returns [`EngineError::Config`] when `config` is invalid for the pool and
/// [`EngineError::UnknownScenario`] for an unknown name. Failed runs are not
/// errors: they come back as reports with [`Verdict::EngineError`].
pub fn run_scenario<P: ConnectionPool>(
    pool: &P,
    name: &str,
    config: EngineConfig,
) -> Result<Vec<ScenarioReport>, EngineError> {
    ScenarioEngine::new(pool, config)?.run_scenario(name)
}

/// Run every built-in scenario against `pool`, keyed by scenario name.
///
/// # Errors
///
/// Returns [`EngineError::Config`] when `config` is invalid for the pool.
pub fn run_all_scenarios<P: ConnectionPool>(
    pool: &P,
    config: EngineConfig,
) -> Result<BTreeMap<String, Vec<ScenarioReport>>, EngineError> {
    Ok(ScenarioEngine::new(pool, config)?.run_all_scenarios())
}

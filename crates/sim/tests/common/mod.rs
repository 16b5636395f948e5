#![allow(dead_code)]

use std::time::Duration;

use isocop_core::scenario::{Scenario, ScenarioBuilder};
use isocop_core::{Dialect, EngineConfig, IsolationLevel, ScenarioReport, Value, Verdict};
use isocop_sim::{SimConfig, SimPool};

/// Barriers comfortably longer than `MySQL`'s one-second minimum lock wait.
pub fn engine_config() -> EngineConfig {
    EngineConfig::builder()
        .barrier_timeout(Duration::from_secs(3))
        .lock_timeout(Duration::from_secs(1))
        .barrier_poll(Duration::from_millis(5))
        .build()
}

/// Short barriers for runs that are expected to stall.
pub fn impatient_config() -> EngineConfig {
    EngineConfig::builder()
        .barrier_timeout(Duration::from_millis(200))
        .lock_timeout(Duration::from_millis(100))
        .barrier_poll(Duration::from_millis(5))
        .build()
}

/// A scenario that starts from Alice (id 1, 100) and Bob (id 2, 200).
pub fn seeded(name: &str) -> ScenarioBuilder {
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

pub fn pool(dialect: Dialect) -> SimPool {
    SimPool::new(
        SimConfig::builder()
            .dialect(dialect)
            .acquire_timeout(Duration::from_millis(50))
            .build(),
    )
}

pub fn jittery_pool(dialect: Dialect, seed: u64) -> SimPool {
    SimPool::new(
        SimConfig::builder()
            .dialect(dialect)
            .jitter(Duration::from_millis(3))
            .seed(seed)
            .build(),
    )
}

pub fn verdicts(reports: &[ScenarioReport]) -> Vec<(IsolationLevel, Verdict)> {
    reports
        .iter()
        .map(|r| (r.isolation_level(), r.verdict()))
        .collect()
}

/// Balance of Alice as last committed.
pub fn committed_balance(pool: &SimPool) -> Option<i64> {
    pool.database()
        .committed("users")?
        .into_iter()
        .find(|row| row.first().and_then(Value::as_int) == Some(1))?
        .get(2)?
        .as_int()
}

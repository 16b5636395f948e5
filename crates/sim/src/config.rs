use core::time::Duration;

use isocop_core::Dialect;
use typed_builder::TypedBuilder;

/// How a [`SimPool`](crate::SimPool) behaves.
///
/// ```rust
/// use core::time::Duration;
/// use isocop_core::Dialect;
/// use isocop_sim::SimConfig;
///
/// let config = SimConfig::builder()
///     .dialect(Dialect::MySql)
///     .jitter(Duration::from_millis(2))
///     .seed(7)
///     .build();
/// assert_eq!(config.capacity, 4);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, TypedBuilder)]
pub struct SimConfig {
    pub dialect: Dialect,
    /// Connections that may be leased at once.
    #[builder(default = 4)]
    pub capacity: usize,
    /// How long `acquire` blocks on an exhausted pool.
    #[builder(default = Duration::from_secs(1))]
    pub acquire_timeout: Duration,
    /// Upper bound of the random pause before each statement.
    #[builder(default = Duration::ZERO)]
    pub jitter: Duration,
    /// Seed of the jitter generator; each connection derives its own stream.
    #[builder(default = 0)]
    pub seed: u64,
    /// Lock wait applied until a session configures its own, and when it
    /// asks for zero.
    #[builder(default = Duration::from_secs(50))]
    pub default_lock_wait: Duration,
}

impl SimConfig {
    #[must_use]
    pub fn for_dialect(dialect: Dialect) -> Self {
        Self::builder().dialect(dialect).build()
    }
}

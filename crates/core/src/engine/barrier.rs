//! Indexed rendezvous points shared by the sessions of one run.
//!
//! Unlike `std::sync::Barrier`, every wait is bounded, observes a
//! [`CancelToken`], and can be broken for everybody at once when one side
//! gives up.

use core::fmt::{self, Display, Formatter};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use hashbrown::HashMap;

use super::cancel::CancelToken;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BarrierError {
    /// The partner did not arrive within the timeout.
    TimedOut { barrier: u32, waited: Duration },
    /// Another participant aborted the run.
    Broken { barrier: u32 },
    Cancelled { barrier: u32 },
}

impl Display for BarrierError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::TimedOut { barrier, waited } => write!(
                f,
                "barrier {barrier}: partner did not arrive within {} ms",
                waited.as_millis()
            ),
            Self::Broken { barrier } => write!(f, "barrier {barrier}: run aborted by partner"),
            Self::Cancelled { barrier } => write!(f, "barrier {barrier}: run cancelled"),
        }
    }
}

impl std::error::Error for BarrierError {}

#[derive(Debug, Default)]
struct State {
    arrivals: HashMap<u32, usize>,
    broken: bool,
}

#[derive(Debug)]
pub struct BarrierSet {
    parties: usize,
    state: Mutex<State>,
    arrived: Condvar,
}

impl BarrierSet {
    #[must_use]
    pub fn new(parties: usize) -> Self {
        Self {
            parties,
            state: Mutex::new(State::default()),
            arrived: Condvar::new(),
        }
    }

    /// Arrive at barrier `index` and wait for every other party.
    ///
    /// Wakes up at least every `poll` to look at `cancel`. Returns how long
    /// the caller waited.
    ///
    /// # Errors
    ///
    /// [`BarrierError::TimedOut`] after `timeout` without the partner,
    /// [`BarrierError::Broken`] when [`BarrierSet::abort`] was called, and
    /// [`BarrierError::Cancelled`] when `cancel` fires.
    pub fn wait(
        &self,
        index: u32,
        timeout: Duration,
        poll: Duration,
        cancel: &CancelToken,
    ) -> Result<Duration, BarrierError> {
        let started = Instant::now();
        let deadline = started + timeout;
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.broken {
            return Err(BarrierError::Broken { barrier: index });
        }

        let count = {
            let count = state.arrivals.entry(index).or_insert(0);
            *count += 1;
            *count
        };
        if count >= self.parties {
            self.arrived.notify_all();
            return Ok(started.elapsed());
        }

        loop {
            if state.arrivals.get(&index).is_some_and(|n| *n >= self.parties) {
                return Ok(started.elapsed());
            }
            if state.broken {
                return Err(BarrierError::Broken { barrier: index });
            }
            if cancel.is_cancelled() {
                return Err(BarrierError::Cancelled { barrier: index });
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(BarrierError::TimedOut {
                    barrier: index,
                    waited: now - started,
                });
            }
            let slice = poll.min(deadline - now);
            state = self
                .arrived
                .wait_timeout(state, slice)
                .map_or_else(|poisoned| poisoned.into_inner().0, |(guard, _)| guard);
        }
    }

    /// Break every current and future wait.
    pub fn abort(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.broken = true;
        self.arrived.notify_all();
    }

    #[must_use]
    pub fn is_broken(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .broken
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    const POLL: Duration = Duration::from_millis(5);

    #[test]
    fn test_two_parties_meet() {
        let barriers = Arc::new(BarrierSet::new(2));
        let cancel = CancelToken::new();
        let handle = {
            let barriers = Arc::clone(&barriers);
            let cancel = cancel.clone();
            thread::spawn(move || barriers.wait(1, Duration::from_secs(5), POLL, &cancel))
        };
        thread::sleep(Duration::from_millis(20));
        assert!(barriers.wait(1, Duration::from_secs(5), POLL, &cancel).is_ok());
        assert!(handle.join().unwrap().is_ok());
    }

    #[test]
    fn test_lonely_party_times_out() {
        let barriers = BarrierSet::new(2);
        let err = barriers
            .wait(3, Duration::from_millis(30), POLL, &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, BarrierError::TimedOut { barrier: 3, waited } if waited >= Duration::from_millis(30)));
    }

    #[test]
    fn test_abort_breaks_waiters() {
        let barriers = Arc::new(BarrierSet::new(2));
        let handle = {
            let barriers = Arc::clone(&barriers);
            thread::spawn(move || barriers.wait(1, Duration::from_secs(5), POLL, &CancelToken::new()))
        };
        thread::sleep(Duration::from_millis(20));
        barriers.abort();
        assert_eq!(handle.join().unwrap(), Err(BarrierError::Broken { barrier: 1 }));
        assert!(barriers.is_broken());
    }

    #[test]
    fn test_cancel_interrupts_wait() {
        let barriers = Arc::new(BarrierSet::new(2));
        let cancel = CancelToken::new();
        let handle = {
            let barriers = Arc::clone(&barriers);
            let cancel = cancel.clone();
            thread::spawn(move || barriers.wait(2, Duration::from_secs(5), POLL, &cancel))
        };
        thread::sleep(Duration::from_millis(20));
        cancel.cancel();
        assert_eq!(handle.join().unwrap(), Err(BarrierError::Cancelled { barrier: 2 }));
    }

    #[test]
    fn test_indices_are_independent() {
        let barriers = Arc::new(BarrierSet::new(2));
        let cancel = CancelToken::new();
        let handle = {
            let barriers = Arc::clone(&barriers);
            let cancel = cancel.clone();
            thread::spawn(move || {
                barriers.wait(1, Duration::from_secs(5), POLL, &cancel)?;
                barriers.wait(2, Duration::from_secs(5), POLL, &cancel)
            })
        };
        barriers.wait(1, Duration::from_secs(5), POLL, &cancel).unwrap();
        barriers.wait(2, Duration::from_secs(5), POLL, &cancel).unwrap();
        assert!(handle.join().unwrap().is_ok());
    }
}

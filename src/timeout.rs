//! Three-valued wait policy used by every blocking query of the engine.

use std::thread;
use std::time::{Duration, Instant};

use crate::error::Result;

/// How long a caller is willing to block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Block until the awaited condition resolves.
    Infinite,
    /// Report the current state without blocking.
    NonBlocking,
    /// Block for at most the given duration.
    Bounded(Duration),
}

impl Timeout {
    /// Map the legacy millisecond convention: `None` blocks forever, `0`
    /// polls, anything else is a bound.
    pub fn from_millis(millis: Option<u64>) -> Self {
        match millis {
            None => Timeout::Infinite,
            Some(0) => Timeout::NonBlocking,
            Some(ms) => Timeout::Bounded(Duration::from_millis(ms)),
        }
    }

    /// Absolute deadline for this wait, starting now. `None` means no deadline.
    pub fn deadline(&self) -> Option<Instant> {
        match self {
            Timeout::Infinite => None,
            Timeout::NonBlocking => Some(Instant::now()),
            Timeout::Bounded(d) => Some(Instant::now() + *d),
        }
    }

    pub fn is_non_blocking(&self) -> bool {
        matches!(self, Timeout::NonBlocking)
    }
}

impl From<Duration> for Timeout {
    fn from(d: Duration) -> Self {
        if d.is_zero() {
            Timeout::NonBlocking
        } else {
            Timeout::Bounded(d)
        }
    }
}

/// Re-evaluate `check` every `interval` until it returns `true` or the wait
/// policy gives up. Returns the last observed value.
pub fn poll_until<F>(timeout: Timeout, interval: Duration, mut check: F) -> Result<bool>
where
    F: FnMut() -> Result<bool>,
{
    let deadline = timeout.deadline();
    loop {
        if check()? {
            return Ok(true);
        }
        let sleep = match remaining(deadline) {
            None => interval,
            Some(left) if left.is_zero() => return Ok(false),
            Some(left) => left.min(interval),
        };
        thread::sleep(sleep);
    }
}

/// Time left until `deadline`, or `None` when there is no deadline.
pub(crate) fn remaining(deadline: Option<Instant>) -> Option<Duration> {
    deadline.map(|d| d.saturating_duration_since(Instant::now()))
}

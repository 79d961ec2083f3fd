//! Bounded backoff for contended state transitions.
//!
//! Every wait loop in the crate drives one of these: cheap yields for
//! short-lived contention, exponentially coarser sleeps for long-lived
//! contention, and a hard overall deadline so no operation blocks forever.

use std::time::{Duration, Instant};

/// Default budget for every waiting operation in the crate.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// First `YIELD_LIMIT` steps yield the thread instead of sleeping.
const YIELD_LIMIT: u32 = 10;

/// Sleep exponent cap: `1 << MAX_BACKOFF_EXP` ns is roughly one millisecond.
const MAX_BACKOFF_EXP: u32 = 20;

/// Caller-scoped wait policy with an overall deadline.
///
/// The deadline is consulted before each wait, so the caller's budget is
/// never exceeded by more than one final sleep.
pub struct Backoff {
    deadline: Option<Instant>,
    spin: u32,
}

impl Backoff {
    /// Start a backoff whose deadline is `timeout` from now.
    pub fn new(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now().checked_add(timeout),
            spin: 0,
        }
    }

    /// One backoff step. Returns `false` once the deadline has passed,
    /// otherwise waits a little and returns `true`.
    pub fn step(&mut self) -> bool {
        match self.deadline {
            Some(deadline) if Instant::now() > deadline => return false,
            // checked_add overflowed: effectively unbounded
            None => {}
            _ => {}
        }

        if self.spin < YIELD_LIMIT {
            std::thread::yield_now();
        } else {
            let exp = (self.spin - YIELD_LIMIT).min(MAX_BACKOFF_EXP);
            std::thread::sleep(Duration::from_nanos(1u64 << exp));
        }
        self.spin += 1;
        true
    }
}

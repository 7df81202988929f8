//!
//! Timeouts
//!
//! Every blocking call takes a millisecond timeout. The C ABI reserves
//! `WAIT_INFINITE` (and treats any other negative value the same way) to mean
//! "block until signaled". Finite timeouts become an absolute deadline on the
//! monotonic clock when the call starts, so a wait that is woken early and
//! goes back to sleep never extends its original budget.
//!

use std::time::{Duration, Instant};

pub const WAIT_INFINITE: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timeout {
    Infinite,
    Millis(u32),
}

impl Timeout {
    pub fn from_ms(ms: i32) -> Self {
        if ms < 0 {
            Timeout::Infinite
        } else {
            Timeout::Millis(ms as u32)
        }
    }

    pub fn as_ms(self) -> i32 {
        match self {
            Timeout::Infinite => WAIT_INFINITE,
            Timeout::Millis(ms) => ms.min(i32::MAX as u32) as i32,
        }
    }

    pub fn is_infinite(self) -> bool {
        matches!(self, Timeout::Infinite)
    }

    pub fn duration(self) -> Option<Duration> {
        match self {
            Timeout::Infinite => None,
            Timeout::Millis(ms) => Some(Duration::from_millis(u64::from(ms))),
        }
    }

    /// Start the clock on this timeout.
    pub fn deadline(self) -> Deadline {
        Deadline {
            at: self.duration().map(|d| Instant::now() + d),
        }
    }
}

impl From<Duration> for Timeout {
    fn from(d: Duration) -> Self {
        Timeout::Millis(d.as_millis().min(u128::from(u32::MAX)) as u32)
    }
}

/// An absolute point on the monotonic clock, or never.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    pub fn never() -> Self {
        Deadline { at: None }
    }

    pub fn is_never(&self) -> bool {
        self.at.is_none()
    }

    /// Time left before the deadline. `None` for a deadline that never
    /// arrives, `Some(ZERO)` once it has passed.
    pub fn remaining(&self) -> Option<Duration> {
        self.at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn has_passed(&self) -> bool {
        matches!(self.remaining(), Some(left) if left.is_zero())
    }
}

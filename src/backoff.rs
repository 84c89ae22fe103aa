//! # Restart Backoff
//!
//! Delay policy applied before a watch is re-registered after a transport error.
//!
//! The watch task asks the policy for the next delay and sleeps on tokio's
//! clock, so retry behavior can be tested with a paused runtime instead of
//! real time passing.
//!
//! ## Usage
//!
//! ```rust
//! use env_secret_controller::backoff::{FixedBackoff, RestartBackoff};
//! use std::time::Duration;
//!
//! let mut backoff = FixedBackoff::new(Duration::from_secs(1));
//! assert_eq!(backoff.next_delay(), Duration::from_secs(1));
//! assert_eq!(backoff.next_delay(), Duration::from_secs(1));
//! ```

use std::time::Duration;

/// Delay policy for re-establishing a failed watch
pub trait RestartBackoff: Send {
    /// Get the delay before the next attempt and advance the policy
    fn next_delay(&mut self) -> Duration;

    /// Reset after a successful (re-)registration
    fn reset(&mut self);
}

/// The same delay before every attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedBackoff {
    delay: Duration,
}

impl FixedBackoff {
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl RestartBackoff for FixedBackoff {
    fn next_delay(&mut self) -> Duration {
        self.delay
    }

    fn reset(&mut self) {}
}

/// Fibonacci backoff capped at a maximum
///
/// Sequence for `new(1s, 10s)`: 1s, 1s, 2s, 3s, 5s, 8s, 10s (max).
/// Used for watch restarts when `WATCH_RESTART_MAX_DELAY_SECS` is set;
/// otherwise the controller uses `FixedBackoff`.
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    min: Duration,
    prev: Duration,
    current: Duration,
    max: Duration,
}

impl FibonacciBackoff {
    #[must_use]
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            prev: Duration::ZERO,
            current: min,
            max,
        }
    }
}

impl RestartBackoff for FibonacciBackoff {
    fn next_delay(&mut self) -> Duration {
        let result = self.current;
        let next = self.prev + self.current;
        self.prev = self.current;
        self.current = std::cmp::min(next, self.max);
        result
    }

    fn reset(&mut self) {
        self.prev = Duration::ZERO;
        self.current = self.min;
    }
}

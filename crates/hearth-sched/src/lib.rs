//! Timing primitives and the cooperative task scheduler.
//!
//! Everything here is driven by an explicit `now_ms` argument so callers can
//! run against the real clock in production and a simulated clock in tests.

pub mod backoff;
pub mod scheduler;
pub mod timing;

pub use backoff::ExponentialBackoff;
pub use scheduler::{Scheduler, Task, TaskError, TaskStats};
pub use timing::{IntervalTimer, Timer};

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch on the real clock.
pub fn now_ms() -> u64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(dur) => dur.as_millis() as u64,
        Err(_) => 0,
    }
}

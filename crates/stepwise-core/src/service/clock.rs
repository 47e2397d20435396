//! Clock capability for the `time` tool.

use chrono::{DateTime, FixedOffset};

/// Source of the current wall-clock time, in the local offset.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<FixedOffset>;
}

/// A clock frozen at one instant. Useful for deterministic tests and replays.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<FixedOffset>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<FixedOffset> {
        self.0
    }
}
